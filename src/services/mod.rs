// Tesis Forensics Core Services

pub mod text_processor;
pub mod config_store;
pub mod providers;
pub mod detection;

pub use text_processor::*;
pub use config_store::*;
pub use providers::*;

pub use detection::{
    analyze_text_metrics,
    calculate_ai_risk_score,
    detect_ai_content,
    detect_ai_content_batch,
    detect_ai_content_batch_with_cancel,
    AiJudge,
    BatchOptions,
    DetectionError,
    LlmJudge,
};
