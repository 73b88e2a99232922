// Detection Module
// Hybrid AI-authorship detection organized into specialized submodules:
// - metrics: local stylometric measurements over a span of text
// - risk: composite 0-100 risk score from those measurements
// - llm_judge: the LLM-backed judge and its response parsing
// - aggregation: folds per-chunk verdicts into one document result
// - batch: single-shot and chunked orchestration

pub mod aggregation;
pub mod batch;
pub mod error;
pub mod llm_judge;
pub mod metrics;
pub mod risk;

pub use aggregation::BatchAccumulator;
pub use batch::{detect_ai_content, detect_ai_content_batch, detect_ai_content_batch_with_cancel, BatchOptions};
pub use error::{classify_provider_error, DetectionError, ProviderFailure};
pub use llm_judge::{build_user_prompt, extract_json, fallback_verdict, parse_verdict, AiJudge, LlmJudge};
pub use metrics::{
    analyze_text_metrics,
    analyze_text_metrics_with,
    calculate_burstiness,
    calculate_lexical_diversity,
    calculate_paragraph_uniformity,
    calculate_perplexity_proxy,
    calculate_sentence_length_variance,
    count_ai_connectors,
    default_lexicon,
    detect_structural_symmetry,
    ConnectorLexicon,
};
pub use risk::calculate_ai_risk_score;
