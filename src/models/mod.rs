// Tesis Forensics Data Models
// Value objects produced by one analysis call; nothing here is persisted.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============ Stylometric Metrics ============

/// Quantitative linguistic markers computed locally from raw text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TextMetrics {
    pub word_count: usize,
    pub sentence_count: usize,
    pub avg_sentence_length: f64,
    /// Population standard deviation of per-sentence word counts.
    pub burstiness: f64,
    /// Raw variance of per-sentence word counts (computed on its own path).
    pub sentence_length_variance: f64,
    pub lexical_diversity: f64,
    pub perplexity_proxy: f64,
    pub structural_symmetry_score: f64,
    pub paragraph_uniformity: f64,
    pub ai_connectors_count: usize,
    /// Flesch-like ease score. Uses characters per word as a syllable proxy,
    /// so it is an approximation rather than a true syllable count.
    pub readability_score: f64,
    /// Composite 0-100 risk; always derived last from the fields above.
    pub ai_risk_score: f64,
}

// ============ Verdict Enums ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    A,
    B,
    C,
    D,
}

impl Category {
    /// Band an AI probability with strict `>` against 0.3 / 0.6 / 0.8.
    pub fn from_score(score: f64) -> Self {
        if score > 0.8 {
            Self::D
        } else if score > 0.6 {
            Self::C
        } else if score > 0.3 {
            Self::B
        } else {
            Self::A
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

// ============ Judge Output ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapSegment {
    pub text: String,
    pub probability: f64,
}

/// Per-vendor likelihoods in percent; each is independent and need not sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct SourceProbabilities {
    #[serde(default)]
    pub chatgpt: f64,
    #[serde(default)]
    pub gemini: f64,
    #[serde(default)]
    pub claude: f64,
}

impl SourceProbabilities {
    pub fn add(&mut self, other: &SourceProbabilities) {
        self.chatgpt += other.chatgpt;
        self.gemini += other.gemini;
        self.claude += other.claude;
    }

    pub fn averaged(&self, count: usize) -> SourceProbabilities {
        let n = count.max(1) as f64;
        SourceProbabilities {
            chatgpt: (self.chatgpt / n).round(),
            gemini: (self.gemini / n).round(),
            claude: (self.claude / n).round(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TurnitinIndicators {
    #[serde(default, alias = "aiw2Score")]
    pub aiw2_score: f64,
    #[serde(default, alias = "air1ParaphraseDetected")]
    pub air1_paraphrase_detected: bool,
    #[serde(default, alias = "bypasserDetected")]
    pub bypasser_detected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CompilatioIndicators {
    #[serde(default, alias = "deepReformulation")]
    pub deep_reformulation: bool,
    #[serde(default, alias = "semanticPlagiarismScore")]
    pub semantic_plagiarism_score: f64,
    #[serde(default, alias = "translationArtifacts")]
    pub translation_artifacts: bool,
}

/// Verdict for one judged span, before document-level metrics are attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeVerdict {
    pub score: f64,
    pub category: Category,
    pub confidence: Confidence,
    pub signals: Vec<String>,
    pub heatmap: Vec<HeatmapSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_probabilities: Option<SourceProbabilities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turnitin_indicators: Option<TurnitinIndicators>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compilatio_indicators: Option<CompilatioIndicators>,
}

// ============ Detection Result ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiDetectionResult {
    /// Judge-estimated probability of AI authorship, averaged across chunks.
    pub score: f64,
    pub category: Category,
    pub confidence: Confidence,
    pub signals: Vec<String>,
    pub heatmap: Vec<HeatmapSegment>,
    /// Metrics over the whole input, not per chunk.
    pub metrics: TextMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_probabilities: Option<SourceProbabilities>,
}

impl AiDetectionResult {
    pub fn from_verdict(verdict: JudgeVerdict, metrics: TextMetrics) -> Self {
        Self {
            score: verdict.score,
            category: verdict.category,
            confidence: verdict.confidence,
            signals: verdict.signals,
            heatmap: verdict.heatmap,
            metrics,
            source_probabilities: verdict.source_probabilities,
        }
    }
}
