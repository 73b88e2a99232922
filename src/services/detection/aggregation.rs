// Aggregation Logic
// Folds per-chunk judge verdicts into one document-level detection result

use std::collections::HashSet;

use crate::models::{
    AiDetectionResult, Category, Confidence, HeatmapSegment, JudgeVerdict, SourceProbabilities, TextMetrics,
};
use crate::services::text_processor::excerpt;

const FALLBACK_HEATMAP_CHARS: usize = 200;

/// Running totals for one batch run. Local to a single invocation.
#[derive(Debug, Default)]
pub struct BatchAccumulator {
    total_chunks: usize,
    successful_chunks: usize,
    score_sum: f64,
    signals: Vec<String>,
    seen_signals: HashSet<String>,
    heatmap: Vec<HeatmapSegment>,
    source_totals: SourceProbabilities,
}

impl BatchAccumulator {
    pub fn new(total_chunks: usize) -> Self {
        Self {
            total_chunks,
            ..Self::default()
        }
    }

    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    pub fn successful_chunks(&self) -> usize {
        self.successful_chunks
    }

    /// Fold one successful chunk verdict. Signal order is first-seen order.
    pub fn add(&mut self, verdict: JudgeVerdict) {
        self.score_sum += verdict.score;
        self.successful_chunks += 1;

        if let Some(probs) = verdict.source_probabilities.as_ref() {
            self.source_totals.add(probs);
        }

        self.heatmap.extend(verdict.heatmap);

        for signal in verdict.signals {
            if self.seen_signals.insert(signal.clone()) {
                self.signals.push(signal);
            }
        }
    }

    /// Mean over successful chunks only; divides by one when nothing succeeded.
    pub fn average_score(&self) -> f64 {
        self.score_sum / self.successful_chunks.max(1) as f64
    }

    /// High when strictly more than half of the chunks succeeded.
    pub fn confidence(&self) -> Confidence {
        if self.successful_chunks as f64 > self.total_chunks as f64 / 2.0 {
            Confidence::High
        } else {
            Confidence::Medium
        }
    }

    /// `original_text` seeds the synthetic heatmap row when no chunk produced one.
    pub fn finish(self, original_text: &str, metrics: TextMetrics) -> AiDetectionResult {
        let score = self.average_score();
        let confidence = self.confidence();
        let source_probabilities = self.source_totals.averaged(self.successful_chunks);

        let heatmap = if self.heatmap.is_empty() {
            vec![HeatmapSegment {
                text: excerpt(original_text, FALLBACK_HEATMAP_CHARS),
                probability: score,
            }]
        } else {
            self.heatmap
        };

        AiDetectionResult {
            score,
            category: Category::from_score(score),
            confidence,
            signals: self.signals,
            heatmap,
            metrics,
            source_probabilities: Some(source_probabilities),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(score: f64, signals: &[&str], heat: &[&str]) -> JudgeVerdict {
        JudgeVerdict {
            score,
            category: Category::from_score(score),
            confidence: Confidence::High,
            signals: signals.iter().map(|s| s.to_string()).collect(),
            heatmap: heat
                .iter()
                .map(|t| HeatmapSegment { text: t.to_string(), probability: score })
                .collect(),
            source_probabilities: Some(SourceProbabilities { chatgpt: 60.0, gemini: 30.0, claude: 10.0 }),
            turnitin_indicators: None,
            compilatio_indicators: None,
        }
    }

    #[test]
    fn test_aggregate_partial_success() {
        let mut acc = BatchAccumulator::new(3);
        acc.add(verdict(0.9, &["uniforme", "conectores"], &["uno"]));
        acc.add(verdict(0.7, &["conectores", "simetría"], &["tres"]));

        let result = acc.finish("texto", TextMetrics::default());
        assert!((result.score - 0.8).abs() < 1e-9);
        assert_eq!(result.category, Category::C);
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.signals, vec!["uniforme", "conectores", "simetría"]);
        let heat: Vec<&str> = result.heatmap.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(heat, vec!["uno", "tres"]);
        assert_eq!(result.source_probabilities.unwrap().chatgpt, 60.0);
    }

    #[test]
    fn test_exactly_half_is_medium() {
        let mut acc = BatchAccumulator::new(4);
        acc.add(verdict(0.2, &[], &["a"]));
        acc.add(verdict(0.4, &[], &["b"]));
        assert_eq!(acc.confidence(), Confidence::Medium);
    }

    #[test]
    fn test_all_failed_uses_fallback_heatmap() {
        let acc = BatchAccumulator::new(2);
        let text = "z".repeat(450);
        let result = acc.finish(&text, TextMetrics::default());
        assert_eq!(result.score, 0.0);
        assert_eq!(result.category, Category::A);
        assert_eq!(result.confidence, Confidence::Medium);
        assert_eq!(result.heatmap.len(), 1);
        assert_eq!(result.heatmap[0].text, format!("{}...", "z".repeat(200)));
        assert_eq!(result.heatmap[0].probability, 0.0);
        assert!(result.signals.is_empty());
    }

    #[test]
    fn test_empty_chunk_heatmaps_fall_back() {
        let mut acc = BatchAccumulator::new(1);
        acc.add(verdict(0.65, &["s"], &[]));
        let result = acc.finish("breve", TextMetrics::default());
        assert_eq!(result.heatmap, vec![HeatmapSegment { text: "breve...".to_string(), probability: 0.65 }]);
        assert_eq!(result.category, Category::C);
    }
}
