// Batch Orchestrator
// Normalises a document, slices it into fixed-size character chunks and judges
// them strictly one after another. A failed chunk is logged and skipped; only a
// credential failure (or cancellation) stops the run.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::models::AiDetectionResult;
use crate::services::config_store::DetectionConfig;
use crate::services::text_processor::{chunk_by_chars, normalize_whitespace, take_chars};

use super::aggregation::BatchAccumulator;
use super::error::DetectionError;
use super::llm_judge::AiJudge;
use super::metrics::{analyze_text_metrics_with, ConnectorLexicon};

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub chunk_size_chars: usize,
    /// Self-imposed pause between consecutive judge calls.
    pub inter_chunk_delay: Duration,
    pub single_shot_max_chars: usize,
    pub lexicon: ConnectorLexicon,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from(&DetectionConfig::default())
    }
}

impl From<&DetectionConfig> for BatchOptions {
    fn from(config: &DetectionConfig) -> Self {
        let lexicon = ConnectorLexicon::with_extra(&config.extra_connectors).unwrap_or_else(|e| {
            warn!("[BATCH] ignoring extra connectors: {}", e);
            ConnectorLexicon::default()
        });
        Self {
            chunk_size_chars: config.chunk_size_chars.max(1),
            inter_chunk_delay: Duration::from_millis(config.inter_chunk_delay_ms),
            single_shot_max_chars: config.single_shot_max_chars.max(1),
            lexicon,
        }
    }
}

impl BatchOptions {
    pub fn with_chunk_size(mut self, chars: usize) -> Self {
        self.chunk_size_chars = chars.max(1);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.inter_chunk_delay = delay;
        self
    }
}

/// Quick analysis: metrics over the whole text, one judge call over its head.
/// Credential and network failures are returned to the caller.
pub async fn detect_ai_content<J>(
    text: &str,
    judge: &J,
    options: &BatchOptions,
) -> Result<AiDetectionResult, DetectionError>
where
    J: AiJudge + ?Sized,
{
    let metrics = analyze_text_metrics_with(text, &options.lexicon);
    let head = take_chars(text, options.single_shot_max_chars);
    let verdict = judge.judge(head, &metrics).await?;
    Ok(AiDetectionResult::from_verdict(verdict, metrics))
}

/// Chunked analysis of a whole document with progress reporting.
///
/// `on_progress(percent, status)` is called before each chunk and once at 100
/// before returning; percentages never decrease.
pub async fn detect_ai_content_batch<J, P>(
    text: &str,
    judge: &J,
    options: &BatchOptions,
    on_progress: P,
) -> Result<AiDetectionResult, DetectionError>
where
    J: AiJudge + ?Sized,
    P: FnMut(u8, &str),
{
    detect_ai_content_batch_with_cancel(text, judge, options, None, on_progress).await
}

/// As [`detect_ai_content_batch`], checking `cancel` before every chunk.
pub async fn detect_ai_content_batch_with_cancel<J, P>(
    text: &str,
    judge: &J,
    options: &BatchOptions,
    cancel: Option<&CancellationToken>,
    on_progress: P,
) -> Result<AiDetectionResult, DetectionError>
where
    J: AiJudge + ?Sized,
    P: FnMut(u8, &str),
{
    let span = info_span!("batch", run_id = %Uuid::new_v4());
    run_batch(text, judge, options, cancel, on_progress)
        .instrument(span)
        .await
}

fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done as f64 / total as f64) * 100.0).round() as u8
}

async fn run_batch<J, P>(
    text: &str,
    judge: &J,
    options: &BatchOptions,
    cancel: Option<&CancellationToken>,
    mut on_progress: P,
) -> Result<AiDetectionResult, DetectionError>
where
    J: AiJudge + ?Sized,
    P: FnMut(u8, &str),
{
    let started = Instant::now();
    let normalized = normalize_whitespace(text);
    let global_metrics = analyze_text_metrics_with(&normalized, &options.lexicon);

    let chunks = chunk_by_chars(&normalized, options.chunk_size_chars);
    let total_chunks = chunks.len();
    info!(
        "[BATCH] starting: {} chars, {} chunks of <= {} chars",
        normalized.chars().count(),
        total_chunks,
        options.chunk_size_chars
    );

    let mut acc = BatchAccumulator::new(total_chunks);

    for (i, chunk) in chunks.iter().enumerate() {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            warn!("[BATCH] cancelled before chunk {}/{}", i + 1, total_chunks);
            return Err(DetectionError::Cancelled);
        }

        on_progress(
            progress_percent(i, total_chunks),
            &format!("Analizando bloque {} de {}...", i + 1, total_chunks),
        );

        let chunk_metrics = analyze_text_metrics_with(chunk, &options.lexicon);

        match judge.judge(chunk, &chunk_metrics).await {
            Ok(verdict) => {
                info!("[BATCH] chunk {}/{} score={:.3}", i + 1, total_chunks, verdict.score);
                acc.add(verdict);
            }
            Err(e @ DetectionError::Config(_)) => {
                warn!("[BATCH] aborting at chunk {}/{}: {}", i + 1, total_chunks, e);
                return Err(e);
            }
            Err(e) => {
                warn!("[BATCH] error analyzing chunk {}/{}, skipping: {}", i + 1, total_chunks, e);
            }
        }

        if i + 1 < total_chunks && !options.inter_chunk_delay.is_zero() {
            tokio::time::sleep(options.inter_chunk_delay).await;
        }
    }

    on_progress(100, "Generando veredicto final...");

    info!(
        "[BATCH] done: {}/{} chunks succeeded, elapsed_ms={}",
        acc.successful_chunks(),
        acc.total_chunks(),
        started.elapsed().as_millis()
    );

    Ok(acc.finish(text, global_metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Confidence, HeatmapSegment, JudgeVerdict, TextMetrics};
    use crate::services::detection::metrics::analyze_text_metrics;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Outcome {
        Score(f64),
        Network,
        Config,
    }

    /// Replays one outcome per call and records what it was asked to judge.
    struct ScriptedJudge {
        script: Vec<Outcome>,
        calls: Mutex<Vec<(usize, TextMetrics)>>,
    }

    impl ScriptedJudge {
        fn new(script: Vec<Outcome>) -> Self {
            Self {
                script,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_lengths(&self) -> Vec<usize> {
            self.calls.lock().unwrap().iter().map(|(len, _)| *len).collect()
        }
    }

    #[async_trait]
    impl AiJudge for ScriptedJudge {
        async fn judge(&self, text: &str, metrics: &TextMetrics) -> Result<JudgeVerdict, DetectionError> {
            let idx = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((text.chars().count(), *metrics));
                calls.len() - 1
            };
            match self.script.get(idx).copied().unwrap_or(Outcome::Score(0.5)) {
                Outcome::Score(score) => Ok(JudgeVerdict {
                    score,
                    category: Category::from_score(score),
                    confidence: Confidence::High,
                    signals: vec![format!("señal {}", idx), "común".to_string()],
                    heatmap: vec![HeatmapSegment {
                        text: format!("segmento {}", idx),
                        probability: score,
                    }],
                    source_probabilities: None,
                    turnitin_indicators: None,
                    compilatio_indicators: None,
                }),
                Outcome::Network => Err(DetectionError::Network("connection refused".to_string())),
                Outcome::Config => Err(DetectionError::Config("no API key configured".to_string())),
            }
        }
    }

    fn fast_options() -> BatchOptions {
        BatchOptions::default().with_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_partial_failure_is_tolerated() {
        let text = "a".repeat(30_000);
        let judge = ScriptedJudge::new(vec![Outcome::Score(0.9), Outcome::Network, Outcome::Score(0.5)]);

        let result = detect_ai_content_batch(&text, &judge, &fast_options(), |_, _| {})
            .await
            .unwrap();

        assert_eq!(judge.call_lengths(), vec![12_000, 12_000, 6_000]);
        assert!((result.score - 0.7).abs() < 1e-9);
        assert_eq!(result.category, Category::C);
        // 2 of 3 is more than half.
        assert_eq!(result.confidence, Confidence::High);
        let heat: Vec<&str> = result.heatmap.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(heat, vec!["segmento 0", "segmento 2"]);
        assert_eq!(result.signals, vec!["señal 0", "común", "señal 2"]);
    }

    #[tokio::test]
    async fn test_exactly_half_success_is_medium() {
        let text = "b".repeat(40);
        let options = fast_options().with_chunk_size(10);
        let judge = ScriptedJudge::new(vec![
            Outcome::Score(0.2),
            Outcome::Network,
            Outcome::Score(0.4),
            Outcome::Network,
        ]);

        let result = detect_ai_content_batch(&text, &judge, &options, |_, _| {})
            .await
            .unwrap();
        assert!((result.score - 0.3).abs() < 1e-9);
        assert_eq!(result.confidence, Confidence::Medium);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_ends_at_100() {
        let text = "c".repeat(30_000);
        let judge = ScriptedJudge::new(vec![]);
        let mut seen: Vec<(u8, String)> = Vec::new();

        detect_ai_content_batch(&text, &judge, &fast_options(), |p, msg| seen.push((p, msg.to_string())))
            .await
            .unwrap();

        let percents: Vec<u8> = seen.iter().map(|(p, _)| *p).collect();
        assert_eq!(percents, vec![0, 33, 67, 100]);
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen[0].1, "Analizando bloque 1 de 3...");
        assert_eq!(seen[3].1, "Generando veredicto final...");
    }

    #[tokio::test]
    async fn test_all_chunks_failing_still_returns_result() {
        let text = format!("{} fin", "d".repeat(300));
        let options = fast_options().with_chunk_size(100);
        let judge = ScriptedJudge::new(vec![Outcome::Network; 4]);

        let result = detect_ai_content_batch(&text, &judge, &options, |_, _| {})
            .await
            .unwrap();

        assert_eq!(result.score, 0.0);
        assert_eq!(result.confidence, Confidence::Medium);
        assert_eq!(result.heatmap.len(), 1);
        assert_eq!(result.heatmap[0].text, format!("{}...", "d".repeat(200)));
        assert!(result.signals.is_empty());
    }

    #[tokio::test]
    async fn test_empty_input_produces_fallback_result() {
        let judge = ScriptedJudge::new(vec![]);
        let mut percents = Vec::new();
        let result = detect_ai_content_batch("   ", &judge, &fast_options(), |p, _| percents.push(p))
            .await
            .unwrap();

        assert!(judge.call_lengths().is_empty());
        assert_eq!(percents, vec![100]);
        assert_eq!(result.score, 0.0);
        assert!(!result.heatmap.is_empty());
        assert_eq!(result.metrics.word_count, 0);
    }

    #[tokio::test]
    async fn test_config_error_aborts_batch() {
        let text = "e".repeat(30_000);
        let judge = ScriptedJudge::new(vec![Outcome::Score(0.9), Outcome::Config, Outcome::Score(0.9)]);

        let err = detect_ai_content_batch(&text, &judge, &fast_options(), |_, _| {})
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert_eq!(judge.call_lengths().len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_before_chunk() {
        let text = "f".repeat(30_000);
        let judge = ScriptedJudge::new(vec![]);
        let token = CancellationToken::new();
        token.cancel();

        let err = detect_ai_content_batch_with_cancel(&text, &judge, &fast_options(), Some(&token), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, DetectionError::Cancelled));
        assert!(judge.call_lengths().is_empty());
    }

    #[tokio::test]
    async fn test_global_metrics_use_normalized_text() {
        let text = "La tesis es clara.\n\n\nSin embargo,   falta método.\tOtra frase aquí.";
        let judge = ScriptedJudge::new(vec![Outcome::Score(0.4)]);

        let result = detect_ai_content_batch(text, &judge, &fast_options(), |_, _| {})
            .await
            .unwrap();
        let expected = analyze_text_metrics(&normalize_whitespace(text));
        assert_eq!(result.metrics, expected);
        assert_eq!(result.metrics.paragraph_uniformity, 0.0);

        let calls = judge.calls.lock().unwrap();
        assert_eq!(calls[0].1, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_only_between_chunks() {
        let text = "g".repeat(30);
        let options = BatchOptions::default()
            .with_chunk_size(10)
            .with_delay(Duration::from_millis(300));
        let judge = ScriptedJudge::new(vec![]);

        let started = tokio::time::Instant::now();
        detect_ai_content_batch(&text, &judge, &options, |_, _| {})
            .await
            .unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(600));
        assert!(elapsed < Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_single_shot_uses_head_and_propagates_errors() {
        let text = "h".repeat(8_000);
        let judge = ScriptedJudge::new(vec![Outcome::Score(0.85)]);
        let result = detect_ai_content(&text, &judge, &fast_options()).await.unwrap();
        assert_eq!(judge.call_lengths(), vec![5_000]);
        assert_eq!(result.category, Category::D);
        assert_eq!(result.metrics, analyze_text_metrics(&text));

        let failing = ScriptedJudge::new(vec![Outcome::Network]);
        let err = detect_ai_content(&text, &failing, &fast_options()).await.unwrap_err();
        assert!(err.is_network());
    }

    #[test]
    fn test_options_from_config() {
        let config = DetectionConfig {
            chunk_size_chars: 0,
            inter_chunk_delay_ms: 150,
            extra_connectors: vec!["para concluir".to_string()],
            ..DetectionConfig::default()
        };
        let options = BatchOptions::from(&config);
        assert_eq!(options.chunk_size_chars, 1);
        assert_eq!(options.inter_chunk_delay, Duration::from_millis(150));
        assert!(options.lexicon.phrases().iter().any(|p| p == "para concluir"));
    }
}
