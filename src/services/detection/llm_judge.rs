// LLM Judge
// Sends a text span plus its local metrics to a language model and parses a
// structured verdict. Malformed output degrades to a low-confidence fallback;
// only credential and connectivity failures are returned as errors.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::{Category, Confidence, HeatmapSegment, JudgeVerdict, SourceProbabilities, TextMetrics};
use crate::services::providers::{GenerateRequest, ProviderClient, ProviderStrategy};
use crate::services::text_processor::excerpt;

use super::error::{classify_provider_error, DetectionError, ProviderFailure};

const JUDGE_MAX_TOKENS: i32 = 4096;
const FALLBACK_EXCERPT_CHARS: usize = 100;
const FALLBACK_SCORE: f64 = 0.5;

const JUDGE_SYSTEM_PROMPT: &str = r#"Eres un perito en lingüística forense computacional. Tu tarea es estimar si un fragmento de texto académico fue escrito por un modelo de lenguaje (ChatGPT, Gemini, Claude, Llama) o por una persona.

Contexto de referencia (solo descriptivo, no lo cites como fuente):
- Turnitin AIW-2 busca baja perplejidad combinada con poca variación en la longitud de las oraciones.
- Turnitin AIR-1 busca paráfrasis mecánica por sustitución de sinónimos y texto pasado por "humanizadores".
- Compilatio Magister+ busca reformulaciones profundas que conservan la estructura semántica, plagio semántico y artefactos de traducción automática.
- Los conectores de transición repetidos ("además", "sin embargo", "por lo tanto", "cabe destacar", "furthermore", "moreover", "in conclusion") son típicos de texto generado.

Usa las métricas locales que te entregamos como apoyo: una burstiness menor que 4 o una perplejidad menor que 0.4 refuerzan la sospecha, pero un texto humano bien escrito también puede tener buenas métricas. Sé estricto pero justo.

Responde SOLO con un objeto JSON con esta forma exacta:
{
  "score": número entre 0.0 y 1.0 (probabilidad de que sea IA),
  "category": "A" | "B" | "C" | "D" (A=humano, B=probablemente humano, C=probablemente IA, D=IA),
  "confidence": "Low" | "Medium" | "High",
  "signals": ["observación breve", "..."],
  "heatmap": [{ "text": "oración o frase del fragmento", "probability": número entre 0.0 y 1.0 }],
  "sourceProbabilities": { "chatgpt": 0-100, "gemini": 0-100, "claude": 0-100 },
  "turnitinIndicators": { "aiw2_score": 0-100, "air1_paraphrase_detected": booleano, "bypasser_detected": booleano },
  "compilatioIndicators": { "deep_reformulation": booleano, "semantic_plagiarism_score": 0-100, "translation_artifacts": booleano }
}
El "heatmap" debe recorrer el fragmento en orden, oración por oración, resaltando las más sospechosas. Escribe las señales en el idioma del texto."#;

/// Anything that can render an AI-authorship verdict for one span.
#[async_trait]
pub trait AiJudge: Send + Sync {
    async fn judge(&self, text: &str, metrics: &TextMetrics) -> Result<JudgeVerdict, DetectionError>;
}

/// Judge backed by the HTTP providers in `ProviderClient`.
pub struct LlmJudge {
    client: ProviderClient,
    strategy: ProviderStrategy,
    temperature: f64,
}

impl LlmJudge {
    pub fn new(client: ProviderClient, strategy: ProviderStrategy) -> Self {
        Self {
            client,
            strategy,
            temperature: 0.1,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn strategy(&self) -> &ProviderStrategy {
        &self.strategy
    }
}

#[async_trait]
impl AiJudge for LlmJudge {
    async fn judge(&self, text: &str, metrics: &TextMetrics) -> Result<JudgeVerdict, DetectionError> {
        if !self.strategy.has_credentials() {
            return Err(DetectionError::Config("no API key configured".to_string()));
        }

        let request = GenerateRequest {
            system: JUDGE_SYSTEM_PROMPT.to_string(),
            user: build_user_prompt(text, metrics),
            temperature: self.temperature,
            max_tokens: JUDGE_MAX_TOKENS,
            json_mode: true,
        };

        match self.client.generate(&self.strategy, &request).await {
            Ok(chat) => match parse_verdict(&chat.content) {
                Ok(verdict) => {
                    info!(
                        "[LLM_JUDGE] verdict provider={} score={:.3} category={} latency_ms={}",
                        chat.provider, verdict.score, verdict.category, chat.latency_ms
                    );
                    Ok(verdict)
                }
                Err(reason) => {
                    warn!("[LLM_JUDGE] unusable verdict from {}: {}", chat.provider, reason);
                    Ok(fallback_verdict(text, &reason))
                }
            },
            Err(e) => match classify_provider_error(e) {
                ProviderFailure::Fatal(err) => {
                    warn!("[LLM_JUDGE] fatal provider failure: {}", err);
                    Err(err)
                }
                ProviderFailure::Degraded(reason) => {
                    warn!("[LLM_JUDGE] provider hiccup, using fallback verdict: {}", reason);
                    Ok(fallback_verdict(text, &reason))
                }
            },
        }
    }
}

/// Local metrics go first as decision aids, then the span itself.
pub fn build_user_prompt(text: &str, metrics: &TextMetrics) -> String {
    format!(
        "=== MÉTRICAS LOCALES ===\n\
         - Burstiness: {:.2} (< 4.0 sugiere oraciones uniformes)\n\
         - Perplejidad (proxy): {:.2} (< 0.4 sugiere texto predecible)\n\
         - Varianza de longitud de oración: {:.2} (< 50 es sospechoso)\n\
         - Simetría estructural: {:.2} (> 0.3 indica construcciones paralelas)\n\
         - Uniformidad de párrafos: {:.2} (> 0.7 es sospechoso)\n\
         - Conectores típicos de IA: {} (> 3 es sospechoso)\n\
         - Diversidad léxica: {:.2} (< 0.4 es sospechoso)\n\
         - Riesgo local compuesto: {:.0}/100\n\n\
         === TEXTO A ANALIZAR ===\n\"{}\"\n\n\
         Devuelve únicamente el JSON solicitado.",
        metrics.burstiness,
        metrics.perplexity_proxy,
        metrics.sentence_length_variance,
        metrics.structural_symmetry_score,
        metrics.paragraph_uniformity,
        metrics.ai_connectors_count,
        metrics.lexical_diversity,
        metrics.ai_risk_score,
        text
    )
}

/// Strip markdown fences and surrounding prose, keeping the outermost object.
pub fn extract_json(content: &str) -> Result<&str, String> {
    let content = content.trim();
    let start = content.find('{').ok_or_else(|| "No JSON in response".to_string())?;
    let end = content.rfind('}').ok_or_else(|| "Invalid JSON response".to_string())?;
    if end < start {
        return Err("Invalid JSON response".to_string());
    }
    Ok(&content[start..=end])
}

/// Parse and sanity-check a judge response.
pub fn parse_verdict(content: &str) -> Result<JudgeVerdict, String> {
    let json_str = extract_json(content)?;
    let mut verdict: JudgeVerdict =
        serde_json::from_str(json_str).map_err(|e| format!("JSON parse error: {}", e))?;

    if !verdict.score.is_finite() {
        return Err("score is not a finite number".to_string());
    }
    verdict.score = verdict.score.clamp(0.0, 1.0);

    for segment in &mut verdict.heatmap {
        segment.probability = if segment.probability.is_finite() {
            segment.probability.clamp(0.0, 1.0)
        } else {
            verdict.score
        };
    }
    verdict.heatmap.retain(|s| !s.text.trim().is_empty());

    let mut seen = std::collections::HashSet::new();
    verdict
        .signals
        .retain(|s| !s.trim().is_empty() && seen.insert(s.clone()));

    if let Some(probs) = verdict.source_probabilities.as_mut() {
        probs.chatgpt = probs.chatgpt.clamp(0.0, 100.0);
        probs.gemini = probs.gemini.clamp(0.0, 100.0);
        probs.claude = probs.claude.clamp(0.0, 100.0);
    }

    Ok(verdict)
}

/// Neutral, low-confidence verdict used when the judge output is unusable.
pub fn fallback_verdict(text: &str, reason: &str) -> JudgeVerdict {
    JudgeVerdict {
        score: FALLBACK_SCORE,
        category: Category::B,
        confidence: Confidence::Low,
        signals: vec![format!("Error en el análisis del fragmento: {}", reason)],
        heatmap: vec![HeatmapSegment {
            text: excerpt(text, FALLBACK_EXCERPT_CHARS),
            probability: FALLBACK_SCORE,
        }],
        source_probabilities: Some(SourceProbabilities::default()),
        turnitin_indicators: None,
        compilatio_indicators: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "score": 0.82,
        "category": "D",
        "confidence": "High",
        "signals": ["Conectores repetidos", "Conectores repetidos", "Ritmo uniforme"],
        "heatmap": [{"text": "Además, el estudio...", "probability": 0.9}],
        "sourceProbabilities": {"chatgpt": 70, "gemini": 20, "claude": 10},
        "turnitinIndicators": {"aiw2_score": 85, "air1_paraphrase_detected": false, "bypasser_detected": true}
    }"#;

    #[test]
    fn test_parse_valid_verdict() {
        let verdict = parse_verdict(VALID).unwrap();
        assert_eq!(verdict.category, Category::D);
        assert_eq!(verdict.confidence, Confidence::High);
        assert_eq!(verdict.signals, vec!["Conectores repetidos", "Ritmo uniforme"]);
        assert_eq!(verdict.source_probabilities.unwrap().chatgpt, 70.0);
        let turnitin = verdict.turnitin_indicators.unwrap();
        assert_eq!(turnitin.aiw2_score, 85.0);
        assert!(turnitin.bypasser_detected);
        assert!(verdict.compilatio_indicators.is_none());
    }

    #[test]
    fn test_parse_fenced_verdict() {
        let fenced = format!("```json\n{}\n```", VALID);
        assert!(parse_verdict(&fenced).is_ok());
        let prose = format!("Aquí está el análisis: {} Saludos.", VALID);
        assert!(parse_verdict(&prose).is_ok());
    }

    #[test]
    fn test_parse_rejects_bad_shape() {
        assert!(parse_verdict("no json at all").is_err());
        assert!(parse_verdict(r#"{"score": 0.4}"#).is_err());
        assert!(parse_verdict(r#"{"score":0.4,"category":"Z","confidence":"High","signals":[],"heatmap":[]}"#).is_err());
        assert!(parse_verdict("} {").is_err());
    }

    #[test]
    fn test_parse_clamps_out_of_range() {
        let json = r#"{"score":1.7,"category":"D","confidence":"High","signals":[],"heatmap":[{"text":"x","probability":-2}],"sourceProbabilities":{"chatgpt":140,"gemini":0,"claude":0}}"#;
        let verdict = parse_verdict(json).unwrap();
        assert_eq!(verdict.score, 1.0);
        assert_eq!(verdict.heatmap[0].probability, 0.0);
        assert_eq!(verdict.source_probabilities.unwrap().chatgpt, 100.0);
    }

    #[test]
    fn test_fallback_verdict_shape() {
        let text = "x".repeat(500);
        let verdict = fallback_verdict(&text, "JSON parse error");
        assert_eq!(verdict.score, 0.5);
        assert_eq!(verdict.category, Category::B);
        assert_eq!(verdict.confidence, Confidence::Low);
        assert!(verdict.signals[0].contains("JSON parse error"));
        assert_eq!(verdict.heatmap.len(), 1);
        assert_eq!(verdict.heatmap[0].text.chars().count(), 103);
    }

    #[test]
    fn test_user_prompt_embeds_metrics_and_text() {
        let metrics = TextMetrics {
            burstiness: 2.345,
            ai_connectors_count: 4,
            ai_risk_score: 85.0,
            ..TextMetrics::default()
        };
        let prompt = build_user_prompt("Texto de prueba.", &metrics);
        assert!(prompt.contains("Burstiness: 2.35") || prompt.contains("Burstiness: 2.34"));
        assert!(prompt.contains("Conectores típicos de IA: 4"));
        assert!(prompt.contains("85/100"));
        assert!(prompt.contains("\"Texto de prueba.\""));
    }

    #[tokio::test]
    async fn test_judge_without_credentials_is_config_error() {
        use crate::services::providers::{ProviderKind, ProviderRoute};
        let judge = LlmJudge::new(
            ProviderClient::new(),
            ProviderStrategy::single(ProviderRoute::new(ProviderKind::Gemini, None)),
        );
        let err = judge.judge("hola", &TextMetrics::default()).await.unwrap_err();
        assert!(err.is_config());
    }
}
