// Risk Scoring
// Hand-tuned rule cascade turning stylometric markers into a 0-100 risk score.
// Brackets within one signal are ordered strictest-first; only the first match applies.

use crate::models::TextMetrics;

const BASE_SCORE: f64 = 50.0;

fn burstiness_adjustment(burstiness: f64) -> f64 {
    if burstiness < 3.0 {
        20.0
    } else if burstiness < 5.0 {
        10.0
    } else if burstiness > 8.0 {
        -15.0
    } else {
        0.0
    }
}

fn perplexity_adjustment(perplexity: f64) -> f64 {
    if perplexity < 0.35 {
        20.0
    } else if perplexity < 0.45 {
        10.0
    } else if perplexity > 0.55 {
        -10.0
    } else {
        0.0
    }
}

fn connector_adjustment(count: usize) -> f64 {
    if count > 5 {
        15.0
    } else if count > 3 {
        8.0
    } else if count == 0 {
        -5.0
    } else {
        0.0
    }
}

fn variance_adjustment(variance: f64) -> f64 {
    if variance < 30.0 {
        15.0
    } else if variance < 50.0 {
        8.0
    } else if variance > 100.0 {
        -10.0
    } else {
        0.0
    }
}

fn symmetry_adjustment(symmetry: f64) -> f64 {
    if symmetry > 0.4 {
        10.0
    } else if symmetry > 0.25 {
        5.0
    } else {
        0.0
    }
}

fn uniformity_adjustment(uniformity: f64) -> f64 {
    if uniformity > 0.8 {
        10.0
    } else if uniformity > 0.6 {
        5.0
    } else {
        0.0
    }
}

fn diversity_adjustment(diversity: f64) -> f64 {
    if diversity < 0.35 {
        10.0
    } else if diversity > 0.55 {
        -5.0
    } else {
        0.0
    }
}

/// Composite AI risk in [0, 100]. Reads every field except `ai_risk_score` itself.
pub fn calculate_ai_risk_score(metrics: &TextMetrics) -> f64 {
    let score = BASE_SCORE
        + burstiness_adjustment(metrics.burstiness)
        + perplexity_adjustment(metrics.perplexity_proxy)
        + connector_adjustment(metrics.ai_connectors_count)
        + variance_adjustment(metrics.sentence_length_variance)
        + symmetry_adjustment(metrics.structural_symmetry_score)
        + uniformity_adjustment(metrics.paragraph_uniformity)
        + diversity_adjustment(metrics.lexical_diversity);

    score.clamp(0.0, 100.0)
}
