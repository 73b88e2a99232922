// Stylometric Metrics Engine
// Pure functions over raw text; no I/O. Degenerate input yields zeroed metrics.

use crate::models::TextMetrics;
use crate::services::text_processor::{
    lowercase_words, match_sentences, split_paragraphs, split_sentences, whitespace_word_count,
};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use super::risk::calculate_ai_risk_score;

/// Transition phrases over-used by generated text (English).
pub const ENGLISH_CONNECTORS: &[&str] = &[
    "furthermore", "moreover", "in conclusion", "it is important to note",
    "additionally", "consequently", "subsequently", "overall", "on the other hand",
    "as a result", "in other words", "for instance", "specifically", "notably",
    "in summary", "to summarize", "in essence", "importantly", "significantly",
];

/// Transition phrases over-used by generated text (Spanish).
pub const SPANISH_CONNECTORS: &[&str] = &[
    "además", "sin embargo", "por lo tanto", "en consecuencia", "por consiguiente",
    "no obstante", "de hecho", "en primer lugar", "en segundo lugar", "por otro lado",
    "en conclusión", "es importante destacar", "cabe destacar", "es importante señalar",
    "resulta evidente", "asimismo", "por ende", "en resumen", "en síntesis",
    "como resultado", "de esta manera", "en este sentido", "vale la pena mencionar",
    "es necesario señalar", "conviene destacar",
];

const ARTICLES: &[&str] = &["el", "la", "los", "las", "un", "una", "the", "a", "an"];
const COPULAS: &[&str] = &["es", "son", "está", "están", "is", "are", "was", "were"];

/// Perplexity proxy returned when there are too few words to measure.
const PERPLEXITY_DEFAULT: f64 = 0.5;
const PERPLEXITY_MIN_WORDS: usize = 10;

/// Case-insensitive, word-boundary matcher for a list of connector phrases.
#[derive(Debug, Clone)]
pub struct ConnectorLexicon {
    phrases: Vec<String>,
    patterns: Vec<Regex>,
}

impl ConnectorLexicon {
    pub fn new<I, S>(phrases: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut out_phrases = Vec::new();
        let mut patterns = Vec::new();

        for phrase in phrases {
            let phrase: String = phrase.into().trim().to_lowercase();
            if phrase.is_empty() || !seen.insert(phrase.clone()) {
                continue;
            }
            patterns.push(Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&phrase)))?);
            out_phrases.push(phrase);
        }

        Ok(Self {
            phrases: out_phrases,
            patterns,
        })
    }

    /// Built-in bilingual list plus caller-supplied extras.
    pub fn with_extra<S: AsRef<str>>(extra: &[S]) -> Result<Self, regex::Error> {
        let base = ENGLISH_CONNECTORS.iter().chain(SPANISH_CONNECTORS.iter()).map(|s| s.to_string());
        Self::new(base.chain(extra.iter().map(|s| s.as_ref().to_string())))
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// Total occurrences summed across every phrase.
    pub fn count(&self, text: &str) -> usize {
        self.patterns.iter().map(|re| re.find_iter(text).count()).sum()
    }
}

impl Default for ConnectorLexicon {
    fn default() -> Self {
        default_lexicon().clone()
    }
}

pub fn default_lexicon() -> &'static ConnectorLexicon {
    static LEXICON: OnceLock<ConnectorLexicon> = OnceLock::new();
    LEXICON.get_or_init(|| {
        ConnectorLexicon::with_extra::<&str>(&[]).expect("built-in connector lexicon")
    })
}

fn sentence_word_counts(text: &str) -> Vec<usize> {
    split_sentences(text)
        .iter()
        .map(|s| whitespace_word_count(s).max(1))
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len().max(1) as f64
}

fn population_variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len().max(1) as f64
}

/// Standard deviation of sentence lengths in words; 0 for one sentence or fewer.
pub fn calculate_burstiness(text: &str) -> f64 {
    let lengths: Vec<f64> = sentence_word_counts(text).into_iter().map(|n| n as f64).collect();
    if lengths.len() <= 1 {
        return 0.0;
    }
    population_variance(&lengths).sqrt()
}

/// Raw variance of sentence lengths; lower means more uniform.
pub fn calculate_sentence_length_variance(text: &str) -> f64 {
    let lengths: Vec<f64> = sentence_word_counts(text).into_iter().map(|n| n as f64).collect();
    if lengths.len() <= 1 {
        return 0.0;
    }
    population_variance(&lengths)
}

/// Type-token ratio over lower-cased word tokens.
pub fn calculate_lexical_diversity(text: &str) -> f64 {
    let words = lowercase_words(text);
    if words.is_empty() {
        return 0.0;
    }
    let unique: HashSet<&str> = words.iter().map(String::as_str).collect();
    unique.len() as f64 / words.len() as f64
}

fn classify_leading_word(word: &str) -> &'static str {
    if word.chars().next().is_some_and(char::is_uppercase) {
        return "NOUN";
    }
    let lower = word.to_lowercase();
    if ARTICLES.contains(&lower.as_str()) {
        "ART"
    } else if COPULAS.contains(&lower.as_str()) {
        "VERB"
    } else {
        "OTHER"
    }
}

/// Share of sentences whose three-word opening shape repeats an earlier one.
/// Needs at least three terminated sentences.
pub fn detect_structural_symmetry(text: &str) -> f64 {
    let sentences = match_sentences(text);
    if sentences.len() < 3 {
        return 0.0;
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut repeats = 0usize;

    for sentence in &sentences {
        let shape = sentence
            .split_whitespace()
            .take(3)
            .map(classify_leading_word)
            .collect::<Vec<_>>()
            .join("-");
        if !seen.insert(shape) {
            repeats += 1;
        }
    }

    (repeats as f64 / sentences.len() as f64).min(1.0)
}

/// `1 - cv` of paragraph word counts, floored at 0. Needs two or more paragraphs.
pub fn calculate_paragraph_uniformity(text: &str) -> f64 {
    let lengths: Vec<f64> = split_paragraphs(text)
        .iter()
        .map(|p| whitespace_word_count(p) as f64)
        .collect();
    if lengths.len() < 2 {
        return 0.0;
    }

    let m = mean(&lengths);
    if m <= 0.0 {
        return 0.0;
    }
    let cv = population_variance(&lengths).sqrt() / m;
    (1.0 - cv).max(0.0)
}

pub fn count_ai_connectors(text: &str, lexicon: &ConnectorLexicon) -> usize {
    lexicon.count(text)
}

/// `0.4 * word-length diversity + 0.6 * bigram diversity`.
pub fn calculate_perplexity_proxy(text: &str) -> f64 {
    let words = lowercase_words(text);
    if words.len() < PERPLEXITY_MIN_WORDS {
        return PERPLEXITY_DEFAULT;
    }

    let unique_lengths: HashSet<usize> = words.iter().map(|w| w.chars().count()).collect();
    let length_score = (unique_lengths.len() as f64 / 15.0).min(1.0);

    let bigrams: Vec<(&str, &str)> = words
        .windows(2)
        .map(|pair| (pair[0].as_str(), pair[1].as_str()))
        .collect();
    let unique_bigrams: HashSet<&(&str, &str)> = bigrams.iter().collect();
    let bigram_score = if bigrams.is_empty() {
        PERPLEXITY_DEFAULT
    } else {
        unique_bigrams.len() as f64 / bigrams.len() as f64
    };

    length_score * 0.4 + bigram_score * 0.6
}

/// Flesch-style ease from average sentence length and characters-per-word / 5.
fn readability(word_count: usize, sentence_count: usize, char_count: usize) -> f64 {
    if word_count == 0 || sentence_count == 0 {
        return 0.0;
    }
    let avg_sentence = word_count as f64 / sentence_count as f64;
    let syllable_proxy = char_count as f64 / word_count as f64 / 5.0;
    206.835 - 1.015 * avg_sentence - 84.6 * syllable_proxy
}

/// Compute every marker with the built-in connector lexicon.
pub fn analyze_text_metrics(text: &str) -> TextMetrics {
    analyze_text_metrics_with(text, default_lexicon())
}

/// Compute every marker with a caller-provided connector lexicon.
pub fn analyze_text_metrics_with(text: &str, lexicon: &ConnectorLexicon) -> TextMetrics {
    if text.trim().is_empty() {
        let mut metrics = TextMetrics::default();
        metrics.ai_risk_score = calculate_ai_risk_score(&metrics);
        return metrics;
    }

    let word_count = whitespace_word_count(text);
    let sentence_count = split_sentences(text).len();

    let mut metrics = TextMetrics {
        word_count,
        sentence_count,
        avg_sentence_length: word_count as f64 / sentence_count as f64,
        burstiness: calculate_burstiness(text),
        sentence_length_variance: calculate_sentence_length_variance(text),
        lexical_diversity: calculate_lexical_diversity(text),
        perplexity_proxy: calculate_perplexity_proxy(text),
        structural_symmetry_score: detect_structural_symmetry(text),
        paragraph_uniformity: calculate_paragraph_uniformity(text),
        ai_connectors_count: count_ai_connectors(text, lexicon),
        readability_score: readability(word_count, sentence_count, text.chars().count()),
        ai_risk_score: 0.0,
    };
    metrics.ai_risk_score = calculate_ai_risk_score(&metrics);
    metrics
}
