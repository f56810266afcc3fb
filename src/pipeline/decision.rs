use std::collections::HashSet;

use lazy_static::lazy_static;
use serde::Serialize;

use crate::pipeline::classify::ClassificationResult;

lazy_static! {
    /// The English accents a decision is normalized over.
    pub static ref RECOGNIZED_ACCENTS: HashSet<&'static str> = HashSet::from([
        "england",
        "american",
        "australia",
        "scotland",
        "ireland",
        "wales",
        "new zealand",
    ]);
}

pub fn is_recognized(label: &str) -> bool {
    RECOGNIZED_ACCENTS.contains(label.to_lowercase().as_str())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccentDecision {
    pub label: String,
    /// Percentage in `[0, 100]`, rounded to two decimals
    pub confidence: f64,
    /// False when no recognized accent carried any probability and the global best was used
    pub normalized: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccentScore {
    pub label: String,
    pub confidence: f64,
}

/// Picks the best recognized English accent and its share of the recognized probability mass.
///
/// Labels outside the recognized set are ignored. When none of the recognized
/// labels carries probability the globally most likely label wins with its raw
/// probability. Equal probabilities resolve to the label that comes first.
pub fn decide(result: &ClassificationResult) -> AccentDecision {
    let recognized: Vec<(&str, f64)> = recognized_pairs(result);
    let total: f64 = recognized.iter().map(|(_, p)| p).sum();

    if total > 0.0 {
        if let Some((label, score)) = first_max(recognized.iter().copied()) {
            return AccentDecision {
                label: label.to_string(),
                confidence: round_percent(score / total),
                normalized: true,
            };
        }
    }

    let (label, score) = first_max(result.iter().map(|(label, p)| (label, f64::from(p))))
        .unwrap_or_else(|| (result.labels()[0].as_str(), f64::from(result.probabilities()[0])));
    AccentDecision {
        label: label.to_string(),
        confidence: round_percent(score),
        normalized: false,
    }
}

/// Share of every recognized label in the recognized probability mass, best first.
///
/// Empty when the recognized labels carry no probability.
pub fn normalized_scores(result: &ClassificationResult) -> Vec<AccentScore> {
    let recognized = recognized_pairs(result);
    let total: f64 = recognized.iter().map(|(_, p)| p).sum();
    if total <= 0.0 {
        return Vec::new();
    }
    let mut scores: Vec<AccentScore> = recognized
        .into_iter()
        .map(|(label, p)| AccentScore {
            label: label.to_string(),
            confidence: round_percent(p / total),
        })
        .collect();
    // Stable, so ties keep their input order
    scores.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    scores
}

fn recognized_pairs(result: &ClassificationResult) -> Vec<(&str, f64)> {
    result
        .iter()
        .filter(|(label, _)| is_recognized(label))
        .map(|(label, p)| (label, f64::from(p)))
        .collect()
}

// Iterator::max_by keeps the last of equal elements, ties must go to the first
fn first_max<'a>(pairs: impl Iterator<Item = (&'a str, f64)>) -> Option<(&'a str, f64)> {
    pairs.fold(None, |best, (label, p)| match best {
        _ if p.is_nan() => best,
        Some((_, best_p)) if p <= best_p => best,
        _ => Some((label, p)),
    })
}

fn round_percent(fraction: f64) -> f64 {
    round_hundredths(fraction * 100.0)
}

// Decimal formatting is correctly rounded with ties to even, unlike scaling by 100 and `round`
fn round_hundredths(value: f64) -> f64 {
    format!("{:.2}", value).parse().unwrap_or(value)
}
