use std::fmt::Write;

use crate::pipeline::decision::{AccentDecision, AccentScore};

pub fn headline(decision: &AccentDecision) -> String {
    format!(
        "Predicted Accent: {}\nConfidence: {:?}%",
        decision.label, decision.confidence
    )
}

pub fn explanation(decision: &AccentDecision) -> String {
    if decision.normalized {
        format!(
            "Normalized among English accents, this sample best matches {label} with {confidence:?}% confidence. \
             The classifier detected characteristics common to {label}-accented English speech.",
            label = decision.label,
            confidence = decision.confidence
        )
    } else {
        format!(
            "No recognized English accent was present in the classifier output; \
             the closest overall match is {} with {:?}% raw confidence.",
            decision.label, decision.confidence
        )
    }
}

/// Full text report: headline, explanation and the per-accent breakdown.
pub fn render(decision: &AccentDecision, scores: &[AccentScore], transcript: Option<&str>) -> String {
    let mut out = format!("{}\n\n{}\n", headline(decision), explanation(decision));
    if !scores.is_empty() {
        out.push_str("\nEnglish accent breakdown:\n");
        for score in scores {
            let _ = writeln!(out, "  {:<12} {:>6.2}%", score.label, score.confidence);
        }
    }
    if let Some(transcript) = transcript.filter(|text| !text.is_empty()) {
        let _ = write!(out, "\nTranscript:\n  {}\n", transcript);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(normalized: bool) -> AccentDecision {
        AccentDecision {
            label: "england".to_string(),
            confidence: 62.5,
            normalized,
        }
    }

    #[test]
    fn headline_shows_label_and_confidence() {
        assert_eq!(
            headline(&decision(true)),
            "Predicted Accent: england\nConfidence: 62.5%"
        );
    }

    #[test]
    fn whole_percentages_keep_their_decimal() {
        let decision = AccentDecision {
            label: "mandarin".to_string(),
            confidence: 60.0,
            normalized: false,
        };
        assert_eq!(headline(&decision), "Predicted Accent: mandarin\nConfidence: 60.0%");
        assert!(explanation(&decision).contains("mandarin with 60.0% raw confidence"));
    }

    #[test]
    fn explanation_depends_on_normalization() {
        let normalized = explanation(&decision(true));
        assert!(normalized.starts_with(
            "Normalized among English accents, this sample best matches england with 62.5% confidence."
        ));
        assert!(normalized.contains("england-accented English speech"));

        let fallback = explanation(&decision(false));
        assert!(fallback.contains("closest overall match is england with 62.5% raw confidence"));
    }

    #[test]
    fn render_includes_breakdown_and_transcript() {
        let scores = vec![
            AccentScore {
                label: "england".to_string(),
                confidence: 62.5,
            },
            AccentScore {
                label: "american".to_string(),
                confidence: 37.5,
            },
        ];
        let text = render(&decision(true), &scores, Some("hello there"));
        assert!(text.contains("English accent breakdown:"));
        assert!(text.contains("  england       62.50%"));
        assert!(text.contains("  american      37.50%"));
        assert!(text.ends_with("Transcript:\n  hello there\n"));

        let text = render(&decision(false), &[], Some(""));
        assert!(!text.contains("breakdown"));
        assert!(!text.contains("Transcript"));
    }
}
