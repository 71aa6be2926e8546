use regex::Regex;
use std::sync::OnceLock;

use crate::core::types::QuestionKind;

fn entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Two-or-more capitalized words, the usual shape of names and orgs.
    RE.get_or_init(|| Regex::new(r"[A-Z][A-Za-z0-9&'\-]+(?:\s+[A-Z][A-Za-z0-9&'\-]+)+").unwrap())
}

/// Best entity mention to hang a question on: prefer a multi-word
/// capitalized span from the body, then from the title, then fall back
/// to the title's leading words.
fn pick_subject(title: &str, text: &str) -> String {
    for haystack in [text, title] {
        if let Some(m) = entity_re().find(haystack) {
            return m.as_str().to_string();
        }
    }
    let lead: Vec<&str> = title.split_whitespace().take(5).collect();
    if lead.is_empty() {
        "this story".to_string()
    } else {
        lead.join(" ")
    }
}

/// One engagement question per configured kind, in configuration order.
pub fn generate_questions(title: &str, text: &str, kinds: &[QuestionKind]) -> Vec<String> {
    let subject = pick_subject(title, text);
    kinds
        .iter()
        .map(|kind| match kind {
            QuestionKind::What => {
                format!("What could this mean for {}?", subject)
            }
            QuestionKind::Why => format!("Why is {} making headlines right now?", subject),
            QuestionKind::How => format!("How do you see {} developing from here?", subject),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_entities_from_the_body() {
        let questions = generate_questions(
            "markets rally on news",
            "Shares of Acme Corp surged after the announcement.",
            &[QuestionKind::Why],
        );
        assert_eq!(questions, vec!["Why is Acme Corp making headlines right now?"]);
    }

    #[test]
    fn falls_back_to_title_words_without_entities() {
        let questions = generate_questions(
            "quiet day across the bond desks",
            "nothing capitalized here.",
            &[QuestionKind::What],
        );
        assert_eq!(
            questions,
            vec!["What could this mean for quiet day across the bond?"]
        );
    }

    #[test]
    fn one_question_per_kind_in_order() {
        let questions = generate_questions(
            "Rust Foundation announces grants",
            "",
            &[QuestionKind::How, QuestionKind::What],
        );
        assert_eq!(questions.len(), 2);
        assert!(questions[0].starts_with("How"));
        assert!(questions[1].starts_with("What"));
    }
}
