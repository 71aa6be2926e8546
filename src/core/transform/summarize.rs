use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "he",
    "her", "his", "in", "is", "it", "its", "of", "on", "or", "said", "she", "that", "the", "their",
    "they", "this", "to", "was", "were", "will", "with",
];

fn sentence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^.!?]+[.!?]*").unwrap())
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-z][a-z'\-]+").unwrap())
}

/// Frequency-scored extractive summary: score each sentence by the
/// document frequency of its content words, keep the top `max_sentences`,
/// emit them in original order.
pub fn summarize(text: &str, max_sentences: usize) -> String {
    let sentences: Vec<&str> = sentence_re()
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| s.len() > 15)
        .collect();

    if sentences.len() <= max_sentences {
        return sentences.join(" ");
    }

    let mut freq: HashMap<String, f64> = HashMap::new();
    let lower = text.to_lowercase();
    for word in word_re().find_iter(&lower) {
        let w = word.as_str();
        if !STOPWORDS.contains(&w) {
            *freq.entry(w.to_string()).or_default() += 1.0;
        }
    }

    let mut scored: Vec<(usize, f64)> = sentences
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let s_lower = s.to_lowercase();
            let words: Vec<&str> = word_re().find_iter(&s_lower).map(|m| m.as_str()).collect();
            let score: f64 = words.iter().filter_map(|w| freq.get(*w)).sum();
            // Normalize so long sentences don't win on bulk alone.
            (i, score / (words.len().max(1) as f64))
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut picked: Vec<usize> = scored.into_iter().take(max_sentences).map(|(i, _)| i).collect();
    picked.sort();

    picked
        .into_iter()
        .map(|i| sentences[i])
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = "The Rust project released a new compiler version today. \
        The release focuses on compile times and diagnostics. \
        Unrelatedly, the weather was mild. \
        Compile times improved by twenty percent in the release benchmarks. \
        Maintainers credited the new parallel frontend for the compile gains.";

    #[test]
    fn short_text_passes_through() {
        let text = "One sentence only, nothing to cut here.";
        assert_eq!(summarize(text, 3), text);
    }

    #[test]
    fn picks_high_frequency_sentences_in_original_order() {
        let summary = summarize(ARTICLE, 2);
        let sentences: Vec<&str> = summary.split(". ").collect();
        assert!(sentences.len() <= 2 || summary.matches('.').count() <= 2);
        assert!(!summary.contains("weather"), "off-topic sentence kept: {}", summary);
        // Original ordering preserved.
        if let (Some(a), Some(b)) = (summary.find("release"), summary.find("credited")) {
            assert!(a < b);
        }
    }

    #[test]
    fn empty_input_summarizes_to_empty() {
        assert_eq!(summarize("", 3), "");
    }
}
