//! Message tokenisation and similarity helpers.

use std::collections::{BTreeSet, HashMap, HashSet};

pub const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
];

/// Lower-cased, punctuation-stripped word set of `text`.
pub fn word_set(text: &str) -> BTreeSet<String> {
    text.split_whitespace()
        .map(normalize_word)
        .filter(|w| !w.is_empty())
        .collect()
}

/// Lower-case `word` and keep only its alphanumeric characters.
pub fn normalize_word(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Jaccard index of the word sets of `a` and `b`. Empty input scores 0.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let left = word_set(a);
    let right = word_set(b);
    jaccard_sets(&left, &right)
}

pub fn jaccard_sets(left: &BTreeSet<String>, right: &BTreeSet<String>) -> f64 {
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let intersection = left.intersection(right).count();
    let union = left.union(right).count();
    intersection as f64 / union as f64
}

/// Words that occur in at least `min_messages` distinct messages, excluding
/// stop words and words of two characters or fewer. Most frequent first,
/// ties broken alphabetically, at most `limit` entries.
pub fn common_keywords<'a, I>(messages: I, min_messages: usize, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let stop: HashSet<&str> = STOP_WORDS.iter().copied().collect();
    let mut counts: HashMap<String, usize> = HashMap::new();

    for message in messages {
        let seen: HashSet<String> = message
            .split_whitespace()
            .map(normalize_word)
            .filter(|w| w.chars().count() > 2 && !stop.contains(w.as_str()))
            .collect();
        for word in seen {
            *counts.entry(word).or_default() += 1;
        }
    }

    let mut common: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(_, n)| *n >= min_messages)
        .collect();
    common.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    common.into_iter().take(limit).map(|(w, _)| w).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_ignores_case_and_punctuation() {
        assert_eq!(jaccard("Disk FULL!", "disk full"), 1.0);
        assert_eq!(jaccard("a b", "c d"), 0.0);
        assert_eq!(jaccard("", "anything"), 0.0);
        // {db, timeout, on, node1} vs {db, timeout}
        assert_eq!(jaccard("db timeout on node1", "DB timeout."), 0.5);
    }

    #[test]
    fn keywords_need_two_messages() {
        let msgs = [
            "Connection refused to database",
            "connection timeout to database",
            "cache miss",
        ];
        let kw = common_keywords(msgs.iter().copied(), 2, 10);
        assert_eq!(kw, vec!["connection".to_string(), "database".to_string()]);
    }

    #[test]
    fn keywords_count_messages_not_occurrences() {
        let msgs = ["error error error", "all fine"];
        assert!(common_keywords(msgs.iter().copied(), 2, 10).is_empty());
    }
}
