//! Duplicate removal across chunks.
//!
//! Overlapping page windows make the model repeat itself; pairs are collapsed on a hashed,
//! normalized key and the first occurrence wins.

use sha2::{Digest, Sha256};
use std::collections::HashSet;

use super::types::QaPair;

/// Key used to decide whether two pairs are the same question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupStrategy {
    /// Normalized question text only. Used for single documents.
    #[default]
    Question,
    /// Normalized question plus the lowercased options. Used for multi-document runs.
    QuestionAndOptions,
}

/// Hex-encoded SHA-256 of the normalized key for `pair`.
pub fn dedup_key(pair: &QaPair, strategy: DedupStrategy) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(&pair.question).as_bytes());
    if strategy == DedupStrategy::QuestionAndOptions {
        hasher.update(b"|");
        let options = pair
            .options
            .iter()
            .map(|option| option.to_lowercase())
            .collect::<Vec<_>>()
            .join("|");
        hasher.update(options.as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Remove duplicate pairs, preserving first-occurrence order. Returns the kept pairs and the
/// number skipped.
pub fn dedupe_pairs(pairs: Vec<QaPair>, strategy: DedupStrategy) -> (Vec<QaPair>, usize) {
    let mut seen = HashSet::with_capacity(pairs.len());
    let mut unique = Vec::with_capacity(pairs.len());
    let mut skipped = 0usize;

    for pair in pairs {
        if seen.insert(dedup_key(&pair, strategy)) {
            unique.push(pair);
        } else {
            skipped += 1;
        }
    }

    if skipped > 0 {
        tracing::debug!(skipped, kept = unique.len(), ?strategy, "Removed duplicate pairs");
    }
    (unique, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(question: &str, options: [&str; 4]) -> QaPair {
        QaPair {
            question: question.into(),
            options: options.map(str::to_string),
            correct_answer: 0,
            explanation: String::new(),
            wrong_answer_explanations: ["a".into(), "b".into(), "c".into()],
            page_range: "1-5".into(),
            confidence: 0.8,
        }
    }

    #[test]
    fn question_key_ignores_case_and_whitespace() {
        let (unique, skipped) = dedupe_pairs(
            vec![
                pair("What is X?", ["a", "b", "c", "d"]),
                pair("  what is x?  ", ["e", "f", "g", "h"]),
            ],
            DedupStrategy::Question,
        );
        assert_eq!(unique.len(), 1);
        assert_eq!(skipped, 1);
        assert_eq!(unique[0].options[0], "a");
    }

    #[test]
    fn strict_key_keeps_same_question_with_different_options() {
        let pairs = vec![
            pair("What is X?", ["a", "b", "c", "d"]),
            pair("what is x?", ["e", "f", "g", "h"]),
            pair("WHAT IS X?", ["A", "B", "C", "D"]),
        ];
        let (unique, skipped) = dedupe_pairs(pairs, DedupStrategy::QuestionAndOptions);
        assert_eq!(unique.len(), 2);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn strict_key_does_not_trim_options() {
        let pairs = vec![
            pair("What is X?", ["a", "b", "c", "d"]),
            pair("what is x?", ["A", "B", "C", "D "]),
            pair("What is X?", ["a", "b", "c", " d "]),
        ];
        let (unique, skipped) = dedupe_pairs(pairs, DedupStrategy::QuestionAndOptions);
        assert_eq!(unique.len(), 3);
        assert_eq!(skipped, 0);
    }

    #[test]
    fn dedupe_preserves_first_occurrence_order_and_is_idempotent() {
        let pairs = vec![
            pair("Q3", ["a", "b", "c", "d"]),
            pair("Q1", ["a", "b", "c", "d"]),
            pair("q3", ["a", "b", "c", "d"]),
            pair("Q2", ["a", "b", "c", "d"]),
        ];
        let (once, skipped) = dedupe_pairs(pairs, DedupStrategy::Question);
        let questions: Vec<_> = once.iter().map(|pair| pair.question.as_str()).collect();
        assert_eq!(questions, vec!["Q3", "Q1", "Q2"]);
        assert_eq!(skipped, 1);

        let (twice, skipped_again) = dedupe_pairs(once.clone(), DedupStrategy::Question);
        assert_eq!(twice, once);
        assert_eq!(skipped_again, 0);
    }

    #[test]
    fn keys_are_hex_digests() {
        let key = dedup_key(&pair("Q", ["a", "b", "c", "d"]), DedupStrategy::Question);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(
            key,
            dedup_key(
                &pair("Q", ["a", "b", "c", "d"]),
                DedupStrategy::QuestionAndOptions
            )
        );
    }
}
