//! Line-item to extracted-region matching
//!
//! Each business record is compared against every extracted line-item field.
//! Comparisons are tiered (exact description, product code, substring, token
//! overlap); the highest tier wins and, within a tier, the first field
//! encountered is kept.

use std::collections::HashSet;

use invoice_types::{ExtractedField, FieldKind, LineItemRecord};
use serde::{Deserialize, Serialize};

/// Matching strength, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    ExactDescription,
    ProductCode,
    Substring,
    TokenOverlap,
    Unmatched,
}

impl MatchTier {
    /// Ordering key; a higher rank always beats a lower one regardless of
    /// confidence.
    pub fn rank(self) -> u8 {
        match self {
            MatchTier::ExactDescription => 4,
            MatchTier::ProductCode => 3,
            MatchTier::Substring => 2,
            MatchTier::TokenOverlap => 1,
            MatchTier::Unmatched => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub record_id: String,
    /// Index into the field slice handed to [`match_records`].
    pub field_index: Option<usize>,
    pub tier: MatchTier,
    /// 100 exact, 90 product code, 80 substring, `similarity * 100` for
    /// token overlap, 0 when unmatched.
    pub confidence: f64,
}

impl MatchResult {
    fn unmatched(record_id: &str) -> Self {
        Self {
            record_id: record_id.to_string(),
            field_index: None,
            tier: MatchTier::Unmatched,
            confidence: 0.0,
        }
    }

    pub fn is_match(&self) -> bool {
        self.field_index.is_some()
    }
}

/// Lowercase and collapse internal whitespace.
fn fold(s: &str) -> String {
    s.split_whitespace()
        .map(|t| t.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whitespace-split lowercase tokens.
pub fn tokenize(s: &str) -> HashSet<String> {
    s.split_whitespace().map(|t| t.to_lowercase()).collect()
}

/// Jaccard similarity `|a ∩ b| / |a ∪ b|`; 0 when both sets are empty.
pub fn token_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Confidence of a perfect token overlap. Fuzzy matches always rank below the
/// fixed-confidence tiers.
const TOKEN_OVERLAP_CEILING: f64 = 79.0;

/// Score one record against one field. `None` when nothing matches.
pub fn score(
    record: &LineItemRecord,
    field: &ExtractedField,
    fuzzy_threshold: f64,
) -> Option<(MatchTier, f64)> {
    let record_desc = fold(&record.description);
    let field_desc = fold(field.description());

    if !record_desc.is_empty() && record_desc == field_desc {
        return Some((MatchTier::ExactDescription, 100.0));
    }

    if let (Some(code), Some(field_code)) = (record.product_code.as_deref(), field.product_code())
    {
        let code = code.trim();
        if !code.is_empty() && code.eq_ignore_ascii_case(field_code) {
            return Some((MatchTier::ProductCode, 90.0));
        }
    }

    if !record_desc.is_empty()
        && !field_desc.is_empty()
        && (record_desc.contains(&field_desc) || field_desc.contains(&record_desc))
    {
        return Some((MatchTier::Substring, 80.0));
    }

    let similarity = token_similarity(&tokenize(&record_desc), &tokenize(&field_desc));
    if similarity > 0.0 && similarity >= fuzzy_threshold {
        return Some((MatchTier::TokenOverlap, similarity * TOKEN_OVERLAP_CEILING));
    }

    None
}

/// Match each record against the line-item fields.
///
/// Returns one result per record, in record order. Key fields are never
/// candidates.
pub fn match_records(
    records: &[LineItemRecord],
    fields: &[ExtractedField],
    fuzzy_threshold: f64,
) -> Vec<MatchResult> {
    records
        .iter()
        .map(|record| {
            let mut best = MatchResult::unmatched(&record.id);
            for (index, field) in fields.iter().enumerate() {
                if field.kind != FieldKind::LineItem {
                    continue;
                }
                let Some((tier, confidence)) = score(record, field, fuzzy_threshold) else {
                    continue;
                };
                if tier.rank() > best.tier.rank() {
                    best = MatchResult {
                        record_id: record.id.clone(),
                        field_index: Some(index),
                        tier,
                        confidence,
                    };
                    if tier == MatchTier::ExactDescription {
                        break;
                    }
                }
            }
            best
        })
        .collect()
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: an exact description match outranks any token-overlap match
        #[test]
        fn exact_outranks_token_overlap(
            words in prop::collection::vec("[a-z]{2,8}", 2..6),
            shuffle_seed in 0usize..100,
        ) {
            let description = words.join(" ");
            let mut reordered = words.clone();
            reordered.rotate_left(shuffle_seed % words.len());
            reordered.reverse();
            let reordered = reordered.join(" ");
            let expected = if reordered == description { 0 } else { 1 };

            let fields = vec![
                ExtractedField::new("Items", FieldKind::LineItem, reordered),
                ExtractedField::new("Items", FieldKind::LineItem, description.to_uppercase()),
            ];
            let records = vec![LineItemRecord::new("r", description)];
            let results = match_records(&records, &fields, 0.85);
            prop_assert_eq!(results[0].tier, MatchTier::ExactDescription);
            prop_assert_eq!(results[0].field_index, Some(expected));
        }

        /// Property: similarity is symmetric and bounded
        #[test]
        fn similarity_bounded_and_symmetric(a in "[a-z ]{0,40}", b in "[a-z ]{0,40}") {
            let (ta, tb) = (tokenize(&a), tokenize(&b));
            let s = token_similarity(&ta, &tb);
            prop_assert!((0.0..=1.0).contains(&s));
            prop_assert_eq!(s, token_similarity(&tb, &ta));
        }
    }
}
