//! Result deduplication by topic

use crate::retrieval::ScoredRecord;
use ahash::AHashMap;
use std::cmp::Ordering;

/// Final ranking order: score descending, then distance ascending, then id ascending
pub fn rank_order(a: &ScoredRecord, b: &ScoredRecord) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.distance.total_cmp(&b.distance))
        .then(a.record.id.cmp(&b.record.id))
}

/// Keep the best candidate per topic, rank them, and truncate to `k`
///
/// Topics are grouped by canonical key, falling back to title and then filename.
///
/// # Returns
/// At most `k` records, no two sharing a topic, in ranking order
pub fn deduplicate(candidates: Vec<ScoredRecord>, k: usize) -> Vec<ScoredRecord> {
    let mut best: AHashMap<String, ScoredRecord> = AHashMap::new();

    for candidate in candidates {
        let key = candidate.record.topic_key();
        match best.get(&key) {
            Some(current) if rank_order(current, &candidate) != Ordering::Greater => {}
            _ => {
                best.insert(key, candidate);
            }
        }
    }

    let mut ranked: Vec<ScoredRecord> = best.into_values().collect();
    ranked.sort_by(rank_order);
    ranked.truncate(k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curator::Status;
    use crate::index::MetadataRecord;
    use crate::retrieval::SearchHit;
    use crate::source::DateField;
    use std::collections::BTreeSet;

    fn scored(id: i64, key: &str, score: f64, distance: f32) -> ScoredRecord {
        let hit = SearchHit {
            record: MetadataRecord {
                id,
                filename: format!("{}.txt", id),
                path: format!("{}.txt", id),
                category: "Reminders".to_string(),
                chunk_index: 0,
                title: None,
                tags: BTreeSet::new(),
                meeting_date: DateField::Missing,
                valid_from: DateField::Missing,
                valid_to: DateField::Missing,
                canonical_key: key.to_string(),
                version_ts: None,
                status: Status::Active,
                text_preview: String::new(),
            },
            distance,
        };
        ScoredRecord::new(hit, score)
    }

    #[test]
    fn test_one_result_per_topic() {
        let deduped = deduplicate(
            vec![
                scored(1, "hiring-freeze", 10.0, 0.3),
                scored(2, "parking", 8.0, 0.2),
                scored(3, "hiring-freeze", 12.0, 0.9),
            ],
            10,
        );

        let ids: Vec<i64> = deduped.iter().map(|r| r.record.id).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[test]
    fn test_ties_prefer_lower_distance_then_id() {
        let deduped = deduplicate(
            vec![
                scored(5, "a", 1.0, 0.5),
                scored(4, "a", 1.0, 0.5),
                scored(3, "a", 1.0, 0.7),
                scored(9, "b", 1.0, 0.1),
            ],
            10,
        );

        let ids: Vec<i64> = deduped.iter().map(|r| r.record.id).collect();
        assert_eq!(ids, vec![9, 4]);
    }

    #[test]
    fn test_truncates_to_k() {
        let candidates = (0..10).map(|i| scored(i, &format!("t{}", i), i as f64, 0.0)).collect();
        let deduped = deduplicate(candidates, 3);
        let ids: Vec<i64> = deduped.iter().map(|r| r.record.id).collect();
        assert_eq!(ids, vec![9, 8, 7]);
    }

    #[test]
    fn test_title_fallback_does_not_merge_with_canonical_key() {
        let keyed = scored(1, "parking", 1.0, 0.0);
        let mut titled = scored(2, "", 2.0, 0.0);
        titled.record.title = Some("parking".to_string());

        let deduped = deduplicate(vec![keyed, titled], 10);
        let ids: Vec<i64> = deduped.iter().map(|r| r.record.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_missing_key_falls_back_to_filename() {
        let deduped = deduplicate(vec![scored(1, "", 1.0, 0.0), scored(2, "", 2.0, 0.0)], 10);
        assert_eq!(deduped.len(), 2);
    }
}
