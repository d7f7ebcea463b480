//! Composite scoring of retrieved candidates

use crate::config::RerankingConfig;
use crate::retrieval::{ScoredRecord, SearchHit};
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeSet;

/// Per-query preferences for [`Reranker::rerank`]
#[derive(Debug, Clone)]
pub struct RerankOptions {
    /// Category that earns the category bonus (case-insensitive)
    pub prefer_category: Option<String>,
    /// Add the best date's day number to the score
    pub prefer_recent: bool,
    /// Reference day for validity and age
    pub today: NaiveDate,
}

impl RerankOptions {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            prefer_category: None,
            prefer_recent: false,
            today,
        }
    }
}

/// Scores candidates by category, tag overlap, recency, distance and validity
///
/// `score = category_bonus + tag_bonus * matching_tags + recency - distance
///          - validity_penalty - archived_penalty - min(age_days, max_age_days)`
pub struct Reranker {
    config: RerankingConfig,
    vocabulary: BTreeSet<String>,
}

impl Reranker {
    pub fn new(config: RerankingConfig) -> Self {
        let vocabulary = config.vocabulary.iter().map(|t| t.to_lowercase()).collect();
        Self { config, vocabulary }
    }

    /// Query tokens that appear in the domain vocabulary
    pub fn query_tags(&self, query: &str) -> BTreeSet<String> {
        query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .filter(|t| self.vocabulary.contains(t))
            .collect()
    }

    /// Composite score of a single hit
    pub fn score(&self, hit: &SearchHit, query_tags: &BTreeSet<String>, options: &RerankOptions) -> f64 {
        let record = &hit.record;
        let mut score = -(hit.distance as f64);

        if let Some(category) = &options.prefer_category {
            if record.category.eq_ignore_ascii_case(category) {
                score += self.config.category_bonus;
            }
        }

        let matching = query_tags.iter().filter(|t| record.tags.contains(*t)).count();
        score += self.config.tag_bonus * matching as f64;

        let best_date = record.best_date();
        if options.prefer_recent {
            if let Some(date) = best_date {
                score += date.num_days_from_ce() as f64;
            }
        }

        if record.is_expired_on(options.today) {
            score -= self.config.validity_penalty;
        }

        if record.is_archived() {
            score -= self.config.archived_penalty;
        }

        let age_days = match best_date {
            Some(date) => (options.today - date).num_days().max(0),
            None => self.config.max_age_days,
        };
        score -= age_days.min(self.config.max_age_days) as f64;

        score
    }

    /// Score every hit; order is preserved
    pub fn rerank(&self, query: &str, hits: Vec<SearchHit>, options: &RerankOptions) -> Vec<ScoredRecord> {
        let tags = self.query_tags(query);
        hits.into_iter()
            .map(|hit| {
                let score = self.score(&hit, &tags, options);
                ScoredRecord::new(hit, score)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curator::Status;
    use crate::index::MetadataRecord;
    use crate::source::DateField;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn hit(category: &str, tags: &[&str], distance: f32) -> SearchHit {
        SearchHit {
            record: MetadataRecord {
                id: 1,
                filename: "a.txt".to_string(),
                path: "a.txt".to_string(),
                category: category.to_string(),
                chunk_index: 0,
                title: None,
                tags: tags.iter().map(|t| t.to_string()).collect(),
                meeting_date: DateField::Missing,
                valid_from: DateField::Missing,
                valid_to: DateField::Missing,
                canonical_key: "a".to_string(),
                version_ts: Some(day(2025, 10, 10)),
                status: Status::Active,
                text_preview: String::new(),
            },
            distance,
        }
    }

    fn reranker() -> Reranker {
        Reranker::new(crate::config::Config::default().reranking)
    }

    #[test]
    fn test_query_tags_use_vocabulary() {
        let tags = reranker().query_tags("What is our Hiring policy for Q4 finance?");
        assert_eq!(
            tags.into_iter().collect::<Vec<_>>(),
            vec!["finance", "hiring", "policy"]
        );
    }

    #[test]
    fn test_category_bonus_dominates_distance() {
        let r = reranker();
        let mut options = RerankOptions::new(day(2025, 10, 15));
        options.prefer_category = Some("Meetings".to_string());

        let tags = BTreeSet::new();
        let meeting = r.score(&hit("meetings", &[], 50.0), &tags, &options);
        let close = r.score(&hit("Reminders", &[], 0.1), &tags, &options);
        assert!(meeting > close);
    }

    #[test]
    fn test_tag_overlap_counts_each_tag() {
        let r = reranker();
        let options = RerankOptions::new(day(2025, 10, 15));
        let tags = r.query_tags("hiring policy");

        let both = r.score(&hit("x", &["hiring", "policy"], 0.5), &tags, &options);
        let one = r.score(&hit("x", &["policy"], 0.5), &tags, &options);
        let none = r.score(&hit("x", &[], 0.5), &tags, &options);
        assert!((both - one - 1e6).abs() < 1e-3);
        assert!((one - none - 1e6).abs() < 1e-3);
    }

    #[test]
    fn test_expired_records_penalised() {
        let r = reranker();
        let options = RerankOptions::new(day(2025, 10, 15));
        let tags = BTreeSet::new();

        let current = hit("x", &[], 0.5);
        let mut expired = hit("x", &[], 0.1);
        expired.record.valid_to = DateField::Date(day(2025, 9, 30));

        assert!(r.score(&current, &tags, &options) > r.score(&expired, &tags, &options));
    }

    #[test]
    fn test_archived_loses_to_every_bonus() {
        let r = reranker();
        let mut options = RerankOptions::new(day(2025, 10, 15));
        options.prefer_category = Some("x".to_string());
        options.prefer_recent = true;
        let tags = r.query_tags("hiring policy finance");

        // Still valid on paper, closer, in the preferred category and matching every tag
        let mut archived = hit("x", &["hiring", "policy", "finance"], 0.0);
        archived.record.status = Status::Archived;
        archived.record.valid_to = DateField::Date(day(2030, 12, 31));
        let mut current = hit("y", &[], 40.0);
        current.record.valid_to = DateField::Date(day(2025, 1, 1));

        assert!(r.score(&current, &tags, &options) > r.score(&archived, &tags, &options));
    }

    #[test]
    fn test_recency_and_age() {
        let r = reranker();
        let tags = BTreeSet::new();
        let mut options = RerankOptions::new(day(2025, 10, 15));

        let newer = hit("x", &[], 0.5);
        let mut older = hit("x", &[], 0.5);
        older.record.version_ts = Some(day(2025, 1, 1));

        // age alone: 5 days vs 287 days
        let diff = r.score(&newer, &tags, &options) - r.score(&older, &tags, &options);
        assert!((diff - 282.0).abs() < 1e-6);

        options.prefer_recent = true;
        let diff = r.score(&newer, &tags, &options) - r.score(&older, &tags, &options);
        assert!((diff - 564.0).abs() < 1e-6);

        // age is capped
        let mut ancient = hit("x", &[], 0.5);
        ancient.record.version_ts = Some(day(2015, 1, 1));
        options.prefer_recent = false;
        let undated = {
            let mut h = hit("x", &[], 0.5);
            h.record.version_ts = None;
            h
        };
        assert_eq!(
            r.score(&ancient, &tags, &options),
            r.score(&undated, &tags, &options)
        );
    }
}
