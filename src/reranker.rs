use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    category::SourceCategory,
    chunking::ChunkRecord,
    knowledge::{RetrievalResult, SourceStats},
};

/// Minimum number of candidates fetched before reranking.
pub const MIN_CANDIDATES: usize = 30;

/// Candidates fetched per requested result.
pub const OVERSAMPLE_FACTOR: usize = 6;

pub const DEFAULT_RATIO_THRESHOLD: f32 = 0.30;
pub const DEFAULT_BONUS: f32 = 0.55;

pub const DEFAULT_TRIGGER_PHRASES: &[&str] = &[
    "question",
    "questions",
    "marks",
    "mark ",
    "short note",
    "short notes",
    "mcq",
    "pyq",
    "previous year",
];

/// How many candidates to fetch from the index for a final `top_k`.
pub fn oversample(top_k: usize) -> usize {
    top_k.saturating_mul(OVERSAMPLE_FACTOR).max(MIN_CANDIDATES)
}

/// When and how strongly to favor the target category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostPolicy {
    /// Lowercase phrases that mark a query as asking for exam-style items.
    pub trigger_phrases: Vec<String>,
    /// Boost only while the target category's share of the corpus is
    /// below this ratio.
    pub ratio_threshold: f32,
    /// Added to a target candidate's rank score.
    pub bonus: f32,
}

impl Default for BoostPolicy {
    fn default() -> Self {
        Self {
            trigger_phrases: DEFAULT_TRIGGER_PHRASES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            ratio_threshold: DEFAULT_RATIO_THRESHOLD,
            bonus: DEFAULT_BONUS,
        }
    }
}

/// Reorders oversampled candidates, pulling under-represented target
/// sources forward for exam-style queries.
#[derive(Debug, Clone)]
pub struct AdaptiveReranker {
    policy: BoostPolicy,
    stats: SourceStats,
}

#[derive(Debug, Clone, Copy)]
struct Scored<'a> {
    score: f32,
    candidate: &'a RetrievalResult<ChunkRecord>,
}

impl AdaptiveReranker {
    /// `stats` is a snapshot taken when the index was loaded; it is not
    /// refreshed per query.
    pub fn new(policy: BoostPolicy, stats: SourceStats) -> Self {
        Self { policy, stats }
    }

    pub fn stats(&self) -> SourceStats {
        self.stats
    }

    pub fn policy(&self) -> &BoostPolicy {
        &self.policy
    }

    /// Case-insensitive substring match against the trigger phrases.
    pub fn is_category_targeted(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.policy
            .trigger_phrases
            .iter()
            .any(|phrase| query.contains(&phrase.to_lowercase()))
    }

    pub fn should_boost(&self, query: &str) -> bool {
        self.is_category_targeted(query)
            && self.stats.boosted_category_ratio < self.policy.ratio_threshold
    }

    /// Reduce `candidates` (best first) to at most `top_k` distinct results.
    ///
    /// Scores are `1 / (1 + rank)` from input position, plus the bonus for
    /// target-category candidates when boosting. When boosting, the output
    /// starts with up to `max(2, top_k / 2)` target items.
    pub fn rerank(
        &self,
        candidates: &[RetrievalResult<ChunkRecord>],
        query: &str,
        top_k: usize,
    ) -> Vec<RetrievalResult<ChunkRecord>> {
        if top_k == 0 || candidates.is_empty() {
            return Vec::new();
        }

        let boost = self.should_boost(query);
        let mut scored: Vec<Scored<'_>> = candidates
            .iter()
            .enumerate()
            .map(|(rank, candidate)| {
                let mut score = 1.0 / (1.0 + rank as f32);
                if boost && is_target(candidate) {
                    score += self.policy.bonus;
                }
                Scored { score, candidate }
            })
            .collect();

        // `sort_by` is stable, so equal scores keep input order.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut seen = HashSet::new();
        let mut selected = Vec::with_capacity(top_k);

        if boost {
            let quota = (top_k / 2).max(2).min(top_k);
            for item in scored.iter().filter(|s| is_target(s.candidate)) {
                if selected.len() >= quota {
                    break;
                }
                if seen.insert(item.candidate.index) {
                    selected.push(item.candidate.clone());
                }
            }
        }

        for item in &scored {
            if selected.len() >= top_k {
                break;
            }
            if seen.insert(item.candidate.index) {
                selected.push(item.candidate.clone());
            }
        }

        debug!(
            boost,
            candidates = candidates.len(),
            selected = selected.len(),
            ratio = self.stats.boosted_category_ratio,
            "reranked candidates"
        );
        selected
    }
}

fn is_target(candidate: &RetrievalResult<ChunkRecord>) -> bool {
    candidate.metadata.category == SourceCategory::Target
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn candidate(
        index: usize,
        category: SourceCategory,
    ) -> RetrievalResult<ChunkRecord> {
        RetrievalResult {
            index,
            distance: index as f32,
            metadata: ChunkRecord {
                text: format!("chunk {index}"),
                source: format!("src/{index}.txt"),
                page: None,
                category,
            },
        }
    }

    fn stats(ratio: f32) -> SourceStats {
        SourceStats {
            total_chunks: 100,
            boosted_category_chunks: (ratio * 100.0) as usize,
            boosted_category_ratio: ratio,
        }
    }

    fn indices(results: &[RetrievalResult<ChunkRecord>]) -> Vec<usize> {
        results.iter().map(|r| r.index).collect()
    }

    /// Eight general candidates followed by two target ones.
    fn mixed() -> Vec<RetrievalResult<ChunkRecord>> {
        (0..10)
            .map(|i| {
                let cat = if i >= 8 {
                    SourceCategory::Target
                } else {
                    SourceCategory::General
                };
                candidate(i, cat)
            })
            .collect()
    }

    #[test]
    fn oversample_has_floor() {
        assert_eq!(oversample(1), 30);
        assert_eq!(oversample(5), 30);
        assert_eq!(oversample(10), 60);
    }

    #[test]
    fn trigger_match_is_case_insensitive() {
        let r = AdaptiveReranker::new(BoostPolicy::default(), stats(0.1));
        assert!(r.is_category_targeted("Give me 3 QUESTIONS on TOC"));
        assert!(r.is_category_targeted("write a short note on paging"));
        assert!(!r.is_category_targeted("what is paging"));
    }

    #[test]
    fn no_boost_when_target_is_well_represented() {
        let r = AdaptiveReranker::new(BoostPolicy::default(), stats(0.30));
        assert!(!r.should_boost("10 marks questions"));

        let out = r.rerank(&mixed(), "10 marks questions", 3);
        assert_eq!(indices(&out), vec![0, 1, 2]);
    }

    #[test]
    fn untargeted_query_keeps_input_order() {
        let r = AdaptiveReranker::new(BoostPolicy::default(), stats(0.05));
        let out = r.rerank(&mixed(), "explain paging", 4);
        assert_eq!(indices(&out), vec![0, 1, 2, 3]);
    }

    #[test]
    fn boost_pulls_targets_forward() {
        let r = AdaptiveReranker::new(BoostPolicy::default(), stats(0.05));
        let out = r.rerank(&mixed(), "give me questions on deadlock", 4);
        assert_eq!(indices(&out), vec![8, 9, 0, 1]);
    }

    #[test]
    fn boost_with_top_k_one_stays_within_limit() {
        let r = AdaptiveReranker::new(BoostPolicy::default(), stats(0.05));
        let out = r.rerank(&mixed(), "pyq on scheduling", 1);
        assert_eq!(indices(&out), vec![8]);
    }

    #[test]
    fn duplicates_are_dropped() {
        let r = AdaptiveReranker::new(BoostPolicy::default(), stats(0.5));
        let candidates = vec![
            candidate(4, SourceCategory::General),
            candidate(4, SourceCategory::General),
            candidate(7, SourceCategory::General),
        ];
        let out = r.rerank(&candidates, "anything", 5);
        assert_eq!(indices(&out), vec![4, 7]);
    }

    #[test]
    fn zero_top_k_is_empty() {
        let r = AdaptiveReranker::new(BoostPolicy::default(), stats(0.0));
        assert!(r.rerank(&mixed(), "questions", 0).is_empty());
    }

    fn arb_candidates() -> impl Strategy<Value = Vec<RetrievalResult<ChunkRecord>>> {
        prop::collection::vec((0usize..20, any::<bool>()), 0..40).prop_map(|items| {
            items
                .into_iter()
                .map(|(index, target)| {
                    let cat = if target {
                        SourceCategory::Target
                    } else {
                        SourceCategory::General
                    };
                    candidate(index, cat)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn output_is_bounded_and_distinct(
            candidates in arb_candidates(),
            top_k in 0usize..12,
            ratio in 0.0f32..1.0,
            targeted in any::<bool>(),
        ) {
            let r = AdaptiveReranker::new(BoostPolicy::default(), stats(ratio));
            let query = if targeted { "important questions" } else { "explain" };
            let out = r.rerank(&candidates, query, top_k);

            let distinct: HashSet<usize> =
                candidates.iter().map(|c| c.index).collect();
            prop_assert_eq!(out.len(), top_k.min(distinct.len()));

            let unique: HashSet<usize> = out.iter().map(|c| c.index).collect();
            prop_assert_eq!(unique.len(), out.len());
        }

        #[test]
        fn boosting_guarantees_target_quota(
            candidates in arb_candidates(),
            top_k in 1usize..12,
        ) {
            let r = AdaptiveReranker::new(BoostPolicy::default(), stats(0.0));
            let out = r.rerank(&candidates, "questions", top_k);

            let targets_present: HashSet<usize> = candidates
                .iter()
                .filter(|c| is_target(c))
                .map(|c| c.index)
                .collect();
            let want = (top_k / 2).max(2).min(top_k).min(targets_present.len());
            let got = out.iter().filter(|c| is_target(c)).count();
            prop_assert!(got >= want, "got {got} targets, want {want}");
        }

        #[test]
        fn without_boost_order_is_first_occurrence_order(
            candidates in arb_candidates(),
            top_k in 1usize..12,
        ) {
            let r = AdaptiveReranker::new(BoostPolicy::default(), stats(0.9));
            let out = r.rerank(&candidates, "questions", top_k);

            let mut seen = HashSet::new();
            let expected: Vec<usize> = candidates
                .iter()
                .map(|c| c.index)
                .filter(|i| seen.insert(*i))
                .take(top_k)
                .collect();
            prop_assert_eq!(indices(&out), expected);
        }
    }
}
