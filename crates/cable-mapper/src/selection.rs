//! Candidate selection and terrestrial reclassification
//!
//! Scored candidates pass a connectivity filter (the landing-point pair
//! must be directly joined by a segment of the cable, when the atlas
//! knows the cable's segment topology), then two rounds of relative
//! pruning: per cable against the cable's own best score, then across
//! cables against the overall best. Selection is a pure function of its
//! input, so re-running it on the same candidates gives the same
//! result.

use cable_atlas::{CableAtlas, CableId, LandingPointId};
use link_classifier::{Category, Link};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// A candidate that survived scoring
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub cable: CableId,
    pub lp_a: LandingPointId,
    pub lp_b: LandingPointId,
    pub score: f64,
}

/// One selected cable with its best score and surviving landing-point
/// pairs, best first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CableSelection {
    pub cable: CableId,
    pub score: f64,
    pub landing_point_pairs: Vec<(LandingPointId, LandingPointId)>,
}

/// Final per-link verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkResult {
    pub link: Link,
    pub category: Category,
    /// Ranked descending by score; empty only for reclassified links
    pub selections: Vec<CableSelection>,
}

impl LinkResult {
    pub fn num_selected(&self) -> usize {
        self.selections.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    /// At least one cable survived all pruning
    Selected(Vec<CableSelection>),
    /// Nothing survived scoring (or nothing was found at all)
    NoCandidates,
    /// Scoring produced candidates but the connectivity filter removed
    /// every one of them; for oceanic links this triggers
    /// reclassification to definite-terrestrial
    NoneConnected,
}

/// Inclusive relative-threshold test: is `score` within `threshold`
/// (a fraction) of `best`?
fn within_relative(score: f64, best: f64, threshold: f64) -> bool {
    score >= best * (1.0 - threshold)
}

pub fn select_cables(
    candidates: &[ScoredCandidate],
    atlas: &CableAtlas,
    threshold: f64,
) -> SelectionOutcome {
    if candidates.is_empty() {
        return SelectionOutcome::NoCandidates;
    }

    let connected: Vec<&ScoredCandidate> = candidates
        .iter()
        .filter(|c| atlas.pair_connected(&c.cable, c.lp_a, c.lp_b))
        .collect();
    if connected.is_empty() {
        debug!("all {} candidates failed the connectivity check", candidates.len());
        return SelectionOutcome::NoneConnected;
    }

    // Best score per cable; BTreeMap keeps cable iteration deterministic
    let mut best_per_cable: BTreeMap<&str, f64> = BTreeMap::new();
    for candidate in &connected {
        let entry = best_per_cable.entry(candidate.cable.as_str()).or_insert(f64::MIN);
        *entry = entry.max(candidate.score);
    }
    let overall_best = best_per_cable.values().fold(f64::MIN, |a, &b| a.max(b));

    let mut selections = Vec::new();
    for (cable, &cable_best) in &best_per_cable {
        if !within_relative(cable_best, overall_best, threshold) {
            continue;
        }
        // Keep each pair's best score, pairs within threshold of the
        // cable's own best
        let mut pair_best: BTreeMap<(LandingPointId, LandingPointId), f64> = BTreeMap::new();
        for candidate in connected.iter().filter(|c| c.cable == *cable) {
            if !within_relative(candidate.score, cable_best, threshold) {
                continue;
            }
            let entry = pair_best
                .entry((candidate.lp_a, candidate.lp_b))
                .or_insert(f64::MIN);
            *entry = entry.max(candidate.score);
        }
        let mut pairs: Vec<((LandingPointId, LandingPointId), f64)> =
            pair_best.into_iter().collect();
        pairs.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        selections.push(CableSelection {
            cable: cable.to_string(),
            score: cable_best,
            landing_point_pairs: pairs.into_iter().map(|(pair, _)| pair).collect(),
        });
    }

    selections.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.cable.cmp(&b.cable)));
    SelectionOutcome::Selected(selections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cable_atlas::test_support::small_atlas;

    fn candidate(cable: &str, lp_a: u32, lp_b: u32, score: f64) -> ScoredCandidate {
        ScoredCandidate {
            cable: cable.to_string(),
            lp_a,
            lp_b,
            score,
        }
    }

    #[test]
    fn test_empty_input_is_no_candidates() {
        let atlas = small_atlas();
        assert_eq!(
            select_cables(&[], &atlas, 0.05),
            SelectionOutcome::NoCandidates
        );
    }

    #[test]
    fn test_connectivity_filter_removes_unjoined_pairs() {
        let atlas = small_atlas();
        // "atl" only joins (1, 2); a (1, 3) claim is bogus
        let outcome = select_cables(&[candidate("atl", 1, 3, 0.9)], &atlas, 0.05);
        assert_eq!(outcome, SelectionOutcome::NoneConnected);
    }

    #[test]
    fn test_unknown_topology_assumed_connected() {
        let atlas = small_atlas();
        // "med" has no connectivity entry
        let outcome = select_cables(&[candidate("med", 2, 3, 0.8)], &atlas, 0.05);
        let SelectionOutcome::Selected(selections) = outcome else {
            panic!("expected a selection");
        };
        assert_eq!(selections.len(), 1);
        assert_eq!(selections[0].cable, "med");
        assert_eq!(selections[0].landing_point_pairs, vec![(2, 3)]);
    }

    #[test]
    fn test_cross_cable_pruning() {
        let atlas = small_atlas();
        let candidates = vec![
            candidate("atl", 1, 2, 1.0),
            // 0.95 is exactly at the 5% boundary: kept (inclusive)
            candidate("med", 2, 3, 0.95),
        ];
        let SelectionOutcome::Selected(selections) =
            select_cables(&candidates, &atlas, 0.05)
        else {
            panic!("expected a selection");
        };
        assert_eq!(selections.len(), 2);
        assert_eq!(selections[0].cable, "atl");
        assert_eq!(selections[1].cable, "med");

        // Just below the boundary: dropped
        let candidates = vec![
            candidate("atl", 1, 2, 1.0),
            candidate("med", 2, 3, 0.94),
        ];
        let SelectionOutcome::Selected(selections) =
            select_cables(&candidates, &atlas, 0.05)
        else {
            panic!("expected a selection");
        };
        assert_eq!(selections.len(), 1);
        assert_eq!(selections[0].cable, "atl");
    }

    #[test]
    fn test_per_cable_pair_pruning_keeps_best_per_pair() {
        let atlas = small_atlas();
        let candidates = vec![
            // Same pair from two cluster combos: only the best score
            // counts, and 0.7 is below the 5% band anyway
            candidate("med", 2, 3, 0.7),
            candidate("med", 2, 3, 0.9),
            candidate("med", 2, 3, 0.89),
        ];
        let SelectionOutcome::Selected(selections) =
            select_cables(&candidates, &atlas, 0.05)
        else {
            panic!("expected a selection");
        };
        assert_eq!(selections.len(), 1);
        assert!((selections[0].score - 0.9).abs() < 1e-9);
        assert_eq!(selections[0].landing_point_pairs, vec![(2, 3)]);
    }

    #[test]
    fn test_selection_idempotent() {
        let atlas = small_atlas();
        let candidates = vec![
            candidate("atl", 1, 2, 0.9),
            candidate("med", 2, 3, 0.88),
            candidate("med", 3, 2, 0.6),
        ];
        let first = select_cables(&candidates, &atlas, 0.05);
        let second = select_cables(&candidates, &atlas, 0.05);
        assert_eq!(first, second);
    }
}
