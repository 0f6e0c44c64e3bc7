//! Coverage-bounded community selection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::SelectionSettings;

/// Statistics describing one selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionStats {
    pub total_communities_raw: usize,
    pub total_communities_kept: usize,
    pub min_size: usize,
    pub coverage_target: f64,
    pub cap: usize,
    pub selected_count: usize,
    pub achieved_coverage: f64,
    pub kept_members_sum: usize,
    pub selected_members_sum: usize,
}

/// Ordered selection plus its statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Community ids, largest first.
    pub selected: Vec<String>,
    pub stats: SelectionStats,
}

/// Picks the fewest large communities that cover most of the graph.
#[derive(Debug, Clone)]
pub struct CommunitySelector {
    settings: SelectionSettings,
}

impl CommunitySelector {
    pub fn new(settings: SelectionSettings) -> Self {
        Self { settings }
    }

    /// Select from a community id → member count map.
    ///
    /// Communities under `min_size` are dropped; the rest are taken by count
    /// descending (id ascending on ties) until the covered share of kept
    /// members reaches the target or `cap` communities are selected.
    pub fn select(&self, sizes: &BTreeMap<String, usize>) -> Selection {
        let SelectionSettings {
            coverage_target,
            cap,
            min_size,
        } = self.settings;

        let mut kept: Vec<(&String, usize)> = sizes
            .iter()
            .filter(|(_, &count)| count >= min_size)
            .map(|(id, &count)| (id, count))
            .collect();
        kept.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| compare_ids(a.0, b.0)));

        let kept_members_sum: usize = kept.iter().map(|(_, c)| c).sum();
        let mut selected = Vec::new();
        let mut selected_members_sum = 0usize;

        if kept_members_sum > 0 {
            for (id, count) in &kept {
                if selected.len() >= cap {
                    break;
                }
                selected.push((*id).clone());
                selected_members_sum += count;
                if selected_members_sum as f64 / kept_members_sum as f64 >= coverage_target {
                    break;
                }
            }
        }

        let achieved_coverage = if kept_members_sum == 0 {
            0.0
        } else {
            selected_members_sum as f64 / kept_members_sum as f64
        };

        let stats = SelectionStats {
            total_communities_raw: sizes.len(),
            total_communities_kept: kept.len(),
            min_size,
            coverage_target,
            cap,
            selected_count: selected.len(),
            achieved_coverage,
            kept_members_sum,
            selected_members_sum,
        };

        info!(
            raw = stats.total_communities_raw,
            kept = stats.total_communities_kept,
            selected = stats.selected_count,
            coverage = format!("{:.3}", stats.achieved_coverage),
            "Communities selected"
        );

        Selection { selected, stats }
    }
}

/// Numeric ids compare numerically, anything else lexically.
fn compare_ids(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn selector(coverage_target: f64, cap: usize, min_size: usize) -> CommunitySelector {
        CommunitySelector::new(SelectionSettings {
            coverage_target,
            cap,
            min_size,
        })
    }

    #[test]
    fn test_stops_at_coverage() {
        let sel = selector(0.85, 500, 5).select(&sizes(&[("0", 50), ("1", 30), ("2", 10), ("3", 10), ("4", 2)]));
        assert_eq!(sel.selected, vec!["0", "1", "2"]);
        assert_eq!(sel.stats.kept_members_sum, 100);
        assert_eq!(sel.stats.selected_members_sum, 90);
        assert_eq!(sel.stats.total_communities_kept, 4);
        assert!(sel.stats.achieved_coverage >= 0.85);
    }

    #[test]
    fn test_cap_bounds_selection() {
        let sel = selector(1.0, 2, 1).select(&sizes(&[("a", 5), ("b", 5), ("c", 5)]));
        assert_eq!(sel.selected, vec!["a", "b"]);
        assert!(sel.stats.achieved_coverage < 1.0);
    }

    #[test]
    fn test_ties_break_on_numeric_id() {
        let sel = selector(1.0, 10, 1).select(&sizes(&[("10", 7), ("9", 7), ("2", 8)]));
        assert_eq!(sel.selected, vec!["2", "9", "10"]);
    }

    #[test]
    fn test_empty_after_filter() {
        let sel = selector(0.85, 500, 5).select(&sizes(&[("0", 1), ("1", 2)]));
        assert!(sel.selected.is_empty());
        assert_eq!(sel.stats.achieved_coverage, 0.0);
        assert_eq!(sel.stats.total_communities_raw, 2);
    }
}
