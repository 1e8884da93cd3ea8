//! Catalog merge and ordering rules.
//!
//! A world sees the global default catalog merged with the override catalog
//! of its game mode. The merge is a plain two-map union keyed by id in which
//! the override entry replaces the default entry. Ordering is applied after
//! merging and never depends on which side an entry came from.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use isleforge_types::GeneratorTier;

/// Union of `base` and `overlay` keyed by id; `overlay` wins on collisions.
pub fn merge_by_id<K, V>(base: &BTreeMap<K, V>, overlay: &BTreeMap<K, V>) -> BTreeMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    let mut merged = base.clone();
    for (id, value) in overlay {
        merged.insert(id.clone(), value.clone());
    }
    merged
}

/// Registry order: ascending `required_min_level`, then `priority`, then id.
///
/// The id comparison only matters for exact ties and keeps the order total,
/// so two loads of the same document always list tiers identically.
pub fn tier_order(a: &GeneratorTier, b: &GeneratorTier) -> Ordering {
    a.required_min_level
        .cmp(&b.required_min_level)
        .then(a.priority.cmp(&b.priority))
        .then_with(|| a.id.cmp(&b.id))
}

/// Collect `tiers` into registry order.
pub fn ordered<'a, I>(tiers: I) -> Vec<Arc<GeneratorTier>>
where
    I: IntoIterator<Item = &'a Arc<GeneratorTier>>,
{
    let mut list: Vec<Arc<GeneratorTier>> = tiers.into_iter().cloned().collect();
    list.sort_by(|a, b| tier_order(a, b));
    list
}

#[cfg(test)]
mod tests {
    use isleforge_types::TierId;

    use super::*;

    fn tier(id: &str, min_level: i64, priority: i32) -> Arc<GeneratorTier> {
        let mut tier = GeneratorTier::new(id);
        tier.required_min_level = min_level;
        tier.priority = priority;
        Arc::new(tier)
    }

    #[test]
    fn override_wins_per_id() {
        let mut base = BTreeMap::new();
        base.insert("a", 1);
        base.insert("b", 2);
        let mut overlay = BTreeMap::new();
        overlay.insert("b", 20);
        overlay.insert("c", 30);

        let merged = merge_by_id(&base, &overlay);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get("a"), Some(&1));
        assert_eq!(merged.get("b"), Some(&20));
        assert_eq!(merged.get("c"), Some(&30));
    }

    #[test]
    fn empty_overlay_is_identity() {
        let mut base = BTreeMap::new();
        base.insert(TierId::new("a"), 1);
        let merged = merge_by_id(&base, &BTreeMap::new());
        assert_eq!(merged, base);
    }

    #[test]
    fn ordering_is_level_then_priority_then_id() {
        let tiers = [
            tier("z", 10, 0),
            tier("b", 0, 5),
            tier("a", 0, 5),
            tier("c", 0, 1),
            tier("neg", -1, 99),
        ];
        let ids: Vec<String> = ordered(&tiers)
            .iter()
            .map(|t| t.id.to_string())
            .collect();
        assert_eq!(ids, vec!["neg", "c", "a", "b", "z"]);
    }
}
