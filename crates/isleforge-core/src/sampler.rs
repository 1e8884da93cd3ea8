//! Cumulative-weight sampling.
//!
//! A [`WeightedTable`] fixes one iteration order (ascending by weight, then
//! by key) and uses it both for sampling and for the percentage breakdown
//! shown to players, so displayed odds and real odds cannot drift apart.
//!
//! Draw procedure:
//!
//! 1. A single-entry table returns its entry without consuming randomness.
//! 2. Otherwise draw `r` uniformly in `[1, total]`.
//! 3. Walk the entries in table order accumulating weights and return the
//!    first entry whose running sum reaches `r`.

use std::collections::BTreeMap;

use rand::Rng;

use isleforge_types::{GeneratedOutput, GeneratorTier, Material};

use crate::error::GenerationError;

/// Display odds of one table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Odds<K> {
    /// The entry.
    pub key: K,
    /// Its raw weight.
    pub weight: u32,
    /// `floor(weight * 100 / total)`.
    pub percent: u32,
}

/// A weighted table in sampling order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedTable<K> {
    entries: Vec<(K, u32)>,
    total: u64,
}

impl<K: Ord + Clone> WeightedTable<K> {
    /// Build a table from `weights`. Zero weights are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::WeightOverflow`] if the total does not fit.
    pub fn from_map(weights: &BTreeMap<K, u32>) -> Result<Self, GenerationError> {
        let mut entries: Vec<(K, u32)> = weights
            .iter()
            .filter(|&(_, &w)| w > 0)
            .map(|(k, &w)| (k.clone(), w))
            .collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let total = entries.iter().try_fold(0_u64, |acc, (_, w)| {
            acc.checked_add(u64::from(*w))
                .ok_or(GenerationError::WeightOverflow)
        })?;
        Ok(Self { entries, total })
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all weights.
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// Entries in sampling order.
    pub fn entries(&self) -> &[(K, u32)] {
        &self.entries
    }

    /// Draw one entry. `None` only for an empty table.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&K> {
        if let [(only, _)] = self.entries.as_slice() {
            return Some(only);
        }
        if self.total == 0 {
            return None;
        }
        let roll = rng.random_range(1..=self.total);
        let mut cumulative = 0_u64;
        for (key, weight) in &self.entries {
            cumulative = cumulative.saturating_add(u64::from(*weight));
            if cumulative >= roll {
                return Some(key);
            }
        }
        None
    }

    /// Percentage breakdown in sampling order.
    pub fn percentages(&self) -> Vec<Odds<K>> {
        self.entries
            .iter()
            .map(|(key, weight)| {
                let percent = u64::from(*weight)
                    .saturating_mul(100)
                    .checked_div(self.total)
                    .and_then(|p| u32::try_from(p).ok())
                    .unwrap_or(0);
                Odds {
                    key: key.clone(),
                    weight: *weight,
                    percent,
                }
            })
            .collect()
    }
}

/// Produce the output of one generation event for `tier`.
///
/// A uniform draw in `[0, 1)` is taken first; below `treasure_chance` (and
/// with a non-empty treasure table) the treasure table is sampled and a
/// stack size is drawn in `[1, max_treasure_amount]`. Otherwise the
/// ordinary output table is sampled.
///
/// # Errors
///
/// Returns [`GenerationError::EmptyOutputTable`] if the tier has no
/// ordinary outputs, or [`GenerationError::WeightOverflow`].
pub fn sample_tier_output<R: Rng + ?Sized>(
    tier: &GeneratorTier,
    rng: &mut R,
) -> Result<GeneratedOutput, GenerationError> {
    if !tier.has_outputs() {
        return Err(GenerationError::EmptyOutputTable {
            tier: tier.id.clone(),
        });
    }

    let treasure_roll: f64 = rng.random();
    if treasure_roll < tier.treasure_chance && !tier.treasure_weights.is_empty() {
        let table = WeightedTable::from_map(&tier.treasure_weights)?;
        if let Some(material) = table.sample(rng) {
            let amount = if tier.max_treasure_amount <= 1 {
                1
            } else {
                rng.random_range(1..=tier.max_treasure_amount)
            };
            return Ok(GeneratedOutput::Treasure {
                material: material.clone(),
                amount,
            });
        }
    }

    let table = WeightedTable::from_map(&tier.output_weights)?;
    table
        .sample(rng)
        .map(|material: &Material| GeneratedOutput::Block(material.clone()))
        .ok_or_else(|| GenerationError::EmptyOutputTable {
            tier: tier.id.clone(),
        })
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn table(entries: &[(&str, u32)]) -> WeightedTable<Material> {
        let map: BTreeMap<Material, u32> = entries
            .iter()
            .map(|(k, w)| (Material::new(*k), *w))
            .collect();
        WeightedTable::from_map(&map).unwrap_or_else(|_| WeightedTable {
            entries: Vec::new(),
            total: 0,
        })
    }

    #[test]
    fn order_is_weight_then_key() {
        let t = table(&[("stone", 5), ("cobblestone", 5), ("diamond", 1)]);
        let keys: Vec<&str> = t.entries().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["diamond", "cobblestone", "stone"]);
        assert_eq!(t.total(), 11);
    }

    #[test]
    fn single_entry_always_wins() {
        let t = table(&[("cobblestone", 7)]);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(t.sample(&mut rng).map(Material::as_str), Some("cobblestone"));
        }
    }

    #[test]
    fn empty_table_samples_nothing() {
        let t = table(&[]);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(t.is_empty());
        assert!(t.sample(&mut rng).is_none());
        assert!(t.percentages().is_empty());
    }

    #[test]
    fn percentages_floor_in_sampling_order() {
        let t = table(&[("cobblestone", 5), ("stone", 1)]);
        let odds = t.percentages();
        let view: Vec<(&str, u32)> = odds.iter().map(|o| (o.key.as_str(), o.percent)).collect();
        assert_eq!(view, vec![("stone", 16), ("cobblestone", 83)]);
    }

    #[test]
    fn zero_weights_are_dropped() {
        let t = table(&[("a", 0), ("b", 3)]);
        assert_eq!(t.entries().len(), 1);
        assert_eq!(t.total(), 3);
    }

    #[test]
    fn treasure_overlay_uses_treasure_table() {
        let mut tier = GeneratorTier::new("lucky");
        tier.output_weights.insert(Material::new("cobblestone"), 1);
        tier.treasure_weights.insert(Material::new("diamond"), 1);
        tier.treasure_chance = 1.0;
        tier.max_treasure_amount = 3;

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let output = sample_tier_output(&tier, &mut rng);
            assert!(
                matches!(
                    output,
                    Ok(GeneratedOutput::Treasure { ref material, amount: 1..=3 })
                        if material.as_str() == "diamond"
                ),
                "expected a diamond stack, got {output:?}"
            );
        }
    }

    #[test]
    fn zero_chance_never_yields_treasure() {
        let mut tier = GeneratorTier::new("plain");
        tier.output_weights.insert(Material::new("stone"), 1);
        tier.treasure_weights.insert(Material::new("diamond"), 1);
        tier.treasure_chance = 0.0;

        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let output = sample_tier_output(&tier, &mut rng);
            assert_eq!(output, Ok(GeneratedOutput::Block(Material::new("stone"))));
        }
    }

    #[test]
    fn treasure_amount_defaults_to_one() {
        let mut tier = GeneratorTier::new("tiny");
        tier.output_weights.insert(Material::new("stone"), 1);
        tier.treasure_weights.insert(Material::new("emerald"), 1);
        tier.treasure_chance = 1.0;
        tier.max_treasure_amount = 0;

        let mut rng = StdRng::seed_from_u64(11);
        let output = sample_tier_output(&tier, &mut rng);
        assert_eq!(
            output,
            Ok(GeneratedOutput::Treasure {
                material: Material::new("emerald"),
                amount: 1,
            })
        );
    }

    #[test]
    fn empty_output_table_is_an_error() {
        let tier = GeneratorTier::new("hollow");
        let mut rng = StdRng::seed_from_u64(5);
        assert_eq!(
            sample_tier_output(&tier, &mut rng),
            Err(GenerationError::EmptyOutputTable {
                tier: tier.id.clone(),
            })
        );
    }
}
