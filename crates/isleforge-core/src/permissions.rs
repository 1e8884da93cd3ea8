//! Limits derived from permission nodes.
//!
//! With prefix `p`, the recognised nodes are:
//!
//! - `p.active-generators.<n>` -- active slot limit candidate
//! - `p.range.<n>` -- working range candidate, in blocks
//! - `p.bundle.<id>` -- bundle visibility (`p.bundle.*` shows every bundle)
//!
//! When several numeric candidates are held the highest one wins. Nodes
//! with a non-numeric suffix are ignored.

use std::collections::BTreeSet;

use isleforge_types::BundleId;

/// Limits and bundle access derived from a permission set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionLimits {
    /// Highest active slot limit granted, if any.
    pub slot_limit: Option<u32>,
    /// Highest working range granted, if any.
    pub working_range: Option<u32>,
    /// Bundles explicitly granted.
    pub bundles: BTreeSet<BundleId>,
    /// Whether every bundle is visible.
    pub all_bundles: bool,
}

impl PermissionLimits {
    /// Derive limits from `permissions` using node prefix `prefix`.
    pub fn derive<'a, I>(prefix: &str, permissions: I) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        let slots = format!("{prefix}.active-generators.");
        let range = format!("{prefix}.range.");
        let bundle = format!("{prefix}.bundle.");

        let mut limits = Self::default();
        for node in permissions {
            if let Some(n) = numeric_suffix(node, &slots) {
                limits.slot_limit = limits.slot_limit.max(Some(n));
            } else if let Some(n) = numeric_suffix(node, &range) {
                limits.working_range = limits.working_range.max(Some(n));
            } else if let Some(id) = node.strip_prefix(bundle.as_str()) {
                if id == "*" {
                    limits.all_bundles = true;
                } else if !id.is_empty() {
                    limits.bundles.insert(BundleId::new(id));
                }
            }
        }
        limits
    }

    /// Whether bundle `id` is visible.
    pub fn can_see_bundle(&self, id: &BundleId) -> bool {
        self.all_bundles || self.bundles.contains(id)
    }
}

fn numeric_suffix(node: &str, prefix: &str) -> Option<u32> {
    node.strip_prefix(prefix)?.parse().ok()
}

/// The slot limit that applies to a parcel: the larger of the configured
/// default and the parcel's own limit.
pub const fn effective_slot_limit(default: u32, parcel: Option<u32>) -> u32 {
    match parcel {
        Some(own) if own > default => own,
        _ => default,
    }
}

/// The working range that applies to a parcel: its own range if set,
/// otherwise the configured default. Zero means unlimited.
pub const fn effective_working_range(default: u32, parcel: Option<u32>) -> u32 {
    match parcel {
        Some(own) => own,
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perms(nodes: &[&str]) -> BTreeSet<String> {
        nodes.iter().map(|n| (*n).to_owned()).collect()
    }

    #[test]
    fn highest_numeric_candidate_wins() {
        let set = perms(&[
            "islandgen.active-generators.2",
            "islandgen.active-generators.5",
            "islandgen.active-generators.3",
            "islandgen.range.32",
            "islandgen.range.128",
        ]);
        let limits = PermissionLimits::derive("islandgen", &set);
        assert_eq!(limits.slot_limit, Some(5));
        assert_eq!(limits.working_range, Some(128));
    }

    #[test]
    fn malformed_and_foreign_nodes_are_ignored() {
        let set = perms(&[
            "islandgen.active-generators.lots",
            "islandgen.range.-4",
            "othergen.active-generators.9",
            "islandgen.bundle.",
        ]);
        let limits = PermissionLimits::derive("islandgen", &set);
        assert_eq!(limits, PermissionLimits::default());
    }

    #[test]
    fn bundle_nodes_grant_visibility() {
        let set = perms(&["islandgen.bundle.vip", "islandgen.bundle.miner"]);
        let limits = PermissionLimits::derive("islandgen", &set);
        assert!(limits.can_see_bundle(&BundleId::new("vip")));
        assert!(!limits.can_see_bundle(&BundleId::new("starter")));

        let all = PermissionLimits::derive("islandgen", &perms(&["islandgen.bundle.*"]));
        assert!(all.can_see_bundle(&BundleId::new("starter")));
    }

    #[test]
    fn effective_limits_combine_default_and_parcel() {
        assert_eq!(effective_slot_limit(1, None), 1);
        assert_eq!(effective_slot_limit(1, Some(4)), 4);
        assert_eq!(effective_slot_limit(3, Some(2)), 3);
        assert_eq!(effective_working_range(0, None), 0);
        assert_eq!(effective_working_range(64, Some(16)), 16);
    }
}
