//! Eligibility predicates.
//!
//! Pure functions over a tier and a parcel context. No I/O, no locks: they
//! are shared by the resolution hot path and the progression machine.

use std::collections::BTreeSet;

use isleforge_types::{GeneratorTier, ParcelGeneratorData};

/// Why a tier cannot be unlocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ineligible {
    /// The parcel level is below the tier's minimum.
    LevelTooLow {
        /// Minimum level of the tier.
        required: i64,
        /// Current parcel level.
        level: u64,
    },
    /// The tier is restricted to other biomes.
    BiomeNotAllowed {
        /// The biome that was checked, if known.
        biome: Option<String>,
    },
    /// A required permission is not held.
    MissingPermission {
        /// The first missing permission.
        permission: String,
    },
}

impl Ineligible {
    /// Stable, machine-checkable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::LevelTooLow { .. } => "level_too_low",
            Self::BiomeNotAllowed { .. } => "biome_not_allowed",
            Self::MissingPermission { .. } => "missing_permission",
        }
    }
}

impl std::fmt::Display for Ineligible {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LevelTooLow { required, level } => {
                write!(f, "requires level {required}, parcel is level {level}")
            }
            Self::BiomeNotAllowed { biome } => match biome {
                Some(biome) => write!(f, "not available in biome {biome}"),
                None => write!(f, "not available in an unknown biome"),
            },
            Self::MissingPermission { permission } => {
                write!(f, "requires permission {permission}")
            }
        }
    }
}

/// Whether `tier` counts as unlocked for the parcel. Default tiers are
/// always unlocked without being stored.
pub fn is_unlocked(tier: &GeneratorTier, data: &ParcelGeneratorData) -> bool {
    tier.is_default || data.has_unlocked(&tier.id)
}

/// Check every unlock gate of `tier`: level, then biome, then permissions.
///
/// # Errors
///
/// Returns the first [`Ineligible`] gate that fails.
pub fn check_unlock(
    tier: &GeneratorTier,
    level: u64,
    biome: Option<&str>,
    permissions: &BTreeSet<String>,
) -> Result<(), Ineligible> {
    if !tier.level_satisfied(level) {
        return Err(Ineligible::LevelTooLow {
            required: tier.required_min_level,
            level,
        });
    }
    if !tier.biome_allowed(biome) {
        return Err(Ineligible::BiomeNotAllowed {
            biome: biome.map(str::to_owned),
        });
    }
    if let Some(missing) = tier
        .required_permissions
        .iter()
        .find(|p| !permissions.contains(*p))
    {
        return Err(Ineligible::MissingPermission {
            permission: missing.clone(),
        });
    }
    Ok(())
}

/// Whether every unlock gate of `tier` passes.
pub fn can_unlock(
    tier: &GeneratorTier,
    level: u64,
    biome: Option<&str>,
    permissions: &BTreeSet<String>,
) -> bool {
    check_unlock(tier, level, biome, permissions).is_ok()
}

/// Whether `tier` is currently active for the parcel.
pub fn is_active(tier: &GeneratorTier, data: &ParcelGeneratorData) -> bool {
    data.is_active(&tier.id)
}

/// Whether an event at `distance` blocks from the nearest member is inside
/// `range`. A zero range or an unknown distance always passes.
pub fn within_working_range(range: u32, distance: Option<f64>) -> bool {
    range == 0 || distance.is_none_or(|d| d <= f64::from(range))
}
