//! Enumeration types for generation events and tier categories.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// BlockKind
// ---------------------------------------------------------------------------

/// The terrain block a generation event is about to produce.
///
/// The host decides which kind an event is (fluid contact rules, block
/// replacement hooks); the engine only decides what replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Cobblestone-forming contact (category A).
    Cobblestone,
    /// Stone-forming contact (category B).
    Stone,
    /// Basalt-forming contact (category C).
    Basalt,
}

impl BlockKind {
    /// Every block kind, in declaration order.
    pub const ALL: [Self; 3] = [Self::Cobblestone, Self::Stone, Self::Basalt];
}

impl core::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Cobblestone => "cobblestone",
            Self::Stone => "stone",
            Self::Basalt => "basalt",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// GeneratorCategory
// ---------------------------------------------------------------------------

/// Which generation events a tier may respond to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorCategory {
    /// Only cobblestone events.
    Cobblestone,
    /// Only stone events.
    Stone,
    /// Only basalt events.
    Basalt,
    /// Cobblestone or stone events.
    CobblestoneOrStone,
    /// Basalt or cobblestone events.
    BasaltOrCobblestone,
    /// Basalt or stone events.
    BasaltOrStone,
    /// Every event.
    #[default]
    Any,
}

impl GeneratorCategory {
    /// Whether a tier of this category may respond to an event of `kind`.
    pub const fn accepts(self, kind: BlockKind) -> bool {
        match self {
            Self::Any => true,
            Self::Cobblestone => matches!(kind, BlockKind::Cobblestone),
            Self::Stone => matches!(kind, BlockKind::Stone),
            Self::Basalt => matches!(kind, BlockKind::Basalt),
            Self::CobblestoneOrStone => {
                matches!(kind, BlockKind::Cobblestone | BlockKind::Stone)
            }
            Self::BasaltOrCobblestone => {
                matches!(kind, BlockKind::Basalt | BlockKind::Cobblestone)
            }
            Self::BasaltOrStone => matches!(kind, BlockKind::Basalt | BlockKind::Stone),
        }
    }
}

impl core::fmt::Display for GeneratorCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Cobblestone => "cobblestone",
            Self::Stone => "stone",
            Self::Basalt => "basalt",
            Self::CobblestoneOrStone => "cobblestone_or_stone",
            Self::BasaltOrCobblestone => "basalt_or_cobblestone",
            Self::BasaltOrStone => "basalt_or_stone",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}
