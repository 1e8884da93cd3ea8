//! Picking the tier that applies to a generation event.
//!
//! Two strategies coexist and are selected by [`ResolutionMode`]:
//!
//! - **Legacy** walks the world's tier list in registry order and keeps the
//!   last tier whose minimum level the parcel meets. A tier with a negative
//!   minimum level is therefore always a candidate, which makes it the
//!   always-on fallback. Category is ignored.
//! - **Multi-active** considers only the parcel's active tiers that are
//!   unlocked and accept the event's block kind, and picks the highest
//!   priority; ties go to the lexicographically smallest id.
//!
//! `Auto` uses legacy until the parcel has an explicit active selection.
//!
//! Neither strategy ever returns a tier with an empty output table. Such
//! tiers are skipped and reported through [`ResolutionTrace::empty_tables`]
//! so the caller can warn once.

use std::cmp::Reverse;
use std::sync::Arc;

use isleforge_types::{BlockKind, GeneratorTier, ParcelGeneratorData, TierId};

use crate::config::ResolutionMode;
use crate::eligibility::is_unlocked;

/// Inputs of one resolution.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    /// The parcel's progression record.
    pub data: &'a ParcelGeneratorData,
    /// The parcel's current level.
    pub level: u64,
    /// Block kind the event would produce by default.
    pub kind: BlockKind,
    /// Biome at the event position, if known.
    pub biome: Option<&'a str>,
    /// Tiers visible in the event's world, in registry order.
    pub tiers: &'a [Arc<GeneratorTier>],
}

/// Per-request record of resolution decisions.
///
/// Trace lines are only collected when the request asked for them; skipped
/// empty tables are always collected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionTrace {
    enabled: bool,
    lines: Vec<String>,
    empty_tables: Vec<TierId>,
}

impl ResolutionTrace {
    /// A trace that records lines only when `enabled`.
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled,
            lines: Vec::new(),
            empty_tables: Vec::new(),
        }
    }

    /// Record a decision line. The message is only built when tracing.
    pub fn note(&mut self, line: impl FnOnce() -> String) {
        if self.enabled {
            let line = line();
            tracing::debug!(trace = %line, "Resolution step");
            self.lines.push(line);
        }
    }

    fn skipped_empty(&mut self, tier: &TierId) {
        if !self.empty_tables.contains(tier) {
            self.empty_tables.push(tier.clone());
        }
        self.note(|| format!("skip {tier}: empty output table"));
    }

    /// Recorded decision lines.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Tiers skipped because their output table is empty.
    pub fn empty_tables(&self) -> &[TierId] {
        &self.empty_tables
    }

    /// Consume the trace, keeping the lines.
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// Legacy single-tier resolution by level.
pub fn resolve_legacy(
    request: &ResolveRequest<'_>,
    trace: &mut ResolutionTrace,
) -> Option<Arc<GeneratorTier>> {
    let mut selected: Option<&Arc<GeneratorTier>> = None;
    for tier in request.tiers {
        if !tier.is_published {
            trace.note(|| format!("skip {}: unpublished", tier.id));
            continue;
        }
        if !tier.has_outputs() {
            trace.skipped_empty(&tier.id);
            continue;
        }
        if tier.level_satisfied(request.level) {
            trace.note(|| {
                format!(
                    "candidate {}: min level {} <= {}",
                    tier.id, tier.required_min_level, request.level
                )
            });
            selected = Some(tier);
        } else {
            trace.note(|| {
                format!(
                    "stop at {}: min level {} > {}",
                    tier.id, tier.required_min_level, request.level
                )
            });
            break;
        }
    }
    selected.cloned()
}

/// Multi-active resolution by category and priority.
pub fn resolve_multi_active(
    request: &ResolveRequest<'_>,
    trace: &mut ResolutionTrace,
) -> Option<Arc<GeneratorTier>> {
    let mut best: Option<&Arc<GeneratorTier>> = None;
    for id in &request.data.active_tier_ids {
        let Some(tier) = request.tiers.iter().find(|t| &t.id == id) else {
            trace.note(|| format!("skip {id}: not in this world's catalog"));
            continue;
        };
        if !tier.is_published {
            trace.note(|| format!("skip {id}: unpublished"));
            continue;
        }
        if !is_unlocked(tier, request.data) {
            trace.note(|| format!("skip {id}: not unlocked"));
            continue;
        }
        if !tier.category.accepts(request.kind) {
            trace.note(|| format!("skip {id}: category {} rejects {}", tier.category, request.kind));
            continue;
        }
        if !tier.biome_allowed(request.biome) {
            trace.note(|| format!("skip {id}: biome {:?} not allowed", request.biome));
            continue;
        }
        if !tier.has_outputs() {
            trace.skipped_empty(id);
            continue;
        }
        trace.note(|| format!("candidate {id}: priority {}", tier.priority));
        let better = best.is_none_or(|current| rank(tier) > rank(current));
        if better {
            best = Some(tier);
        }
    }
    best.cloned()
}

fn rank(tier: &GeneratorTier) -> (i32, Reverse<&TierId>) {
    (tier.priority, Reverse(&tier.id))
}

/// Resolution strategy selected by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Resolver {
    mode: ResolutionMode,
}

impl Resolver {
    /// A resolver using `mode`.
    pub const fn new(mode: ResolutionMode) -> Self {
        Self { mode }
    }

    /// The configured mode.
    pub const fn mode(&self) -> ResolutionMode {
        self.mode
    }

    /// Pick the tier for `request`. `None` means no generation occurs.
    pub fn resolve(
        &self,
        request: &ResolveRequest<'_>,
        trace: &mut ResolutionTrace,
    ) -> Option<Arc<GeneratorTier>> {
        let legacy = match self.mode {
            ResolutionMode::Legacy => true,
            ResolutionMode::MultiActive => false,
            ResolutionMode::Auto => request.data.active_tier_ids.is_empty(),
        };
        let selected = if legacy {
            trace.note(|| "mode: legacy".to_owned());
            resolve_legacy(request, trace)
        } else {
            trace.note(|| "mode: multi-active".to_owned());
            resolve_multi_active(request, trace)
        };
        trace.note(|| match &selected {
            Some(tier) => format!("selected {}", tier.id),
            None => "no tier applies".to_owned(),
        });
        selected
    }
}

#[cfg(test)]
mod tests {
    use isleforge_types::{GeneratorCategory, Material, ParcelId};

    use super::*;

    fn tier(id: &str, min_level: i64, priority: i32) -> Arc<GeneratorTier> {
        let mut tier = GeneratorTier::new(id);
        tier.required_min_level = min_level;
        tier.priority = priority;
        tier.output_weights.insert(Material::new("cobblestone"), 1);
        Arc::new(tier)
    }

    fn request<'a>(
        data: &'a ParcelGeneratorData,
        level: u64,
        tiers: &'a [Arc<GeneratorTier>],
    ) -> ResolveRequest<'a> {
        ResolveRequest {
            data,
            level,
            kind: BlockKind::Cobblestone,
            biome: None,
            tiers,
        }
    }

    fn selected_id(tier: Option<Arc<GeneratorTier>>) -> Option<String> {
        tier.map(|t| t.id.to_string())
    }

    #[test]
    fn legacy_picks_highest_satisfied_level() {
        let tiers = [tier("t-1", -1, 0), tier("t0", 0, 0), tier("t15", 15, 0), tier("t30", 30, 0)];
        let data = ParcelGeneratorData::new(ParcelId::new());
        let mut trace = ResolutionTrace::new(false);
        let picked = resolve_legacy(&request(&data, 10, &tiers), &mut trace);
        assert_eq!(selected_id(picked), Some("t0".to_owned()));
    }

    #[test]
    fn legacy_negative_first_tier_is_fallback() {
        let tiers = [tier("fallback", -1, 0), tier("t5", 5, 0)];
        let data = ParcelGeneratorData::new(ParcelId::new());
        let mut trace = ResolutionTrace::new(false);
        let picked = resolve_legacy(&request(&data, 0, &tiers), &mut trace);
        assert_eq!(selected_id(picked), Some("fallback".to_owned()));
    }

    #[test]
    fn legacy_with_no_satisfied_tier_is_none() {
        let tiers = [tier("t5", 5, 0)];
        let data = ParcelGeneratorData::new(ParcelId::new());
        let mut trace = ResolutionTrace::new(false);
        assert!(resolve_legacy(&request(&data, 0, &tiers), &mut trace).is_none());
        assert!(resolve_legacy(&request(&data, 0, &[]), &mut trace).is_none());
    }

    #[test]
    fn legacy_skips_empty_and_unpublished() {
        let hollow = Arc::new(GeneratorTier::new("hollow"));
        let mut hidden = GeneratorTier::new("hidden");
        hidden.is_published = false;
        hidden.output_weights.insert(Material::new("stone"), 1);
        let tiers = [tier("base", -1, 0), hollow, Arc::new(hidden)];
        let data = ParcelGeneratorData::new(ParcelId::new());
        let mut trace = ResolutionTrace::new(false);
        let picked = resolve_legacy(&request(&data, 50, &tiers), &mut trace);
        assert_eq!(selected_id(picked), Some("base".to_owned()));
        assert_eq!(trace.empty_tables(), &[TierId::new("hollow")]);
        assert!(trace.lines().is_empty());
    }

    #[test]
    fn multi_active_prefers_priority_then_smallest_id() {
        let tiers = [tier("b", 0, 5), tier("a", 0, 5), tier("c", 0, 9), tier("d", 0, 1)];
        let mut data = ParcelGeneratorData::new(ParcelId::new());
        for id in ["a", "b", "d"] {
            data.unlocked_tier_ids.insert(TierId::new(id));
            data.active_tier_ids.push(TierId::new(id));
        }
        let mut trace = ResolutionTrace::new(false);
        let picked = resolve_multi_active(&request(&data, 0, &tiers), &mut trace);
        assert_eq!(selected_id(picked), Some("a".to_owned()));
    }

    #[test]
    fn multi_active_filters_category_and_unlock() {
        let mut stone_only = GeneratorTier::new("stone_only");
        stone_only.category = GeneratorCategory::Stone;
        stone_only.priority = 10;
        stone_only.output_weights.insert(Material::new("stone"), 1);
        let tiers = [Arc::new(stone_only), tier("any", 0, 1), tier("locked", 0, 50)];

        let mut data = ParcelGeneratorData::new(ParcelId::new());
        for id in ["stone_only", "any"] {
            data.unlocked_tier_ids.insert(TierId::new(id));
        }
        for id in ["stone_only", "any", "locked"] {
            data.active_tier_ids.push(TierId::new(id));
        }

        let mut trace = ResolutionTrace::new(true);
        let picked = resolve_multi_active(&request(&data, 0, &tiers), &mut trace);
        assert_eq!(selected_id(picked), Some("any".to_owned()));
        assert!(trace.lines().iter().any(|l| l.contains("stone_only")));

        let mut stone = request(&data, 0, &tiers);
        stone.kind = BlockKind::Stone;
        let picked = resolve_multi_active(&stone, &mut ResolutionTrace::new(false));
        assert_eq!(selected_id(picked), Some("stone_only".to_owned()));
    }

    #[test]
    fn multi_active_with_nothing_qualifying_is_none() {
        let tiers = [tier("a", 0, 0)];
        let mut data = ParcelGeneratorData::new(ParcelId::new());
        data.active_tier_ids.push(TierId::new("ghost"));
        let picked = resolve_multi_active(&request(&data, 0, &tiers), &mut ResolutionTrace::new(false));
        assert!(picked.is_none());
    }

    #[test]
    fn auto_mode_switches_on_active_selection() {
        let tiers = [tier("base", -1, 0), tier("chosen", 0, 0), tier("top", 5, 0)];
        let mut data = ParcelGeneratorData::new(ParcelId::new());
        let resolver = Resolver::new(ResolutionMode::Auto);

        let picked = resolver.resolve(&request(&data, 10, &tiers), &mut ResolutionTrace::new(false));
        assert_eq!(selected_id(picked), Some("top".to_owned()));

        data.unlocked_tier_ids.insert(TierId::new("chosen"));
        data.active_tier_ids.push(TierId::new("chosen"));
        let picked = resolver.resolve(&request(&data, 10, &tiers), &mut ResolutionTrace::new(false));
        assert_eq!(selected_id(picked), Some("chosen".to_owned()));
    }

    #[test]
    fn trace_lines_only_when_enabled() {
        let tiers = [tier("base", -1, 0)];
        let data = ParcelGeneratorData::new(ParcelId::new());
        let resolver = Resolver::new(ResolutionMode::Legacy);

        let mut quiet = ResolutionTrace::new(false);
        resolver.resolve(&request(&data, 0, &tiers), &mut quiet);
        assert!(quiet.lines().is_empty());

        let mut loud = ResolutionTrace::new(true);
        resolver.resolve(&request(&data, 0, &tiers), &mut loud);
        assert_eq!(loud.lines().first().map(String::as_str), Some("mode: legacy"));
        assert_eq!(loud.lines().last().map(String::as_str), Some("selected base"));
    }
}
