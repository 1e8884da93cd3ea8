//! The generation boundary.
//!
//! [`GeneratorEngine`] is what a host calls when a block is about to form.
//! It looks up the owning parcel, applies the offline and working-range
//! gates, resolves the applicable tier, and samples an output. Nothing on
//! this path returns an error to the host: every failure becomes "no output"
//! and is logged.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rand::Rng;

use isleforge_catalog::{CatalogError, CatalogSource, CatalogSummary, TierRegistry};
use isleforge_types::{
    GeneratedOutput, GenerationEvent, GeneratorTier, ParcelId, PlayerId, TierId, WorldContext,
};

use crate::collaborators::{Economy, LevelProvider, ParcelDirectory};
use crate::config::{GenerationConfig, GeneratorConfig};
use crate::eligibility::within_working_range;
use crate::permissions::effective_working_range;
use crate::progression::{ProgressionContext, ProgressionMachine};
use crate::resolution::{ResolutionTrace, ResolveRequest, Resolver};
use crate::sampler::sample_tier_output;
use crate::store::ParcelStore;

/// Host services the engine calls into.
#[derive(Clone)]
pub struct Collaborators {
    /// Parcel levels.
    pub levels: Arc<dyn LevelProvider>,
    /// Parcel ownership and membership.
    pub directory: Arc<dyn ParcelDirectory>,
    /// Currency backend; costs are not charged without one.
    pub economy: Option<Arc<dyn Economy>>,
}

/// What happened to one generation event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationReport {
    /// Parcel covering the event position.
    pub parcel: Option<ParcelId>,
    /// Tier that produced the output.
    pub tier: Option<TierId>,
    /// The output, or `None` when the host should keep its default block.
    pub output: Option<GeneratedOutput>,
    /// Resolution trace; empty unless the event asked for one.
    pub trace: Vec<String>,
}

/// Entry point for generation events and progression commands.
pub struct GeneratorEngine {
    registry: Arc<TierRegistry>,
    store: Arc<ParcelStore>,
    progression: ProgressionMachine,
    levels: Arc<dyn LevelProvider>,
    directory: Arc<dyn ParcelDirectory>,
    resolver: Resolver,
    generation: GenerationConfig,
}

impl std::fmt::Debug for GeneratorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorEngine")
            .field("resolver", &self.resolver)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl GeneratorEngine {
    /// Wire an engine from configuration, shared state, and host services.
    pub fn new(
        config: &GeneratorConfig,
        registry: Arc<TierRegistry>,
        store: Arc<ParcelStore>,
        collaborators: Collaborators,
    ) -> Self {
        let progression = ProgressionMachine::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            collaborators.economy,
            config.progression.clone(),
        );
        Self {
            registry,
            store,
            progression,
            levels: collaborators.levels,
            directory: collaborators.directory,
            resolver: Resolver::new(config.resolution.mode),
            generation: config.generation,
        }
    }

    /// The progression machine sharing this engine's registry and store.
    pub const fn progression(&self) -> &ProgressionMachine {
        &self.progression
    }

    /// The tier registry.
    pub const fn registry(&self) -> &Arc<TierRegistry> {
        &self.registry
    }

    /// The parcel store.
    pub const fn store(&self) -> &Arc<ParcelStore> {
        &self.store
    }

    /// Every tier visible in `world`, in registry order.
    pub fn all_tiers(&self, world: &WorldContext) -> Arc<[Arc<GeneratorTier>]> {
        self.registry.all_for_world(world)
    }

    /// Reload the catalog from `source`. The previous catalog stays in use
    /// if the new one is rejected.
    pub fn reload(&self, source: &dyn CatalogSource) -> Result<CatalogSummary, CatalogError> {
        self.registry.load_all(source)
    }

    /// A progression context for `player` acting on `parcel`, with the
    /// level taken from the level provider.
    pub fn context(
        &self,
        parcel: ParcelId,
        player: PlayerId,
        world: WorldContext,
    ) -> ProgressionContext {
        let level = self.levels.level(parcel, &world);
        ProgressionContext::new(parcel, player, world).at_level(level)
    }

    /// Decide what `event` produces, using the thread-local RNG.
    ///
    /// A panic raised inside a host collaborator is contained here and the
    /// event produces no output.
    pub fn on_generation(&self, event: &GenerationEvent) -> Option<GeneratedOutput> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.generate(event, &mut rand::rng()))) {
            Ok(report) => report.output,
            Err(_) => {
                tracing::warn!(
                    world = %event.world.world,
                    kind = %event.kind,
                    "Generation panicked, keeping default block"
                );
                None
            }
        }
    }

    /// Decide what `event` produces and report how.
    ///
    /// Collaborator panics propagate from here; hosts that do not catch
    /// them should call [`on_generation`](Self::on_generation).
    pub fn generate<R: Rng + ?Sized>(&self, event: &GenerationEvent, rng: &mut R) -> GenerationReport {
        let mut report = GenerationReport::default();
        let mut trace = ResolutionTrace::new(event.debug);

        let Some(parcel) = self.directory.owner_at(&event.world, &event.position) else {
            trace.note(|| "no parcel at position".to_owned());
            report.trace = trace.into_lines();
            return report;
        };
        report.parcel = Some(parcel);

        if !self.generation.offline_generation && !self.directory.is_any_member_online(parcel) {
            trace.note(|| "no member online".to_owned());
            report.trace = trace.into_lines();
            return report;
        }

        let data = self.store.snapshot(parcel);
        let range = effective_working_range(self.generation.default_working_range, data.working_range);
        if !within_working_range(range, event.nearest_member_distance) {
            trace.note(|| {
                format!(
                    "outside working range {range}: nearest member at {:?}",
                    event.nearest_member_distance
                )
            });
            report.trace = trace.into_lines();
            return report;
        }

        let level = self.levels.level(parcel, &event.world);
        let tiers = self.registry.all_for_world(&event.world);
        let request = ResolveRequest {
            data: &data,
            level,
            kind: event.kind,
            biome: event.biome.as_deref(),
            tiers: &tiers,
        };
        let selected = self.resolver.resolve(&request, &mut trace);

        for tier in trace.empty_tables() {
            if self.registry.note_empty_output(tier) {
                tracing::warn!(tier = %tier, "Skipping tier with an empty output table");
            }
        }

        if let Some(tier) = selected {
            sample_into(&mut report, &mut trace, parcel, &tier, rng);
        }

        if event.debug {
            tracing::info!(
                parcel = %parcel,
                level,
                kind = %event.kind,
                trace = ?trace.lines(),
                "Generation trace"
            );
        }
        report.trace = trace.into_lines();
        report
    }
}

/// Sample `tier` into `report`. The tier is only reported when it produced
/// an output.
fn sample_into<R: Rng + ?Sized>(
    report: &mut GenerationReport,
    trace: &mut ResolutionTrace,
    parcel: ParcelId,
    tier: &GeneratorTier,
    rng: &mut R,
) {
    match sample_tier_output(tier, rng) {
        Ok(output) => {
            trace.note(|| format!("produced {}", output.material()));
            report.tier = Some(tier.id.clone());
            report.output = Some(output);
        }
        Err(e) => {
            trace.note(|| format!("sampling {} failed: {e}", tier.id));
            tracing::warn!(
                parcel = %parcel,
                tier = %tier.id,
                error = %e,
                "Generation failed, keeping default block"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use isleforge_catalog::CatalogDocument;
    use isleforge_types::{BlockKind, BlockPos, Material};

    use crate::collaborators::{InMemoryDirectory, InMemoryLevels, ParcelRegion};

    use super::*;

    const CATALOG: &str = r"
tiers:
  basic:
    default: true
    required_min_level: -1
    blocks: { cobblestone: 1 }
  deep:
    required_min_level: 20
    blocks: { diamond_ore: 1 }
";

    struct Fixture {
        engine: GeneratorEngine,
        directory: Arc<InMemoryDirectory>,
        levels: Arc<InMemoryLevels>,
        parcel: ParcelId,
        player: PlayerId,
    }

    fn fixture(config: &GeneratorConfig) -> Fixture {
        let registry = Arc::new(TierRegistry::new());
        let document = CatalogDocument::from_yaml_str(CATALOG).unwrap_or_default();
        assert!(registry.load_all(&document).is_ok());

        let parcel = ParcelId::new();
        let player = PlayerId::new();
        let directory = Arc::new(InMemoryDirectory::new());
        directory.add_region(ParcelRegion {
            parcel,
            world: "w".to_owned(),
            center: BlockPos::new(0, 64, 0),
            radius: 50,
        });
        directory.add_member(parcel, player);
        directory.set_online(player, true);
        let levels = Arc::new(InMemoryLevels::new());

        let engine = GeneratorEngine::new(
            config,
            registry,
            Arc::new(ParcelStore::new(None)),
            Collaborators {
                levels: Arc::clone(&levels) as Arc<dyn LevelProvider>,
                directory: Arc::clone(&directory) as Arc<dyn ParcelDirectory>,
                economy: None,
            },
        );
        Fixture {
            engine,
            directory,
            levels,
            parcel,
            player,
        }
    }

    fn event() -> GenerationEvent {
        GenerationEvent::new(WorldContext::new("w"), BlockPos::new(3, 60, -4), BlockKind::Cobblestone)
    }

    #[test]
    fn owned_position_generates_from_resolved_tier() {
        let f = fixture(&GeneratorConfig::default());
        let mut rng = StdRng::seed_from_u64(1);
        let report = f.engine.generate(&event(), &mut rng);
        assert_eq!(report.parcel, Some(f.parcel));
        assert_eq!(report.tier, Some(TierId::new("basic")));
        assert_eq!(
            report.output,
            Some(GeneratedOutput::Block(Material::new("cobblestone")))
        );

        f.levels.set(f.parcel, 25);
        let report = f.engine.generate(&event(), &mut rng);
        assert_eq!(report.tier, Some(TierId::new("deep")));
    }

    #[test]
    fn unowned_position_keeps_default() {
        let f = fixture(&GeneratorConfig::default());
        let far = GenerationEvent::new(
            WorldContext::new("w"),
            BlockPos::new(500, 60, 500),
            BlockKind::Stone,
        );
        assert_eq!(f.engine.on_generation(&far), None);
    }

    #[test]
    fn offline_parcel_keeps_default_unless_enabled() {
        let f = fixture(&GeneratorConfig::default());
        f.directory.set_online(f.player, false);
        assert_eq!(f.engine.on_generation(&event()), None);

        let mut config = GeneratorConfig::default();
        config.generation.offline_generation = true;
        let f = fixture(&config);
        f.directory.set_online(f.player, false);
        assert!(f.engine.on_generation(&event()).is_some());
    }

    #[test]
    fn working_range_gates_distant_members() {
        let f = fixture(&GeneratorConfig::default());
        let _ = f.engine.progression().set_limits(f.parcel, None, Some(16));
        assert_eq!(f.engine.on_generation(&event().with_member_distance(40.0)), None);
        assert!(f.engine.on_generation(&event().with_member_distance(10.0)).is_some());
        assert!(f.engine.on_generation(&event()).is_some());
    }

    #[test]
    fn traced_events_report_their_steps() {
        let f = fixture(&GeneratorConfig::default());
        let mut rng = StdRng::seed_from_u64(7);
        let report = f.engine.generate(&event().traced(), &mut rng);
        assert!(report.trace.iter().any(|line| line == "mode: legacy"));
        assert!(report.trace.iter().any(|line| line == "selected basic"));

        let quiet = f.engine.generate(&event(), &mut rng);
        assert!(quiet.trace.is_empty());
    }

    #[test]
    fn generation_never_creates_parcel_records() {
        let f = fixture(&GeneratorConfig::default());
        let _ = f.engine.on_generation(&event());
        assert!(!f.engine.store().contains(f.parcel));
    }

    struct BrokenLevels;

    impl LevelProvider for BrokenLevels {
        #[allow(clippy::panic)]
        fn level(&self, _parcel: ParcelId, _world: &WorldContext) -> u64 {
            panic!("level service unavailable");
        }
    }

    #[test]
    fn collaborator_panic_keeps_default_block() {
        let f = fixture(&GeneratorConfig::default());
        let engine = GeneratorEngine::new(
            &GeneratorConfig::default(),
            Arc::clone(f.engine.registry()),
            Arc::new(ParcelStore::new(None)),
            Collaborators {
                levels: Arc::new(BrokenLevels),
                directory: Arc::clone(&f.directory) as Arc<dyn ParcelDirectory>,
                economy: None,
            },
        );
        assert_eq!(engine.on_generation(&event()), None);
        assert!(f.engine.on_generation(&event()).is_some());
    }

    #[test]
    fn failed_sample_reports_no_tier() {
        let mut report = GenerationReport::default();
        let mut trace = ResolutionTrace::new(true);
        let hollow = GeneratorTier::new("hollow");
        let mut rng = StdRng::seed_from_u64(3);
        sample_into(&mut report, &mut trace, ParcelId::new(), &hollow, &mut rng);

        assert_eq!(report.tier, None);
        assert_eq!(report.output, None);
        assert!(trace.lines().iter().any(|line| line.starts_with("sampling hollow failed")));
    }

    #[test]
    fn context_takes_level_from_provider() {
        let f = fixture(&GeneratorConfig::default());
        f.levels.set(f.parcel, 12);
        let ctx = f.engine.context(f.parcel, f.player, WorldContext::new("w"));
        assert_eq!(ctx.level, 12);
    }
}
