//! Core simulation state for the dark-forest doctrine workspace.
//!
//! A [`WorldState`] owns every civilization on a bounded grid field and
//! advances them one tick at a time: technology growth, neighborhood scans,
//! combat, signalling, and collaboration, with per-tick survival metrics
//! collected before each pass. All randomness flows through one seeded
//! generator so identical configurations replay identically.

use ordered_float::OrderedFloat;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, RngCore, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use std::borrow::Cow;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

pub use darkforest_index::{CellPos, IndexError, Metric, MultiOccupancyGrid, SpatialIndex};

new_key_type! {
    /// Stable handle for civilizations backed by a generational slot map.
    pub struct CivId;
}

/// Lowest technology level a civilization can hold.
pub const TECH_MIN: u32 = 1;

/// Highest technology level a civilization can hold.
pub const TECH_MAX: u32 = 1_000;

/// Flat bonus granted to a defender that survives an attack.
const SURVIVOR_TECH_BONUS: u32 = 5;

/// Monotonic simulation tick counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tick(pub u64);

impl Tick {
    /// Tick zero, the state before any pass has run.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// The next tick in sequence.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Behavioral stance of a civilization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Doctrine {
    /// Scans for weaker neighbors and strikes first.
    Aggressive,
    /// Stays quiet, occasionally signalling to seek collaborators.
    Peaceful,
}

/// Errors raised while building or reconfiguring a world.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// A seed position fell outside the field.
    #[error("position ({x}, {y}) is outside the field")]
    OutOfBounds { x: u32, y: u32 },
    /// A configuration document could not be parsed.
    #[error("configuration document is not valid TOML: {0}")]
    ConfigParse(#[from] toml::de::Error),
    /// The spatial index rejected an operation.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// A batch of civilizations spawned at one starting technology level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnBand {
    /// Technology level assigned to every civilization in the band.
    pub tech_level: u32,
    /// Number of civilizations to spawn.
    pub count: u32,
}

impl SpawnBand {
    #[must_use]
    pub const fn new(tech_level: u32, count: u32) -> Self {
        Self { tech_level, count }
    }
}

fn default_spawn_bands() -> Vec<SpawnBand> {
    vec![
        SpawnBand::new(1, 2),
        SpawnBand::new(2, 2),
        SpawnBand::new(3, 2),
        SpawnBand::new(4, 2),
        SpawnBand::new(5, 2),
        SpawnBand::new(100, 1),
    ]
}

/// Tunable parameters for a dark-forest run.
///
/// All fields have defaults matching the reference scenario; construct with
/// `DarkForestConfig::default()` and override selectively, or parse a TOML
/// document via [`DarkForestConfig::from_toml_str`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DarkForestConfig {
    /// Field width in cells.
    pub field_width: u32,
    /// Field height in cells.
    pub field_height: u32,
    /// Starting population, grouped by technology level.
    pub spawn_bands: Vec<SpawnBand>,
    /// Probability that a spawned civilization adopts the aggressive doctrine.
    pub aggressive_ratio: f64,
    /// Per-tick growth probability for aggressive civilizations.
    pub tech_growth_aggressive: f64,
    /// Per-tick growth probability for peaceful civilizations.
    pub tech_growth_peaceful: f64,
    /// Multiplier applied to the technology level on a growth event.
    pub tech_exponent: f64,
    /// Per-tick probability of a technology explosion.
    pub tech_explosion_prob: f64,
    /// Flat technology gain on an explosion.
    pub tech_explosion_jump: u32,
    /// Weight of the technology difference in the attacker win probability.
    pub battle_factor: f64,
    /// Per-tick probability that a peaceful civilization signals.
    pub signal_prob: f64,
    /// Fraction of each partner's technology gained on collaboration.
    pub collaboration_rate: f64,
    /// Base detection radius in cells.
    pub det_base: f64,
    /// Detection radius gained per technology level.
    pub det_factor: f64,
    /// Base attack radius in cells.
    pub att_base: f64,
    /// Attack radius gained per technology level.
    pub att_factor: f64,
    /// Seed for the world generator; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
    /// Number of tick reports retained in the in-memory history.
    pub history_capacity: usize,
}

impl Default for DarkForestConfig {
    fn default() -> Self {
        Self {
            field_width: 50,
            field_height: 50,
            spawn_bands: default_spawn_bands(),
            aggressive_ratio: 0.5,
            tech_growth_aggressive: 0.02,
            tech_growth_peaceful: 0.01,
            tech_exponent: 1.10,
            tech_explosion_prob: 0.003,
            tech_explosion_jump: 50,
            battle_factor: 0.01,
            signal_prob: 0.10,
            collaboration_rate: 0.05,
            det_base: 3.0,
            det_factor: 0.02,
            att_base: 2.0,
            att_factor: 0.015,
            rng_seed: None,
            history_capacity: 256,
        }
    }
}

impl DarkForestConfig {
    /// Total number of civilizations the spawn bands request.
    #[must_use]
    pub fn total_population(&self) -> u64 {
        self.spawn_bands.iter().map(|band| u64::from(band.count)).sum()
    }

    /// Check invariants before a world is built from this configuration.
    pub fn validate(&self) -> Result<(), WorldError> {
        if self.field_width == 0 || self.field_height == 0 {
            return Err(WorldError::InvalidConfig(
                "field dimensions must be positive",
            ));
        }
        if self
            .spawn_bands
            .iter()
            .any(|band| !(TECH_MIN..=TECH_MAX).contains(&band.tech_level))
        {
            return Err(WorldError::InvalidConfig(
                "spawn band tech levels must lie in [1, 1000]",
            ));
        }
        let cells = u64::from(self.field_width) * u64::from(self.field_height);
        if self.total_population() > cells {
            return Err(WorldError::InvalidConfig(
                "initial population cannot exceed the number of cells",
            ));
        }
        let unit_interval = [
            self.aggressive_ratio,
            self.tech_growth_aggressive,
            self.tech_growth_peaceful,
            self.tech_explosion_prob,
            self.signal_prob,
            self.collaboration_rate,
        ];
        if unit_interval.iter().any(|p| !(0.0..=1.0).contains(p)) {
            return Err(WorldError::InvalidConfig(
                "probabilities and rates must lie in [0, 1]",
            ));
        }
        // RangeFrom::contains is false for NaN, so these also reject NaN inputs.
        if !(1.0..).contains(&self.tech_exponent) {
            return Err(WorldError::InvalidConfig(
                "tech exponent must be at least 1.0",
            ));
        }
        if !(0.0..).contains(&self.battle_factor) {
            return Err(WorldError::InvalidConfig(
                "battle factor must be non-negative",
            ));
        }
        let radius_params = [self.det_base, self.det_factor, self.att_base, self.att_factor];
        if radius_params.iter().any(|r| !(0.0..).contains(r)) {
            return Err(WorldError::InvalidConfig(
                "radius parameters must be non-negative",
            ));
        }
        if self.history_capacity == 0 {
            return Err(WorldError::InvalidConfig(
                "history capacity must be positive",
            ));
        }
        Ok(())
    }

    /// Parse and validate a configuration from a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, WorldError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::seed_from_u64(rand::random()),
        }
    }
}

fn scaled_radius(base: f64, factor: f64, tech_level: u32) -> u32 {
    (base + f64::from(tech_level) * factor).round() as u32
}

/// State of one civilization on the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Civilization {
    /// Cell the civilization occupies.
    pub position: CellPos,
    /// Current technology level, always within `[TECH_MIN, TECH_MAX]`.
    pub tech_level: u32,
    /// Current behavioral stance.
    pub doctrine: Doctrine,
    /// Whether the civilization still participates in the simulation.
    pub alive: bool,
    /// Set once the civilization collaborates, cleared at its next activation.
    pub collaborated_this_tick: bool,
}

impl Civilization {
    #[must_use]
    pub fn new(position: CellPos, tech_level: u32, doctrine: Doctrine) -> Self {
        debug_assert!((TECH_MIN..=TECH_MAX).contains(&tech_level));
        Self {
            position,
            tech_level,
            doctrine,
            alive: true,
            collaborated_this_tick: false,
        }
    }

    /// Detection radius in cells, derived from the current technology level.
    #[must_use]
    pub fn detection_radius(&self, config: &DarkForestConfig) -> u32 {
        scaled_radius(config.det_base, config.det_factor, self.tech_level)
    }

    /// Attack radius in cells, derived from the current technology level.
    #[must_use]
    pub fn attack_radius(&self, config: &DarkForestConfig) -> u32 {
        scaled_radius(config.att_base, config.att_factor, self.tech_level)
    }

    /// Multiply the technology level by `exponent`, always moving forward by
    /// at least one step, clamped to the scale cap.
    fn apply_growth(&mut self, exponent: f64) {
        let grown = (f64::from(self.tech_level) * exponent).floor() as u32;
        let grown = if grown <= self.tech_level {
            self.tech_level + 1
        } else {
            grown
        };
        self.tech_level = grown.min(TECH_MAX);
        debug_assert!((TECH_MIN..=TECH_MAX).contains(&self.tech_level));
    }

    /// Add a flat technology amount, clamped to the scale cap.
    fn raise_tech(&mut self, amount: u32) {
        self.tech_level = self.tech_level.saturating_add(amount).min(TECH_MAX);
        debug_assert!((TECH_MIN..=TECH_MAX).contains(&self.tech_level));
    }
}

/// One labeled measurement emitted alongside a tick report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: Cow<'static, str>,
    pub value: f64,
}

impl MetricSample {
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Population metrics collected at the start of a tick, before any
/// civilization acts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    /// Tick the report was collected for.
    pub tick: Tick,
    /// Civilizations still alive.
    pub alive: usize,
    /// Civilizations currently holding the aggressive doctrine.
    pub aggressors: usize,
    /// Fraction of the initially-aggressive cohort still alive.
    pub agg_survival: f64,
    /// Fraction of the initially-peaceful cohort still alive.
    pub peace_survival: f64,
    /// Civilizations destroyed during the previous pass.
    pub deaths: usize,
    /// Collaborations resolved during the previous pass.
    pub collaborations: usize,
}

impl TickReport {
    /// The report's headline series as labeled samples.
    #[must_use]
    pub fn samples(&self) -> Vec<MetricSample> {
        vec![
            MetricSample::new("Alive", self.alive as f64),
            MetricSample::new("Aggressors", self.aggressors as f64),
            MetricSample::new("AggSurvival", self.agg_survival),
            MetricSample::new("PeaceSurvival", self.peace_survival),
        ]
    }
}

/// Receiver for per-tick reports, e.g. a file writer or an in-memory spy.
pub trait MetricsSink: Send {
    fn on_tick(&mut self, report: &TickReport);
}

/// Sink that discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn on_tick(&mut self, _report: &TickReport) {}
}

/// Survival bookkeeping over the two doctrine cohorts fixed at world
/// construction. Later doctrine flips never move a civilization between
/// cohorts.
#[derive(Debug, Clone, Default)]
pub struct SurvivalTracker {
    initial_aggressive: HashSet<CivId>,
    initial_peaceful: HashSet<CivId>,
}

impl SurvivalTracker {
    /// Snapshot cohort membership from a freshly seeded population.
    #[must_use]
    pub fn from_population(civs: &SlotMap<CivId, Civilization>) -> Self {
        let mut tracker = Self::default();
        for (id, civ) in civs.iter() {
            match civ.doctrine {
                Doctrine::Aggressive => tracker.initial_aggressive.insert(id),
                Doctrine::Peaceful => tracker.initial_peaceful.insert(id),
            };
        }
        tracker
    }

    #[must_use]
    pub fn initial_aggressive_count(&self) -> usize {
        self.initial_aggressive.len()
    }

    #[must_use]
    pub fn initial_peaceful_count(&self) -> usize {
        self.initial_peaceful.len()
    }

    /// Fraction of the initially-aggressive cohort still alive, `0.0` when
    /// the cohort is empty.
    #[must_use]
    pub fn aggressive_survival(&self, civs: &SlotMap<CivId, Civilization>) -> f64 {
        Self::cohort_survival(&self.initial_aggressive, civs)
    }

    /// Fraction of the initially-peaceful cohort still alive, `0.0` when the
    /// cohort is empty.
    #[must_use]
    pub fn peaceful_survival(&self, civs: &SlotMap<CivId, Civilization>) -> f64 {
        Self::cohort_survival(&self.initial_peaceful, civs)
    }

    fn cohort_survival(cohort: &HashSet<CivId>, civs: &SlotMap<CivId, Civilization>) -> f64 {
        if cohort.is_empty() {
            return 0.0;
        }
        let alive = cohort
            .iter()
            .filter(|id| civs.get(**id).is_some_and(|civ| civ.alive))
            .count();
        alive as f64 / cohort.len() as f64
    }
}

/// Roster of schedulable civilizations, activated in a fresh random order
/// every tick.
#[derive(Debug, Clone, Default)]
pub struct RandomActivation {
    roster: Vec<CivId>,
}

impl RandomActivation {
    pub fn add(&mut self, id: CivId) {
        debug_assert!(!self.roster.contains(&id));
        self.roster.push(id);
    }

    /// Drop a civilization from the roster; order is not preserved.
    pub fn remove(&mut self, id: CivId) {
        if let Some(slot) = self.roster.iter().position(|entry| *entry == id) {
            self.roster.swap_remove(slot);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.roster.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: CivId) -> bool {
        self.roster.contains(&id)
    }

    /// A shuffled copy of the roster for one activation pass.
    #[must_use]
    pub fn shuffled_order(&self, rng: &mut dyn RngCore) -> Vec<CivId> {
        let mut order = self.roster.clone();
        order.shuffle(rng);
        order
    }
}

/// Explicit starting state for one civilization, used to build scripted
/// scenarios instead of random spawn bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CivSeed {
    pub position: CellPos,
    pub tech_level: u32,
    pub doctrine: Doctrine,
}

impl CivSeed {
    #[must_use]
    pub const fn new(position: CellPos, tech_level: u32, doctrine: Doctrine) -> Self {
        Self {
            position,
            tech_level,
            doctrine,
        }
    }
}

/// The complete simulation state: configuration, population, spatial index,
/// scheduler, and metrics plumbing.
pub struct WorldState {
    config: DarkForestConfig,
    tick: Tick,
    rng: SmallRng,
    civs: SlotMap<CivId, Civilization>,
    grid: MultiOccupancyGrid<CivId>,
    schedule: RandomActivation,
    tracker: SurvivalTracker,
    sink: Box<dyn MetricsSink>,
    history: VecDeque<TickReport>,
    last_deaths: usize,
    last_collaborations: usize,
}

impl fmt::Debug for WorldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldState")
            .field("tick", &self.tick)
            .field("alive", &self.alive_count())
            .field("total", &self.civs.len())
            .finish()
    }
}

impl WorldState {
    /// Build a world with a randomly placed population drawn from the
    /// configured spawn bands, discarding metric reports.
    pub fn new(config: DarkForestConfig) -> Result<Self, WorldError> {
        Self::with_sink(config, Box::new(NullSink))
    }

    /// Build a world with a randomly placed population, forwarding every
    /// tick report to `sink`.
    pub fn with_sink(
        config: DarkForestConfig,
        sink: Box<dyn MetricsSink>,
    ) -> Result<Self, WorldError> {
        let mut world = Self::empty(config, sink)?;
        world.seed_bands()?;
        world.tracker = SurvivalTracker::from_population(&world.civs);
        info!(
            civilizations = world.civs.len(),
            aggressors = world.tracker.initial_aggressive_count(),
            field_width = world.config.field_width,
            field_height = world.config.field_height,
            "seeded dark-forest population"
        );
        Ok(world)
    }

    /// Build a world from explicit seeds, bypassing the random spawn bands.
    pub fn with_population(
        config: DarkForestConfig,
        seeds: &[CivSeed],
    ) -> Result<Self, WorldError> {
        let mut world = Self::empty(config, Box::new(NullSink))?;
        for seed in seeds {
            world.seed_civilization(seed.position, seed.tech_level, seed.doctrine)?;
        }
        world.tracker = SurvivalTracker::from_population(&world.civs);
        Ok(world)
    }

    fn empty(config: DarkForestConfig, sink: Box<dyn MetricsSink>) -> Result<Self, WorldError> {
        config.validate()?;
        let rng = config.seeded_rng();
        let grid = MultiOccupancyGrid::new(config.field_width, config.field_height)?;
        let history = VecDeque::with_capacity(config.history_capacity);
        Ok(Self {
            config,
            tick: Tick::zero(),
            rng,
            civs: SlotMap::with_key(),
            grid,
            schedule: RandomActivation::default(),
            tracker: SurvivalTracker::default(),
            sink,
            history,
            last_deaths: 0,
            last_collaborations: 0,
        })
    }

    fn seed_civilization(
        &mut self,
        position: CellPos,
        tech_level: u32,
        doctrine: Doctrine,
    ) -> Result<CivId, WorldError> {
        if position.x >= self.grid.width() || position.y >= self.grid.height() {
            return Err(WorldError::OutOfBounds {
                x: position.x,
                y: position.y,
            });
        }
        if !(TECH_MIN..=TECH_MAX).contains(&tech_level) {
            return Err(WorldError::InvalidConfig(
                "seed tech levels must lie in [1, 1000]",
            ));
        }
        let id = self.civs.insert(Civilization::new(position, tech_level, doctrine));
        self.grid.place(id, position)?;
        self.schedule.add(id);
        Ok(id)
    }

    fn seed_bands(&mut self) -> Result<(), WorldError> {
        let bands = self.config.spawn_bands.clone();
        for band in bands {
            for _ in 0..band.count {
                let doctrine = if self.rng.random::<f64>() < self.config.aggressive_ratio {
                    Doctrine::Aggressive
                } else {
                    Doctrine::Peaceful
                };
                let position = self.random_empty_cell();
                self.seed_civilization(position, band.tech_level, doctrine)?;
            }
        }
        Ok(())
    }

    fn random_empty_cell(&mut self) -> CellPos {
        // Terminates because validation caps the population at the cell count.
        loop {
            let position = CellPos::new(
                self.rng.random_range(0..self.config.field_width),
                self.rng.random_range(0..self.config.field_height),
            );
            if self.grid.is_cell_empty(position) {
                return position;
            }
        }
    }

    /// Advance the world by one tick: collect the pre-pass report, activate
    /// every scheduled civilization in a fresh random order, then bump the
    /// tick counter. Returns the collected report.
    pub fn step(&mut self) -> TickReport {
        let report = self.collect_report();
        let order = self.schedule.shuffled_order(&mut self.rng);
        for id in order {
            self.act(id);
        }
        self.tick = self.tick.next();
        report
    }

    fn collect_report(&mut self) -> TickReport {
        let report = self.report();
        self.sink.on_tick(&report);
        if self.history.len() == self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(report);
        self.last_deaths = 0;
        self.last_collaborations = 0;
        report
    }

    /// Snapshot the population metrics at the current instant.
    #[must_use]
    pub fn report(&self) -> TickReport {
        let alive = self.alive_count();
        let aggressors = self
            .civs
            .values()
            .filter(|civ| civ.alive && civ.doctrine == Doctrine::Aggressive)
            .count();
        TickReport {
            tick: self.tick,
            alive,
            aggressors,
            agg_survival: self.tracker.aggressive_survival(&self.civs),
            peace_survival: self.tracker.peaceful_survival(&self.civs),
            deaths: self.last_deaths,
            collaborations: self.last_collaborations,
        }
    }

    fn act(&mut self, id: CivId) {
        let (doctrine, origin, growth_prob) = {
            let Some(civ) = self.civs.get_mut(id) else {
                return;
            };
            if !civ.alive {
                return;
            }
            civ.collaborated_this_tick = false;
            let growth_prob = match civ.doctrine {
                Doctrine::Aggressive => self.config.tech_growth_aggressive,
                Doctrine::Peaceful => self.config.tech_growth_peaceful,
            };
            (civ.doctrine, civ.position, growth_prob)
        };
        // Both rolls are drawn every activation regardless of outcome so the
        // random stream stays aligned across runs.
        let growth_roll = self.rng.random::<f64>();
        let explosion_roll = self.rng.random::<f64>();
        let detection_radius = {
            let Some(civ) = self.civs.get_mut(id) else {
                return;
            };
            if growth_roll < growth_prob {
                civ.apply_growth(self.config.tech_exponent);
            }
            if explosion_roll < self.config.tech_explosion_prob {
                civ.raise_tech(self.config.tech_explosion_jump);
            }
            civ.detection_radius(&self.config)
        };
        let scan = self.scan_neighbors(id, origin, detection_radius);
        match doctrine {
            Doctrine::Aggressive => self.act_aggressive(id, origin, &scan),
            Doctrine::Peaceful => self.act_peaceful(id, origin, &scan),
        }
    }

    /// Live civilizations within the Chebyshev detection square, excluding
    /// the scanning civilization itself. The grid only ever holds live
    /// occupants, so no aliveness filter is needed here.
    fn scan_neighbors(&self, id: CivId, origin: CellPos, radius: u32) -> Vec<CivId> {
        let mut scan = Vec::new();
        self.grid.neighbors_within(
            origin,
            f64::from(radius),
            Metric::Chebyshev,
            &mut |other, _| {
                if other != id {
                    scan.push(other);
                }
            },
        );
        scan
    }

    fn act_aggressive(&mut self, id: CivId, origin: CellPos, scan: &[CivId]) {
        if scan.is_empty() {
            return;
        }
        let Some(civ) = self.civs.get(id) else {
            return;
        };
        let attack_radius = f64::from(civ.attack_radius(&self.config));
        let in_range: Vec<CivId> = scan
            .iter()
            .copied()
            .filter(|other| {
                self.civs.get(*other).is_some_and(|civ| {
                    origin.euclidean_distance(civ.position) <= attack_radius
                })
            })
            .collect();
        if let Some(target) = in_range.choose(&mut self.rng).copied() {
            self.resolve_combat(id, target);
        }
    }

    fn act_peaceful(&mut self, id: CivId, origin: CellPos, scan: &[CivId]) {
        // The signal draw happens every activation, even with nobody in
        // detection range, so seeded runs stay aligned.
        if self.rng.random::<f64>() >= self.config.signal_prob {
            return;
        }
        let mut strikers: Vec<(OrderedFloat<f64>, CivId)> = scan
            .iter()
            .filter_map(|other| {
                let civ = self.civs.get(*other)?;
                if civ.doctrine != Doctrine::Aggressive {
                    return None;
                }
                let reach = f64::from(civ.attack_radius(&self.config));
                let distance = civ.position.euclidean_distance(origin);
                (distance <= reach).then_some((OrderedFloat(distance), *other))
            })
            .collect();
        strikers.sort_unstable();
        for (_, striker) in strikers {
            self.resolve_combat(striker, id);
        }
        if !self.civs.get(id).is_some_and(|civ| civ.alive) {
            return;
        }
        let peaceful: Vec<CivId> = scan
            .iter()
            .copied()
            .filter(|other| {
                self.civs.get(*other).is_some_and(|civ| {
                    civ.alive && civ.doctrine == Doctrine::Peaceful
                })
            })
            .collect();
        if let Some(partner) = peaceful.choose(&mut self.rng).copied() {
            self.resolve_collaboration(id, partner);
        }
    }

    /// Resolve one attack. The attacker wins with probability
    /// `0.5 + tech_difference * battle_factor` clamped to `[0, 1]`; a win
    /// annexes half the defender's technology and removes the defender from
    /// the field, a loss turns the defender aggressive with a small
    /// technology bonus. No-op unless both sides are alive.
    pub fn resolve_combat(&mut self, attacker: CivId, defender: CivId) {
        if attacker == defender {
            return;
        }
        let Some(att) = self.civs.get(attacker) else {
            return;
        };
        let Some(def) = self.civs.get(defender) else {
            return;
        };
        if !att.alive || !def.alive {
            return;
        }
        let diff = f64::from(att.tech_level) - f64::from(def.tech_level);
        let annex = def.tech_level / 2;
        let p_win = (0.5 + diff * self.config.battle_factor).clamp(0.0, 1.0);
        if self.rng.random::<f64>() < p_win {
            if let Some(civ) = self.civs.get_mut(attacker) {
                civ.raise_tech(annex);
            }
            if let Some(civ) = self.civs.get_mut(defender) {
                civ.alive = false;
            }
            self.grid.remove(defender);
            self.schedule.remove(defender);
            self.last_deaths += 1;
            debug!(?attacker, ?defender, annex, "defender destroyed");
        } else if let Some(civ) = self.civs.get_mut(defender) {
            civ.doctrine = Doctrine::Aggressive;
            civ.raise_tech(SURVIVOR_TECH_BONUS);
            debug!(?attacker, ?defender, "defender survived and turned aggressive");
        }
    }

    /// Resolve one collaboration. Both partners gain a fraction of their own
    /// technology and are marked as collaborated until their next
    /// activation. No-op if either side is dead or already collaborated.
    pub fn resolve_collaboration(&mut self, initiator: CivId, partner: CivId) {
        if initiator == partner {
            return;
        }
        let Some(first) = self.civs.get(initiator) else {
            return;
        };
        let Some(second) = self.civs.get(partner) else {
            return;
        };
        if !first.alive || !second.alive {
            return;
        }
        if first.collaborated_this_tick || second.collaborated_this_tick {
            return;
        }
        let rate = self.config.collaboration_rate;
        let first_boost = (f64::from(first.tech_level) * rate).floor() as u32;
        let second_boost = (f64::from(second.tech_level) * rate).floor() as u32;
        if let Some(civ) = self.civs.get_mut(initiator) {
            civ.raise_tech(first_boost);
            civ.collaborated_this_tick = true;
        }
        if let Some(civ) = self.civs.get_mut(partner) {
            civ.raise_tech(second_boost);
            civ.collaborated_this_tick = true;
        }
        self.last_collaborations += 1;
        debug!(?initiator, ?partner, "collaboration resolved");
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &DarkForestConfig {
        &self.config
    }

    /// Tick of the next pass to run.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Replace the metrics sink, e.g. to start recording mid-run.
    pub fn set_sink(&mut self, sink: Box<dyn MetricsSink>) {
        self.sink = sink;
    }

    /// Retained tick reports, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickReport> + '_ {
        self.history.iter()
    }

    /// All civilization records, dead ones included.
    pub fn civilizations(&self) -> impl Iterator<Item = (CivId, &Civilization)> + '_ {
        self.civs.iter()
    }

    /// One civilization record, if the handle is still valid.
    #[must_use]
    pub fn civilization(&self, id: CivId) -> Option<&Civilization> {
        self.civs.get(id)
    }

    /// Number of civilizations still alive.
    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.civs.values().filter(|civ| civ.alive).count()
    }

    /// Survival cohorts fixed at construction.
    #[must_use]
    pub fn tracker(&self) -> &SurvivalTracker {
        &self.tracker
    }

    /// The occupancy grid, for geometry assertions.
    #[must_use]
    pub fn grid(&self) -> &MultiOccupancyGrid<CivId> {
        &self.grid
    }

    /// The activation roster.
    #[must_use]
    pub fn schedule(&self) -> &RandomActivation {
        &self.schedule
    }
}
