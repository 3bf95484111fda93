use crate::grid::BucketGrid;
use crate::world::{StepOutcome, StepWorld};
use anyhow::{Context, Result};
use dashmap::DashMap;
use rand::prelude::*;
use stepping_common::WorldConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

pub type WalkerId = u64;

/// Per-walker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Walker {
    pub x: usize,
    pub y: usize,
    /// Steps left before the walker terminates.
    pub energy: u32,
    pub steps_taken: u32,
    /// Tick of the most recent step, used to reject a second step in the same tick.
    last_tick: Option<u64>,
}

impl Walker {
    pub fn new(x: usize, y: usize, energy: u32) -> Self {
        Self { x, y, energy, steps_taken: 0, last_tick: None }
    }
}

/// Reference world: random walkers on a bucket grid that lose one unit of energy per
/// step and terminate when it runs out.
///
/// Moves depend only on `(seed, id, tick)` and are at most one bucket per axis, so the
/// outcome of a tick does not depend on the order walkers are stepped in.
#[derive(Debug)]
pub struct WalkerWorld {
    grid: BucketGrid<WalkerId>,
    walkers: DashMap<WalkerId, Walker>,
    seed: u64,
    tick: AtomicU64,
    selected: Mutex<Option<WalkerId>>,
}

impl WalkerWorld {
    /// Creates an empty world.
    pub fn empty(width: usize, height: usize, seed: u64) -> Self {
        Self {
            grid: BucketGrid::new(width, height),
            walkers: DashMap::new(),
            seed,
            tick: AtomicU64::new(0),
            selected: Mutex::new(None),
        }
    }

    /// Creates a world with walkers placed at random, as described by the configuration.
    pub fn from_config(config: &WorldConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            anyhow::bail!("world width and height must be greater than 0.");
        }
        let world = Self::empty(config.width as usize, config.height as usize, config.seed);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let max_energy = config.initial_energy.max(1);

        for id in 0..config.walkers as WalkerId {
            let x = rng.random_range(0..world.grid.width());
            let y = rng.random_range(0..world.grid.height());
            // Spread initial energy so walkers do not all expire on the same tick.
            let energy = rng.random_range(1..=max_energy);
            world.spawn(id, Walker::new(x, y, energy))?;
        }
        log::info!(
            "Placed {} walkers on a {}x{} grid.",
            config.walkers,
            config.width,
            config.height
        );
        Ok(world)
    }

    /// Adds a walker. Fails if the id is taken or the position is off the grid.
    pub fn spawn(&self, id: WalkerId, walker: Walker) -> Result<()> {
        if self.walkers.contains_key(&id) {
            anyhow::bail!("walker {} already exists", id);
        }
        if !self.grid.insert(walker.x, walker.y, id) {
            anyhow::bail!(
                "walker {} placed off the {}x{} grid at ({}, {})",
                id,
                self.grid.width(),
                self.grid.height(),
                walker.x,
                walker.y
            );
        }
        self.walkers.insert(id, walker);
        Ok(())
    }

    /// Moves on to the next tick. Each walker may be stepped once per tick.
    pub fn advance_tick(&self) {
        self.tick.fetch_add(1, Ordering::AcqRel);
    }

    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.walkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.walkers.is_empty()
    }

    pub fn walker(&self, id: WalkerId) -> Option<Walker> {
        self.walkers.get(&id).map(|walker| *walker)
    }

    /// Live walker ids in ascending order.
    pub fn ids(&self) -> Vec<WalkerId> {
        let mut ids: Vec<WalkerId> = self.walkers.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn grid(&self) -> &BucketGrid<WalkerId> {
        &self.grid
    }

    pub fn select(&self, id: Option<WalkerId>) {
        *self.selected.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }

    fn next_position(&self, id: WalkerId, tick: u64, x: usize, y: usize) -> (usize, usize) {
        let stream = self
            .seed
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(id.rotate_left(32))
            .wrapping_add(tick);
        let mut rng = StdRng::seed_from_u64(stream);
        let dx: i64 = rng.random_range(-1..=1);
        let dy: i64 = rng.random_range(-1..=1);
        let clamp = |value: usize, delta: i64, len: usize| -> usize {
            (value as i64 + delta).clamp(0, len as i64 - 1) as usize
        };
        (
            clamp(x, dx, self.grid.width()),
            clamp(y, dy, self.grid.height()),
        )
    }
}

impl StepWorld for WalkerWorld {
    type Id = WalkerId;

    fn max_column(&self) -> Option<usize> {
        self.grid.max_column()
    }

    fn max_row(&self) -> Option<usize> {
        self.grid.max_row()
    }

    fn bucket(&self, column: usize, row: usize) -> Vec<WalkerId> {
        self.grid.snapshot(column, row)
    }

    fn entities(&self) -> Vec<WalkerId> {
        self.ids()
    }

    fn step(&self, id: WalkerId) -> Result<StepOutcome> {
        let tick = self.tick();
        let (from, to, outcome) = {
            let mut walker = self
                .walkers
                .get_mut(&id)
                .with_context(|| format!("walker {} does not exist", id))?;
            if walker.last_tick == Some(tick) {
                anyhow::bail!("walker {} stepped twice in tick {}", id, tick);
            }
            walker.last_tick = Some(tick);
            walker.steps_taken += 1;
            walker.energy = walker.energy.saturating_sub(1);

            let from = (walker.x, walker.y);
            let to = self.next_position(id, tick, walker.x, walker.y);
            walker.x = to.0;
            walker.y = to.1;
            let outcome = if walker.energy == 0 {
                StepOutcome::Terminate
            } else {
                StepOutcome::Continue
            };
            (from, to, outcome)
        };
        // The walker entry is released before any bucket is locked.
        if !self.grid.relocate(from, to, id) {
            anyhow::bail!("walker {} was not found in bucket {:?}", id, from);
        }
        Ok(outcome)
    }

    fn remove(&self, id: WalkerId) {
        if let Some((_, walker)) = self.walkers.remove(&id) {
            self.grid.remove(walker.x, walker.y, id);
        }
    }

    fn selected(&self) -> Option<WalkerId> {
        *self.selected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clear_selected(&self) {
        self.select(None);
    }
}
