use anyhow::Result;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use stepping_common::{SchedParams, StepPath};
use stepping_engine::grid::BucketGrid;
use stepping_engine::{StepOutcome, StepScheduler, StepWorld};

/// Entities drift by a fixed column offset every step, wrapping at the edges, and the
/// world counts how often each one is stepped.
struct DriftWorld {
    grid: BucketGrid<u32>,
    positions: DashMap<u32, (usize, usize)>,
    drift: DashMap<u32, isize>,
    steps: DashMap<u32, usize>,
    /// Concurrent users of each column, for checking exclusive access.
    in_use: Vec<AtomicUsize>,
    overlap_seen: AtomicBool,
    /// Artificial cost per entity in the given column range.
    slow_columns: std::ops::Range<usize>,
    slow_cost: Duration,
}

impl DriftWorld {
    fn new(width: usize, height: usize) -> Self {
        Self {
            grid: BucketGrid::new(width, height),
            positions: DashMap::new(),
            drift: DashMap::new(),
            steps: DashMap::new(),
            in_use: (0..width).map(|_| AtomicUsize::new(0)).collect(),
            overlap_seen: AtomicBool::new(false),
            slow_columns: 0..0,
            slow_cost: Duration::ZERO,
        }
    }

    fn add(&self, id: u32, x: usize, y: usize, drift: isize) {
        assert!(self.grid.insert(x, y, id));
        self.positions.insert(id, (x, y));
        self.drift.insert(id, drift);
    }

    fn reset_counts(&self) {
        self.steps.clear();
    }

    fn neighbourhood(&self, x: usize) -> std::ops::RangeInclusive<usize> {
        x.saturating_sub(1)..=(x + 1).min(self.grid.width() - 1)
    }
}

impl StepWorld for DriftWorld {
    type Id = u32;

    fn max_column(&self) -> Option<usize> {
        self.grid.max_column()
    }

    fn max_row(&self) -> Option<usize> {
        self.grid.max_row()
    }

    fn bucket(&self, column: usize, row: usize) -> Vec<u32> {
        self.grid.snapshot(column, row)
    }

    fn entities(&self) -> Vec<u32> {
        self.positions.iter().map(|entry| *entry.key()).collect()
    }

    fn step(&self, id: u32) -> Result<StepOutcome> {
        *self.steps.entry(id).or_insert(0) += 1;
        let (x, y) = *self.positions.get(&id).expect("known entity");
        let drift = *self.drift.get(&id).expect("known entity");

        // Claim the columns this step may touch; a second claimant means two workers
        // are inside the same neighbourhood at once.
        for column in self.neighbourhood(x) {
            if self.in_use[column].fetch_add(1, Ordering::SeqCst) != 0 {
                self.overlap_seen.store(true, Ordering::SeqCst);
            }
        }
        if self.slow_columns.contains(&x) {
            thread::sleep(self.slow_cost);
        } else {
            thread::yield_now();
        }

        let width = self.grid.width() as isize;
        let to_x = (x as isize + drift).rem_euclid(width) as usize;
        // Wrapping moves cross the whole grid; keep those inside the current column.
        let to_x = if to_x.abs_diff(x) > 1 { x } else { to_x };
        self.grid.relocate((x, y), (to_x, y), id);
        self.positions.insert(id, (to_x, y));

        for column in self.neighbourhood(x) {
            self.in_use[column].fetch_sub(1, Ordering::SeqCst);
        }
        Ok(StepOutcome::Continue)
    }

    fn remove(&self, id: u32) {
        if let Some((_, (x, y))) = self.positions.remove(&id) {
            self.grid.remove(x, y, id);
        }
    }
}

fn params(threads: u32) -> SchedParams {
    SchedParams::new(threads, 5, 1.1)
}

#[test]
fn entities_moving_ahead_of_the_cursor_are_stepped_once() {
    let world = DriftWorld::new(60, 3);
    let mut id = 0;
    for x in 0..60 {
        for y in 0..3 {
            world.add(id, x, y, 1);
            id += 1;
        }
    }
    let world = Arc::new(world);
    let mut scheduler = StepScheduler::new(params(4));

    for _ in 0..5 {
        world.reset_counts();
        let report = scheduler.progress_all_entities(&world).unwrap();
        assert_eq!(report.path, StepPath::Parallel);
        assert_eq!(report.stepped, 180);
        assert_eq!(world.steps.len(), 180);
        assert!(world.steps.iter().all(|entry| *entry.value() == 1));
    }
}

#[test]
fn entities_moving_behind_the_cursor_are_stepped_once() {
    let world = DriftWorld::new(60, 2);
    let mut id = 0;
    for x in 0..60 {
        for y in 0..2 {
            // Alternate directions so both neighbours of a line receive entities.
            world.add(id, x, y, if id % 2 == 0 { -1 } else { 1 });
            id += 1;
        }
    }
    let world = Arc::new(world);
    let mut scheduler = StepScheduler::new(params(3));

    for _ in 0..5 {
        world.reset_counts();
        let report = scheduler.progress_all_entities(&world).unwrap();
        assert_eq!(report.stepped, 120);
        assert!(world.steps.iter().all(|entry| *entry.value() == 1));
    }
}

#[test]
fn workers_never_share_a_neighbourhood() {
    let world = DriftWorld::new(120, 4);
    let mut id = 0;
    for x in 0..120 {
        for y in 0..4 {
            world.add(id, x, y, if x % 3 == 0 { -1 } else { 1 });
            id += 1;
        }
    }
    let world = Arc::new(world);
    let mut scheduler = StepScheduler::new(params(12));

    for _ in 0..10 {
        let report = scheduler.progress_all_entities(&world).unwrap();
        assert_eq!(report.path, StepPath::Parallel);
        assert_eq!(report.jobs.len(), 12);
    }
    assert!(!world.overlap_seen.load(Ordering::SeqCst));
    assert!(world.in_use.iter().all(|count| count.load(Ordering::SeqCst) == 0));
}

#[test]
fn slow_columns_shift_work_away_from_their_worker() {
    let mut world = DriftWorld::new(40, 2);
    world.slow_columns = 0..10;
    world.slow_cost = Duration::from_micros(300);
    let mut id = 0;
    for x in 0..40 {
        for y in 0..2 {
            world.add(id, x, y, 0);
            id += 1;
        }
    }
    let world = Arc::new(world);
    let mut scheduler = StepScheduler::new(params(4));

    scheduler.progress_all_entities(&world).unwrap();
    // Worker 0 owns every slow column and must have lost a line already.
    assert!(scheduler.boundaries()[1] < 10, "{:?}", scheduler.boundaries());

    for _ in 0..10 {
        scheduler.progress_all_entities(&world).unwrap();
    }
    let boundaries = scheduler.boundaries().to_vec();
    assert_eq!(boundaries[0], 0);
    assert_eq!(*boundaries.last().unwrap(), 40);
    for pair in boundaries.windows(2) {
        assert!(pair[1] - pair[0] >= 5, "range below the floor: {:?}", boundaries);
    }
    assert_eq!(boundaries[1], 5);
}

#[test]
fn many_threads_many_steps_complete() {
    let world = DriftWorld::new(500, 2);
    let mut id = 0;
    for x in 0..500 {
        world.add(id, x, x % 2, if x % 2 == 0 { 1 } else { -1 });
        id += 1;
    }
    let world = Arc::new(world);
    let mut scheduler = StepScheduler::new(params(80));

    for _ in 0..20 {
        let report = scheduler.progress_all_entities(&world).unwrap();
        assert_eq!(report.path, StepPath::Parallel);
        assert_eq!(report.stepped, 500);
    }
    assert!(!world.overlap_seen.load(Ordering::SeqCst));
}
