use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One exclusive lock per partition line.
///
/// Indices outside `[0, line_count)` are accepted everywhere and ignored, so callers can
/// lock a window that hangs over either edge of the grid without special-casing it.
#[derive(Debug, Default)]
pub struct LineLocks {
    locks: Vec<Mutex<()>>,
}

impl LineLocks {
    pub fn new(line_count: usize) -> Self {
        Self {
            locks: (0..line_count).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Reallocates the lock set if its size differs. Must not be called mid-step.
    pub fn initialize(&mut self, line_count: usize) {
        if self.locks.len() != line_count {
            *self = Self::new(line_count);
        }
    }

    pub fn line_count(&self) -> usize {
        self.locks.len()
    }

    /// Blocks until the line's lock is free. `None` for out-of-range indices.
    pub fn lock(&self, index: isize) -> Option<MutexGuard<'_, ()>> {
        let lock = usize::try_from(index).ok().and_then(|i| self.locks.get(i))?;
        // A poisoned line only means another job panicked while holding it; the lock
        // itself carries no data, so keep going.
        Some(lock.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Starts an empty window over these locks.
    pub fn window(&self) -> Window<'_> {
        Window {
            locks: self,
            held: VecDeque::new(),
        }
    }
}

/// The set of lines one worker currently holds.
///
/// Held lines are released when the window is dropped, including during a panic unwind,
/// so a failing job never leaves a neighbour blocked.
pub struct Window<'a> {
    locks: &'a LineLocks,
    held: VecDeque<(isize, MutexGuard<'a, ()>)>,
}

impl<'a> Window<'a> {
    /// Locks one line. Out-of-range or already-held lines are ignored.
    pub fn lock(&mut self, index: isize) {
        if self.holds(index) {
            return;
        }
        if let Some(guard) = self.locks.lock(index) {
            // Lines are almost always taken in ascending order, keep the deque sorted.
            let at = self.held.partition_point(|(held, _)| *held < index);
            self.held.insert(at, (index, guard));
        }
    }

    /// Releases one line if this window holds it.
    pub fn unlock(&mut self, index: isize) {
        if let Some(at) = self.held.iter().position(|(held, _)| *held == index) {
            self.held.remove(at);
        }
    }

    /// Locks every line in `[from, to]` in ascending order.
    pub fn lock_range(&mut self, from: isize, to: isize) {
        for index in from..=to {
            self.lock(index);
        }
    }

    /// Releases every line in `[from, to]`.
    pub fn unlock_range(&mut self, from: isize, to: isize) {
        for index in from..=to {
            self.unlock(index);
        }
    }

    pub fn holds(&self, index: isize) -> bool {
        self.held.iter().any(|(held, _)| *held == index)
    }

    /// Indices currently held, ascending.
    pub fn held(&self) -> impl Iterator<Item = isize> + '_ {
        self.held.iter().map(|(index, _)| *index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn out_of_range_indices_are_ignored() {
        let locks = LineLocks::new(3);
        assert!(locks.lock(-1).is_none());
        assert!(locks.lock(3).is_none());

        let mut window = locks.window();
        window.lock_range(-4, 6);
        assert_eq!(window.held().collect::<Vec<_>>(), vec![0, 1, 2]);
        window.unlock(-2);
        window.unlock(42);
        window.unlock_range(-4, 0);
        assert_eq!(window.held().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn relocking_a_held_line_does_not_deadlock() {
        let locks = LineLocks::new(4);
        let mut window = locks.window();
        window.lock(2);
        window.lock(2);
        window.lock_range(1, 3);
        assert_eq!(window.held().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn dropping_a_window_releases_every_line() {
        let locks = LineLocks::new(5);
        {
            let mut window = locks.window();
            window.lock_range(0, 4);
        }
        let mut window = locks.window();
        window.lock_range(0, 4);
        assert_eq!(window.held().count(), 5);
    }

    #[test]
    fn panic_inside_a_window_releases_its_lines() {
        let locks = Arc::new(LineLocks::new(8));
        let shared = Arc::clone(&locks);
        let result = thread::spawn(move || {
            let mut window = shared.window();
            window.lock_range(2, 5);
            panic!("step hook failed");
        })
        .join();
        assert!(result.is_err());

        let mut window = locks.window();
        window.lock_range(0, 7);
        assert_eq!(window.held().count(), 8);
    }

    #[test]
    fn initialize_resizes_only_on_change() {
        let mut locks = LineLocks::new(10);
        locks.initialize(10);
        assert_eq!(locks.line_count(), 10);
        locks.initialize(3);
        assert_eq!(locks.line_count(), 3);
    }

    #[test]
    fn held_line_blocks_other_threads_until_released() {
        let locks = Arc::new(LineLocks::new(4));
        let acquired = Arc::new(AtomicBool::new(false));

        let mut window = locks.window();
        window.lock(1);

        let handle = {
            let locks = Arc::clone(&locks);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let mut other = locks.window();
                other.lock(1);
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        window.unlock(1);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn sliding_windows_never_overlap() {
        const LINES: usize = 60;
        const RADIUS: isize = 4;
        let locks = Arc::new(LineLocks::new(LINES));
        // Number of windows currently covering each line.
        let owners: Arc<Vec<AtomicUsize>> = Arc::new((0..LINES).map(|_| AtomicUsize::new(0)).collect());

        let handles: Vec<_> = [(0isize, 29isize), (15, 44), (30, 59)]
            .into_iter()
            .map(|(start, end)| {
                let locks = Arc::clone(&locks);
                let owners = Arc::clone(&owners);
                thread::spawn(move || {
                    let mut window = locks.window();
                    window.lock_range(start - RADIUS, start + RADIUS);
                    for cursor in start..=end {
                        for line in window.held() {
                            let prev = owners[line as usize].fetch_add(1, Ordering::SeqCst);
                            assert_eq!(prev, 0, "line {line} held by two windows");
                        }
                        thread::yield_now();
                        for line in window.held() {
                            owners[line as usize].fetch_sub(1, Ordering::SeqCst);
                        }
                        window.unlock(cursor - RADIUS);
                        window.lock(cursor + RADIUS + 1);
                    }
                    window.unlock_range(end + 1 - RADIUS, end + 1 + RADIUS);
                    assert_eq!(window.held().count(), 0);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
