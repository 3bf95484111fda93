use anyhow::Result;
use std::fmt::Debug;
use std::hash::Hash;

/// What an entity's step hook asks the scheduler to do with it afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    /// Remove the entity from the working collection (and from the selection).
    Terminate,
}

/// The simulation the scheduler drives: a 2-D bucket grid of entities plus their
/// behaviour.
///
/// Column `x` of the grid is partition line `x`. During a parallel step the scheduler
/// only calls `step` for an entity found in a column the calling worker has locked,
/// together with `window_radius` columns on either side. An implementation may therefore
/// read or move entities between neighbouring columns inside `step` as long as it stays
/// within that radius; the bucket storage itself must still be `Sync`.
pub trait StepWorld: Send + Sync + 'static {
    type Id: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    /// Highest column holding at least one entity, `None` when the grid is empty.
    fn max_column(&self) -> Option<usize>;

    /// Highest row holding at least one entity, `None` when the grid is empty.
    fn max_row(&self) -> Option<usize>;

    /// Snapshot of the entities currently in bucket `(column, row)`.
    fn bucket(&self, column: usize, row: usize) -> Vec<Self::Id>;

    /// Snapshot of every live entity, used by the serial path.
    fn entities(&self) -> Vec<Self::Id>;

    /// Advances one entity by one step.
    fn step(&self, id: Self::Id) -> Result<StepOutcome>;

    /// Drops a terminated entity from the working collection.
    fn remove(&self, id: Self::Id);

    /// The "currently selected" entity, if the host tracks one.
    fn selected(&self) -> Option<Self::Id> {
        None
    }

    fn clear_selected(&self) {}

    /// Number of partition lines for the current extent.
    fn line_count(&self) -> usize {
        self.max_column().map_or(0, |column| column + 1)
    }
}

/// Removes a terminated entity and deselects it if it was selected.
pub(crate) fn retire<W: StepWorld>(world: &W, id: W::Id) {
    world.remove(id);
    if world.selected() == Some(id) {
        world.clear_selected();
    }
}
