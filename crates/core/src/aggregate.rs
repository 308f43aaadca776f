//! Event-sourced aggregate contracts shared by orders, stock ledgers and returns.

use crate::error::{DomainError, DomainResult};

pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of events applied so far; equals the stream's last sequence number.
    fn version(&self) -> u64;
}

/// Append guard checked by the event store.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    Any,
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            return Ok(());
        }
        Err(DomainError::conflict(format!(
            "stream moved on (expected: {self:?}, actual: {actual})"
        )))
    }
}

/// `handle` decides, `apply` evolves. `handle` never mutates.
///
/// An empty decision is a successful no-op, used when the requested state has
/// already been reached.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Bumps the version by one.
    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Fold an already-committed history into `self`.
    fn replay<'a, I>(&mut self, history: I)
    where
        I: IntoIterator<Item = &'a Self::Event>,
        Self::Event: 'a,
    {
        for event in history {
            self.apply(event);
        }
    }

    /// Decide and apply in one step, returning what was applied.
    ///
    /// Used where there is no store in between, e.g. rehydrated test fixtures.
    fn execute(&mut self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let decided = self.handle(command)?;
        self.replay(&decided);
        Ok(decided)
    }
}
