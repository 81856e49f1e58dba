//! Post-write notifications
//!
//! Every bulk mutation emits one [`BulkEvent`] after it succeeds. Observers are
//! registered on the [`Notifier`] owned by a `BulkSync` and receive events
//! synchronously, in registration order.

use std::fmt;

/// Kind of bulk mutation that completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkOperation {
    /// `bulk_create`
    Create,
    /// `bulk_update`
    Update,
    /// `upsert`
    Upsert,
    /// `sync`
    Sync,
    /// Assignment over a scope
    ScopeUpdate,
    /// Single-row get-or-create-then-update
    UpsertOne,
}

impl fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "bulk_create",
            Self::Update => "bulk_update",
            Self::Upsert => "upsert",
            Self::Sync => "sync",
            Self::ScopeUpdate => "update",
            Self::UpsertOne => "upsert_one",
        };
        f.write_str(name)
    }
}

/// Emitted after a bulk mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkEvent {
    /// Affected table
    pub table: String,
    /// What happened
    pub operation: BulkOperation,
    /// Rows written or deleted
    pub rows: usize,
}

/// Receiver of [`BulkEvent`]s
pub trait BulkObserver {
    /// Called once per completed operation
    fn on_bulk_operation(&self, event: &BulkEvent);
}

impl<F> BulkObserver for F
where
    F: Fn(&BulkEvent),
{
    fn on_bulk_operation(&self, event: &BulkEvent) {
        self(event);
    }
}

/// Handle returned by [`Notifier::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Registry of observers
#[derive(Default)]
pub struct Notifier {
    next_id: u64,
    observers: Vec<(ObserverId, Box<dyn BulkObserver>)>,
}

impl Notifier {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer
    pub fn register(&mut self, observer: Box<dyn BulkObserver>) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, observer));
        id
    }

    /// Remove an observer; returns whether it was registered
    pub fn unregister(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// No observers registered
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver `event` to every observer
    pub fn emit(&self, event: &BulkEvent) {
        tracing::debug!(
            table = %event.table,
            operation = %event.operation,
            rows = event.rows,
            "bulk operation completed"
        );
        for (_, observer) in &self.observers {
            observer.on_bulk_operation(event);
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("observers", &self.observers.len())
            .finish()
    }
}
