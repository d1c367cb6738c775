//! RecordListSink - newest-first in-memory record list

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use contracts::{AggregateRecord, CompletionSink, ContractError};
use tracing::trace;

/// Shared newest-first list of records.
///
/// Cloning shares the same list.
#[derive(Debug, Clone, Default)]
pub struct RecordList {
    inner: Arc<Mutex<VecDeque<AggregateRecord>>>,
}

impl RecordList {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AggregateRecord>> {
        // a poisoned list still holds valid records
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn prepend(&self, record: AggregateRecord) {
        self.lock().push_front(record);
    }

    /// Copy of the list, newest first
    pub fn snapshot(&self) -> Vec<AggregateRecord> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Sink that prepends every record to a `RecordList`
pub struct RecordListSink {
    name: String,
    list: RecordList,
}

impl RecordListSink {
    pub fn new(name: impl Into<String>, list: RecordList) -> Self {
        Self {
            name: name.into(),
            list,
        }
    }
}

impl CompletionSink for RecordListSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, record: &AggregateRecord) -> Result<(), ContractError> {
        trace!(sink = %self.name, build_scan = %record.build_scan, "record prepended");
        self.list.prepend(record.clone());
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        Ok(())
    }
}
