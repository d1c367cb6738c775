//! CompletionSink trait - consumer of finalized records

use crate::{AggregateRecord, ContractError};

/// Record output trait
///
/// Records may arrive in any order relative to build start order.
#[trait_variant::make(CompletionSink: Send)]
pub trait LocalCompletionSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Deliver one finalized record
    async fn write(&mut self, record: &AggregateRecord) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;
}
