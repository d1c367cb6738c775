//! # Contracts
//!
//! Frozen interface contracts, defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Event timestamps are server epoch milliseconds (`i64`)
//! - Derived durations in `AggregateRecord` are milliseconds

mod blueprint;
mod build;
mod build_id;
mod error;
mod event;
mod record;
mod sink;
mod source;

pub use blueprint::*;
pub use build::*;
pub use build_id::BuildId;
pub use error::*;
pub use event::*;
pub use record::*;
pub use sink::*;
pub use source::*;
