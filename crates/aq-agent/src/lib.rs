//! Background aggregation service for academIQ.
//!
//! Provides:
//! - [`UpdateQueue`]: the single writer that linearizes snapshot mutations
//! - [`Background`]: message dispatch, tab lifecycle and read serving

mod background;
mod queue;

pub use background::{Background, Reply};
pub use queue::{Pending, QueueError, UpdateQueue};
