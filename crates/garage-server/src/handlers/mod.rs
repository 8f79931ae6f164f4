//! Per-topic message handlers.
//!
//! Both handlers validate the payload first and only touch the store once
//! it passes. Store calls run on the blocking pool so SQLite never stalls
//! the async runtime.

mod query;
mod update;

pub use query::{QueryError, QueryHandler, QueryReply};
pub use update::{UpdateError, UpdateHandler};
