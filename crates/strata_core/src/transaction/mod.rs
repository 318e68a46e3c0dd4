//! Transactions over one or more collections.
//!
//! A transaction locks each collection it touches and keeps the
//! collection locks until it finishes. Every write it makes is recorded as
//! a [`DocumentOperation`](crate::document::DocumentOperation); aborting
//! reverts them newest first. Locks taken by a transaction take part in
//! deadlock detection, so two transactions that lock the same collections
//! in opposite order get a `Deadlock` error instead of waiting forever.

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::{Transaction, TransactionState};
