//! In-process change notifications for live subscribers.
//!
//! Delivery is at-most-once: a subscriber only sees operations published after
//! it attached, and nothing is persisted or replayed.

pub mod bus;

pub use bus::{Operation, OperationBus, OperationSubscription};
