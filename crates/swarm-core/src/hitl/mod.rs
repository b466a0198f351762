//! Human-in-the-loop controller, checkpoint store, and expiry sweeper
//! (C9, C10), §4.5.

pub mod checkpoint_store;
pub mod controller;
pub mod expiry;

pub use checkpoint_store::{CheckpointStore, CheckpointStoreError, InMemoryCheckpointStore, RedisCheckpointStore};
pub use controller::HitlController;
pub use expiry::{ExpiryCallback, ExpiryProcessor};
