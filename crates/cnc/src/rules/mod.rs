//! Ordered rule storage.
//!
//! The store is the one piece of state read outside the hub loop (the plain
//! listing endpoint), so it carries its own reader/writer lock.

mod seed;
mod store;

pub use seed::load_seed_file;
pub use store::{RuleStore, RuleStoreError};
