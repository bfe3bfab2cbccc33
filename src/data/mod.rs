//! Data layer module
//!
//! Storage contracts and their backends:
//! - SQLite (`sqlite://`)
//! - in-memory maps (`memory://`)
//! - no-op (`null://`)
//!
//! plus secret URI resolution for account keys.

mod database;
mod memory;
mod models;
mod null;
pub mod secrets;
mod store;

pub use database::Database;
pub use memory::MemoryStore;
pub use models::*;
pub use null::NullStore;
pub use store::*;
