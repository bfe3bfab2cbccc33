//! Service layer
//!
//! Contains business logic separated from HTTP handlers.
//! Services orchestrate storage and federation operations.

mod account;
mod post;

pub use account::AccountService;
pub use post::{PostService, Published};
