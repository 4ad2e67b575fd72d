//! Database Layer
//!
//! Provides database connection management, models, and the store.

mod database;
pub mod models;
pub mod repository;

pub use database::{Database, StoreError, StoreResult};
pub use models::*;
pub use repository::Store;
