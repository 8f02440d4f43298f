//! PostgreSQL persistence for the engine.
//!
//! Process and case instances are stored as JSONB documents next to a
//! version column; jobs and subscriptions use plain columns so the executor
//! loops can filter and order them in SQL.

pub mod pool;
pub mod rows;
pub mod store;

pub use pool::{create_pool, ensure_schema, health_check, DbPool};
pub use store::PgStore;
