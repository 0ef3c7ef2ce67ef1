// # Database Module
//
// SQLite persistence for the acquisition pipeline:
//
// - **Database**: Connection pool plus all table access methods
// - **models**: Row structs and status enums shared across the engine
//
// Everything mutable (books, releases, downloads, jobs) is written through
// the narrow methods on `Database`; configuration tables are read-only to
// the engine and only seeded through the add_* helpers.

mod client;
pub mod models;

pub use client::Database;
pub use models::*;
