pub mod common;
pub mod completions;
pub mod config;
pub mod schema;
pub mod upsert;
