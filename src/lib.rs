pub mod alert;
pub mod api;
pub mod config;
pub mod engine;
pub mod ingest;
pub mod query;
pub mod rules;
pub mod server;
