pub mod api;
pub mod app;
pub mod backend;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod state;
