pub mod engine;
pub mod handlers;
pub mod ingest;
pub mod scheduler;
