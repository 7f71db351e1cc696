pub mod agent;
pub mod job;
pub mod schedule;
