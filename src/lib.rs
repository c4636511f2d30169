pub mod config;
pub mod jobs;
pub mod orchestrator;
pub mod provider;
pub mod security;
pub mod shared;
pub mod tools;
