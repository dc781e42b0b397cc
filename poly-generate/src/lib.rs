pub mod config;
pub mod generator;
pub mod sampling;
pub mod types;
