pub mod agent;
pub mod aggregator;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod matrix;
pub mod orchestration;
pub mod session;
