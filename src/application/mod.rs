pub mod config;
pub mod follow_scheduler;
pub mod replay_engine;
pub mod session;
