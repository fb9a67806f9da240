//! Command handlers

pub mod asset;
pub mod config;
pub mod failures;
pub mod flush;
pub mod queue;
pub mod report;
pub mod status;
pub mod view;
pub mod watch;
