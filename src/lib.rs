//! Presence reporting agent: periodically works out whether the device is
//! in use (screen on) and which app is in front, and POSTs that tuple to a
//! remote collector.

pub mod agent;
pub mod config;
pub mod foreground;
pub mod jobs;
pub mod power;
pub mod report;
pub mod scheduler;
pub mod screen_watch;
