pub mod config;
pub mod debug_log;
pub mod history;
pub mod platform;
pub mod protocol;
pub mod rate_limit;
pub mod recognizer;
