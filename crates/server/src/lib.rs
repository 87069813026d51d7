pub mod config;
pub mod scan;
pub mod scheduler;
pub mod watch;
