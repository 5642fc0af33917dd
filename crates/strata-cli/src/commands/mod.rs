pub mod build;
pub mod clean;
pub mod report;
pub mod watch;
