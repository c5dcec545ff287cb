pub mod agent;
pub mod audit;
pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod errors;
pub mod exit_codes;
pub mod init;
pub mod iteration;
pub mod logging;
pub mod policy;
pub mod queue;
pub mod router;
pub mod run_mode;
pub mod task;
pub mod team;
pub mod tracker;
pub mod ui;
pub mod verify;
pub mod warden_config;

#[cfg(test)]
mod test_support;
