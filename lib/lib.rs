pub mod build_info;
pub mod cli;
pub mod commands;
pub mod config;
pub mod delivery;
pub mod logging;
pub mod queue;
pub mod server;
pub mod state;
pub mod worker;
