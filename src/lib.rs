pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod ledger;
pub mod rank;
pub mod service;
pub mod withdrawal;
