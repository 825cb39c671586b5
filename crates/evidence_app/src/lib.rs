//! Command-line front end for the evidence exporter: configuration, the audit
//! API client and the terminal run loop.
pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod report;
pub mod run;
