//! `tether` server: exposes a driver's session tree over newline-delimited
//! JSON on stdin/stdout.

pub mod adapters;
pub mod app;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod shutdown;
pub mod transport;

pub use app::run;
