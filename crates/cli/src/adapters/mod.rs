//! Drivers for real external programs.

pub mod tmux;

pub use tmux::{TmuxDriver, TmuxHandle, TmuxLevel};
