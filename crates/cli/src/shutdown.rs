//! Process signals that end the serve loop.
//!
//! Handlers are installed up front so a signal arriving before the loop
//! first polls is not lost.

use std::io;

#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

#[cfg(unix)]
pub struct ShutdownSignals {
	sigterm: Signal,
	sigint: Signal,
	sighup: Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
	pub fn install() -> io::Result<Self> {
		Ok(Self {
			sigterm: signal(SignalKind::terminate())?,
			sigint: signal(SignalKind::interrupt())?,
			sighup: signal(SignalKind::hangup())?,
		})
	}

	/// Resolves with the name of the first signal received.
	pub async fn recv(mut self) -> &'static str {
		tokio::select! {
			_ = self.sigterm.recv() => "SIGTERM",
			_ = self.sigint.recv() => "SIGINT",
			_ = self.sighup.recv() => "SIGHUP",
		}
	}
}

#[cfg(windows)]
pub struct ShutdownSignals {
	ctrl_c: tokio::signal::windows::CtrlC,
	ctrl_break: tokio::signal::windows::CtrlBreak,
}

#[cfg(windows)]
impl ShutdownSignals {
	pub fn install() -> io::Result<Self> {
		Ok(Self {
			ctrl_c: tokio::signal::windows::ctrl_c()?,
			ctrl_break: tokio::signal::windows::ctrl_break()?,
		})
	}

	pub async fn recv(mut self) -> &'static str {
		tokio::select! {
			_ = self.ctrl_c.recv() => "CTRL_C",
			_ = self.ctrl_break.recv() => "CTRL_BREAK",
		}
	}
}
