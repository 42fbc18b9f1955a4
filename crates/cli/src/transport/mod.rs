//! Transport loop: bytes in, framed requests dispatched, responses out.

mod framing;
mod server;

pub use framing::{Frame, FramerState, LineFramer};
pub use server::{RunSummary, ServeOptions, StopReason, TRANSPORT_TARGET, serve};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
	#[error("failed reading requests")]
	Read(#[source] std::io::Error),

	#[error("failed writing response")]
	Write(#[source] std::io::Error),

	#[error("failed to serialize response")]
	Serialize(#[from] serde_json::Error),
}
