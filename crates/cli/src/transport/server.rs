//! The serve loop.
//!
//! Policy: requests are decoded and routed strictly in arrival order, which
//! also fixes the order of per-id turns in the session tree. Their futures
//! then run concurrently, but responses leave in dispatch order through an
//! ordered completion queue. Notifications hold a queue slot and emit
//! nothing. When `max_in_flight` futures are pending, reading pauses. Once
//! a `shutdown` request is routed, nothing read after it is dispatched.

use std::future::Future;
use std::time::Duration;

use futures::stream::{FuturesOrdered, StreamExt};
use futures::{FutureExt, future};
use tether_protocol::{ErrorCode, ErrorObject, Request, RequestId, Response};
use tether_runtime::{Driver, ShutdownReport};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::TransportError;
use super::framing::{Frame, LineFramer};
use crate::dispatch::Dispatcher;

pub const TRANSPORT_TARGET: &str = "tether.transport";

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct ServeOptions {
	pub max_message_bytes: usize,
	pub max_in_flight: usize,
	/// How long pending requests may keep running once the loop stops.
	pub shutdown_grace: Duration,
}

impl Default for ServeOptions {
	fn default() -> Self {
		Self {
			max_message_bytes: 1024 * 1024,
			max_in_flight: 64,
			shutdown_grace: Duration::from_secs(5),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
	/// Input stream closed.
	Eof,
	/// A `shutdown` request was dispatched.
	Requested,
	/// Process signal, by name.
	Signal(&'static str),
}

#[derive(Debug, Clone)]
pub struct RunSummary {
	pub reason: StopReason,
	pub requests: u64,
	pub responses: u64,
	pub shutdown: ShutdownReport,
}

impl RunSummary {
	/// True when every top-level resource closed cleanly.
	pub fn clean(&self) -> bool {
		self.shutdown.clean()
	}
}

#[derive(Default)]
struct Counters {
	requests: u64,
	responses: u64,
}

/// Serves until EOF, a `shutdown` request, or `signal` resolves, then
/// cascade-closes every top-level resource.
pub async fn serve<D, R, W, S>(
	dispatcher: Dispatcher<D>,
	reader: R,
	mut writer: W,
	options: ServeOptions,
	signal: S,
) -> Result<RunSummary, TransportError>
where
	D: Driver,
	R: AsyncRead + Unpin,
	W: AsyncWrite + Unpin,
	S: Future<Output = &'static str>,
{
	let mut counters = Counters::default();
	let pumped = pump(&dispatcher, reader, &mut writer, &options, signal, &mut counters).await;

	let shutdown = dispatcher.tree().close_all().await;
	for failure in &shutdown.failed {
		warn!(target: TRANSPORT_TARGET, id = %failure.id, error = %failure.message, "top-level close failed");
	}
	info!(
		target: TRANSPORT_TARGET,
		closed = shutdown.closed_ids.len(),
		requests = counters.requests,
		responses = counters.responses,
		"transport stopped"
	);

	Ok(RunSummary {
		reason: pumped?,
		requests: counters.requests,
		responses: counters.responses,
		shutdown,
	})
}

async fn pump<D, R, W, S>(
	dispatcher: &Dispatcher<D>,
	mut reader: R,
	writer: &mut W,
	options: &ServeOptions,
	signal: S,
	counters: &mut Counters,
) -> Result<StopReason, TransportError>
where
	D: Driver,
	R: AsyncRead + Unpin,
	W: AsyncWrite + Unpin,
	S: Future<Output = &'static str>,
{
	let mut framer = LineFramer::new(options.max_message_bytes);
	let mut in_flight = FuturesOrdered::new();
	let mut shutdown_rx = dispatcher.shutdown_requested();
	let mut buf = vec![0u8; READ_CHUNK];
	let mut reading = true;
	let max_in_flight = options.max_in_flight.max(1);
	tokio::pin!(signal);

	let reason = loop {
		if !reading && in_flight.is_empty() {
			break StopReason::Eof;
		}

		tokio::select! {
			biased;

			name = &mut signal => {
				info!(target: TRANSPORT_TARGET, signal = name, "received signal, shutting down");
				break StopReason::Signal(name);
			}
			changed = shutdown_rx.changed() => {
				if changed.is_err() || *shutdown_rx.borrow() {
					info!(target: TRANSPORT_TARGET, "shutdown requested");
					break StopReason::Requested;
				}
			}
			Some(response) = in_flight.next(), if !in_flight.is_empty() => {
				if let Some(response) = response {
					write_response(writer, &response).await?;
					counters.responses += 1;
				}
			}
			read = reader.read(&mut buf), if reading && in_flight.len() < max_in_flight => {
				let n = read.map_err(TransportError::Read)?;
				let frames: Vec<Frame> = if n == 0 {
					debug!(target: TRANSPORT_TARGET, "input closed");
					reading = false;
					framer.finish().into_iter().collect()
				} else {
					framer.feed(&buf[..n])
				};
				let total = frames.len();
				for (routed, frame) in frames.into_iter().enumerate() {
					counters.requests += 1;
					in_flight.push_back(route(dispatcher, frame));
					// Nothing after a shutdown request is routed.
					if *shutdown_rx.borrow() {
						debug!(target: TRANSPORT_TARGET, skipped = total - routed - 1, "shutdown requested mid-chunk");
						break;
					}
				}
			}
		}
	};

	if !in_flight.is_empty() {
		debug!(target: TRANSPORT_TARGET, pending = in_flight.len(), "draining in-flight requests");
	}
	let drain = async {
		while let Some(response) = in_flight.next().await {
			if let Some(response) = response {
				write_response(writer, &response).await?;
				counters.responses += 1;
			}
		}
		Ok::<_, TransportError>(())
	};
	match tokio::time::timeout(options.shutdown_grace, drain).await {
		Ok(result) => result?,
		Err(_) => warn!(target: TRANSPORT_TARGET, "abandoning requests still running after grace period"),
	}

	Ok(reason)
}

fn route<D: Driver>(dispatcher: &Dispatcher<D>, frame: Frame) -> future::BoxFuture<'static, Option<Response>> {
	match frame {
		Frame::Line(line) => match Request::decode(&line) {
			Ok(request) => dispatcher.dispatch(request),
			Err(err) => {
				warn!(target: TRANSPORT_TARGET, error = %err, "undecodable message");
				let response = Response::failure(err.id(), err.to_error_object());
				future::ready(Some(response)).boxed()
			}
		},
		Frame::Oversized { len } => {
			warn!(target: TRANSPORT_TARGET, len, "message over size limit");
			let error = ErrorObject::new(
				ErrorCode::InvalidRequest,
				format!("message of {len} bytes exceeds the size limit"),
			);
			future::ready(Some(Response::failure(RequestId::Null, error))).boxed()
		}
	}
}

async fn write_response<W>(writer: &mut W, response: &Response) -> Result<(), TransportError>
where
	W: AsyncWrite + Unpin,
{
	let line = response.to_line()?;
	writer.write_all(&line).await.map_err(TransportError::Write)?;
	writer.flush().await.map_err(TransportError::Write)?;
	Ok(())
}
