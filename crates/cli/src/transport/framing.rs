//! Newline framing over an arbitrary chunked byte stream.
//!
//! ```text
//!  AwaitingData ──push──▶ HasPartialBuffer ──push(..\n..)──▶ HasCompleteMessages
//!        ▲                       ▲                                  │
//!        │                       └──────── next_frame (partial) ◀───┤
//!        └──────────── Idle ◀────────────── next_frame (drained) ◀──┘
//! ```
//!
//! A message may span any number of chunks and a chunk may carry any number
//! of messages. Lines longer than the limit are discarded up to their
//! delimiter and surface as [`Frame::Oversized`] without ever being held in
//! memory whole.

use std::mem;

/// Where the framer is in its read cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramerState {
	/// Nothing received yet.
	AwaitingData,
	/// Bytes buffered but no delimiter seen.
	HasPartialBuffer,
	/// At least one complete line is ready.
	HasCompleteMessages,
	/// Everything received so far has been framed.
	Idle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
	/// One message, delimiter stripped.
	Line(Vec<u8>),
	/// A line over the limit; `len` counts the bytes dropped.
	Oversized { len: usize },
}

#[derive(Debug)]
pub struct LineFramer {
	buffer: Vec<u8>,
	/// Prefix of `buffer` known to hold no delimiter.
	scanned: usize,
	/// Bytes thrown away from the current oversized line.
	discarding: Option<usize>,
	max_len: usize,
	started: bool,
}

impl LineFramer {
	pub fn new(max_len: usize) -> Self {
		Self {
			buffer: Vec::new(),
			scanned: 0,
			discarding: None,
			max_len,
			started: false,
		}
	}

	pub fn state(&self) -> FramerState {
		if self.buffer[self.scanned..].contains(&b'\n') {
			FramerState::HasCompleteMessages
		} else if !self.buffer.is_empty() || self.discarding.is_some() {
			FramerState::HasPartialBuffer
		} else if self.started {
			FramerState::Idle
		} else {
			FramerState::AwaitingData
		}
	}

	/// Bytes currently held for an unterminated line.
	pub fn buffered(&self) -> usize {
		self.buffer.len()
	}

	pub fn push(&mut self, chunk: &[u8]) {
		self.started = true;
		self.buffer.extend_from_slice(chunk);
	}

	/// Extracts the next complete frame, skipping blank lines.
	pub fn next_frame(&mut self) -> Option<Frame> {
		loop {
			let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') else {
				self.scanned = self.buffer.len();
				self.spill_if_oversized();
				return None;
			};
			let end = self.scanned + offset;
			let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
			line.pop();
			self.scanned = 0;

			if let Some(dropped) = self.discarding.take() {
				return Some(Frame::Oversized {
					len: dropped + line.len(),
				});
			}
			if line.len() > self.max_len {
				return Some(Frame::Oversized { len: line.len() });
			}
			if line.iter().all(u8::is_ascii_whitespace) {
				continue;
			}
			return Some(Frame::Line(line));
		}
	}

	/// Appends `chunk` and drains every frame it completed, in order.
	pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
		self.push(chunk);
		std::iter::from_fn(|| self.next_frame()).collect()
	}

	/// Flushes a final unterminated line at end of input.
	pub fn finish(&mut self) -> Option<Frame> {
		self.scanned = 0;
		if let Some(dropped) = self.discarding.take() {
			let len = dropped + self.buffer.len();
			self.buffer.clear();
			return Some(Frame::Oversized { len });
		}
		let line = mem::take(&mut self.buffer);
		if line.len() > self.max_len {
			return Some(Frame::Oversized { len: line.len() });
		}
		if line.iter().all(u8::is_ascii_whitespace) {
			return None;
		}
		Some(Frame::Line(line))
	}

	fn spill_if_oversized(&mut self) {
		if self.buffer.len() > self.max_len {
			*self.discarding.get_or_insert(0) += self.buffer.len();
			self.buffer.clear();
			self.scanned = 0;
		}
	}
}
