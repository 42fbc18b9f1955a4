//! Per-id FIFO turns.
//!
//! Each live entry owns a [`Turn`]. Reserving is synchronous and records the
//! caller at the back of the line; [`Ticket::ready`] resolves once every
//! earlier ticket for that entry has been dropped. Only a cascade close ever
//! holds more than one ticket, and no two cascades claim the same entry, so
//! waits never form a cycle.

use tokio::sync::oneshot;

/// Tail of the wait line for one entry.
#[derive(Debug, Default)]
pub struct Turn {
	tail: Option<oneshot::Receiver<()>>,
}

impl Turn {
	pub fn new() -> Self {
		Self::default()
	}

	/// Joins the back of the line.
	pub fn reserve(&mut self) -> Ticket {
		let (release, done) = oneshot::channel();
		Ticket {
			prev: self.tail.replace(done),
			_release: release,
		}
	}
}

/// A place in an entry's line. Dropping it lets the next holder proceed.
#[derive(Debug)]
pub struct Ticket {
	prev: Option<oneshot::Receiver<()>>,
	_release: oneshot::Sender<()>,
}

impl Ticket {
	/// Waits until all earlier tickets for the same entry are released.
	pub async fn ready(&mut self) {
		if let Some(prev) = self.prev.take() {
			// The sender is only ever dropped, never used.
			let _ = prev.await;
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::time::Duration;

	use parking_lot::Mutex;

	use super::*;

	#[tokio::test]
	async fn test_first_ticket_is_ready_immediately() {
		let mut turn = Turn::new();
		let mut ticket = turn.reserve();
		tokio::time::timeout(Duration::from_millis(100), ticket.ready())
			.await
			.expect("first ticket should not wait");
	}

	#[tokio::test]
	async fn test_second_ticket_waits_for_first() {
		let mut turn = Turn::new();
		let first = turn.reserve();
		let mut second = turn.reserve();

		let blocked = tokio::time::timeout(Duration::from_millis(50), second.ready()).await;
		assert!(blocked.is_err());

		drop(first);
		tokio::time::timeout(Duration::from_millis(100), second.ready())
			.await
			.expect("second ticket should run after the first is released");
	}

	#[tokio::test]
	async fn test_tickets_run_in_reservation_order() {
		let mut turn = Turn::new();
		let log = Arc::new(Mutex::new(Vec::new()));

		let mut tasks = Vec::new();
		for i in 0..5u64 {
			let mut ticket = turn.reserve();
			let log = log.clone();
			tasks.push(tokio::spawn(async move {
				ticket.ready().await;
				// Later tickets sleep less, so only the queue keeps them ordered.
				tokio::time::sleep(Duration::from_millis(5 * (5 - i))).await;
				log.lock().push(i);
			}));
		}
		for task in tasks.into_iter().rev() {
			task.await.unwrap();
		}

		assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
	}

	#[tokio::test]
	async fn test_dropping_turn_does_not_strand_waiters() {
		let mut turn = Turn::new();
		let first = turn.reserve();
		let mut second = turn.reserve();
		drop(turn);
		drop(first);
		tokio::time::timeout(Duration::from_millis(100), second.ready())
			.await
			.expect("waiter should be released");
	}
}
