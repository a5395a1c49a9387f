//! The two packet queues that decouple TUN I/O from stream I/O.
//!
//! Ingress (TUN -> transport) is an unbounded FIFO: its consumer is a network
//! send that is flow-controlled by the peer, so dropping here would discard
//! user data under transient slowdowns. Egress (transport -> TUN) is a
//! bounded ring that drops the newest packet when full: its consumer is the
//! local TUN write, and the bound caps memory if that ever stalls.
//!
//! Both queues pair a mutex-protected `VecDeque` with a [`Notify`] for the
//! not-empty condition. Locks are released before every await point.

use std::{collections::VecDeque, sync::Mutex};

use bytes::Bytes;
use tokio::sync::Notify;

use crate::warn;

/// Slot count of the egress ring. One slot is held empty to tell full from
/// empty, so the effective capacity is `QUEUE_SIZE - 1`.
pub const QUEUE_SIZE: usize = 1024;
/// Largest payload an egress slot accepts.
pub const BUFFER_SIZE: usize = 4096;

/// Unbounded FIFO carrying packets from the local TUN toward the peer.
///
/// Single producer (the TUN reader task), single consumer (the send driver).
/// Growth is implicitly bounded by the TUN reader's rate.
#[derive(Default)]
pub struct IngressQueue {
	inner: Mutex<VecDeque<Bytes>>,
	ready: Notify,
}

impl IngressQueue {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends a packet and signals the consumer. Never blocks.
	pub fn enqueue(&self, packet: Bytes) {
		self.inner.lock().unwrap().push_back(packet);
		self.ready.notify_one();
	}

	/// Removes the oldest packet, waiting until one is available.
	pub async fn dequeue(&self) -> Bytes {
		loop {
			let packet = self.inner.lock().unwrap().pop_front();
			if let Some(packet) = packet {
				return packet;
			}
			self.ready.notified().await;
		}
	}

	pub fn len(&self) -> usize {
		self.inner.lock().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.lock().unwrap().is_empty()
	}
}

/// Bounded ring carrying packets from the peer toward the local TUN.
///
/// The producer is the stream receive handler, which must never block; when
/// the ring is full the newest packet is dropped and logged. The consumer is
/// the TUN writer task, which drains the ring and then waits.
pub struct EgressQueue {
	inner:    Mutex<VecDeque<Bytes>>,
	ready:    Notify,
	capacity: usize,
}

impl EgressQueue {
	pub fn new() -> Self {
		Self::with_slots(QUEUE_SIZE)
	}

	/// Ring with `slots` slots, one of which stays empty.
	pub fn with_slots(slots: usize) -> Self {
		debug_assert!(slots >= 2);
		Self {
			inner:    Mutex::new(VecDeque::with_capacity(slots - 1)),
			ready:    Notify::new(),
			capacity: slots - 1,
		}
	}

	/// Stores a packet unless the ring is full or the payload exceeds a
	/// slot. Returns whether the packet was stored; drops are logged and the
	/// caller continues either way.
	pub fn enqueue(&self, packet: Bytes) -> bool {
		if packet.len() > BUFFER_SIZE {
			warn!(target: "[QUE]", "Oversized packet ({} bytes), dropping packet", packet.len());
			return false;
		}
		{
			let mut queue = self.inner.lock().unwrap();
			if queue.len() == self.capacity {
				drop(queue);
				warn!(target: "[QUE]", "Queue full, dropping packet");
				return false;
			}
			queue.push_back(packet);
		}
		self.ready.notify_one();
		true
	}

	/// Removes the oldest packet if one is present. The writer drains with
	/// this between TUN writes so the lock is never held during I/O.
	pub fn try_dequeue(&self) -> Option<Bytes> {
		self.inner.lock().unwrap().pop_front()
	}

	/// Waits until the ring is non-empty.
	pub async fn wait_ready(&self) {
		loop {
			if !self.is_empty() {
				return;
			}
			self.ready.notified().await;
		}
	}

	pub fn len(&self) -> usize {
		self.inner.lock().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.lock().unwrap().is_empty()
	}
}

impl Default for EgressQueue {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod test {
	use std::{sync::Arc, time::Duration};

	use super::*;

	fn packet(byte: u8) -> Bytes {
		Bytes::from(vec![byte; 100])
	}

	#[test]
	fn ingress_preserves_fifo_order() {
		let queue = IngressQueue::new();
		queue.enqueue(packet(1));
		queue.enqueue(packet(2));
		queue.enqueue(packet(3));
		assert_eq!(queue.len(), 3);

		let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
		for expected in 1..=3u8 {
			let got = runtime.block_on(queue.dequeue());
			assert_eq!(got, packet(expected));
		}
		assert!(queue.is_empty());
	}

	#[tokio::test]
	async fn ingress_dequeue_wakes_on_enqueue() {
		let queue = Arc::new(IngressQueue::new());
		let consumer = {
			let queue = queue.clone();
			tokio::spawn(async move { queue.dequeue().await })
		};
		tokio::time::sleep(Duration::from_millis(20)).await;
		queue.enqueue(packet(7));
		let got = tokio::time::timeout(Duration::from_secs(1), consumer)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(got, packet(7));
	}

	#[test]
	fn egress_holds_one_slot_empty() {
		let queue = EgressQueue::new();
		let mut stored = 0;
		for i in 0..QUEUE_SIZE {
			if queue.enqueue(packet(i as u8)) {
				stored += 1;
			}
		}
		// The 1024th enqueue is the single drop.
		assert_eq!(stored, QUEUE_SIZE - 1);
		assert_eq!(queue.len(), QUEUE_SIZE - 1);
	}

	#[test]
	fn egress_drops_newest_while_writer_is_paused() {
		let queue = EgressQueue::new();
		let mut dropped = 0;
		for i in 0..2000u32 {
			if !queue.enqueue(Bytes::from(i.to_be_bytes().to_vec())) {
				dropped += 1;
			}
		}
		assert_eq!(dropped, 2000 - (QUEUE_SIZE - 1));
		// The stored packets are the first 1023 in order; the drops never
		// overwrote a slot.
		assert_eq!(queue.try_dequeue(), Some(Bytes::from(0u32.to_be_bytes().to_vec())));
	}

	#[test]
	fn egress_preserves_fifo_order() {
		let queue = EgressQueue::with_slots(8);
		for i in 1..=5u8 {
			assert!(queue.enqueue(packet(i)));
		}
		for expected in 1..=5u8 {
			assert_eq!(queue.try_dequeue(), Some(packet(expected)));
		}
		assert_eq!(queue.try_dequeue(), None);
	}

	#[test]
	fn egress_rejects_oversized_payload() {
		let queue = EgressQueue::with_slots(8);
		assert!(!queue.enqueue(Bytes::from(vec![0u8; BUFFER_SIZE + 1])));
		assert!(queue.is_empty());
	}

	#[tokio::test]
	async fn egress_wait_ready_wakes_on_enqueue() {
		let queue = Arc::new(EgressQueue::with_slots(8));
		let waiter = {
			let queue = queue.clone();
			tokio::spawn(async move { queue.wait_ready().await })
		};
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(queue.enqueue(packet(1)));
		tokio::time::timeout(Duration::from_secs(1), waiter)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(queue.try_dequeue(), Some(packet(1)));
	}
}
