//! The bidirectional packet-relay engine.
//!
//! Couples the TUN device halves to the single tunnel stream through the two
//! packet queues:
//!
//! ```text
//! TUN  --read-->  ingress queue  -->  send driver     -->  QUIC stream
//! TUN <--write--  egress queue  <--  receive handler <--  QUIC stream
//! ```
//!
//! Four tasks run per engine instance: the TUN reader and the send driver
//! are started together when the stream comes up, the receive handler runs
//! for the life of the stream, and the TUN writer is started by the first
//! received packet. Each task is a singleton. The engine is generic over the
//! TUN halves so the relay can be exercised against in-memory pipes.

use std::{
	sync::{Arc, Mutex},
	time::Duration,
};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use quictun_core::{AppContext, EgressQueue, IngressQueue, debug, info, is_valid_ip_packet, warn};
use quinn::{ConnectionError, ReadError, RecvStream, SendStream, VarInt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::{
	codec::{FramedRead, FramedWrite},
	sync::CancellationToken,
};

use crate::{
	codec::{FrameCodec, FrameError},
	state::{StreamEvent, StreamState},
};

/// Stack buffer for a single TUN read.
const READ_BUFFER_SIZE: usize = 2048;
/// Pacing between TUN read iterations.
const READ_PACE: Duration = Duration::from_millis(1);

type SharedState = Arc<Mutex<StreamState>>;

fn advance(state: &SharedState, event: StreamEvent) {
	let mut state = state.lock().unwrap();
	let next = state.on_event(event);
	if next != *state {
		debug!(target: "[STRM]", "{:?} -> {:?} on {:?}", *state, next, event);
		*state = next;
	}
}

/// Runs the relay over an established stream until the connection closes or
/// the context is cancelled. Packets flow as soon as the tasks are up; the
/// call itself returns only when the tunnel is over.
pub async fn run_stream<R, W>(
	ctx: Arc<AppContext>,
	connection: quinn::Connection,
	send: SendStream,
	recv: RecvStream,
	tun_reader: R,
	tun_writer: W,
) -> eyre::Result<()>
where
	R: AsyncRead + Unpin + Send + 'static,
	W: AsyncWrite + Unpin + Send + 'static,
{
	let shutdown = ctx.token.child_token();
	let abort = CancellationToken::new();
	let ingress = Arc::new(IngressQueue::new());
	let egress = Arc::new(EgressQueue::new());
	let state: SharedState = Arc::new(Mutex::new(StreamState::Opening));
	advance(&state, StreamEvent::StartOk);

	// The first send drive starts the TUN reader; both are singletons for
	// the life of the engine.
	ctx.tasks
		.spawn(tun_read_task(shutdown.clone(), ingress.clone(), tun_reader));
	ctx.tasks.spawn(send_drive_task(
		shutdown.clone(),
		abort.clone(),
		ingress.clone(),
		state.clone(),
		send,
	));
	ctx.tasks.spawn(recv_task(
		ctx.clone(),
		shutdown.clone(),
		abort,
		egress,
		state.clone(),
		recv,
		tun_writer,
	));

	tokio::select! {
		_ = shutdown.cancelled() => {
			connection.close(VarInt::from_u32(0), b"done");
			info!(target: "[CONN]", "All done");
		}
		reason = connection.closed() => match reason {
			ConnectionError::TimedOut => {
				info!(target: "[CONN]", "Successfully shut down on idle.");
			}
			ConnectionError::ApplicationClosed(close) => {
				info!(target: "[CONN]", "Shut down by peer, {}", close.error_code);
			}
			ConnectionError::ConnectionClosed(close) => {
				info!(target: "[CONN]", "Shut down by transport, {}", close.error_code);
			}
			ConnectionError::LocallyClosed => {
				info!(target: "[CONN]", "All done");
			}
			reason => warn!(target: "[CONN]", "Connection lost: {reason}"),
		}
	}

	advance(&state, StreamEvent::ShutdownComplete);
	shutdown.cancel();
	Ok(())
}

/// Reads raw packets from TUN and feeds the ingress queue. Invalid packets
/// are dropped before they enter the queue; read failures are logged and the
/// loop continues.
async fn tun_read_task<R>(shutdown: CancellationToken, ingress: Arc<IngressQueue>, mut tun: R)
where
	R: AsyncRead + Unpin + Send + 'static,
{
	info!(target: "[TUN]", "Reader task started");
	let mut buffer = [0u8; READ_BUFFER_SIZE];
	loop {
		tokio::select! {
			_ = shutdown.cancelled() => break,
			read = tun.read(&mut buffer) => match read {
				Ok(0) => debug!(target: "[TUN]", "No data available from TUN interface"),
				Ok(n) => {
					debug!(target: "[TUN]", "Read {n} bytes from TUN interface");
					if is_valid_ip_packet(&buffer[..n]) {
						ingress.enqueue(Bytes::copy_from_slice(&buffer[..n]));
					}
				}
				Err(err) => warn!(target: "[TUN]", "Error reading from TUN device: {err}"),
			}
		}
		// Paces the loop so a device that yields without EOF cannot spin.
		tokio::time::sleep(READ_PACE).await;
	}
	info!(target: "[TUN]", "Reader task stopped");
}

/// Drains the ingress queue onto the stream, one framed send per packet.
/// Runs independently of the receive path. A packet taken from the queue is
/// sent exactly once or dropped with a log.
async fn send_drive_task(
	shutdown: CancellationToken,
	abort: CancellationToken,
	ingress: Arc<IngressQueue>,
	state: SharedState,
	send: SendStream,
) {
	let mut framed = FramedWrite::new(send, FrameCodec);
	loop {
		tokio::select! {
			_ = shutdown.cancelled() => {
				// Clean FIN so the peer sees end-of-stream, not an error.
				let _ = framed.get_mut().finish();
				break;
			}
			_ = abort.cancelled() => {
				let _ = framed.get_mut().reset(VarInt::from_u32(0));
				break;
			}
			packet = ingress.dequeue() => {
				let len = packet.len();
				advance(&state, StreamEvent::FirstTraffic);
				if let Err(err) = framed.send(packet).await {
					warn!(
						target: "[STRM]",
						"Failed to send packet to QUIC stream, dropping {len} bytes: {err}"
					);
					break;
				}
				debug!(target: "[STRM]", "Sent {len} bytes to QUIC stream");
			}
		}
	}
	info!(target: "[STRM]", "Send driver stopped");
}

/// Receives framed packets from the stream and feeds the egress queue. The
/// TUN writer is started by the first packet. Queue-full drops never
/// interrupt the loop; a peer reset aborts the local send direction.
async fn recv_task<W>(
	ctx: Arc<AppContext>,
	shutdown: CancellationToken,
	abort: CancellationToken,
	egress: Arc<EgressQueue>,
	state: SharedState,
	recv: RecvStream,
	tun_writer: W,
) where
	W: AsyncWrite + Unpin + Send + 'static,
{
	let mut framed = FramedRead::new(recv, FrameCodec);
	let mut writer = Some(tun_writer);
	loop {
		tokio::select! {
			_ = shutdown.cancelled() => break,
			frame = framed.next() => match frame {
				Some(Ok(packet)) => {
					debug!(target: "[STRM]", "Data received, {} bytes", packet.len());
					advance(&state, StreamEvent::FirstTraffic);
					if let Some(tun) = writer.take() {
						ctx.tasks
							.spawn(tun_write_task(shutdown.clone(), egress.clone(), tun));
					}
					egress.enqueue(packet);
				}
				Some(Err(err)) if is_peer_reset(&err) => {
					info!(target: "[STRM]", "Peer aborted");
					advance(&state, StreamEvent::PeerSendAborted);
					abort.cancel();
					break;
				}
				Some(Err(err)) => {
					warn!(target: "[STRM]", "Stream receive failed: {err}");
					break;
				}
				None => {
					info!(target: "[STRM]", "Peer shut down");
					advance(&state, StreamEvent::PeerSendShutdown);
					break;
				}
			}
		}
	}
}

/// Drains the egress queue into TUN. The queue lock is never held during a
/// write. Exits once shutdown is requested and the queue is empty.
async fn tun_write_task<W>(shutdown: CancellationToken, egress: Arc<EgressQueue>, mut tun: W)
where
	W: AsyncWrite + Unpin + Send + 'static,
{
	info!(target: "[QUE]", "Writer task started");
	loop {
		while let Some(packet) = egress.try_dequeue() {
			match tun.write(&packet).await {
				Ok(written) if written != packet.len() => {
					warn!(
						target: "[QUE]",
						"Partial write to TUN ({written}/{} bytes)",
						packet.len()
					);
				}
				Ok(written) => {
					debug!(target: "[QUE]", "Wrote {written} bytes to TUN device");
				}
				Err(err) => warn!(target: "[QUE]", "Error writing to TUN: {err}"),
			}
		}
		if shutdown.is_cancelled() {
			break;
		}
		tokio::select! {
			_ = shutdown.cancelled() => {}
			_ = egress.wait_ready() => {}
		}
	}
	info!(target: "[QUE]", "Writer task stopped");
}

fn is_peer_reset(err: &FrameError) -> bool {
	let FrameError::Io { source } = err else {
		return false;
	};
	source
		.get_ref()
		.is_some_and(|inner| matches!(inner.downcast_ref::<ReadError>(), Some(ReadError::Reset(_))))
}
