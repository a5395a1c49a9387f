//! End-to-end tests for the packet relay over localhost QUIC.
//!
//! The TUN device is replaced by in-memory duplex pipes: writing into the
//! host end is "the kernel handing the engine an outbound packet", reading
//! from it is "the kernel receiving an injected packet".

use std::{path::PathBuf, sync::Arc, time::Duration};

use quictun_core::AppContext;
use quictun_tunnel::{Initiator, InitiatorOpts, Responder, ResponderOpts, tls};
use quinn::{ReadError, ReadToEndError, VarInt};
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf},
	time::timeout,
};

const PROTO_ICMP: u8 = 1;
const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;

/// Self-signed PEM credentials on disk, the shape the responder loads.
fn write_credentials(test: &str) -> (PathBuf, PathBuf) {
	let dir = std::env::temp_dir().join(format!("quictun-{test}-{}", std::process::id()));
	std::fs::create_dir_all(&dir).unwrap();
	let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
	let cert_path = dir.join("server.cert");
	let key_path = dir.join("server.key");
	std::fs::write(&cert_path, cert.cert.pem()).unwrap();
	std::fs::write(&key_path, cert.key_pair.serialize_pem()).unwrap();
	(cert_path, key_path)
}

type FakeTun = (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>);

fn fake_tun() -> (FakeTun, DuplexStream) {
	let (engine_side, host_side) = tokio::io::duplex(1 << 16);
	(tokio::io::split(engine_side), host_side)
}

/// A 28-byte ICMP echo: 20-byte IPv4 header plus an 8-byte ICMP header.
fn icmp_echo(icmp_type: u8, src: [u8; 4], dst: [u8; 4], seq: u8) -> Vec<u8> {
	let mut packet = vec![
		0x45, 0x00, 0x00, 28, 0x00, 0x00, 0x00, 0x00, 0x40, PROTO_ICMP, 0x00, 0x00,
	];
	packet.extend_from_slice(&src);
	packet.extend_from_slice(&dst);
	packet.extend_from_slice(&[icmp_type, 0, 0, 0, 0, 1, 0, seq]);
	packet
}

fn echo_request(seq: u8) -> Vec<u8> {
	icmp_echo(ICMP_ECHO_REQUEST, [10, 20, 0, 9], [10, 20, 0, 10], seq)
}

fn echo_reply(seq: u8) -> Vec<u8> {
	icmp_echo(ICMP_ECHO_REPLY, [10, 20, 0, 10], [10, 20, 0, 9], seq)
}

struct TestPeers {
	init_ctx:  Arc<AppContext>,
	resp_ctx:  Arc<AppContext>,
	init_host: DuplexStream,
	resp_host: DuplexStream,
}

/// Brings up a responder and a connected initiator with fake TUN devices.
async fn start_peers(test: &str) -> eyre::Result<TestPeers> {
	let (cert_path, key_path) = write_credentials(test);

	let resp_ctx = Arc::new(AppContext::default());
	let responder = Responder::bind(
		resp_ctx.clone(),
		&ResponderOpts {
			listen_addr: "127.0.0.1:0".parse()?,
			cert_path,
			key_path,
		},
	)?;
	let server_addr = responder.endpoint.local_addr()?;
	let ((resp_tun_r, resp_tun_w), resp_host) = fake_tun();
	tokio::spawn(async move {
		let _ = responder.run(resp_tun_r, resp_tun_w).await;
	});

	let init_ctx = Arc::new(AppContext::default());
	let initiator = Initiator::connect(
		init_ctx.clone(),
		InitiatorOpts {
			peer_addr:   server_addr,
			server_name: "localhost".to_string(),
		},
	)
	.await?;
	let ((init_tun_r, init_tun_w), init_host) = fake_tun();
	tokio::spawn(async move {
		let _ = initiator.run(init_tun_r, init_tun_w).await;
	});

	// Give both engines time to come up.
	tokio::time::sleep(Duration::from_millis(200)).await;

	Ok(TestPeers {
		init_ctx,
		resp_ctx,
		init_host,
		resp_host,
	})
}

#[test_log::test(tokio::test)]
async fn icmp_echo_round_trip() -> eyre::Result<()> {
	let mut peers = start_peers("round-trip").await?;

	// Echo request out of the initiator's TUN, delivered byte-for-byte into
	// the responder's.
	let request = echo_request(1);
	peers.init_host.write_all(&request).await?;
	let mut delivered = vec![0u8; request.len()];
	timeout(
		Duration::from_secs(5),
		peers.resp_host.read_exact(&mut delivered),
	)
	.await??;
	assert_eq!(delivered, request);

	// And the reply back the other way.
	let reply = echo_reply(1);
	peers.resp_host.write_all(&reply).await?;
	let mut returned = vec![0u8; reply.len()];
	timeout(
		Duration::from_secs(5),
		peers.init_host.read_exact(&mut returned),
	)
	.await??;
	assert_eq!(returned, reply);

	peers.init_ctx.token.cancel();
	peers.resp_ctx.token.cancel();
	Ok(())
}

#[test_log::test(tokio::test)]
async fn responder_streams_while_initiator_stays_silent() -> eyre::Result<()> {
	let mut peers = start_peers("one-way").await?;

	// A single packet from the initiator surfaces the stream on the
	// responder side.
	let opener = echo_request(0);
	peers.init_host.write_all(&opener).await?;
	let mut first = vec![0u8; opener.len()];
	timeout(
		Duration::from_secs(5),
		peers.resp_host.read_exact(&mut first),
	)
	.await??;
	assert_eq!(first, opener);

	// From here the responder talks on its own. The send rate must not be
	// coupled to received traffic.
	for seq in 1..=10u8 {
		let packet = echo_reply(seq);
		peers.resp_host.write_all(&packet).await?;
		let mut got = vec![0u8; packet.len()];
		timeout(
			Duration::from_secs(5),
			peers.init_host.read_exact(&mut got),
		)
		.await??;
		assert_eq!(got, packet);
	}

	peers.init_ctx.token.cancel();
	peers.resp_ctx.token.cancel();
	Ok(())
}

#[test_log::test(tokio::test)]
async fn peer_abort_resets_the_reverse_direction() -> eyre::Result<()> {
	let (cert_path, key_path) = write_credentials("abort");

	let resp_ctx = Arc::new(AppContext::default());
	let responder = Responder::bind(
		resp_ctx.clone(),
		&ResponderOpts {
			listen_addr: "127.0.0.1:0".parse()?,
			cert_path,
			key_path,
		},
	)?;
	let server_addr = responder.endpoint.local_addr()?;
	let ((resp_tun_r, resp_tun_w), mut resp_host) = fake_tun();
	let responder_task = tokio::spawn(async move { responder.run(resp_tun_r, resp_tun_w).await });

	// A bare client stands in for the initiator so the test can drive the
	// stream directly.
	let mut endpoint = quinn::Endpoint::client("127.0.0.1:0".parse()?)?;
	endpoint.set_default_client_config(tls::client_config()?);
	let connection = endpoint.connect(server_addr, "localhost")?.await?;
	let (mut send, mut recv) = connection.open_bi().await?;

	// One framed packet surfaces the stream on the responder.
	let packet = echo_request(1);
	let mut wire = (packet.len() as u16).to_be_bytes().to_vec();
	wire.extend_from_slice(&packet);
	send.write_all(&wire).await?;
	let mut delivered = vec![0u8; packet.len()];
	timeout(
		Duration::from_secs(5),
		resp_host.read_exact(&mut delivered),
	)
	.await??;
	assert_eq!(delivered, packet);

	// Aborting this send direction must come back as an abort of the
	// responder's own send direction.
	send.reset(VarInt::from_u32(0))?;
	let read = timeout(Duration::from_secs(5), recv.read_to_end(64)).await?;
	assert!(matches!(
		read,
		Err(ReadToEndError::Read(ReadError::Reset(_)))
	));

	// A peer-initiated close ends the relay and the run call returns.
	connection.close(VarInt::from_u32(0), b"done");
	timeout(Duration::from_secs(5), responder_task).await???;

	resp_ctx.token.cancel();
	Ok(())
}

#[test_log::test(tokio::test)]
async fn invalid_packets_never_cross_the_tunnel() -> eyre::Result<()> {
	let mut peers = start_peers("invalid").await?;

	// A malformed 10-byte buffer is rejected by validation and never
	// enqueued; the valid packet written after it is the first to arrive.
	peers.init_host.write_all(&[0xffu8; 10]).await?;
	tokio::time::sleep(Duration::from_millis(50)).await;
	let request = echo_request(3);
	peers.init_host.write_all(&request).await?;

	let mut delivered = vec![0u8; request.len()];
	timeout(
		Duration::from_secs(5),
		peers.resp_host.read_exact(&mut delivered),
	)
	.await??;
	assert_eq!(delivered, request);

	peers.init_ctx.token.cancel();
	peers.resp_ctx.token.cancel();
	Ok(())
}
