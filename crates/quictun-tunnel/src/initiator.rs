//! The dialing side of the tunnel.

use std::{
	net::{Ipv4Addr, SocketAddr},
	sync::Arc,
};

use quictun_core::{AppContext, info};
use quinn::{Endpoint, EndpointConfig, TokioRuntime};
use snafu::ResultExt;
use tokio::{
	io::{AsyncRead, AsyncWrite},
	net::UdpSocket,
};

use crate::{
	engine,
	error::{BindSocketSnafu, EndpointSnafu, Error, QuicConnectSnafu, QuicHandshakeSnafu, StreamOpenSnafu},
	tls,
};

pub struct InitiatorOpts {
	/// Responder address to dial.
	pub peer_addr:   SocketAddr,
	/// SNI sent in the handshake; not verified against the certificate.
	pub server_name: String,
}

/// Client endpoint with its single established connection.
pub struct Initiator {
	pub ctx:        Arc<AppContext>,
	pub endpoint:   Endpoint,
	pub connection: quinn::Connection,
}

impl Initiator {
	/// Dials the responder. All failures here are fatal startup errors.
	pub async fn connect(ctx: Arc<AppContext>, opts: InitiatorOpts) -> Result<Self, Error> {
		let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

		let client_config = tls::client_config()?;
		let socket_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
		let socket = UdpSocket::bind(&socket_addr)
			.await
			.context(BindSocketSnafu { socket_addr })?
			.into_std()
			.context(EndpointSnafu)?;

		let mut endpoint = Endpoint::new(EndpointConfig::default(), None, socket, Arc::new(TokioRuntime))
			.context(EndpointSnafu)?;
		endpoint.set_default_client_config(client_config);

		info!(target: "[CONN]", "Connecting to {}...", opts.peer_addr);
		let connection = endpoint
			.connect(opts.peer_addr, &opts.server_name)
			.context(QuicConnectSnafu { addr: opts.peer_addr })?
			.await
			.context(QuicHandshakeSnafu { addr: opts.peer_addr })?;
		info!(target: "[CONN]", "Connected");

		Ok(Self {
			ctx,
			endpoint,
			connection,
		})
	}

	/// Opens the tunnel stream and relays packets until the connection is
	/// over. The peer learns of the stream with the first packet sent on it.
	pub async fn run<R, W>(&self, tun_reader: R, tun_writer: W) -> eyre::Result<()>
	where
		R: AsyncRead + Unpin + Send + 'static,
		W: AsyncWrite + Unpin + Send + 'static,
	{
		info!(target: "[STRM]", "Starting...");
		let (send, recv) = self.connection.open_bi().await.context(StreamOpenSnafu)?;
		engine::run_stream(
			self.ctx.clone(),
			self.connection.clone(),
			send,
			recv,
			tun_reader,
			tun_writer,
		)
		.await
	}
}
