//! The listening side of the tunnel.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use quictun_core::{AppContext, info};
use quinn::{Endpoint, EndpointConfig, TokioRuntime};
use snafu::{OptionExt, ResultExt};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
	engine,
	error::{
		BindSocketSnafu, EndpointClosedSnafu, EndpointSnafu, Error, QuicHandshakeSnafu,
		StreamOpenSnafu,
	},
	tls,
};

pub struct ResponderOpts {
	/// Address and port to listen on.
	pub listen_addr: SocketAddr,
	/// PEM certificate presented to the initiator.
	pub cert_path:   PathBuf,
	/// PEM private key matching the certificate.
	pub key_path:    PathBuf,
}

/// Server endpoint awaiting its single peer.
pub struct Responder {
	pub ctx:      Arc<AppContext>,
	pub endpoint: Endpoint,
}

impl Responder {
	/// Loads the credential and binds the listening endpoint. All failures
	/// here are fatal startup errors.
	pub fn bind(ctx: Arc<AppContext>, opts: &ResponderOpts) -> Result<Self, Error> {
		let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

		let server_config = tls::server_config(&opts.cert_path, &opts.key_path)?;
		let socket = std::net::UdpSocket::bind(opts.listen_addr).context(BindSocketSnafu {
			socket_addr: opts.listen_addr,
		})?;
		let endpoint = Endpoint::new(
			EndpointConfig::default(),
			Some(server_config),
			socket,
			Arc::new(TokioRuntime),
		)
		.context(EndpointSnafu)?;
		info!(target: "[LSN]", "Listening on {}", opts.listen_addr);

		Ok(Self { ctx, endpoint })
	}

	/// Accepts exactly one connection and its tunnel stream, then relays
	/// packets until the connection is over.
	pub async fn run<R, W>(&self, tun_reader: R, tun_writer: W) -> eyre::Result<()>
	where
		R: AsyncRead + Unpin + Send + 'static,
		W: AsyncWrite + Unpin + Send + 'static,
	{
		let incoming = self.endpoint.accept().await.context(EndpointClosedSnafu)?;
		let remote = incoming.remote_address();
		let connection = incoming
			.accept()
			.context(QuicHandshakeSnafu { addr: remote })?
			.await
			.context(QuicHandshakeSnafu { addr: remote })?;
		info!(target: "[CONN]", "Connected ({remote})");

		// The stream surfaces once the initiator sends its first packet.
		let (send, recv) = connection.accept_bi().await.context(StreamOpenSnafu)?;
		info!(target: "[STRM]", "Peer started");

		engine::run_stream(
			self.ctx.clone(),
			connection,
			send,
			recv,
			tun_reader,
			tun_writer,
		)
		.await
	}
}
