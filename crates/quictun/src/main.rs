use std::{net::SocketAddr, sync::Arc};

use clap::Parser as _;
use quictun_core::{AppContext, error, info};
use quictun_tun::{TunConfig, TunDevice, netcfg};
use quictun_tunnel::{Initiator, InitiatorOpts, Responder, ResponderOpts};
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing::Level;

use crate::cli::Cli;

mod cli;
mod log;

#[tokio::main]
async fn main() -> eyre::Result<()> {
	log::init_log(Level::INFO)?;
	let cli = Cli::parse();
	info!(target: "[MAIN]", "Quictun starting");

	let ctx = Arc::new(AppContext::default());
	let addr = SocketAddr::new(cli.server, cli.port);

	let tun_config = if cli.client {
		TunConfig::initiator()
	} else {
		TunConfig::responder()
	};
	let device = TunDevice::open(&tun_config)?;
	netcfg::configure(&tun_config);
	let (tun_reader, tun_writer) = device.into_split();

	if cli.client {
		let initiator = Initiator::connect(
			ctx.clone(),
			InitiatorOpts {
				peer_addr:   addr,
				server_name: cli.server.to_string(),
			},
		)
		.await?;
		ctx.tasks.spawn(async move {
			if let Err(err) = initiator.run(tun_reader, tun_writer).await {
				error!(target: "[MAIN]", "Tunnel failed: {err:#}");
			}
		});
	} else {
		let responder = Responder::bind(
			ctx.clone(),
			&ResponderOpts {
				listen_addr: addr,
				cert_path:   cli.cert,
				key_path:    cli.key,
			},
		)?;
		ctx.tasks.spawn(async move {
			if let Err(err) = responder.run(tun_reader, tun_writer).await {
				error!(target: "[MAIN]", "Tunnel failed: {err:#}");
			}
		});
	}

	// The process stays up until the user ends it, even after the tunnel
	// itself has shut down.
	info!(target: "[MAIN]", "Press Enter to exit...");
	let mut line = String::new();
	let mut stdin = BufReader::new(tokio::io::stdin());
	tokio::select! {
		_ = stdin.read_line(&mut line) => info!(target: "[MAIN]", "Exiting on user request"),
		_ = tokio::signal::ctrl_c() => info!(target: "[MAIN]", "Exiting on interrupt"),
	}

	ctx.token.cancel();
	ctx.tasks.close();
	ctx.tasks.wait().await;

	Ok(())
}
