use std::{net::IpAddr, path::PathBuf};

use clap::Parser;

/// Quic tunneling and routing between two peers.
#[derive(Parser)]
#[command(about, long_about = None)]
pub struct Cli {
	/// Peer address (initiator) or bind address (responder)
	#[arg(short, long, value_name = "IP")]
	pub server: IpAddr,

	/// Peer port (initiator) or listen port (responder)
	#[arg(short, long, value_name = "PORT", value_parser = clap::value_parser!(u16).range(1..))]
	pub port: u16,

	/// Run in client (initiator) mode instead of the default server mode
	#[arg(short, long)]
	pub client: bool,

	/// TLS certificate presented by the server
	#[arg(long, value_name = "FILE", default_value = "/home/vagrant/server.cert")]
	pub cert: PathBuf,

	/// Private key matching the server certificate
	#[arg(long, value_name = "FILE", default_value = "/home/vagrant/server.key")]
	pub key: PathBuf,
}
