use std::{net::SocketAddr, path::PathBuf};

use snafu::Snafu;

/// Setup and transport failures. Everything here is fatal for the tunnel:
/// per-packet errors are handled locally in the engine and never surface as
/// this type.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
	#[snafu(display("Failed to bind UDP socket on {socket_addr}"))]
	BindSocket {
		socket_addr: SocketAddr,
		source:      std::io::Error,
	},

	#[snafu(display("Failed to read credential file {}", path.display()))]
	CredentialRead {
		path:   PathBuf,
		source: std::io::Error,
	},

	#[snafu(display("No usable certificate or key in {}", path.display()))]
	CredentialEmpty { path: PathBuf },

	#[snafu(display("Failed to configure TLS"))]
	Tls { source: rustls::Error },

	#[snafu(display("TLS 1.3 cipher suites unavailable in the crypto provider"))]
	CipherSuites {
		source: quinn::crypto::rustls::NoInitialCipherSuite,
	},

	#[snafu(display("Failed to create QUIC endpoint"))]
	Endpoint { source: std::io::Error },

	#[snafu(display("Unable to connect to {addr}"))]
	QuicConnect {
		addr:   SocketAddr,
		source: quinn::ConnectError,
	},

	#[snafu(display("QUIC handshake with {addr} failed"))]
	QuicHandshake {
		addr:   SocketAddr,
		source: quinn::ConnectionError,
	},

	#[snafu(display("Failed to open the tunnel stream"))]
	StreamOpen { source: quinn::ConnectionError },

	#[snafu(display("Endpoint closed before a connection arrived"))]
	EndpointClosed,
}
