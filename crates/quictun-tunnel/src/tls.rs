//! TLS and QUIC transport parameters shared by both roles.
//!
//! The responder presents a PEM certificate; the initiator performs no
//! certificate validation, so transport encryption is against passive
//! observers only. Both sides negotiate the fixed ALPN token and run the
//! same transport knobs.

use std::{fs, path::Path, sync::Arc, time::Duration};

use quinn::{
	AckFrequencyConfig, ClientConfig, IdleTimeout, ServerConfig, TransportConfig, VarInt,
	crypto::rustls::{QuicClientConfig, QuicServerConfig},
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use snafu::{OptionExt, ResultExt, ensure};

use crate::error::{
	CipherSuitesSnafu, CredentialEmptySnafu, CredentialReadSnafu, Error, TlsSnafu,
};

/// ALPN token negotiated by both peers.
pub const ALPN: &[u8] = b"sample";

const IDLE_TIMEOUT_MS: u32 = 60_000;
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);
const INITIAL_RTT: Duration = Duration::from_millis(20);
const MAX_ACK_DELAY: Duration = Duration::from_millis(5);

/// Responder TLS: certificate and key loaded from PEM files, TLS 1.3 only,
/// session resumption with 0-RTT acceptance.
pub fn server_config(cert_path: &Path, key_path: &Path) -> Result<ServerConfig, Error> {
	let certificate = load_certs(cert_path)?;
	let private_key = load_key(key_path)?;

	let mut crypto = rustls::ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
		.with_no_client_auth()
		.with_single_cert(certificate, private_key)
		.context(TlsSnafu)?;
	crypto.alpn_protocols = vec![ALPN.to_vec()];
	crypto.max_early_data_size = u32::MAX;
	crypto.send_half_rtt_data = true;

	let mut config = ServerConfig::with_crypto(Arc::new(
		QuicServerConfig::try_from(crypto).context(CipherSuitesSnafu)?,
	));
	config.transport_config(Arc::new(transport_config()));
	Ok(config)
}

/// Initiator TLS: no certificate validation, early data enabled.
pub fn client_config() -> Result<ClientConfig, Error> {
	let mut crypto = rustls::ClientConfig::builder()
		.dangerous()
		.with_custom_certificate_verifier(Arc::new(SkipServerVerification))
		.with_no_client_auth();
	crypto.alpn_protocols = vec![ALPN.to_vec()];
	crypto.enable_early_data = true;

	let mut config = ClientConfig::new(Arc::new(
		QuicClientConfig::try_from(crypto).context(CipherSuitesSnafu)?,
	));
	config.transport_config(Arc::new(transport_config()));
	Ok(config)
}

fn transport_config() -> TransportConfig {
	let mut ack_frequency = AckFrequencyConfig::default();
	ack_frequency.max_ack_delay(Some(MAX_ACK_DELAY));

	let mut transport = TransportConfig::default();
	transport
		.max_idle_timeout(Some(IdleTimeout::from(VarInt::from_u32(IDLE_TIMEOUT_MS))))
		.keep_alive_interval(Some(KEEP_ALIVE_INTERVAL))
		.initial_rtt(INITIAL_RTT)
		.ack_frequency_config(Some(ack_frequency));
	transport
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
	let pem = fs::read(path).context(CredentialReadSnafu { path })?;
	let certs = rustls_pemfile::certs(&mut pem.as_slice())
		.collect::<Result<Vec<_>, _>>()
		.context(CredentialReadSnafu { path })?;
	ensure!(!certs.is_empty(), CredentialEmptySnafu { path });
	Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, Error> {
	let pem = fs::read(path).context(CredentialReadSnafu { path })?;
	rustls_pemfile::private_key(&mut pem.as_slice())
		.context(CredentialReadSnafu { path })?
		.context(CredentialEmptySnafu { path })
}

/// Accepts any server certificate. The tunnel's trust model is the
/// responder-side credential plus whatever the operator layers on top; the
/// initiator deliberately skips validation.
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
	fn verify_server_cert(
		&self,
		_end_entity: &CertificateDer<'_>,
		_intermediates: &[CertificateDer<'_>],
		_server_name: &rustls::pki_types::ServerName<'_>,
		_ocsp_response: &[u8],
		_now: rustls::pki_types::UnixTime,
	) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
		Ok(rustls::client::danger::ServerCertVerified::assertion())
	}

	fn verify_tls12_signature(
		&self,
		_message: &[u8],
		_cert: &CertificateDer<'_>,
		_dss: &rustls::DigitallySignedStruct,
	) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
		Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
	}

	fn verify_tls13_signature(
		&self,
		_message: &[u8],
		_cert: &CertificateDer<'_>,
		_dss: &rustls::DigitallySignedStruct,
	) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
		Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
	}

	fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
		rustls::crypto::aws_lc_rs::default_provider()
			.signature_verification_algorithms
			.supported_schemes()
	}
}
