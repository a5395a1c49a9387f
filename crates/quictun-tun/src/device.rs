//! The kernel TUN interface the tunnel reads outbound packets from and
//! injects inbound packets into.

use std::net::Ipv4Addr;

use quictun_core::info;
use snafu::{ResultExt, Snafu};
use tun::AsyncDevice;

/// Async read half of the device, handed to the TUN reader task.
pub type TunReader = tokio::io::ReadHalf<AsyncDevice>;
/// Async write half of the device, handed to the TUN writer task.
pub type TunWriter = tokio::io::WriteHalf<AsyncDevice>;

#[derive(Debug, Snafu)]
pub enum TunError {
	#[snafu(display("Failed to create TUN device {name}"))]
	Create { name: String, source: tun::Error },
}

/// Role-fixed interface parameters for one end of the point-to-point link.
#[derive(Debug, Clone)]
pub struct TunConfig {
	pub name:    String,
	pub address: Ipv4Addr,
	pub peer:    Ipv4Addr,
	pub netmask: Ipv4Addr,
	/// Whether the host routes all traffic through the tunnel.
	pub default_route_via_peer: bool,
}

impl TunConfig {
	/// The dialing side: `tun0client`, 10.20.0.9 peered with 10.20.0.10,
	/// default route through the peer.
	pub fn initiator() -> Self {
		Self {
			name:    String::from("tun0client"),
			address: Ipv4Addr::new(10, 20, 0, 9),
			peer:    Ipv4Addr::new(10, 20, 0, 10),
			netmask: Ipv4Addr::new(255, 255, 255, 252),
			default_route_via_peer: true,
		}
	}

	/// The listening side: `tun0server`, 10.20.0.10 peered with 10.20.0.9,
	/// no default route.
	pub fn responder() -> Self {
		Self {
			name:    String::from("tun0server"),
			address: Ipv4Addr::new(10, 20, 0, 10),
			peer:    Ipv4Addr::new(10, 20, 0, 9),
			netmask: Ipv4Addr::new(255, 255, 255, 252),
			default_route_via_peer: false,
		}
	}
}

/// An open layer-3 TUN device, addressed and up.
pub struct TunDevice {
	device: AsyncDevice,
}

impl TunDevice {
	/// Opens the kernel TUN device with the given name and point-to-point
	/// addressing. Layer 3, no packet-information prefix; the interface is
	/// brought up before this returns.
	pub fn open(config: &TunConfig) -> Result<Self, TunError> {
		let mut tun_config = tun::Configuration::default();
		tun_config
			.name(&config.name)
			.layer(tun::Layer::L3)
			.address(config.address)
			.destination(config.peer)
			.netmask(config.netmask)
			.up();

		#[cfg(target_os = "linux")]
		tun_config.platform(|platform| {
			platform.packet_information(false);
		});

		let device = tun::create_as_async(&tun_config).context(CreateSnafu {
			name: config.name.clone(),
		})?;
		info!(target: "[TUN]", "TUN interface {} created successfully", config.name);

		Ok(Self { device })
	}

	/// Splits the device into independent read and write halves so each
	/// direction of the relay owns its own end.
	pub fn into_split(self) -> (TunReader, TunWriter) {
		tokio::io::split(self.device)
	}
}
