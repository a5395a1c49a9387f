//! Host network configuration around the TUN interface.
//!
//! Addressing and link state are applied when the device is opened; the two
//! steps the kernel interface API does not cover — IPv4 forwarding and the
//! initiator's default route — go through external commands. Failures here
//! are logged and not fatal: the data plane still runs, the operator just
//! has to finish the host setup by hand.

use std::process::Command;

use quictun_core::{info, warn};

use crate::TunConfig;

/// Applies the remaining host configuration for an opened device.
pub fn configure(config: &TunConfig) {
	enable_ip_forwarding();
	if config.default_route_via_peer {
		install_default_route(config);
	}
	info!(target: "[TUN]", "Configured and brought up {}", config.name);
}

/// `sysctl -w net.ipv4.ip_forward=1`
pub fn enable_ip_forwarding() {
	run("sysctl", &["-w", "net.ipv4.ip_forward=1"]);
}

/// `ip route add default via <peer> dev <name>`
pub fn install_default_route(config: &TunConfig) {
	let peer = config.peer.to_string();
	run(
		"ip",
		&["route", "add", "default", "via", &peer, "dev", &config.name],
	);
}

fn run(program: &str, args: &[&str]) {
	match Command::new(program).args(args).output() {
		Ok(output) if output.status.success() => {
			info!(target: "[TUN]", "{program} {}", args.join(" "));
		}
		Ok(output) => {
			warn!(
				target: "[TUN]",
				"{program} {} failed: {}",
				args.join(" "),
				String::from_utf8_lossy(&output.stderr).trim()
			);
		}
		Err(err) => {
			warn!(target: "[TUN]", "Failed to run {program}: {err}");
		}
	}
}
