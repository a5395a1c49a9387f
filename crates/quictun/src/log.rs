use tracing::{Level, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

/// Installs the process-wide subscriber.
///
/// Every component logs through the quictun-core macros, whose targets are
/// `<crate> <tag>` pairs, so a single default directive covers the whole
/// workspace; `RUST_LOG` overrides it when a run needs finer slicing (e.g.
/// `RUST_LOG=quictun_tunnel=trace`).
pub fn init_log(level: Level) -> eyre::Result<()> {
	let filter = EnvFilter::builder()
		.with_default_directive(LevelFilter::from_level(level).into())
		.from_env_lossy();
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(true)
		.try_init()
		.map_err(|e| eyre::eyre!(e))?;

	Ok(())
}
