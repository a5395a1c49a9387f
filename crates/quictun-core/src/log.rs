//! Component-tagged logging macros.
//!
//! Data-plane events carry targets of the form `<crate> <tag>`, e.g.
//! `quictun_core [QUE]`, so a filter directive can slice either by crate or
//! by component. The tag mirrors the subsystem markers of the log output
//! (`[CONN]`, `[STRM]`, `[TUN]`, `[QUE]`, `[LSN]`, `[MAIN]`, `[PKT]`).
//! Calls without a `target:` fall through to plain tracing events.
//!
//! The `const_str` path is anchored through `$crate` so crates using these
//! macros do not need their own dependency on it; `tracing` they all carry
//! anyway.

#[macro_export]
macro_rules! info {
	(target: $target:expr, $($arg:tt)*) => {
		tracing::event!(
			target: $crate::const_str::concat!($crate::log::current_crate_name(), " ", $target),
			tracing::Level::INFO,
			$($arg)*
		)
	};
	($($arg:tt)*) => {
		tracing::event!(tracing::Level::INFO, $($arg)*)
	};
}

#[macro_export]
macro_rules! warn {
	(target: $target:expr, $($arg:tt)*) => {
		tracing::event!(
			target: $crate::const_str::concat!($crate::log::current_crate_name(), " ", $target),
			tracing::Level::WARN,
			$($arg)*
		)
	};
	($($arg:tt)*) => {
		tracing::event!(tracing::Level::WARN, $($arg)*)
	};
}

#[macro_export]
macro_rules! error {
	(target: $target:expr, $($arg:tt)*) => {
		tracing::event!(
			target: $crate::const_str::concat!($crate::log::current_crate_name(), " ", $target),
			tracing::Level::ERROR,
			$($arg)*
		)
	};
	($($arg:tt)*) => {
		tracing::event!(tracing::Level::ERROR, $($arg)*)
	};
}

#[macro_export]
macro_rules! debug {
	(target: $target:expr, $($arg:tt)*) => {
		tracing::event!(
			target: $crate::const_str::concat!($crate::log::current_crate_name(), " ", $target),
			tracing::Level::DEBUG,
			$($arg)*
		)
	};
	($($arg:tt)*) => {
		tracing::event!(tracing::Level::DEBUG, $($arg)*)
	};
}

/// https://github.com/Gadiguibou/current_crate_name/blob/master/src/lib.rs
#[allow(non_upper_case_globals)]
pub const fn current_crate_name() -> &'static str {
	const module_path_separator: u8 = b':';
	const module_path_byte_slice: &[u8] = module_path!().as_bytes();
	const module_path_separator_index: usize = {
		let mut index = 0;
		loop {
			if index == module_path_byte_slice.len()
				|| module_path_byte_slice[index] == module_path_separator
			{
				break index;
			}
			index += 1;
		}
	};
	const new_slice: [u8; module_path_separator_index] = {
		let mut arr = [0; module_path_separator_index];
		let mut i = 0;
		while i < module_path_separator_index {
			arr[i] = module_path_byte_slice[i];
			i += 1;
		}
		arr
	};

	// SAFETY: The original string was valid UTF-8 and we sliced it at the start of
	// an ASCII byte which is a valid unicode boundary. Hence the new string is
	// still valid UTF-8.
	unsafe { std::str::from_utf8_unchecked(&new_slice) }
}
