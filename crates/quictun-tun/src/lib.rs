mod device;
pub mod netcfg;

pub use device::{TunConfig, TunDevice, TunError, TunReader, TunWriter};
