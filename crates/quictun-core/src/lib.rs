pub use const_str;

mod context;
pub mod log;
pub mod packet;
pub mod queue;

pub use context::AppContext;
pub use packet::{MAX_PACKET_SIZE, MIN_PACKET_SIZE, is_valid_ip_packet};
pub use queue::{BUFFER_SIZE, EgressQueue, IngressQueue, QUEUE_SIZE};
