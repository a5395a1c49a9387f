pub mod codec;
mod engine;
mod error;
pub mod initiator;
pub mod responder;
mod state;
pub mod tls;

pub use engine::run_stream;
pub use error::Error;
pub use initiator::{Initiator, InitiatorOpts};
pub use responder::{Responder, ResponderOpts};
