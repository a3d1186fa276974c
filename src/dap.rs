//! Debug Adapter Protocol wire layer.
//!
//! ## Module Structure
//!
//! - `codec` - Content-Length framing over async byte streams
//! - `message` - Request/response/event envelopes and classification
//! - `types` - Typed request arguments and response/event bodies

mod codec;
mod message;
pub mod types;

pub use codec::{read_message, write_message};
pub use message::{Event, IncomingMessage, Request, Response};
