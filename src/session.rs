//! Debug sessions over a backend connection.
//!
//! ## Module Structure
//!
//! - `transport` - Background read loop demultiplexing responses, events and errors
//! - `actor` - Per-session actor serving one request at a time, plus deadlines
//! - `backend` - Backend process ownership and connection setup

mod actor;
mod backend;
mod transport;

pub use actor::{Deadline, SessionHandle};
pub use backend::{
    BackendConnection, BackendProcess, Connector, DelveConnector, parse_listen_address,
};
pub use transport::{BoxedReader, BoxedWriter};
