pub mod config;
pub mod console;
pub mod dap;
pub mod error;
pub mod ops;
pub mod registry;
pub mod retry;
pub mod session;

#[cfg(test)]
mod testing;

pub use error::{BridgeError, BridgeResult};
pub use registry::{SessionInfo, SessionRegistry};
pub use session::{Deadline, SessionHandle};
