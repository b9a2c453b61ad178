//! Session relay
//!
//! Owns the table of client connections and drives each one through its
//! session state machine.
//!
//! # Module layout
//!
//! - `dispatcher` - the connection table and its transition function
//! - `error` - relay error types
//! - `events` - relay input events and the feeding handle
//! - `protocol` - client transport messages
//! - `state` - per-connection lifecycle states

mod dispatcher;
mod error;
mod events;
mod protocol;
mod state;

pub use dispatcher::{PartRouting, SessionRelay};
pub use error::{RelayError, RelayResult};
pub use events::{ConnectionId, RelayEvent, RelayHandle};
pub use protocol::{ClientEvent, ServerEvent};
pub use state::ConnectionState;
