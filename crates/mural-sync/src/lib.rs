//! Mural Sync — client-side session, wire protocol, and transport

pub mod presence;
pub mod protocol;
pub mod session;
pub mod transport;


pub use presence::PresenceMap;
pub use protocol::{ClientMessage, PresenceState, ServerMessage};
pub use session::{SessionEvent, SyncSession};
pub use transport::{connect, Transport, TransportError};
