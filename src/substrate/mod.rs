//! Shared substrate binding
//!
//! Uses Yrs (Yjs port) for conflict-free replicated data types. Each logical
//! room is one Yrs document; replicas exchange binary v1 updates through a
//! relay.

pub mod hub;
pub mod presence;
pub mod room;
pub mod transport;
pub mod wire;

pub use hub::{Hub, RelayEvent, RelayRoom};
pub use presence::{Presence, PresenceEvent, PresenceState};
pub use room::SharedRoom;
pub use transport::{ConnectionStatus, Connector, LocalConnector, RoomConnection, WsConnector};
