//! WebSocket connection manager (`spec.md` §4.1, component C6): upgrade
//! handling, per-connection state machine, inbound dispatch to
//! [`pushi_broker::Broker`], and the enforcement limits around all of it.

pub mod limits;
pub mod router;
pub mod socket;

pub use limits::Limiters;
pub use router::{ws_router, WsState};
