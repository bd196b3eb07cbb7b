//! Shared data model, error taxonomy and configuration for the Pushi broker.
//!
//! Every other crate in the workspace depends on this one for the
//! identifiers, wire types and error enums that cross crate boundaries.

pub mod channel;
pub mod config;
pub mod error;
pub mod ids;
pub mod model;
pub mod tracing_setup;

pub use channel::{ChannelKind, ChannelName};
pub use config::PushiConfig;
pub use error::{BrokerError, Result};
pub use ids::{AppId, AppKey, SocketId, UserId};
pub use model::{
    AdapterOverrides, App, ApnCredentials, ChannelData, Envelope, Event, MessageRecord,
    OutboundFrame, SubscriptionRecord, VapidCredentials,
};
pub use error::{AdapterError, RepositoryError};

/// Crate version, re-exported for diagnostics (`pusher:connection_established`
/// payloads do not carry it, but the HTTP `/health`-equivalent endpoint does).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
