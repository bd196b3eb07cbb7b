//! Per-app in-memory channel/subscription state (`spec.md` §4.3) and the
//! personal-channel alias map (`spec.md` §3 "AliasMap").
//!
//! Everything here is pure data manipulation — no I/O, no locking (the
//! broker wraps one `ChannelStore` + `AliasMap` pair per app in a single
//! `RwLock`, per `spec.md` §5). All mutations pass through the methods
//! below so the invariants in `spec.md` §3 can be asserted centrally.

mod alias;
mod store;

pub use alias::AliasMap;
pub use store::{ChannelSnapshot, ChannelStore, JoinOutcome, LeaveOutcome, RecentEvent, StoreError};
