//! Relay core contracts.
//!
//! This crate owns the activity model exchanged between bots and channels, the per-turn
//! [`TurnContext`], the middleware chain wrapped around a [`Bot`], and the adapters that
//! deliver outbound activities directly ([`ConnectorAdapter`]) or buffer them for a
//! scale-out worker ([`BufferedAdapter`]).
pub mod activity;
pub mod adapter;
pub mod claims;
pub mod connector;
pub mod context;
pub mod error;
pub mod locks;
pub mod middleware;
pub mod reference;
pub mod router;
pub mod subjects;
pub mod translation;
pub mod validate;

pub use activity::*;
pub use adapter::*;
pub use claims::*;
pub use connector::*;
pub use context::*;
pub use error::*;
pub use locks::*;
pub use middleware::*;
pub use reference::*;
pub use router::*;
pub use subjects::*;
pub use translation::*;
pub use validate::*;
