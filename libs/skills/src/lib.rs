//! Skill forwarding between Relay bots.
//!
//! A root bot calls a skill through [`SkillDialog`], which posts activities with a
//! [`SkillClient`] under a conversation id minted by [`SkillConversationIdFactory`]. The
//! skill answers either inline (`expectReplies`) or by calling back into the root's
//! [`SkillHandler`]. A skill returns its result only through `endOfConversation`.
pub mod client;
pub mod config;
pub mod conversation_id;
pub mod dialog;
pub mod handler;

pub use client::*;
pub use config::*;
pub use conversation_id::*;
pub use dialog::*;
pub use handler::*;
