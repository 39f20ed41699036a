//! Resumable dialogs for Relay bots.
//!
//! A [`DialogSet`] drives a conversation's persisted dialog stack one turn at a time.
//! Waterfalls, prompts and answer dialogs are provided; anything implementing [`Dialog`]
//! can be pushed onto the stack.
pub mod answer;
pub mod context;
pub mod dialog;
pub mod prompts;
pub mod services;
pub mod set;
pub mod waterfall;

pub use answer::*;
pub use context::*;
pub use dialog::*;
pub use prompts::*;
pub use services::*;
pub use set::*;
pub use waterfall::*;
