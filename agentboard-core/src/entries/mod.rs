//! Entry aggregation
//!
//! Dispatched events become two ordered views per task: a flat log line
//! sequence and a merged chat/tool timeline where the begin and end frames
//! of one tool invocation share a single card.

mod store;
mod timeline;

pub use store::EntryStore;
pub use timeline::{merge_chat_message, merge_tool_activity, MergeOutcome};
