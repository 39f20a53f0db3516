//! Merge rules for the chat/tool timeline.

use crate::types::{ChatEntry, ChatMessage, ChatRole, ToolActivity, ToolStatus};

/// How an incoming event changed the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Appended,
    /// An existing entry at this index was replaced in place
    Replaced(usize),
    /// Duplicate delivery; the timeline is unchanged
    Skipped,
}

/// Merge a tool activity into the timeline.
///
/// An activity with a non-empty id replaces the tool entry carrying the same
/// id. The replacement takes the new status, keeps the earlier name unless
/// the new one is non-empty, and keeps the earlier summary unless the new
/// status is `error` or the earlier summary was empty. Activities with an
/// empty id, or an id not seen yet, are appended.
pub fn merge_tool_activity(timeline: &mut Vec<ChatEntry>, activity: ToolActivity) -> MergeOutcome {
    if !activity.id.is_empty() {
        let existing = timeline.iter().position(|entry| {
            matches!(entry, ChatEntry::Tool(tool) if tool.id == activity.id)
        });

        if let Some(index) = existing {
            if let ChatEntry::Tool(previous) = &timeline[index] {
                let merged = merge_tool(previous, activity);
                timeline[index] = ChatEntry::Tool(merged);
                return MergeOutcome::Replaced(index);
            }
        }
    }

    timeline.push(ChatEntry::Tool(activity));
    MergeOutcome::Appended
}

fn merge_tool(previous: &ToolActivity, next: ToolActivity) -> ToolActivity {
    let name = if next.name.is_empty() {
        previous.name.clone()
    } else {
        next.name
    };

    let surface_failure = next.status == ToolStatus::Error && !next.summary.is_empty();
    let summary = if surface_failure || previous.summary.is_empty() {
        next.summary
    } else {
        previous.summary.clone()
    };

    ToolActivity {
        id: next.id,
        name,
        summary,
        status: next.status,
        timestamp: previous.timestamp,
    }
}

/// Merge a chat message into the timeline.
///
/// A message whose non-empty id is already present is a redelivery and is
/// skipped. A `user` message confirms the oldest pending optimistic entry
/// with the same content, replacing it in place.
pub fn merge_chat_message(timeline: &mut Vec<ChatEntry>, message: ChatMessage) -> MergeOutcome {
    if !message.id.is_empty()
        && timeline.iter().any(|entry| {
            matches!(entry, ChatEntry::Message(existing) if existing.id == message.id)
        })
    {
        return MergeOutcome::Skipped;
    }

    if message.role == ChatRole::User {
        let pending = timeline.iter().position(|entry| {
            matches!(
                entry,
                ChatEntry::Message(existing)
                    if existing.pending && existing.content == message.content
            )
        });
        if let Some(index) = pending {
            timeline[index] = ChatEntry::Message(message);
            return MergeOutcome::Replaced(index);
        }
    }

    timeline.push(ChatEntry::Message(message));
    MergeOutcome::Appended
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tool(id: &str, name: &str, summary: &str, status: ToolStatus) -> ToolActivity {
        ToolActivity {
            id: id.to_string(),
            name: name.to_string(),
            summary: summary.to_string(),
            status,
            timestamp: Utc::now(),
        }
    }

    fn message(id: &str, role: ChatRole, content: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            pending: false,
        }
    }

    fn only_tool(timeline: &[ChatEntry]) -> &ToolActivity {
        assert_eq!(timeline.len(), 1);
        match &timeline[0] {
            ChatEntry::Tool(tool) => tool,
            other => panic!("expected tool entry, got {:?}", other),
        }
    }

    #[test]
    fn test_begin_and_end_merge_into_one_card() {
        let mut timeline = Vec::new();
        assert_eq!(
            merge_tool_activity(&mut timeline, tool("a", "read", "", ToolStatus::Running)),
            MergeOutcome::Appended
        );
        assert_eq!(
            merge_tool_activity(&mut timeline, tool("a", "", "done", ToolStatus::Completed)),
            MergeOutcome::Replaced(0)
        );

        let merged = only_tool(&timeline);
        assert_eq!(merged.status, ToolStatus::Completed);
        assert_eq!(merged.name, "read");
        assert_eq!(merged.summary, "done");
    }

    #[test]
    fn test_original_summary_kept_unless_error() {
        let mut timeline = Vec::new();
        merge_tool_activity(&mut timeline, tool("a", "edit", "src/lib.rs", ToolStatus::Running));
        merge_tool_activity(&mut timeline, tool("a", "", "wrote 3 lines", ToolStatus::Completed));
        assert_eq!(only_tool(&timeline).summary, "src/lib.rs");

        merge_tool_activity(&mut timeline, tool("a", "", "permission denied", ToolStatus::Error));
        let merged = only_tool(&timeline);
        assert_eq!(merged.summary, "permission denied");
        assert_eq!(merged.status, ToolStatus::Error);
    }

    #[test]
    fn test_new_name_wins_when_present() {
        let mut timeline = Vec::new();
        merge_tool_activity(&mut timeline, tool("a", "read", "", ToolStatus::Running));
        merge_tool_activity(&mut timeline, tool("a", "read_file", "", ToolStatus::Completed));
        assert_eq!(only_tool(&timeline).name, "read_file");
    }

    #[test]
    fn test_same_id_sequence_leaves_one_entry_with_last_status() {
        let statuses = [
            ToolStatus::Running,
            ToolStatus::Running,
            ToolStatus::Error,
            ToolStatus::Completed,
        ];
        let mut timeline = Vec::new();
        for status in statuses {
            merge_tool_activity(&mut timeline, tool("x", "bash", "", status));
        }
        assert_eq!(only_tool(&timeline).status, ToolStatus::Completed);
    }

    #[test]
    fn test_empty_ids_never_merge() {
        let mut timeline = Vec::new();
        for _ in 0..4 {
            merge_tool_activity(&mut timeline, tool("", "bash", "ls", ToolStatus::Completed));
        }
        assert_eq!(timeline.len(), 4);
    }

    #[test]
    fn test_tool_id_does_not_match_message_id() {
        let mut timeline = vec![ChatEntry::Message(message("a", ChatRole::Assistant, "hi"))];
        merge_tool_activity(&mut timeline, tool("a", "read", "", ToolStatus::Running));
        assert_eq!(timeline.len(), 2);
    }

    #[test]
    fn test_merge_keeps_position() {
        let mut timeline = Vec::new();
        merge_tool_activity(&mut timeline, tool("a", "read", "", ToolStatus::Running));
        merge_chat_message(&mut timeline, message("m1", ChatRole::Assistant, "reading"));
        merge_tool_activity(&mut timeline, tool("a", "", "", ToolStatus::Completed));

        assert_eq!(timeline.len(), 2);
        assert!(matches!(&timeline[0], ChatEntry::Tool(t) if t.status == ToolStatus::Completed));
    }

    #[test]
    fn test_redelivered_message_is_skipped() {
        let mut timeline = Vec::new();
        merge_chat_message(&mut timeline, message("m1", ChatRole::Assistant, "hi"));
        assert_eq!(
            merge_chat_message(&mut timeline, message("m1", ChatRole::Assistant, "hi")),
            MergeOutcome::Skipped
        );
        assert_eq!(timeline.len(), 1);

        merge_chat_message(&mut timeline, message("", ChatRole::System, "note"));
        merge_chat_message(&mut timeline, message("", ChatRole::System, "note"));
        assert_eq!(timeline.len(), 3);
    }

    #[test]
    fn test_user_echo_confirms_pending_entry() {
        let mut timeline = Vec::new();
        let mut optimistic = message("local-1", ChatRole::User, "use tabs");
        optimistic.pending = true;
        timeline.push(ChatEntry::Message(optimistic));
        merge_chat_message(&mut timeline, message("m2", ChatRole::Assistant, "ok"));

        let outcome = merge_chat_message(&mut timeline, message("srv-9", ChatRole::User, "use tabs"));
        assert_eq!(outcome, MergeOutcome::Replaced(0));
        assert_eq!(timeline.len(), 2);
        match &timeline[0] {
            ChatEntry::Message(confirmed) => {
                assert_eq!(confirmed.id, "srv-9");
                assert!(!confirmed.pending);
            }
            other => panic!("expected message, got {:?}", other),
        }
    }
}
