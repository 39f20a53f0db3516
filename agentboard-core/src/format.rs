//! Formatting helpers shared across UIs.

use chrono::{DateTime, Utc};

use crate::status::TaskAction;
use crate::types::{ChatEntry, LogEntry, ToolStatus};

/// Format a timestamp as relative time (e.g., "2m ago").
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(ts);

    if duration.num_seconds() < 0 {
        "just now".to_string()
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        ts.format("%b %d").to_string()
    }
}

/// `12:04:31 [agent] message`
pub fn format_log_line(entry: &LogEntry) -> String {
    format!(
        "{} [{}] {}",
        entry.timestamp.format("%H:%M:%S"),
        entry.level,
        entry.message
    )
}

/// One timeline card on a single line.
pub fn format_timeline_entry(entry: &ChatEntry) -> String {
    match entry {
        ChatEntry::Message(message) => {
            let marker = if message.pending { " (sending)" } else { "" };
            format!("{}{}: {}", message.role.as_str(), marker, message.content)
        }
        ChatEntry::Tool(tool) => {
            let icon = match tool.status {
                ToolStatus::Running => "…",
                ToolStatus::Completed => "✓",
                ToolStatus::Error => "✗",
            };
            let name = if tool.name.is_empty() { "tool" } else { &tool.name };
            if tool.summary.is_empty() {
                format!("{} {}", icon, name)
            } else {
                format!("{} {}: {}", icon, name, tool.summary)
            }
        }
    }
}

/// Comma-separated action names, or `-` when none apply.
pub fn format_actions(actions: &[TaskAction]) -> String {
    if actions.is_empty() {
        return "-".to_string();
    }
    actions
        .iter()
        .map(TaskAction::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatMessage, ChatRole, LogLevel, ToolActivity};
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_relative_time_buckets() {
        let now = Utc::now();
        assert_eq!(format_relative_time(now + Duration::seconds(30)), "just now");
        assert_eq!(format_relative_time(now - Duration::minutes(5)), "5m ago");
        assert_eq!(format_relative_time(now - Duration::hours(3)), "3h ago");
    }

    #[test]
    fn test_log_line() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 5).unwrap();
        let entry = LogEntry::new(ts, LogLevel::Warn, "disk almost full", None);
        assert_eq!(format_log_line(&entry), "09:30:05 [warn] disk almost full");
    }

    #[test]
    fn test_timeline_entries() {
        let pending = ChatEntry::Message(ChatMessage {
            id: "local-1".to_string(),
            role: ChatRole::User,
            content: "rename the flag".to_string(),
            timestamp: Utc::now(),
            pending: true,
        });
        assert_eq!(format_timeline_entry(&pending), "user (sending): rename the flag");

        let tool = ChatEntry::Tool(ToolActivity {
            id: "a".to_string(),
            name: "bash".to_string(),
            summary: "cargo fmt".to_string(),
            status: ToolStatus::Completed,
            timestamp: Utc::now(),
        });
        assert_eq!(format_timeline_entry(&tool), "✓ bash: cargo fmt");
    }

    #[test]
    fn test_actions_list() {
        assert_eq!(format_actions(&[]), "-");
        assert_eq!(
            format_actions(&[TaskAction::Retry, TaskAction::StartFresh]),
            "retry, start_fresh"
        );
    }
}
