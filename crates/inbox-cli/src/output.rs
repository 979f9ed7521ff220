//! Output formatting for the CLI.

use clap::ValueEnum;
use inbox_sync_engine::InboxSnapshot;
use inbox_types::Notification;
use serde::Serialize;

/// Output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Serialize)]
struct SnapshotView<'a> {
    unread_count: u32,
    has_more: bool,
    is_loading: bool,
    stream_state: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    notifications: &'a [Notification],
}

/// Print the inbox in the specified format.
pub fn print_snapshot(snapshot: &InboxSnapshot, format: &OutputFormat) {
    match format {
        OutputFormat::Text => {
            print_heading(&format!(
                "Inbox ({} unread, stream {})",
                snapshot.unread_count, snapshot.stream_state
            ));
            if let Some(error) = &snapshot.error {
                print_row("error", error);
            }
            for notification in &snapshot.notifications {
                print_notification(notification);
            }
            if snapshot.has_more {
                println!("  ...");
            }
        }
        OutputFormat::Json => {
            let view = SnapshotView {
                unread_count: snapshot.unread_count,
                has_more: snapshot.has_more,
                is_loading: snapshot.is_loading,
                stream_state: snapshot.stream_state.as_str(),
                error: snapshot.error.as_deref(),
                notifications: &snapshot.notifications,
            };
            // One object per line so `watch` output can be piped.
            if let Ok(json) = serde_json::to_string(&view) {
                println!("{}", json);
            }
        }
    }
}

fn print_notification(notification: &Notification) {
    let marker = if notification.is_read { ' ' } else { '*' };
    let batch = match notification.effective_batch_count() {
        1 => String::new(),
        n => format!(" (x{})", n),
    };
    println!(
        "{} {}  {}{}  {}",
        marker,
        notification.created_at.format("%Y-%m-%d %H:%M"),
        notification.title,
        batch,
        notification.id
    );
}

/// Print a success message.
pub fn print_success(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => println!("{}", message),
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "status": "success", "message": message }));
        }
    }
}

/// Print an error message.
pub fn print_error(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => eprintln!("Error: {}", message),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "status": "error", "message": message }));
        }
    }
}

fn print_row(label: &str, value: &str) {
    println!("  {:<16} {}", format!("{}:", label), value);
}

fn print_heading(text: &str) {
    println!("\n{}", text);
    println!("{}", "-".repeat(50));
}
