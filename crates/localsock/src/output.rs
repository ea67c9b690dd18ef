use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

/// Bytes of received data shown in an event.
pub const PREVIEW_LIMIT: usize = 64;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    /// Received bytes only, written straight to stdout.
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One finished client session, as reported by `listen`.
#[derive(Debug, Serialize)]
pub struct ConnectionEvent {
    pub event: &'static str,
    pub transport: &'static str,
    pub path: String,
    pub sequence: u64,
    pub handle: isize,
    pub bytes_received: u64,
    pub preview: String,
    pub duration_ms: u128,
    pub timestamp: String,
}

impl ConnectionEvent {
    pub fn closed(transport: &'static str, path: String, sequence: u64, handle: isize) -> Self {
        Self {
            event: "connection_closed",
            transport,
            path,
            sequence,
            handle,
            bytes_received: 0,
            preview: String::new(),
            duration_ms: 0,
            timestamp: now_unix_seconds(),
        }
    }
}

pub fn render_json(event: &ConnectionEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string())
}

pub fn print_event(event: &ConnectionEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", render_json(event)),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "TRANSPORT", "HANDLE", "BYTES", "MS", "PREVIEW"])
                .add_row(vec![
                    event.sequence.to_string(),
                    event.transport.to_string(),
                    event.handle.to_string(),
                    event.bytes_received.to_string(),
                    event.duration_ms.to_string(),
                    event.preview.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "#{} transport={} handle={} bytes={} duration={}ms preview={}",
                event.sequence,
                event.transport,
                event.handle,
                event.bytes_received,
                event.duration_ms,
                event.preview
            );
        }
        // Payload already streamed by the caller.
        OutputFormat::Raw => {}
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn payload_preview(payload: &[u8]) -> String {
    let shown = &payload[..payload.len().min(PREVIEW_LIMIT)];
    match std::str::from_utf8(shown) {
        Ok(text) if shown.len() < payload.len() => format!("{text}..."),
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_text() {
        let text = "x".repeat(PREVIEW_LIMIT + 10);
        let preview = payload_preview(text.as_bytes());
        assert_eq!(preview.len(), PREVIEW_LIMIT + 3);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn preview_marks_binary() {
        assert_eq!(payload_preview(&[0xff, 0xfe]), "<binary 2 bytes>");
    }

    #[test]
    fn json_event_carries_counts() {
        let mut event = ConnectionEvent::closed("unix-domain-socket", "/tmp/a.sock".into(), 2, 7);
        event.bytes_received = 5;
        let value: serde_json::Value =
            serde_json::from_str(&render_json(&event)).expect("event should be json");
        assert_eq!(value["event"], "connection_closed");
        assert_eq!(value["sequence"], 2);
        assert_eq!(value["bytes_received"], 5);
    }
}
