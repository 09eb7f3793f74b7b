//! Terminal output for the `stagebuild` commands.
//!
//! Status lines carry a colored marker. Success and info lines go to stdout,
//! warnings and errors to stderr alongside the tracing log.

use std::time::Duration;

use owo_colors::{OwoColorize, Stream};

/// Kind of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  Success,
  Error,
  Warning,
  Info,
}

impl Status {
  pub fn marker(self) -> &'static str {
    match self {
      Status::Success => "✓",
      Status::Error => "✗",
      Status::Warning => "⚠",
      Status::Info => "•",
    }
  }

  fn to_stderr(self) -> bool {
    matches!(self, Status::Error | Status::Warning)
  }

  fn paint(self, text: &str) -> String {
    let stream = if self.to_stderr() { Stream::Stderr } else { Stream::Stdout };
    match self {
      Status::Success => text.if_supports_color(stream, |s| s.green()).to_string(),
      Status::Error => text.if_supports_color(stream, |s| s.red()).to_string(),
      Status::Warning => text.if_supports_color(stream, |s| s.yellow()).to_string(),
      Status::Info => text.if_supports_color(stream, |s| s.blue()).to_string(),
    }
  }
}

/// Print `message` behind the marker for `status`. Errors and warnings are
/// colored in full.
pub fn print_status(status: Status, message: &str) {
  let marker = status.paint(status.marker());
  if status.to_stderr() {
    eprintln!("{marker} {}", status.paint(message));
  } else {
    println!("{marker} {message}");
  }
}

/// An indented `label: value` line under a status line.
pub fn print_field(label: &str, value: &str) {
  println!("  {}: {value}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()));
}

/// `[2/4] libevent: building`, with a 0-based `index`.
pub fn format_progress(index: usize, total: usize, key: &str, action: &str) -> String {
  format!("[{}/{total}] {key}: {action}", index + 1)
}

pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

  if bytes < 1024 {
    return format!("{bytes} B");
  }

  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit + 1 < UNITS.len() {
    value /= 1024.0;
    unit += 1;
  }
  format!("{value:.1} {}", UNITS[unit])
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  match secs {
    0 => format!("{}ms", duration.subsec_millis()),
    1..60 => format!("{secs}.{:02}s", duration.subsec_millis() / 10),
    60..3600 => format!("{}m {}s", secs / 60, secs % 60),
    _ => format!("{}h {}m", secs / 3600, secs % 3600 / 60),
  }
}
