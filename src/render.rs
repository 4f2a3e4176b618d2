//! Terminal output for merged log records

use std::io::{self, Write};

use chrono::{Local, TimeZone};
use crossterm::style::{Color, Stylize};
use unicode_width::UnicodeWidthChar;

use cwtail_tail::{LogRecord, SourceError, SourceSpec, SourceWarning, WarningKind};

/// Width of one source slot in the indicator column
const SLOT_WIDTH: usize = 2;

/// Narrowest message column we wrap to
const MIN_MESSAGE_WIDTH: usize = 20;

/// Rate-limit warnings are only shown once they persist this long
const PERSISTENT_ATTEMPTS: u32 = 3;

/// Lambda runtime bookkeeping lines
pub fn is_metadata_line(message: &str) -> bool {
    ["START RequestId", "END RequestId", "REPORT RequestId"]
        .iter()
        .any(|marker| message.contains(marker))
}

/// User-facing text for a warning, or None if it should stay quiet
pub fn describe_warning(warning: &SourceWarning) -> Option<String> {
    let alias = &warning.alias;
    match &warning.kind {
        WarningKind::Retrying {
            error: SourceError::RateLimited,
            attempt,
            ..
        } if *attempt < PERSISTENT_ATTEMPTS => None,
        WarningKind::Retrying {
            error,
            attempt,
            retry_in,
        } => Some(format!(
            "{alias}: {error} (attempt {attempt}, retrying in {:.1}s)",
            retry_in.as_secs_f64()
        )),
        WarningKind::Failed(error) => Some(format!("{alias}: {error}; no longer tailing")),
        WarningKind::LateRecords { count } => Some(format!(
            "{alias}: skipped {count} record(s) older than output already shown"
        )),
    }
}

/// Prints records with a per-source indicator column
pub struct Renderer<W: Write> {
    out: W,
    aliases: Vec<String>,
    width: usize,
    color: bool,
    show_metadata: bool,
    last_alias: Option<String>,
}

impl Renderer<io::Stdout> {
    /// Render to stdout, sized to the terminal
    pub fn stdout(sources: &[SourceSpec], color: bool, show_metadata: bool) -> Self {
        let width = crossterm::terminal::size()
            .map(|(cols, _)| cols as usize)
            .unwrap_or(120);
        Self::new(io::stdout(), sources, width, color, show_metadata)
    }
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, sources: &[SourceSpec], width: usize, color: bool, show_metadata: bool) -> Self {
        Self {
            out,
            aliases: sources.iter().map(|s| s.alias.clone()).collect(),
            width,
            color,
            show_metadata,
            last_alias: None,
        }
    }

    fn multi_source(&self) -> bool {
        self.aliases.len() > 1
    }

    pub fn render_batch(&mut self, records: &[LogRecord]) -> io::Result<()> {
        for record in records {
            self.render_record(record)?;
        }
        self.out.flush()
    }

    pub fn render_record(&mut self, record: &LogRecord) -> io::Result<()> {
        if !self.show_metadata && is_metadata_line(&record.message) {
            return Ok(());
        }

        let index = self.aliases.iter().position(|a| *a == record.alias);
        if self.multi_source() && self.last_alias.as_deref() != Some(record.alias.as_str()) {
            self.divider(index)?;
            self.last_alias = Some(record.alias.clone());
        }

        let timestamp = Local
            .timestamp_millis_opt(record.timestamp_millis)
            .single()
            .map(|t| t.format("%y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| record.timestamp_millis.to_string());
        let stamp = format!("[{timestamp}] ");

        let indicator = self.indicator(index, &record.alias);
        let prefix_width = self.indicator_width(&record.alias) + stamp.chars().count();
        let message_width = self.width.saturating_sub(prefix_width).max(MIN_MESSAGE_WIDTH);

        let message = record.message.trim_end();
        for (i, chunk) in wrap(message, message_width).iter().enumerate() {
            let lead = if i == 0 {
                stamp.clone()
            } else {
                " ".repeat(stamp.chars().count())
            };
            let lead = if self.color {
                lead.with(Color::DarkGrey).to_string()
            } else {
                lead
            };
            writeln!(self.out, "{indicator}{lead}{chunk}")?;
        }
        Ok(())
    }

    /// Colored slot at the source's position, or `[alias] ` without color
    fn indicator(&self, index: Option<usize>, alias: &str) -> String {
        if !self.multi_source() {
            return String::new();
        }
        if !self.color {
            return format!("[{alias}] ");
        }

        let slots = self.aliases.len();
        let position = index.unwrap_or(0);
        let block = " ".repeat(SLOT_WIDTH).on(source_color(position)).to_string();
        format!(
            "{}{}{} ",
            " ".repeat(position * SLOT_WIDTH),
            block,
            " ".repeat((slots - position - 1) * SLOT_WIDTH)
        )
    }

    fn indicator_width(&self, alias: &str) -> usize {
        if !self.multi_source() {
            0
        } else if !self.color {
            alias.chars().count() + 3
        } else {
            self.aliases.len() * SLOT_WIDTH + 1
        }
    }

    fn divider(&mut self, index: Option<usize>) -> io::Result<()> {
        let rule = "─".repeat(self.width.saturating_sub(8).max(MIN_MESSAGE_WIDTH));
        if self.color {
            let marker = "  ".on(source_color(index.unwrap_or(0)));
            writeln!(self.out, "{marker}{}", rule.with(Color::DarkGrey))
        } else {
            writeln!(self.out, "{rule}")
        }
    }
}

/// 256-color palette entry for the n-th source
fn source_color(index: usize) -> Color {
    Color::AnsiValue(((index % 14) + 1) as u8)
}

/// Split text into lines no wider than `width` display columns
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for raw_line in text.split('\n') {
        let mut current = String::new();
        let mut used = 0;
        for ch in raw_line.chars() {
            let w = ch.width().unwrap_or(0);
            if used + w > width && !current.is_empty() {
                lines.push(std::mem::take(&mut current));
                used = 0;
            }
            current.push(ch);
            used += w;
        }
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn render(sources: &[SourceSpec], records: &[LogRecord], show_metadata: bool) -> String {
        let mut out = Vec::new();
        {
            let mut renderer = Renderer::new(&mut out, sources, 80, false, show_metadata);
            renderer.render_batch(records).unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_metadata_lines_hidden_by_default() {
        let sources = [SourceSpec::named("/aws/lambda/api")];
        let records = [
            LogRecord::new("/aws/lambda/api", 0, "START RequestId: abc"),
            LogRecord::new("/aws/lambda/api", 1, "hello"),
        ];

        let output = render(&sources, &records, false);
        assert!(!output.contains("START RequestId"));
        assert!(output.contains("hello"));

        let output = render(&sources, &records, true);
        assert!(output.contains("START RequestId"));
    }

    #[test]
    fn test_multi_source_shows_alias_and_divider() {
        let sources = [SourceSpec::new("api", "/a"), SourceSpec::new("worker", "/w")];
        let records = [
            LogRecord::new("/a", 0, "one").with_alias("api"),
            LogRecord::new("/w", 1, "two").with_alias("worker"),
        ];

        let output = render(&sources, &records, false);
        assert!(output.contains("[api] "));
        assert!(output.contains("[worker] "));
        assert!(output.contains('─'));
    }

    #[test]
    fn test_wrap_respects_width() {
        let lines = wrap("abcdefghij", 4);
        assert_eq!(lines, vec!["abcd", "efgh", "ij"]);
        // Wide characters take two columns
        assert_eq!(wrap("日本語", 4), vec!["日本", "語"]);
    }

    #[test]
    fn test_rate_limit_warning_quiet_until_persistent() {
        let warning = |attempt| SourceWarning {
            source_id: "/a".into(),
            alias: "api".into(),
            kind: WarningKind::Retrying {
                error: SourceError::RateLimited,
                attempt,
                retry_in: Duration::from_secs(2),
            },
        };
        assert!(describe_warning(&warning(1)).is_none());
        assert!(describe_warning(&warning(3)).unwrap().contains("attempt 3"));
    }

    #[test]
    fn test_failed_warning_always_shown() {
        let warning = SourceWarning {
            source_id: "/a".into(),
            alias: "api".into(),
            kind: WarningKind::Failed(SourceError::SourceNotFound("/a".into())),
        };
        assert!(describe_warning(&warning).unwrap().contains("no longer tailing"));
    }
}
