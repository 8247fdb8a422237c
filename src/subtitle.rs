use std::path::Path;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{Result, VadsrtError};

const BOM: char = '\u{feff}';

/// One subtitle entry.
///
/// `index` is informational only: it is rewritten on every serialization and
/// never trusted when parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    pub index: usize,
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
    pub translated_text: Option<String>,
}

impl Cue {
    pub fn new(start_sec: f64, end_sec: f64, text: impl Into<String>) -> Self {
        Self {
            index: 0,
            start_sec,
            end_sec,
            text: text.into(),
            translated_text: None,
        }
    }

    pub fn duration_sec(&self) -> f64 {
        (self.end_sec - self.start_sec).max(0.0)
    }

    /// Translated text when present, source text otherwise.
    pub fn display_text(&self) -> &str {
        self.translated_text.as_deref().unwrap_or(&self.text)
    }
}

/// Assign 1-based sequential indices.
pub fn renumber(cues: &mut [Cue]) {
    for (i, cue) in cues.iter_mut().enumerate() {
        cue.index = i + 1;
    }
}

/// Parse SRT text into cues.
pub fn parse(text: &str) -> Result<Vec<Cue>> {
    let text = text.strip_prefix(BOM).unwrap_or(text);
    let lines: Vec<&str> = text.lines().map(|l| l.trim_end()).collect();

    let mut cues = Vec::new();
    let mut last_number: Option<u64> = None;
    let mut i = 0;

    while i < lines.len() {
        if lines[i].trim().is_empty() {
            i += 1;
            continue;
        }

        let number_line = i + 1;
        let number: u64 = lines[i].trim().parse().map_err(|_| {
            VadsrtError::format(number_line, format!("expected cue number, found '{}'", lines[i]))
        })?;
        if let Some(previous) = last_number {
            if number <= previous {
                return Err(VadsrtError::format(
                    number_line,
                    format!("cue number {} does not follow {}", number, previous),
                ));
            }
        }
        last_number = Some(number);
        i += 1;

        let timing_line = i + 1;
        let timing = lines
            .get(i)
            .ok_or_else(|| VadsrtError::format(timing_line, "missing timecode line"))?;
        let (start_sec, end_sec) = parse_timing_line(timing)
            .map_err(|message| VadsrtError::format(timing_line, message))?;
        if end_sec < start_sec {
            return Err(VadsrtError::format(
                timing_line,
                format!("cue ends before it starts: '{}'", timing.trim()),
            ));
        }
        i += 1;

        let mut body = Vec::new();
        while i < lines.len() && !lines[i].trim().is_empty() {
            body.push(lines[i]);
            i += 1;
        }

        cues.push(Cue {
            index: cues.len() + 1,
            start_sec,
            end_sec,
            text: body.join("\n"),
            translated_text: None,
        });
    }

    debug!("Parsed {} cues", cues.len());
    Ok(cues)
}

/// Serialize cues using their source text.
pub fn format(cues: &[Cue]) -> String {
    render(cues, |cue| cue.text.as_str())
}

/// Serialize cues using the translated text where one exists.
pub fn format_translated(cues: &[Cue]) -> String {
    render(cues, Cue::display_text)
}

fn render<'a, F>(cues: &'a [Cue], text_of: F) -> String
where
    F: Fn(&'a Cue) -> &'a str,
{
    let mut srt_content = String::new();

    for (index, cue) in cues.iter().enumerate() {
        let body = text_of(cue)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        if index > 0 {
            srt_content.push('\n');
        }
        srt_content.push_str(&format!(
            "{}\n{} --> {}\n{}\n",
            index + 1,
            format_srt_time(cue.start_sec),
            format_srt_time(cue.end_sec),
            body
        ));
    }

    srt_content
}

/// Read and parse an SRT file.
pub async fn read_srt<P: AsRef<Path>>(path: P) -> Result<Vec<Cue>> {
    let path = path.as_ref();
    info!("Reading subtitles: {}", path.display());

    let content = fs::read_to_string(path)
        .await
        .map_err(|e| VadsrtError::io_at(path, e))?;
    parse(&content)
}

/// Write cues to an SRT file, creating parent directories as needed.
pub async fn write_srt<P: AsRef<Path>>(cues: &[Cue], output_path: P) -> Result<()> {
    write_content(&format(cues), output_path.as_ref()).await
}

/// Like [`write_srt`], with each cue's translation in place of its text.
pub async fn write_translated_srt<P: AsRef<Path>>(cues: &[Cue], output_path: P) -> Result<()> {
    write_content(&format_translated(cues), output_path.as_ref()).await
}

async fn write_content(content: &str, output_path: &Path) -> Result<()> {
    info!("Writing SRT file: {}", output_path.display());

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| VadsrtError::io_at(parent, e))?;
    }

    fs::write(output_path, content)
        .await
        .map_err(|e| VadsrtError::io_at(output_path, e))?;

    Ok(())
}

/// Format time in seconds to SRT time format (HH:MM:SS,mmm), truncating
/// below the millisecond.
pub fn format_srt_time(seconds: f64) -> String {
    let total_milliseconds = seconds_to_millis(seconds);
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Whole milliseconds as written to a timecode.
pub(crate) fn seconds_to_millis(seconds: f64) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    // 65.123 * 1000.0 lands a hair below 65123
    (seconds * 1000.0 + 1e-6).floor() as u64
}

/// Parse `HH:MM:SS,mmm` (a `.` separator is accepted too) into seconds.
pub fn parse_srt_time(value: &str) -> std::result::Result<f64, String> {
    let value = value.trim();
    let (hms, millis) = value
        .split_once(',')
        .or_else(|| value.split_once('.'))
        .ok_or_else(|| format!("missing milliseconds in '{}'", value))?;

    let parts: Vec<&str> = hms.split(':').collect();
    if parts.len() != 3 {
        return Err(format!("expected HH:MM:SS in '{}'", value));
    }

    let field = |s: &str, name: &str| -> std::result::Result<u64, String> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("bad {} in '{}'", name, value));
        }
        s.parse::<u64>().map_err(|_| format!("bad {} in '{}'", name, value))
    };

    let hours = field(parts[0], "hours")?;
    let minutes = field(parts[1], "minutes")?;
    let secs = field(parts[2], "seconds")?;
    if minutes >= 60 || secs >= 60 {
        return Err(format!("minutes/seconds out of range in '{}'", value));
    }
    if millis.len() != 3 {
        return Err(format!("expected three millisecond digits in '{}'", value));
    }
    let millis = field(millis, "milliseconds")?;

    let total_ms = ((hours * 60 + minutes) * 60 + secs) * 1000 + millis;
    Ok(total_ms as f64 / 1000.0)
}

fn parse_timing_line(line: &str) -> std::result::Result<(f64, f64), String> {
    let (start, rest) = line
        .split_once("-->")
        .ok_or_else(|| format!("missing '-->' in '{}'", line.trim()))?;
    // Position hints such as "X1:100 X2:200" may follow the end time
    let end = rest
        .split_whitespace()
        .next()
        .ok_or_else(|| format!("missing end time in '{}'", line.trim()))?;

    Ok((parse_srt_time(start)?, parse_srt_time(end)?))
}
