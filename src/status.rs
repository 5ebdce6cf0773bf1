use std::fmt;

/// Longest message the front panel display accepts.
pub const MAX_DISPLAY_CHARS: usize = 96;

pub const STARTING_LABEL: &str = "Starting!";
pub const FINISHED_LABEL: &str = "Finished!";

/// One status update, shown on the console and on the instrument display.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayMessage {
    label: &'static str,
    body: Option<String>,
}

impl DisplayMessage {
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Text for `DISP:TEXT`. A newline would end the SCPI message early, so
    /// the label is separated from the body by a space.
    pub fn device_text(&self) -> String {
        match &self.body {
            Some(body) => format!("{} {}", self.label, body),
            None => self.label.to_string(),
        }
    }

    /// Single terminal line with the display line breaks flattened.
    pub fn console_line(&self) -> String {
        self.to_string()
            .replace(['\n', '\r'], " ")
            .trim_end()
            .to_string()
    }
}

impl fmt::Display for DisplayMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            Some(body) => write!(f, "{}\n{}", self.label, body),
            None => write!(f, "{}", self.label),
        }
    }
}

/// `m:ss`, minutes unpadded.
pub fn format_clock(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Stage label plus a clock and the current output values. The clock is
/// the time left in the stage, or the time since finishing once idle.
pub fn status(label: &'static str, clock_seconds: u64, frequency: f64, amplitude: f64) -> DisplayMessage {
    let body = format!(
        "{}\r{:4.2} Hz | {:4.2} Vp  ",
        format_clock(clock_seconds),
        frequency,
        amplitude
    );
    let room = MAX_DISPLAY_CHARS.saturating_sub(label.chars().count() + 1);
    DisplayMessage {
        label,
        body: Some(body.chars().take(room).collect()),
    }
}

/// Label-only message, used for the start and finish banners.
pub fn banner(label: &'static str) -> DisplayMessage {
    DisplayMessage { label, body: None }
}
