use std::{
    fmt::Display,
    io::Write,
    sync::{LazyLock, RwLock},
};

use chrono::DateTime;
use droidrepo_core::{error::ErrorContext, CoreResult};
use nu_ansi_term::Color;

pub static COLOR: LazyLock<RwLock<bool>> = LazyLock::new(|| RwLock::new(true));
pub static PROGRESS: LazyLock<RwLock<bool>> = LazyLock::new(|| RwLock::new(true));

pub fn progress_enabled() -> bool {
    *PROGRESS.read().unwrap_or_else(|e| e.into_inner())
}

pub fn set_color(enabled: bool) {
    *COLOR.write().unwrap_or_else(|e| e.into_inner()) = enabled;
}

pub fn set_progress(enabled: bool) {
    *PROGRESS.write().unwrap_or_else(|e| e.into_inner()) = enabled;
}

pub struct Colored<T: Display>(pub Color, pub T);

impl<T: Display> Display for Colored<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let color = COLOR.read().unwrap_or_else(|e| e.into_inner());
        if *color {
            write!(f, "{}", self.0.prefix())?;
            self.1.fmt(f)?;
            write!(f, "{}", self.0.suffix())
        } else {
            self.1.fmt(f)
        }
    }
}

pub fn interactive_ask(ques: &str) -> CoreResult<String> {
    print!("{ques}");

    std::io::stdout()
        .flush()
        .with_context(|| "flushing stdout stream".to_string())?;

    let mut response = String::new();
    std::io::stdin()
        .read_line(&mut response)
        .with_context(|| "reading input from stdin".to_string())?;

    Ok(response.trim().to_owned())
}

pub fn confirm_action(message: &str) -> CoreResult<bool> {
    let response = interactive_ask(&format!("{message} [y/N]: "))?;
    Ok(is_yes(&response))
}

fn is_yes(response: &str) -> bool {
    matches!(response.to_lowercase().as_str(), "y" | "yes")
}

/// Formats epoch milliseconds as a UTC date, `-` for unset values.
pub fn format_millis(millis: i64) -> String {
    if millis < 0 {
        return "-".to_string();
    }
    DateTime::from_timestamp_millis(millis)
        .map(|time| time.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y"));
        assert!(is_yes("YES"));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(-1), "-");
        assert_eq!(format_millis(0), "1970-01-01 00:00");
        assert_eq!(format_millis(1_700_000_000_000), "2023-11-14 22:13");
    }
}
