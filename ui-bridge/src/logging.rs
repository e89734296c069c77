use owo_colors::{AnsiColors, OwoColorize};
use std::sync::OnceLock;
use supports_color::Stream;
use tracing_subscriber::EnvFilter;

static ANSI_ENABLED: OnceLock<bool> = OnceLock::new();

/// Installs the process-wide subscriber. Hosts that already installed one get an error
/// back and keep their own.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi_enabled())
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    Ok(())
}

/// Leading tag of every log line, one per subsystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Category {
    Access,
    Query,
    Proxy,
    Events,
    Server,
}

impl Category {
    fn label(self) -> &'static str {
        match self {
            Category::Access => "ACCESS",
            Category::Query => "QUERY",
            Category::Proxy => "PROXY",
            Category::Events => "EVENTS",
            Category::Server => "SERVER",
        }
    }

    fn color(self) -> AnsiColors {
        match self {
            Category::Access => AnsiColors::BrightCyan,
            Category::Query => AnsiColors::BrightGreen,
            Category::Proxy => AnsiColors::BrightBlue,
            Category::Events => AnsiColors::BrightMagenta,
            Category::Server => AnsiColors::BrightYellow,
        }
    }

    fn render(self) -> String {
        if ansi_enabled() {
            format!("{}", self.label().color(self.color()).bold())
        } else {
            self.label().to_string()
        }
    }
}

pub fn category_access() -> String {
    Category::Access.render()
}

pub fn category_query() -> String {
    Category::Query.render()
}

pub fn category_proxy() -> String {
    Category::Proxy.render()
}

pub fn category_events() -> String {
    Category::Events.render()
}

pub fn category_server() -> String {
    Category::Server.render()
}

/// The router only answers GET and POST; anything else falls through as GET-coloured.
pub fn method_label(method: &str) -> String {
    let color = if method == "POST" {
        AnsiColors::BrightGreen
    } else {
        AnsiColors::BrightBlue
    };
    paint(method, color)
}

pub fn status_label(status: u16) -> String {
    paint(&status.to_string(), status_color(status))
}

fn status_color(status: u16) -> AnsiColors {
    match status / 100 {
        2 => AnsiColors::BrightGreen,
        3 => AnsiColors::BrightCyan,
        4 => AnsiColors::BrightYellow,
        _ => AnsiColors::BrightRed,
    }
}

fn paint(text: &str, color: AnsiColors) -> String {
    if ansi_enabled() {
        format!("{}", text.color(color))
    } else {
        text.to_string()
    }
}

fn ansi_enabled() -> bool {
    *ANSI_ENABLED.get_or_init(detect_ansi)
}

fn detect_ansi() -> bool {
    ansi_choice(
        std::env::var_os("NO_COLOR").is_some(),
        std::env::var_os("FORCE_COLOR").is_some(),
        || {
            let windows_vt = enable_ansi_support().is_ok();
            windows_vt || supports_color::on_cached(Stream::Stdout).is_some()
        },
    )
}

/// `NO_COLOR` wins over `FORCE_COLOR`, which wins over terminal detection.
fn ansi_choice(no_color: bool, force_color: bool, terminal: impl FnOnce() -> bool) -> bool {
    if no_color {
        return false;
    }
    if force_color {
        let _ = enable_ansi_support();
        return true;
    }
    terminal()
}

#[cfg(windows)]
fn enable_ansi_support() -> windows::core::Result<()> {
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::Console::{
        ENABLE_VIRTUAL_TERMINAL_PROCESSING, GetConsoleMode, GetStdHandle, STD_OUTPUT_HANDLE,
        SetConsoleMode,
    };

    unsafe {
        let handle = GetStdHandle(STD_OUTPUT_HANDLE)?;
        if handle == HANDLE::default() {
            return Ok(());
        }

        let mut mode = std::mem::zeroed();
        GetConsoleMode(handle, &mut mode)?;
        SetConsoleMode(handle, mode | ENABLE_VIRTUAL_TERMINAL_PROCESSING)?;
        Ok(())
    }
}

#[cfg(not(windows))]
fn enable_ansi_support() -> Result<(), ()> {
    Err(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_color_beats_force_color_and_terminal() {
        assert!(!ansi_choice(true, true, || true));
        assert!(ansi_choice(false, true, || false));
        assert!(ansi_choice(false, false, || true));
        assert!(!ansi_choice(false, false, || false));
    }

    #[test]
    fn statuses_are_coloured_by_class() {
        assert_eq!(status_color(204), AnsiColors::BrightGreen);
        assert_eq!(status_color(307), AnsiColors::BrightCyan);
        assert_eq!(status_color(401), AnsiColors::BrightYellow);
        assert_eq!(status_color(500), AnsiColors::BrightRed);
        assert_eq!(status_color(101), AnsiColors::BrightRed);
    }

    #[test]
    fn categories_carry_subsystem_labels() {
        assert_eq!(Category::Query.label(), "QUERY");
        assert_eq!(Category::Events.label(), "EVENTS");
    }
}
