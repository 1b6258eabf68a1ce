use console::style;

/// User-facing success/error/progress surfacing. Fire-and-forget; the
/// pipeline never relies on a return value.
#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink: Send + Sync {
    fn info(&self, message: &str);
    fn success(&self, message: &str);
    fn error(&self, message: &str);
}

/// Console implementation used by the CLI
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }
}

impl NotificationSink for ConsoleSink {
    fn info(&self, message: &str) {
        println!("{} {}", style("ℹ").blue(), message);
    }

    fn success(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
    }

    fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }
}

/// Silent sink for library callers that surface state themselves
#[derive(Debug, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn info(&self, _message: &str) {}
    fn success(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}
