//! Terminal progress output.

use fleetroll_core::ProgressSink;

/// Prints one line per progress message.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalSink;

impl TerminalSink {
    fn line(kind: Kind, message: &str) -> String {
        match kind {
            Kind::Start => format!("\n{message}"),
            Kind::Progress => format!("  · {message}"),
            Kind::Success => format!("  ✓ {message}"),
            Kind::Failure => format!("  ✗ {message}"),
        }
    }
}

#[derive(Clone, Copy)]
enum Kind {
    Start,
    Progress,
    Success,
    Failure,
}

impl ProgressSink for TerminalSink {
    fn start(&self, title: &str) {
        println!("{}", Self::line(Kind::Start, title));
    }

    fn progress(&self, message: &str) {
        println!("{}", Self::line(Kind::Progress, message));
    }

    fn success(&self, message: &str) {
        println!("{}", Self::line(Kind::Success, message));
    }

    fn failure(&self, message: &str) {
        eprintln!("{}", Self::line(Kind::Failure, message));
    }
}
