//! Output sinks for command results
//!
//! Handlers never print directly. They push messages into an [`OutputSink`]:
//! [`LineSink`] writes each message as soon as it arrives, which suits
//! scripts and journald; [`ProgressSink`] collects the steps of an operation
//! and prints them with a summary and any warnings once the command ends.

use std::io::{self, IsTerminal, Write};

use dnstm_core::Report;

pub trait OutputSink {
    /// One completed step of a longer operation
    fn step(&mut self, message: &str) -> io::Result<()>;

    /// Something that went wrong without failing the command
    fn warning(&mut self, message: &str) -> io::Result<()>;

    /// Final outcome of the command
    fn success(&mut self, message: &str) -> io::Result<()>;

    /// Preformatted text (tables, log tails) written as-is
    fn text(&mut self, text: &str) -> io::Result<()>;

    /// Flush anything buffered
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn report(&mut self, report: &Report) -> io::Result<()> {
        for warning in &report.warnings {
            self.warning(warning)?;
        }
        Ok(())
    }
}

/// Unbuffered sink, one line per message
pub struct LineSink<W: Write> {
    out: W,
}

impl<W: Write> LineSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> OutputSink for LineSink<W> {
    fn step(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.out, "{}", message)
    }

    fn warning(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.out, "warning: {}", message)
    }

    fn success(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.out, "{}", message)
    }

    fn text(&mut self, text: &str) -> io::Result<()> {
        write!(self.out, "{}", text)?;
        if !text.is_empty() && !text.ends_with('\n') {
            writeln!(self.out)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Interactive sink that prints a summary when the command finishes
pub struct ProgressSink<W: Write> {
    out: W,
    steps: Vec<String>,
    warnings: Vec<String>,
    summary: Option<String>,
}

impl<W: Write> ProgressSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            steps: Vec::new(),
            warnings: Vec::new(),
            summary: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> OutputSink for ProgressSink<W> {
    fn step(&mut self, message: &str) -> io::Result<()> {
        self.steps.push(message.to_string());
        Ok(())
    }

    fn warning(&mut self, message: &str) -> io::Result<()> {
        self.warnings.push(message.to_string());
        Ok(())
    }

    fn success(&mut self, message: &str) -> io::Result<()> {
        self.summary = Some(message.to_string());
        Ok(())
    }

    fn text(&mut self, text: &str) -> io::Result<()> {
        write!(self.out, "{}", text)?;
        if !text.is_empty() && !text.ends_with('\n') {
            writeln!(self.out)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        for step in self.steps.drain(..) {
            writeln!(self.out, "  • {}", step)?;
        }
        if let Some(summary) = self.summary.take() {
            writeln!(self.out, "✅ {}", summary)?;
        }
        if !self.warnings.is_empty() {
            writeln!(self.out)?;
            writeln!(self.out, "⚠️  {} warning(s):", self.warnings.len())?;
            for warning in self.warnings.drain(..) {
                writeln!(self.out, "    - {}", warning)?;
            }
        }
        self.out.flush()
    }
}

/// Sink for stdout: progress output on a terminal, plain lines otherwise
pub fn stdout_sink() -> Box<dyn OutputSink> {
    let stdout = io::stdout();
    if stdout.is_terminal() {
        Box::new(ProgressSink::new(stdout))
    } else {
        Box::new(LineSink::new(stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_line_sink_writes_immediately() {
        let mut sink = LineSink::new(Vec::new());
        sink.step("Stopped dnstm-alpha").unwrap();
        sink.warning("DNS router is not running").unwrap();
        sink.success("Switched to multi mode").unwrap();

        assert_eq!(
            output(sink.into_inner()),
            "Stopped dnstm-alpha\nwarning: DNS router is not running\nSwitched to multi mode\n"
        );
    }

    #[test]
    fn test_line_sink_terminates_text() {
        let mut sink = LineSink::new(Vec::new());
        sink.text("no newline").unwrap();
        sink.text("has newline\n").unwrap();
        sink.text("").unwrap();

        assert_eq!(output(sink.into_inner()), "no newline\nhas newline\n");
    }

    #[test]
    fn test_progress_sink_buffers_until_finish() {
        let mut sink = ProgressSink::new(Vec::new());
        sink.step("Stopped dnstm-alpha").unwrap();
        sink.success("Switched to multi mode").unwrap();
        assert!(sink.out.is_empty());

        sink.finish().unwrap();
        let text = output(sink.into_inner());
        assert_eq!(text, "  • Stopped dnstm-alpha\n✅ Switched to multi mode\n");
    }

    #[test]
    fn test_progress_sink_lists_warnings_after_summary() {
        let mut sink = ProgressSink::new(Vec::new());
        let mut report = Report::default();
        report.warnings.push("first".to_string());
        report.warnings.push("second".to_string());

        sink.report(&report).unwrap();
        sink.success("Started").unwrap();
        sink.finish().unwrap();

        let text = output(sink.into_inner());
        let summary = text.find("✅ Started").unwrap();
        let warnings = text.find("2 warning(s)").unwrap();
        assert!(summary < warnings);
        assert!(text.contains("    - first\n    - second\n"));
    }

    #[test]
    fn test_progress_sink_text_is_not_buffered() {
        let mut sink = ProgressSink::new(Vec::new());
        sink.text("Mode: single").unwrap();
        assert_eq!(output(sink.into_inner()), "Mode: single\n");
    }
}
