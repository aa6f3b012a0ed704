//! Diagnostic capture pipeline.
//!
//! Driver debug callbacks are severity-filtered against the session's
//! verbosity, normalised and queued as [`DiagnosticRecord`]s. Records are only
//! materialised when the caller drains the queue.

use crate::error::QueueError;
use crate::queue::{MessageQueue, QueueConfig};
use log::warn;
use std::fmt;
use std::io::Write;

/// Severity of a driver diagnostic, ordered `Notification < Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Notification,
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn from_gl(value: u32) -> Option<Self> {
        match value {
            glow::DEBUG_SEVERITY_HIGH => Some(Severity::High),
            glow::DEBUG_SEVERITY_MEDIUM => Some(Severity::Medium),
            glow::DEBUG_SEVERITY_LOW => Some(Severity::Low),
            glow::DEBUG_SEVERITY_NOTIFICATION => Some(Severity::Notification),
            _ => None,
        }
    }

    pub fn to_gl(self) -> u32 {
        match self {
            Severity::High => glow::DEBUG_SEVERITY_HIGH,
            Severity::Medium => glow::DEBUG_SEVERITY_MEDIUM,
            Severity::Low => glow::DEBUG_SEVERITY_LOW,
            Severity::Notification => glow::DEBUG_SEVERITY_NOTIFICATION,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Severity::High => "GL_DEBUG_SEVERITY_HIGH",
            Severity::Medium => "GL_DEBUG_SEVERITY_MEDIUM",
            Severity::Low => "GL_DEBUG_SEVERITY_LOW",
            Severity::Notification => "GL_DEBUG_SEVERITY_NOTIFICATION",
        }
    }

    /// True when `self` is at least as severe as `threshold`.
    pub fn meets(self, threshold: Severity) -> bool {
        self >= threshold
    }
}

/// Minimum severity that gets queued; `None` discards everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verbosity(Option<Severity>);

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity(Some(Severity::Low))
    }
}

impl Verbosity {
    pub const NONE: Verbosity = Verbosity(None);

    pub fn at_least(severity: Severity) -> Self {
        Verbosity(Some(severity))
    }

    /// Builds a verbosity from a level 0..=4 (0 = nothing, 1 = high only,
    /// 4 = everything) or from a GL debug severity value.
    pub fn from_level(level: u32) -> Option<Self> {
        match level {
            0 => Some(Verbosity::NONE),
            1 => Some(Verbosity::at_least(Severity::High)),
            2 => Some(Verbosity::at_least(Severity::Medium)),
            3 => Some(Verbosity::at_least(Severity::Low)),
            4 => Some(Verbosity::at_least(Severity::Notification)),
            other => Severity::from_gl(other).map(Verbosity::at_least),
        }
    }

    pub fn threshold(self) -> Option<Severity> {
        self.0
    }

    pub fn accepts(self, severity: Severity) -> bool {
        self.0.is_some_and(|min| severity.meets(min))
    }
}

/// Origin of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Api,
    WindowSystem,
    ShaderCompiler,
    ThirdParty,
    Application,
    Other,
}

impl Source {
    pub fn from_gl(value: u32) -> Self {
        match value {
            glow::DEBUG_SOURCE_API => Source::Api,
            glow::DEBUG_SOURCE_WINDOW_SYSTEM => Source::WindowSystem,
            glow::DEBUG_SOURCE_SHADER_COMPILER => Source::ShaderCompiler,
            glow::DEBUG_SOURCE_THIRD_PARTY => Source::ThirdParty,
            glow::DEBUG_SOURCE_APPLICATION => Source::Application,
            _ => Source::Other,
        }
    }

    pub fn to_gl(self) -> u32 {
        match self {
            Source::Api => glow::DEBUG_SOURCE_API,
            Source::WindowSystem => glow::DEBUG_SOURCE_WINDOW_SYSTEM,
            Source::ShaderCompiler => glow::DEBUG_SOURCE_SHADER_COMPILER,
            Source::ThirdParty => glow::DEBUG_SOURCE_THIRD_PARTY,
            Source::Application => glow::DEBUG_SOURCE_APPLICATION,
            Source::Other => glow::DEBUG_SOURCE_OTHER,
        }
    }
}

/// Category of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugType {
    Error,
    DeprecatedBehavior,
    UndefinedBehavior,
    Portability,
    Performance,
    Marker,
    PushGroup,
    PopGroup,
    Other,
}

impl DebugType {
    pub fn from_gl(value: u32) -> Self {
        match value {
            glow::DEBUG_TYPE_ERROR => DebugType::Error,
            glow::DEBUG_TYPE_DEPRECATED_BEHAVIOR => DebugType::DeprecatedBehavior,
            glow::DEBUG_TYPE_UNDEFINED_BEHAVIOR => DebugType::UndefinedBehavior,
            glow::DEBUG_TYPE_PORTABILITY => DebugType::Portability,
            glow::DEBUG_TYPE_PERFORMANCE => DebugType::Performance,
            glow::DEBUG_TYPE_MARKER => DebugType::Marker,
            glow::DEBUG_TYPE_PUSH_GROUP => DebugType::PushGroup,
            glow::DEBUG_TYPE_POP_GROUP => DebugType::PopGroup,
            _ => DebugType::Other,
        }
    }

    pub fn to_gl(self) -> u32 {
        match self {
            DebugType::Error => glow::DEBUG_TYPE_ERROR,
            DebugType::DeprecatedBehavior => glow::DEBUG_TYPE_DEPRECATED_BEHAVIOR,
            DebugType::UndefinedBehavior => glow::DEBUG_TYPE_UNDEFINED_BEHAVIOR,
            DebugType::Portability => glow::DEBUG_TYPE_PORTABILITY,
            DebugType::Performance => glow::DEBUG_TYPE_PERFORMANCE,
            DebugType::Marker => glow::DEBUG_TYPE_MARKER,
            DebugType::PushGroup => glow::DEBUG_TYPE_PUSH_GROUP,
            DebugType::PopGroup => glow::DEBUG_TYPE_POP_GROUP,
            DebugType::Other => glow::DEBUG_TYPE_OTHER,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DebugType::Error => "GL_DEBUG_TYPE_ERROR",
            DebugType::DeprecatedBehavior => "GL_DEBUG_TYPE_DEPRECATED_BEHAVIOR",
            DebugType::UndefinedBehavior => "GL_DEBUG_TYPE_UNDEFINED_BEHAVIOR",
            DebugType::Portability => "GL_DEBUG_TYPE_PORTABILITY",
            DebugType::Performance => "GL_DEBUG_TYPE_PERFORMANCE",
            DebugType::Marker => "GL_DEBUG_TYPE_MARKER",
            DebugType::PushGroup => "GL_DEBUG_TYPE_PUSH_GROUP",
            DebugType::PopGroup => "GL_DEBUG_TYPE_POP_GROUP",
            DebugType::Other => "GL_DEBUG_TYPE_OTHER",
        }
    }
}

/// One queued driver diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticRecord {
    /// Session-scoped sequence number assigned on capture.
    pub seq: u64,
    pub message: String,
    pub source: Source,
    pub kind: DebugType,
    /// Identifier assigned by the driver.
    pub id: u32,
    pub severity: Severity,
}

impl fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GL error #{}: {} (0x{:X}), severity: {} (0x{:X}), message = {}",
            self.seq,
            self.kind.name(),
            self.kind.to_gl(),
            self.severity.name(),
            self.severity.to_gl(),
            self.message
        )
    }
}

/// Strips one trailing newline and anything from the first NUL on.
fn normalize_message(message: &str) -> String {
    let message = message.split('\0').next().unwrap_or_default();
    message
        .strip_suffix('\n')
        .unwrap_or(message)
        .to_string()
}

/// Severity-filtering sink for driver debug callbacks.
#[derive(Debug)]
pub struct DiagnosticCapture {
    queue: MessageQueue<DiagnosticRecord>,
    verbosity: Verbosity,
    total: u64,
    /// Sequence number of the first record this capture accepts.
    first_seq: u64,
}

impl DiagnosticCapture {
    pub fn new(capacity: usize, verbosity: Verbosity) -> Self {
        Self::with_config(capacity, QueueConfig::default(), verbosity)
    }

    pub fn with_config(capacity: usize, config: QueueConfig, verbosity: Verbosity) -> Self {
        Self {
            queue: MessageQueue::with_config(capacity, config),
            verbosity,
            total: 0,
            first_seq: 0,
        }
    }

    /// Numbers records from `first` on, so ids stay monotonic across captures.
    pub fn with_first_seq(mut self, first: u64) -> Self {
        self.first_seq = first;
        self
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.verbosity = verbosity;
    }

    /// Total number of accepted diagnostics since creation.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of records waiting to be drained.
    pub fn pending(&self) -> usize {
        self.queue.size()
    }

    /// Record at position `i` from the front, without removing it.
    pub fn peek(&self, i: usize) -> Option<&DiagnosticRecord> {
        self.queue.peek(i)
    }

    /// Handles one driver callback with raw GL enum values.
    pub fn on_driver_message(&mut self, source: u32, kind: u32, id: u32, severity: u32, message: &str) {
        // Unknown severities cannot be ordered against the threshold.
        let Some(severity) = Severity::from_gl(severity) else {
            return;
        };
        self.capture(
            Source::from_gl(source),
            DebugType::from_gl(kind),
            id,
            severity,
            message,
        );
    }

    /// Filters, normalises and queues one message. Returns true if accepted.
    ///
    /// The total counter advances for every accepted message, even if the
    /// queue itself refuses the record.
    pub fn capture(
        &mut self,
        source: Source,
        kind: DebugType,
        id: u32,
        severity: Severity,
        message: &str,
    ) -> bool {
        if !self.verbosity.accepts(severity) {
            return false;
        }
        let record = DiagnosticRecord {
            seq: self.first_seq + self.total,
            message: normalize_message(message),
            source,
            kind,
            id,
            severity,
        };
        self.total += 1;
        if let Err(e) = self.queue.push(record) {
            warn!("dropping diagnostic #{}: {}", self.first_seq + self.total - 1, e);
        }
        true
    }

    /// Splits a compile or link log into one high-severity error record per line.
    /// Returns the number of records accepted.
    pub fn capture_log(&mut self, source: Source, log: &str) -> usize {
        log.lines()
            .map(|line| line.trim_end_matches('\0'))
            .filter(|line| !line.trim().is_empty())
            .filter(|line| self.capture(source, DebugType::Error, 0, Severity::High, line))
            .count()
    }

    /// Pops the oldest record.
    pub fn pop(&mut self) -> Option<DiagnosticRecord> {
        self.queue.pop()
    }

    /// Releases every queued record, returning how many were dropped.
    pub fn drain(&mut self) -> usize {
        std::iter::from_fn(|| self.queue.pop()).count()
    }

    /// Pops every queued record and writes one line per record to `sink`.
    ///
    /// # Errors
    ///
    /// Stops at the first write error; records not yet written stay queued.
    pub fn drain_to<W: Write + ?Sized>(&mut self, sink: &mut W) -> std::io::Result<usize> {
        let mut drained = 0;
        while let Some(record) = self.queue.peek(0) {
            writeln!(sink, "{}", record)?;
            self.queue.pop();
            drained += 1;
        }
        Ok(drained)
    }

    /// Pops every queued record into a vector.
    pub fn drain_records(&mut self) -> Vec<DiagnosticRecord> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    /// Pushes a record directly, bypassing the verbosity filter.
    pub fn push_record(&mut self, record: DiagnosticRecord) -> Result<(), QueueError> {
        self.queue.push(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture_at(level: u32) -> DiagnosticCapture {
        DiagnosticCapture::new(8, Verbosity::from_level(level).unwrap())
    }

    #[test]
    fn test_severity_total_order() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Notification);
        assert!(Severity::Medium.meets(Severity::Medium));
        assert!(!Severity::Low.meets(Severity::Medium));
    }

    #[test]
    fn test_severity_gl_values() {
        for sev in [
            Severity::High,
            Severity::Medium,
            Severity::Low,
            Severity::Notification,
        ] {
            assert_eq!(Severity::from_gl(sev.to_gl()), Some(sev));
        }
        assert_eq!(Severity::from_gl(0), None);
    }

    #[test]
    fn test_verbosity_levels() {
        assert!(!Verbosity::from_level(0).unwrap().accepts(Severity::High));
        let high_only = Verbosity::from_level(1).unwrap();
        assert!(high_only.accepts(Severity::High));
        assert!(!high_only.accepts(Severity::Medium));
        let all = Verbosity::from_level(4).unwrap();
        assert!(all.accepts(Severity::Notification));
        assert_eq!(Verbosity::default(), Verbosity::from_level(3).unwrap());
        assert_eq!(
            Verbosity::from_level(glow::DEBUG_SEVERITY_MEDIUM),
            Some(Verbosity::at_least(Severity::Medium))
        );
        assert_eq!(Verbosity::from_level(5), None);
    }

    #[test]
    fn test_below_threshold_never_drained() {
        let mut capture = capture_at(2);
        assert!(!capture.capture(Source::Api, DebugType::Performance, 7, Severity::Low, "slow"));
        assert_eq!(capture.total(), 0);
        assert_eq!(capture.drain_records(), vec![]);
    }

    #[test]
    fn test_accepted_drained_exactly_once() {
        let mut capture = capture_at(2);
        assert!(capture.capture(Source::Api, DebugType::Error, 1, Severity::Medium, "bad enum\n"));
        let records = capture.drain_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "bad enum");
        assert_eq!(records[0].seq, 0);
        assert!(capture.drain_records().is_empty());
    }

    #[test]
    fn test_total_counts_every_accepted_message() {
        let mut capture = capture_at(4);
        capture.capture(Source::Api, DebugType::Other, 0, Severity::Notification, "a");
        assert_eq!(capture.drain(), 1);
        capture.capture(Source::Api, DebugType::Other, 0, Severity::High, "b");
        capture.capture(Source::Api, DebugType::Other, 0, Severity::Low, "c");
        assert_eq!(capture.total(), 3);
        let seqs: Vec<u64> = capture.drain_records().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn test_first_seq_offsets_ids_not_total() {
        let mut capture = DiagnosticCapture::new(4, Verbosity::default()).with_first_seq(5);
        capture.capture(Source::Api, DebugType::Error, 1, Severity::High, "a");
        capture.capture(Source::Api, DebugType::Error, 2, Severity::High, "b");
        assert_eq!(capture.total(), 2);
        let seqs: Vec<u64> = capture.drain_records().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![5, 6]);
    }

    #[test]
    fn test_total_advances_when_queue_refuses() {
        let mut capture =
            DiagnosticCapture::with_config(1, QueueConfig::fixed(), Verbosity::default());
        assert!(capture.capture(Source::Api, DebugType::Error, 0, Severity::High, "one"));
        assert!(capture.capture(Source::Api, DebugType::Error, 0, Severity::High, "two"));
        assert_eq!(capture.total(), 2);
        assert_eq!(capture.pending(), 1);
    }

    #[test]
    fn test_driver_message_raw_values() {
        let mut capture = capture_at(3);
        capture.on_driver_message(
            glow::DEBUG_SOURCE_API,
            glow::DEBUG_TYPE_ERROR,
            1281,
            glow::DEBUG_SEVERITY_HIGH,
            "GL_INVALID_VALUE",
        );
        capture.on_driver_message(glow::DEBUG_SOURCE_API, glow::DEBUG_TYPE_ERROR, 1, 0xdead, "x");
        let record = capture.pop().unwrap();
        assert_eq!(record.source, Source::Api);
        assert_eq!(record.kind, DebugType::Error);
        assert_eq!(record.id, 1281);
        assert!(capture.pop().is_none());
    }

    #[test]
    fn test_message_normalization() {
        assert_eq!(normalize_message("abc\n"), "abc");
        assert_eq!(normalize_message("abc"), "abc");
        assert_eq!(normalize_message("ab\0junk"), "ab");
        assert_eq!(normalize_message("a\n\n"), "a\n");
    }

    #[test]
    fn test_capture_log_splits_lines() {
        let mut capture = capture_at(1);
        let log = "0:3(1): error: syntax error\n0:4(2): error: undeclared\n\0";
        assert_eq!(capture.capture_log(Source::ShaderCompiler, log), 2);
        let records = capture.drain_records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.severity == Severity::High));
        assert!(records.iter().all(|r| r.source == Source::ShaderCompiler));
        assert_eq!(records[1].message, "0:4(2): error: undeclared");
    }

    #[test]
    fn test_capture_log_discarded_at_verbosity_zero() {
        let mut capture = capture_at(0);
        assert_eq!(capture.capture_log(Source::Application, "link failed"), 0);
        assert_eq!(capture.pending(), 0);
    }

    #[test]
    fn test_drain_to_format() {
        let mut capture = capture_at(3);
        capture.capture(Source::Api, DebugType::Error, 5, Severity::High, "boom");
        let mut out = Vec::new();
        assert_eq!(capture.drain_to(&mut out).unwrap(), 1);
        let line = String::from_utf8(out).unwrap();
        assert_eq!(
            line,
            "GL error #0: GL_DEBUG_TYPE_ERROR (0x824C), severity: GL_DEBUG_SEVERITY_HIGH (0x9146), message = boom\n"
        );
        assert_eq!(capture.pending(), 0);
    }
}
