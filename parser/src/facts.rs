//! Per-file analysis results.
//!
//! A parse attempt produces exactly one [`StructuralFacts`]: the universal fields every
//! format reports plus the format-specific record in [`FormatFacts`]. The facts are
//! rendered to scalar metadata once and merged into every fragment from the file.

use crate::{LogFormat, MetaValue, Metadata, ParseError, Severity};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct StructuralFacts {
    pub format: LogFormat,
    pub parser: &'static str,
    pub file_size_mb: f64,
    pub severity: Severity,
    pub details: FormatFacts,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormatFacts {
    General(GeneralFacts),
    Anr(AnrFacts),
    Tombstone(TombstoneFacts),
}

impl FormatFacts {
    pub fn format(&self) -> LogFormat {
        match self {
            FormatFacts::General(_) => LogFormat::General,
            FormatFacts::Anr(_) => LogFormat::AndroidAnr,
            FormatFacts::Tombstone(_) => LogFormat::AndroidTombstone,
        }
    }
}

impl StructuralFacts {
    pub fn new(parser: &'static str, content: &str, severity: Severity, details: FormatFacts) -> Self {
        Self {
            format: details.format(),
            parser,
            file_size_mb: content.len() as f64 / (1024.0 * 1024.0),
            severity,
            details,
        }
    }

    pub fn general(&self) -> Result<&GeneralFacts, ParseError> {
        match &self.details {
            FormatFacts::General(facts) => Ok(facts),
            other => Err(self.mismatch(LogFormat::General, other)),
        }
    }

    pub fn anr(&self) -> Result<&AnrFacts, ParseError> {
        match &self.details {
            FormatFacts::Anr(facts) => Ok(facts),
            other => Err(self.mismatch(LogFormat::AndroidAnr, other)),
        }
    }

    pub fn tombstone(&self) -> Result<&TombstoneFacts, ParseError> {
        match &self.details {
            FormatFacts::Tombstone(facts) => Ok(facts),
            other => Err(self.mismatch(LogFormat::AndroidTombstone, other)),
        }
    }

    fn mismatch(&self, expected: LogFormat, found: &FormatFacts) -> ParseError {
        ParseError::FactsMismatch {
            expected,
            found: found.format(),
        }
    }

    /// Flattens the facts into scalar metadata. Nested counts become JSON text.
    pub fn to_metadata(&self) -> Result<Metadata, ParseError> {
        let mut meta = Metadata::new();
        put(&mut meta, "log_type", self.format);
        put(&mut meta, "parser", self.parser);
        put(&mut meta, "file_size_mb", self.file_size_mb);
        put(&mut meta, "severity", self.severity);

        match &self.details {
            FormatFacts::General(facts) => facts.write_metadata(&mut meta)?,
            FormatFacts::Anr(facts) => facts.write_metadata(&mut meta)?,
            FormatFacts::Tombstone(facts) => facts.write_metadata(&mut meta),
        }
        Ok(meta)
    }
}

fn put(meta: &mut Metadata, key: &str, value: impl Into<MetaValue>) {
    meta.insert(key.to_string(), value.into());
}

fn put_opt<V: Into<MetaValue>>(meta: &mut Metadata, key: &str, value: Option<V>) {
    if let Some(value) = value {
        put(meta, key, value);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneralFacts {
    pub total_lines: usize,
    pub has_timestamps: bool,
    pub timestamp_format: &'static str,
    pub level_counts: BTreeMap<String, usize>,
    pub error_count: usize,
    pub stack_trace_count: usize,
    pub time_range: Option<(NaiveDateTime, NaiveDateTime)>,
    pub severity_score: u32,
}

impl GeneralFacts {
    fn write_metadata(&self, meta: &mut Metadata) -> Result<(), ParseError> {
        put(meta, "total_lines", self.total_lines);
        put(meta, "has_timestamps", self.has_timestamps);
        put(meta, "timestamp_format", self.timestamp_format);
        put(meta, "level_counts", serde_json::to_string(&self.level_counts)?);
        put(meta, "error_count", self.error_count);
        put(meta, "stack_trace_count", self.stack_trace_count);
        put(meta, "severity_score", self.severity_score);
        if let Some((start, end)) = self.time_range {
            put(meta, "time_range_start", start.to_string());
            put(meta, "time_range_end", end.to_string());
        }
        Ok(())
    }
}

/// Single-letter thread states printed in ANR dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ThreadState {
    Running,
    Sleeping,
    UninterruptibleWait,
    Zombie,
    Stopped,
    TracingStop,
    Dead,
    Wakekill,
    Waking,
    Unknown(char),
}

impl ThreadState {
    pub fn from_code(code: char) -> Self {
        match code {
            'R' => ThreadState::Running,
            'S' => ThreadState::Sleeping,
            'D' => ThreadState::UninterruptibleWait,
            'Z' => ThreadState::Zombie,
            'T' => ThreadState::Stopped,
            't' => ThreadState::TracingStop,
            'X' | 'x' => ThreadState::Dead,
            'K' => ThreadState::Wakekill,
            'W' => ThreadState::Waking,
            other => ThreadState::Unknown(other),
        }
    }

    pub fn label(&self) -> String {
        match self {
            ThreadState::Running => "running".to_string(),
            ThreadState::Sleeping => "sleeping".to_string(),
            ThreadState::UninterruptibleWait => "uninterruptible_wait".to_string(),
            ThreadState::Zombie => "zombie".to_string(),
            ThreadState::Stopped => "stopped".to_string(),
            ThreadState::TracingStop => "tracing_stop".to_string(),
            ThreadState::Dead => "dead".to_string(),
            ThreadState::Wakekill => "wakekill".to_string(),
            ThreadState::Waking => "waking".to_string(),
            ThreadState::Unknown(code) => format!("unknown({code})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedThread {
    /// Position of the thread in the dump, distinguishes threads sharing a name
    pub index: usize,
    pub name: String,
    pub waiting_on: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnrFacts {
    pub pid: Option<u32>,
    pub timestamp: Option<String>,
    pub package_name: Option<String>,
    pub build_fingerprint: Option<String>,
    pub declared_threads: Option<usize>,
    pub total_threads: usize,
    pub thread_states: BTreeMap<String, usize>,
    pub blocked_threads: Vec<BlockedThread>,
    pub main_thread_state: Option<ThreadState>,
    pub main_thread_blocked: bool,
    pub has_deadlock_risk: bool,
}

impl AnrFacts {
    fn write_metadata(&self, meta: &mut Metadata) -> Result<(), ParseError> {
        put_opt(meta, "pid", self.pid);
        put_opt(meta, "timestamp", self.timestamp.clone());
        put_opt(meta, "package_name", self.package_name.clone());
        put_opt(meta, "build_fingerprint", self.build_fingerprint.clone());
        put_opt(meta, "declared_threads", self.declared_threads);
        put(meta, "total_threads", self.total_threads);
        put(meta, "thread_states", serde_json::to_string(&self.thread_states)?);
        put(meta, "blocked_threads", self.blocked_threads.len());
        put_opt(meta, "main_thread_state", self.main_thread_state.map(|s| s.label()));
        put(meta, "has_deadlock_risk", self.has_deadlock_risk);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashType {
    NullPointerDereference,
    SegmentationFault,
    AssertionFailure,
    CheckFailure,
    Abort,
    BusError,
    IllegalInstruction,
    ArithmeticException,
    StackCorruption,
    HeapCorruption,
    UnknownCrash,
}

impl CrashType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrashType::NullPointerDereference => "null_pointer_dereference",
            CrashType::SegmentationFault => "segmentation_fault",
            CrashType::AssertionFailure => "assertion_failure",
            CrashType::CheckFailure => "check_failure",
            CrashType::Abort => "abort",
            CrashType::BusError => "bus_error",
            CrashType::IllegalInstruction => "illegal_instruction",
            CrashType::ArithmeticException => "arithmetic_exception",
            CrashType::StackCorruption => "stack_corruption",
            CrashType::HeapCorruption => "heap_corruption",
            CrashType::UnknownCrash => "unknown_crash",
        }
    }

    /// "null_pointer_dereference" -> "Null Pointer Dereference"
    pub fn title(&self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TombstoneFacts {
    pub build_fingerprint: Option<String>,
    pub revision: Option<String>,
    pub abi: Option<String>,
    pub timestamp: Option<String>,
    pub process_uptime: Option<String>,
    pub cmdline: Option<String>,
    pub pid: Option<u32>,
    pub tid: Option<u32>,
    pub thread_name: Option<String>,
    pub process_name: Option<String>,
    pub signal_num: Option<u32>,
    pub signal_name: Option<String>,
    pub fault_addr: Option<String>,
    pub abort_message: Option<String>,
    pub cause: Option<String>,
    pub crash_type: CrashType,
    pub backtrace_depth: usize,
    pub has_java_frames: bool,
}

impl TombstoneFacts {
    fn write_metadata(&self, meta: &mut Metadata) {
        put_opt(meta, "build_fingerprint", self.build_fingerprint.clone());
        put_opt(meta, "revision", self.revision.clone());
        put_opt(meta, "abi", self.abi.clone());
        put_opt(meta, "timestamp", self.timestamp.clone());
        put_opt(meta, "process_uptime", self.process_uptime.clone());
        put_opt(meta, "pid", self.pid);
        put_opt(meta, "tid", self.tid);
        put_opt(meta, "thread_name", self.thread_name.clone());
        put_opt(meta, "process_name", self.process_name.clone());
        put_opt(meta, "signal_num", self.signal_num);
        put_opt(meta, "signal_name", self.signal_name.clone());
        put_opt(meta, "fault_addr", self.fault_addr.clone());
        put_opt(meta, "abort_message", self.abort_message.clone());
        put_opt(meta, "cause", self.cause.clone());
        put(meta, "crash_type", self.crash_type.as_str());
        put(meta, "backtrace_depth", self.backtrace_depth);
        put(meta, "has_java_frames", self.has_java_frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_carries_universal_fields() {
        let facts = StructuralFacts::new(
            "anr_parser",
            "x",
            Severity::Medium,
            FormatFacts::Anr(AnrFacts {
                total_threads: 2,
                ..AnrFacts::default()
            }),
        );
        let meta = facts.to_metadata().unwrap();

        assert_eq!(meta["log_type"], MetaValue::from("android_anr"));
        assert_eq!(meta["parser"], MetaValue::from("anr_parser"));
        assert_eq!(meta["severity"], MetaValue::from("medium"));
        assert_eq!(meta["total_threads"], MetaValue::Int(2));
        assert!(!meta.contains_key("pid"));
    }

    #[test]
    fn test_wrong_variant_access_fails() {
        let facts = StructuralFacts::new("anr_parser", "", Severity::Low, FormatFacts::Anr(AnrFacts::default()));
        assert!(matches!(
            facts.tombstone(),
            Err(ParseError::FactsMismatch { expected: LogFormat::AndroidTombstone, .. })
        ));
    }

    #[test]
    fn test_crash_type_title() {
        assert_eq!(CrashType::NullPointerDereference.title(), "Null Pointer Dereference");
    }
}
