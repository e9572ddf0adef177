//! Per-format pattern tables and detection indicator sets.
//!
//! Every parser looks its regular expressions up by semantic name (`pid_header`,
//! `backtrace_line`, ...) in a [`PatternTable`] compiled once when the parser is built.
//! Supporting a new dialect means adding a table and an indicator set here; the shared
//! scaffolding in `base_parser.rs` and `registry_parser.rs` stays untouched.

use crate::{LogFormat, ParseError};
use regex::Regex;
use std::collections::HashMap;

/// `(name, regex source)` pairs making up one format's table.
pub type PatternDefs = &'static [(&'static str, &'static str)];

pub const GENERAL_PATTERNS: PatternDefs = &[
    ("timestamp", r"\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2}"),
    ("iso_timestamp", r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}"),
    ("level", r"\b(DEBUG|INFO|WARNING|WARN|ERROR|CRITICAL|FATAL|TRACE)\b"),
    ("level_any_case", r"(?i)\b(DEBUG|INFO|WARNING|WARN|ERROR|CRITICAL|FATAL|TRACE)\b"),
    ("error_keywords", r"(?i)(error|exception|failed|failure|critical|fatal|panic|crash)"),
    ("stack_trace", r"(?m)^[ \t]+at[ \t]+[\w.$]+\([\w.]+:\d+\)"),
    ("python_trace", r#"(?m)^[ \t]+File[ \t]+"[^"]+",[ \t]+line[ \t]+\d+"#),
];

pub const ANR_PATTERNS: PatternDefs = &[
    ("pid_header", r"----- pid (\d+) at (\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}) -----"),
    ("cmd_line", r"Cmd line: (.+)"),
    ("build_fingerprint", r#"(?m)Build fingerprint: ['"]?(.+?)['"]?\r?$"#),
    ("thread_info", r#"^"([^"]+)".*?prio=(\d+).*?tid=(\d+)"#),
    (
        "native_stack",
        r"(?m)^[ \t]+(?:native:[ \t]+)?#\d+[ \t]+pc[ \t]+[0-9a-fA-F]+[ \t]+(.+)",
    ),
    (
        "java_stack",
        r"(?m)^[ \t]+at[ \t]+([a-zA-Z_$][a-zA-Z\d_$]*(?:\.[a-zA-Z_$][a-zA-Z\d_$]*)*)",
    ),
    ("held_mutexes", r"(?m)^[ \t]+\| held mutexes=(.*)"),
    ("waiting_on", r"(?m)^[ \t]+[|-] waiting (?:on|to lock) (.+)"),
    ("thread_state", r"(?m)^[ \t]+\| state=([A-Za-z])"),
    ("dalvik_threads", r"(?m)^DALVIK THREADS \((\d+)\):"),
];

pub const TOMBSTONE_PATTERNS: PatternDefs = &[
    ("build_fingerprint", r#"(?m)Build fingerprint: ['"]?(.+?)['"]?\r?$"#),
    ("revision", r#"(?m)Revision: ['"]?(.+?)['"]?\r?$"#),
    ("abi", r#"(?m)ABI: ['"]?(.+?)['"]?\r?$"#),
    ("timestamp", r"Timestamp: (.+)"),
    ("process_uptime", r"Process uptime: (.+)"),
    ("cmdline", r"Cmdline: (.+)"),
    (
        "pid_tid",
        r"(?m)pid: (\d+), tid: (\d+), name: (.+?)(?:[ \t]+>>>[ \t]*(.+?)[ \t]*<<<)?[ \t]*\r?$",
    ),
    ("signal_info", r"signal (\d+) \(([A-Z]+)\)"),
    ("fault_addr", r"fault addr ([0-9a-fA-Fx]+)"),
    ("abort_message", r#"(?m)Abort message: ['"]?(.+?)['"]?\r?$"#),
    (
        "backtrace_line",
        r"(?m)^[ \t]*#(\d+)[ \t]+pc[ \t]+([0-9a-fA-F]+)[ \t]+(\S+)(?:[ \t]+\(([^)]*)\))?",
    ),
    ("register", r"(?m)^[ \t]*([a-z0-9]+)[ \t]+([0-9a-fA-F]{8,})"),
    (
        "memory_map",
        r"(?m)^[ \t]*([0-9a-fA-F]+)-([0-9a-fA-F]+)[ \t]+([rwxp-]+)[ \t]+([0-9a-fA-F]+)[ \t]+",
    ),
    ("cause_line", r"Cause: (.+)"),
    (
        "java_stacktrace",
        r"(?m)^[ \t]+at[ \t]+([a-zA-Z_$][a-zA-Z\d_$]*(?:\.[a-zA-Z_$][a-zA-Z\d_$]*)*)",
    ),
    ("section_start", r"signal \d+|Abort message:|Cause:|backtrace:"),
    ("section_end", r"^(stack:|memory map:|registers:)"),
];

/// Substrings whose co-occurrence in a sample identifies a format.
///
/// No single indicator is decisive; the format is recognized once `threshold` distinct
/// indicators appear somewhere in the sample.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorSet {
    pub format: LogFormat,
    pub indicators: &'static [&'static str],
    pub threshold: usize,
}

impl IndicatorSet {
    pub fn count_matches(&self, sample: &str) -> usize {
        self.indicators
            .iter()
            .filter(|indicator| sample.contains(*indicator))
            .count()
    }

    pub fn is_satisfied(&self, sample: &str) -> bool {
        self.count_matches(sample) >= self.threshold
    }
}

const CRASH_BANNER: &str = "*** *** *** *** *** *** *** *** *** *** *** *** *** *** *** ***";

pub const ANR_INDICATORS: IndicatorSet = IndicatorSet {
    format: LogFormat::AndroidAnr,
    indicators: &[
        "----- pid",
        "Cmd line:",
        "ABI:",
        "Build fingerprint:",
        CRASH_BANNER,
        "DALVIK THREADS",
        "suspend all histogram",
        "\"main\" prio=",
        "\"Signal Catcher\" daemon prio=",
        "Build.ID:",
        "Build.VERSION.SDK_INT:",
        "zygote",
    ],
    threshold: 3,
};

pub const TOMBSTONE_INDICATORS: IndicatorSet = IndicatorSet {
    format: LogFormat::AndroidTombstone,
    indicators: &[
        CRASH_BANNER,
        "Build fingerprint:",
        "Revision:",
        "ABI:",
        "Timestamp:",
        "Process uptime:",
        "Cmdline:",
        "pid:",
        "tid:",
        "signal",
        "fault addr",
        "backtrace:",
        "stack:",
        "memory map:",
        "registers:",
        "SIGSEGV",
        "SIGABRT",
        "Abort message:",
        "#00 pc",
    ],
    threshold: 4,
};

/// A format's patterns, compiled once and shared read-only across parses.
#[derive(Debug, Clone)]
pub struct PatternTable {
    format: LogFormat,
    patterns: HashMap<&'static str, Regex>,
}

impl PatternTable {
    pub fn compile(format: LogFormat, defs: PatternDefs) -> Result<Self, ParseError> {
        let mut patterns = HashMap::with_capacity(defs.len());
        for (name, source) in defs {
            patterns.insert(*name, Regex::new(source)?);
        }
        Ok(Self { format, patterns })
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    pub fn get(&self, name: &str) -> Result<&Regex, ParseError> {
        self.patterns
            .get(name)
            .ok_or_else(|| ParseError::MissingPattern {
                format: self.format,
                name: name.to_string(),
            })
    }

    pub fn is_match(&self, name: &str, text: &str) -> Result<bool, ParseError> {
        Ok(self.get(name)?.is_match(text))
    }

    pub fn count(&self, name: &str, text: &str) -> Result<usize, ParseError> {
        Ok(self.get(name)?.find_iter(text).count())
    }

    /// First capture group `group` of the first match, trimmed.
    pub fn capture(&self, name: &str, text: &str, group: usize) -> Result<Option<String>, ParseError> {
        Ok(self
            .get(name)?
            .captures(text)
            .and_then(|caps| caps.get(group))
            .map(|m| m.as_str().trim().to_string()))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
