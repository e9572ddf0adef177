use crate::base_parser::LogParser;
use crate::facts::{CrashType, FormatFacts, StructuralFacts, TombstoneFacts};
use crate::fragment::FragmentBuilder;
use crate::patterns::{PatternTable, TOMBSTONE_INDICATORS, TOMBSTONE_PATTERNS};
use crate::{Fragment, LogFormat, ParseError, ParserConfig, Severity};
use std::fmt::Write as _;
use std::path::Path;
use tracing::debug;

const CRITICAL_CRASHES: &[CrashType] = &[
    CrashType::HeapCorruption,
    CrashType::StackCorruption,
    CrashType::SegmentationFault,
    CrashType::NullPointerDereference,
];

const HIGH_CRASHES: &[CrashType] = &[
    CrashType::Abort,
    CrashType::AssertionFailure,
    CrashType::CheckFailure,
];

/// Markers closing the backtrace section
const BACKTRACE_END_MARKERS: &[&str] = &["\nstack:", "\nmemory map:", "\nregisters:", "\n\n\n"];

/// Android native crash dumps (`/data/tombstones/tombstone_NN`).
pub struct TombstoneParser {
    patterns: PatternTable,
    config: ParserConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Frame {
    number: u32,
    location: String,
    symbol: Option<String>,
}

impl TombstoneParser {
    pub fn new(config: &ParserConfig) -> Result<Self, ParseError> {
        Ok(Self {
            patterns: PatternTable::compile(LogFormat::AndroidTombstone, TOMBSTONE_PATTERNS)?,
            config: config.clone(),
        })
    }

    /// The lines around the first crash marker, up to the stack / memory map / register dump.
    fn crash_context(&self, content: &str) -> Result<Option<String>, ParseError> {
        let section_start = self.patterns.get("section_start")?;
        let section_end = self.patterns.get("section_end")?;

        let lines: Vec<&str> = content.lines().collect();
        let Some(first) = lines.iter().position(|line| section_start.is_match(line)) else {
            return Ok(None);
        };

        let from = first.saturating_sub(self.config.crash_context_lines);
        let to = lines[first + 1..]
            .iter()
            .position(|line| section_end.is_match(line))
            .map_or(lines.len(), |offset| first + 1 + offset);

        Ok(Some(lines[from..to].join("\n")))
    }

    fn frames(&self, content: &str) -> Result<Vec<Frame>, ParseError> {
        let Some(start) = content.find("backtrace:") else {
            return Ok(Vec::new());
        };
        let end = BACKTRACE_END_MARKERS
            .iter()
            .filter_map(|marker| content[start..].find(marker).map(|idx| start + idx))
            .min()
            .unwrap_or(content.len());

        let frames = self
            .patterns
            .get("backtrace_line")?
            .captures_iter(&content[start..end])
            .map(|caps| Frame {
                number: caps[1].parse().unwrap_or_default(),
                location: caps[3].to_string(),
                symbol: caps.get(4).map(|m| m.as_str().to_string()),
            })
            .collect();
        Ok(frames)
    }

    fn condensed_backtrace(&self, frames: &[Frame]) -> String {
        let mut out = String::from("Backtrace:\n");
        out.push_str(&"=".repeat(50));
        out.push('\n');
        for frame in frames.iter().take(self.config.max_backtrace_frames) {
            let _ = write!(out, "#{:02} {}", frame.number, frame.location);
            if let Some(symbol) = &frame.symbol {
                let _ = write!(out, " ({symbol})");
            }
            out.push('\n');
        }
        out
    }

    /// Register dump plus the head of the memory map.
    fn technical_details(&self, content: &str) -> Result<Option<(String, usize)>, ParseError> {
        let mut sections = Vec::new();
        let mut register_lines = 0;

        if let Some(start) = content.find("registers:") {
            let end = content[start..]
                .find("\n\n")
                .map_or(content.len(), |idx| start + idx);
            let section = &content[start..end];
            register_lines = self.patterns.count("register", section)?;
            sections.push(format!("Register state:\n{section}"));
        }

        if let Some(start) = content.find("memory map:") {
            let head = content[start..]
                .lines()
                .take(self.config.memory_map_lines)
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!("Memory map (partial):\n{head}"));
        }

        if sections.is_empty() {
            return Ok(None);
        }
        Ok(Some((sections.join("\n\n"), register_lines)))
    }

    fn summary(&self, facts: &TombstoneFacts, severity: Severity) -> String {
        let unknown = "Unknown";
        let opt_num = |n: Option<u32>| n.map_or_else(|| "?".to_string(), |n| n.to_string());

        let mut out = String::new();
        let _ = writeln!(out, "Android Tombstone Crash Report");
        let _ = writeln!(out, "==============================");
        let _ = writeln!(out, "Process: {}", facts.process_name.as_deref().unwrap_or(unknown));
        let _ = writeln!(out, "PID/TID: {}/{}", opt_num(facts.pid), opt_num(facts.tid));
        let _ = writeln!(out, "Thread: {}", facts.thread_name.as_deref().unwrap_or(unknown));
        let _ = writeln!(out, "Time: {}", facts.timestamp.as_deref().unwrap_or(unknown));
        let _ = writeln!(out);
        let _ = writeln!(out, "Crash:");
        let _ = writeln!(
            out,
            "- Signal: {} ({})",
            facts.signal_name.as_deref().unwrap_or(unknown),
            opt_num(facts.signal_num)
        );
        let _ = writeln!(out, "- Crash type: {}", facts.crash_type.title());
        let _ = writeln!(out, "- Severity: {}", severity.as_str().to_uppercase());
        let _ = writeln!(out, "- Fault address: {}", facts.fault_addr.as_deref().unwrap_or("N/A"));
        if let Some(message) = &facts.abort_message {
            let _ = writeln!(out, "- Abort message: {message}");
        }
        if let Some(cause) = &facts.cause {
            let _ = writeln!(out, "- Cause: {cause}");
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Stack:");
        let _ = writeln!(out, "- Backtrace depth: {} frames", facts.backtrace_depth);
        let _ = writeln!(out);
        let _ = write!(
            out,
            "Build: {}",
            facts.build_fingerprint.as_deref().unwrap_or(unknown)
        );
        out
    }
}

impl LogParser for TombstoneParser {
    fn format(&self) -> LogFormat {
        LogFormat::AndroidTombstone
    }

    fn name(&self) -> &'static str {
        "tombstone_parser"
    }

    fn can_parse(&self, path: &Path, sample: &str) -> bool {
        TOMBSTONE_INDICATORS.is_satisfied(sample)
            || path.to_string_lossy().to_lowercase().contains("tombstone")
    }

    fn patterns(&self) -> &PatternTable {
        &self.patterns
    }

    fn analyze(&self, content: &str) -> Result<StructuralFacts, ParseError> {
        let p = &self.patterns;
        let cmdline = p.capture("cmdline", content, 1)?;

        let (pid, tid, thread_name, process_name) = match p.get("pid_tid")?.captures(content) {
            Some(caps) => (
                caps[1].parse().ok(),
                caps[2].parse().ok(),
                caps.get(3).map(|m| m.as_str().trim().to_string()),
                caps.get(4).map(|m| m.as_str().trim().to_string()),
            ),
            None => (None, None, None, None),
        };

        let (signal_num, signal_name) = match p.get("signal_info")?.captures(content) {
            Some(caps) => (caps[1].parse().ok(), Some(caps[2].to_string())),
            None => (None, None),
        };

        let abort_message = p.capture("abort_message", content, 1)?;
        let crash_type = classify_crash(signal_name.as_deref(), abort_message.as_deref(), content);
        let severity = crash_severity(crash_type, signal_name.as_deref());

        let facts = TombstoneFacts {
            build_fingerprint: p.capture("build_fingerprint", content, 1)?,
            revision: p.capture("revision", content, 1)?,
            abi: p.capture("abi", content, 1)?,
            timestamp: p.capture("timestamp", content, 1)?,
            process_uptime: p.capture("process_uptime", content, 1)?,
            process_name: process_name.or_else(|| cmdline.clone()),
            cmdline,
            pid,
            tid,
            thread_name,
            signal_num,
            signal_name,
            fault_addr: p.capture("fault_addr", content, 1)?,
            abort_message,
            cause: p.capture("cause_line", content, 1)?,
            crash_type,
            backtrace_depth: p.count("backtrace_line", content)?,
            has_java_frames: p.is_match("java_stacktrace", content)?,
        };
        debug!(
            crash_type = crash_type.as_str(),
            frames = facts.backtrace_depth,
            "Tombstone analyzed"
        );

        Ok(StructuralFacts::new(
            self.name(),
            content,
            severity,
            FormatFacts::Tombstone(facts),
        ))
    }

    fn segment(
        &self,
        content: &str,
        path: &Path,
        facts: &StructuralFacts,
    ) -> Result<Vec<Fragment>, ParseError> {
        let tombstone = facts.tombstone()?;
        let crash_type = tombstone.crash_type.as_str();
        let mut fragments = Vec::new();

        fragments.extend(
            FragmentBuilder::new(self.summary(tombstone, facts.severity))
                .source(path)
                .meta("chunk_method", "tombstone_summary")
                .meta("chunk_type", "crash_summary")
                .build(),
        );

        if let Some(context) = self.crash_context(content)? {
            fragments.extend(
                FragmentBuilder::new(context)
                    .source(path)
                    .meta("chunk_method", "tombstone_context")
                    .meta("chunk_type", "crash_context")
                    .meta("crash_type", crash_type)
                    .build(),
            );
        }

        let frames = self.frames(content)?;
        if !frames.is_empty() {
            fragments.extend(
                FragmentBuilder::new(self.condensed_backtrace(&frames))
                    .source(path)
                    .meta("chunk_method", "tombstone_backtrace")
                    .meta("chunk_type", "backtrace")
                    .meta("frame_count", frames.len())
                    .meta("crash_type", crash_type)
                    .build(),
            );
        }

        if facts.severity.is_at_least_high() {
            if let Some((details, registers)) = self.technical_details(content)? {
                fragments.extend(
                    FragmentBuilder::new(details)
                        .source(path)
                        .meta("chunk_method", "tombstone_technical")
                        .meta("chunk_type", "technical_details")
                        .meta("register_lines", registers)
                        .build(),
                );
            }
        }

        Ok(fragments)
    }
}

/// Maps the crash signal, abort message and dump body to a crash category.
pub fn classify_crash(signal_name: Option<&str>, abort_message: Option<&str>, content: &str) -> CrashType {
    let body_mentions = |needle: &str| content.to_lowercase().contains(needle);

    match signal_name {
        Some("SIGSEGV") if body_mentions("null pointer") => CrashType::NullPointerDereference,
        Some("SIGSEGV") => CrashType::SegmentationFault,
        Some("SIGABRT") => {
            let message = abort_message.unwrap_or_default().to_lowercase();
            if message.contains("assertion") {
                CrashType::AssertionFailure
            } else if message.contains("check") {
                CrashType::CheckFailure
            } else {
                CrashType::Abort
            }
        }
        Some("SIGBUS") => CrashType::BusError,
        Some("SIGILL") => CrashType::IllegalInstruction,
        Some("SIGFPE") => CrashType::ArithmeticException,
        _ if body_mentions("stack corruption") => CrashType::StackCorruption,
        _ if body_mentions("heap corruption") => CrashType::HeapCorruption,
        _ => CrashType::UnknownCrash,
    }
}

pub fn crash_severity(crash_type: CrashType, signal_name: Option<&str>) -> Severity {
    if CRITICAL_CRASHES.contains(&crash_type) {
        Severity::Critical
    } else if HIGH_CRASHES.contains(&crash_type) {
        Severity::High
    } else if matches!(signal_name, Some("SIGKILL" | "SIGSTOP")) {
        Severity::Medium
    } else {
        Severity::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOMBSTONE: &str = "*** *** *** *** *** *** *** *** *** *** *** *** *** *** *** ***
Build fingerprint: 'google/raven/raven:13/TQ3A.230605.012/10204971:user/release-keys'
Revision: 'MP1.0'
ABI: 'arm64'
Timestamp: 2024-01-01 10:00:00.123456789+0000
Process uptime: 42s
Cmdline: com.example.app
pid: 4321, tid: 4330, name: RenderThread  >>> com.example.app <<<
uid: 10123
signal 11 (SIGSEGV), code 1 (SEGV_MAPERR), fault addr 0x0000000000000000
Cause: null pointer dereference
    x0  0000000000000000  x1  0000007fc0a1b2c0

registers:
    x0  0000000000000000  x1  0000007fc0a1b2c0
    x2  0000000000000010  x3  0000000000000000

backtrace:
      #00 pc 00000000000a1b2c  /system/lib64/libhwui.so (android::uirenderer::RenderNode::prepare+44) (BuildId: 1a2b)
      #01 pc 00000000000a2c3d  /system/lib64/libhwui.so (android::uirenderer::RenderProxy::syncAndDraw+88)
      #02 pc 00000000000b3d4e  /apex/com.android.runtime/lib64/bionic/libc.so

stack:
         0000007fc0a1b000  0000000000000000

memory map:
    5a1b2c0000-5a1b2c3000 r--p 00000000 fd:03 1234  /system/bin/app_process64
";

    fn parser() -> TombstoneParser {
        TombstoneParser::new(&ParserConfig::default()).unwrap()
    }

    #[test]
    fn test_tombstone_can_parse() {
        let parser = parser();
        assert!(parser.can_parse(Path::new("crash.txt"), TOMBSTONE));
        assert!(parser.can_parse(Path::new("/data/tombstones/Tombstone_03"), "nothing here"));
        assert!(!parser.can_parse(Path::new("crash.txt"), "signal received, pid: 3"));
    }

    #[test]
    fn test_tombstone_analyze() {
        let facts = parser().analyze(TOMBSTONE).unwrap();
        let t = facts.tombstone().unwrap();

        assert_eq!(t.pid, Some(4321));
        assert_eq!(t.tid, Some(4330));
        assert_eq!(t.thread_name.as_deref(), Some("RenderThread"));
        assert_eq!(t.process_name.as_deref(), Some("com.example.app"));
        assert_eq!(t.signal_num, Some(11));
        assert_eq!(t.signal_name.as_deref(), Some("SIGSEGV"));
        assert_eq!(t.fault_addr.as_deref(), Some("0x0000000000000000"));
        assert_eq!(t.abi.as_deref(), Some("arm64"));
        assert_eq!(t.cause.as_deref(), Some("null pointer dereference"));
        assert_eq!(t.crash_type, CrashType::NullPointerDereference);
        assert_eq!(t.backtrace_depth, 3);
        assert_eq!(facts.severity, Severity::Critical);
    }

    #[test]
    fn test_tombstone_segments() {
        let parser = parser();
        let facts = parser.analyze(TOMBSTONE).unwrap();
        let fragments = parser.segment(TOMBSTONE, Path::new("tombstone_00"), &facts).unwrap();

        let kinds: Vec<&str> = fragments.iter().filter_map(|f| f.get_str("chunk_type")).collect();
        assert_eq!(kinds, vec!["crash_summary", "crash_context", "backtrace", "technical_details"]);

        let context = &fragments[1].content;
        assert!(context.starts_with("Cmdline: com.example.app"));
        assert!(context.contains("Cause: null pointer dereference"));
        assert!(!context.contains("registers:"));

        let backtrace = &fragments[2];
        assert_eq!(backtrace.get_i64("frame_count"), Some(3));
        assert!(backtrace
            .content
            .contains("#00 /system/lib64/libhwui.so (android::uirenderer::RenderNode::prepare+44)"));
        assert!(backtrace.content.contains("#02 /apex/com.android.runtime/lib64/bionic/libc.so\n"));

        assert_eq!(fragments[3].get_i64("register_lines"), Some(2));
    }

    #[test]
    fn test_low_severity_skips_technical_details() {
        let dump = TOMBSTONE.replace("signal 11 (SIGSEGV)", "signal 9 (SIGKILL)");
        let parser = parser();
        let facts = parser.analyze(&dump).unwrap();
        assert_eq!(facts.severity, Severity::Medium);

        let fragments = parser.segment(&dump, Path::new("tombstone_01"), &facts).unwrap();
        assert!(fragments
            .iter()
            .all(|f| f.get_str("chunk_type") != Some("technical_details")));
    }

    #[test]
    fn test_backtrace_is_capped() {
        let mut dump = String::from("signal 6 (SIGABRT)\nbacktrace:\n");
        for i in 0..25 {
            dump.push_str(&format!("  #{i:02} pc 00000000000{i:05x}  /system/lib64/libfoo.so (fn{i}+4)\n"));
        }
        let parser = parser();
        let frames = parser.frames(&dump).unwrap();
        assert_eq!(frames.len(), 25);

        let text = parser.condensed_backtrace(&frames);
        assert!(text.contains("#09 /system/lib64/libfoo.so (fn9+4)"));
        assert!(!text.contains("#10 "));
    }

    #[test]
    fn test_crash_classification_table() {
        assert_eq!(classify_crash(Some("SIGSEGV"), None, "bad access"), CrashType::SegmentationFault);
        assert_eq!(
            classify_crash(Some("SIGSEGV"), None, "Cause: NULL POINTER dereference"),
            CrashType::NullPointerDereference
        );
        assert_eq!(
            classify_crash(Some("SIGABRT"), Some("Assertion failed: x != 0"), ""),
            CrashType::AssertionFailure
        );
        assert_eq!(
            classify_crash(Some("SIGABRT"), Some("Check failed: ptr"), ""),
            CrashType::CheckFailure
        );
        assert_eq!(classify_crash(Some("SIGABRT"), None, ""), CrashType::Abort);
        assert_eq!(classify_crash(Some("SIGBUS"), None, ""), CrashType::BusError);
        assert_eq!(classify_crash(Some("SIGILL"), None, ""), CrashType::IllegalInstruction);
        assert_eq!(classify_crash(Some("SIGFPE"), None, ""), CrashType::ArithmeticException);
        assert_eq!(
            classify_crash(Some("SIGTRAP"), None, "detected heap corruption"),
            CrashType::HeapCorruption
        );
        assert_eq!(
            classify_crash(None, None, "stack corruption detected"),
            CrashType::StackCorruption
        );
        assert_eq!(classify_crash(None, None, "nothing useful"), CrashType::UnknownCrash);
    }

    #[test]
    fn test_crash_severity_tiers() {
        assert_eq!(crash_severity(CrashType::HeapCorruption, None), Severity::Critical);
        assert_eq!(crash_severity(CrashType::AssertionFailure, None), Severity::High);
        assert_eq!(crash_severity(CrashType::UnknownCrash, Some("SIGSTOP")), Severity::Medium);
        assert_eq!(crash_severity(CrashType::BusError, Some("SIGBUS")), Severity::Low);
    }
}
