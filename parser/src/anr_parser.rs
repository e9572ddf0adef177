use crate::base_parser::LogParser;
use crate::facts::{AnrFacts, BlockedThread, FormatFacts, StructuralFacts, ThreadState};
use crate::fragment::FragmentBuilder;
use crate::patterns::{PatternTable, ANR_INDICATORS, ANR_PATTERNS};
use crate::{Fragment, LogFormat, ParseError, ParserConfig, Severity};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use tracing::debug;

/// Threads always worth indexing, blocked or not
const IMPORTANT_THREADS: &[&str] = &["main", "Signal Catcher", "FinalizerDaemon"];

/// Words in the main thread's dump that warrant a dedicated critical fragment
const MAIN_STACK_ALERTS: &[&str] = &["waiting", "blocked", "lock"];

/// Android ANR traces (`/data/anr/traces.txt` style thread dumps).
pub struct AnrParser {
    patterns: PatternTable,
}

/// Lines belonging to one thread, from its header up to the next header.
struct ThreadBlock<'a> {
    name: &'a str,
    lines: Vec<&'a str>,
}

impl ThreadBlock<'_> {
    fn text(&self) -> String {
        self.lines.join("\n")
    }
}

impl AnrParser {
    pub fn new(_config: &ParserConfig) -> Result<Self, ParseError> {
        Ok(Self {
            patterns: PatternTable::compile(LogFormat::AndroidAnr, ANR_PATTERNS)?,
        })
    }

    fn thread_blocks<'a>(&self, content: &'a str) -> Result<Vec<ThreadBlock<'a>>, ParseError> {
        let header = self.patterns.get("thread_info")?;
        let mut blocks: Vec<ThreadBlock<'a>> = Vec::new();

        for line in content.lines() {
            if let Some(name) = header.captures(line).and_then(|caps| caps.get(1)) {
                blocks.push(ThreadBlock {
                    name: name.as_str(),
                    lines: vec![line],
                });
            } else if let Some(block) = blocks.last_mut() {
                block.lines.push(line);
            }
        }
        Ok(blocks)
    }

    fn summary(&self, facts: &AnrFacts, severity: Severity) -> String {
        let unknown = "Unknown";
        let mut out = String::new();
        let _ = writeln!(out, "Android ANR Summary");
        let _ = writeln!(out, "===================");
        let _ = writeln!(out, "Package: {}", facts.package_name.as_deref().unwrap_or(unknown));
        let _ = writeln!(
            out,
            "PID: {}",
            facts.pid.map_or_else(|| unknown.to_string(), |pid| pid.to_string())
        );
        let _ = writeln!(out, "Time: {}", facts.timestamp.as_deref().unwrap_or(unknown));
        let _ = writeln!(out, "Severity: {}", severity.as_str().to_uppercase());
        let _ = writeln!(out);
        let _ = writeln!(out, "Threads:");
        let _ = writeln!(out, "- Total: {}", facts.total_threads);
        if let Some(declared) = facts.declared_threads {
            let _ = writeln!(out, "- Declared: {declared}");
        }
        let _ = writeln!(out, "- Blocked: {}", facts.blocked_threads.len());
        let _ = writeln!(
            out,
            "- Main thread state: {}",
            facts
                .main_thread_state
                .map_or_else(|| unknown.to_string(), |s| s.label())
        );
        let _ = writeln!(
            out,
            "- Deadlock risk: {}",
            if facts.has_deadlock_risk { "yes" } else { "no" }
        );

        if !facts.thread_states.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Thread states:");
            for (state, count) in &facts.thread_states {
                let _ = writeln!(out, "- {state}: {count}");
            }
        }

        if !facts.blocked_threads.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Blocked threads:");
            for blocked in &facts.blocked_threads {
                let _ = writeln!(out, "- \"{}\" waiting on {}", blocked.name, blocked.waiting_on);
            }
        }

        let _ = writeln!(out);
        let _ = write!(
            out,
            "Build: {}",
            facts.build_fingerprint.as_deref().unwrap_or(unknown)
        );
        out
    }
}

impl LogParser for AnrParser {
    fn format(&self) -> LogFormat {
        LogFormat::AndroidAnr
    }

    fn name(&self) -> &'static str {
        "anr_parser"
    }

    fn can_parse(&self, _path: &Path, sample: &str) -> bool {
        ANR_INDICATORS.is_satisfied(sample)
    }

    fn patterns(&self) -> &PatternTable {
        &self.patterns
    }

    fn analyze(&self, content: &str) -> Result<StructuralFacts, ParseError> {
        let p = &self.patterns;
        let mut facts = AnrFacts::default();

        if let Some(caps) = p.get("pid_header")?.captures(content) {
            facts.pid = caps[1].parse().ok();
            facts.timestamp = Some(caps[2].to_string());
        }
        facts.package_name = p.capture("cmd_line", content, 1)?;
        facts.build_fingerprint = p.capture("build_fingerprint", content, 1)?;
        facts.declared_threads = p
            .capture("dalvik_threads", content, 1)?
            .and_then(|n| n.parse().ok());

        let header = p.get("thread_info")?;
        let state = p.get("thread_state")?;
        let waiting = p.get("waiting_on")?;

        // (position in dump, name) of the thread whose lines are being read
        let mut current: Option<(usize, &str)> = None;
        let mut counted = 0usize;
        let mut thread_states: BTreeMap<String, usize> = BTreeMap::new();

        for line in content.lines() {
            if let Some(name) = header.captures(line).and_then(|caps| caps.get(1)) {
                current = Some((counted, name.as_str()));
                counted += 1;
                continue;
            }
            let Some((index, name)) = current else {
                continue;
            };

            if let Some(code) = state
                .captures(line)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().chars().next())
            {
                let thread_state = ThreadState::from_code(code);
                *thread_states.entry(thread_state.label()).or_insert(0) += 1;
                if name == "main" && facts.main_thread_state.is_none() {
                    facts.main_thread_state = Some(thread_state);
                }
            }

            if let Some(target) = waiting.captures(line).and_then(|caps| caps.get(1)) {
                if !facts.blocked_threads.iter().any(|b| b.index == index) {
                    facts.blocked_threads.push(BlockedThread {
                        index,
                        name: name.to_string(),
                        waiting_on: target.as_str().trim().to_string(),
                    });
                }
            }
        }

        // The dump may list fewer threads than the DALVIK THREADS header declares
        facts.total_threads = facts.declared_threads.map_or(counted, |d| d.max(counted));
        facts.thread_states = thread_states;
        facts.main_thread_blocked = facts.blocked_threads.iter().any(|b| b.name == "main");
        facts.has_deadlock_risk = facts.blocked_threads.len() >= 2;

        let severity = anr_severity(
            facts.main_thread_state,
            facts.main_thread_blocked,
            facts.blocked_threads.len(),
        );
        debug!(
            threads = facts.total_threads,
            blocked = facts.blocked_threads.len(),
            "ANR threads scanned"
        );

        Ok(StructuralFacts::new(
            self.name(),
            content,
            severity,
            FormatFacts::Anr(facts),
        ))
    }

    fn segment(
        &self,
        content: &str,
        path: &Path,
        facts: &StructuralFacts,
    ) -> Result<Vec<Fragment>, ParseError> {
        let anr = facts.anr()?;
        let waiting = self.patterns.get("waiting_on")?;
        let java_stack = self.patterns.get("java_stack")?;
        let native_stack = self.patterns.get("native_stack")?;
        let held = self.patterns.get("held_mutexes")?;

        let mut fragments = Vec::new();
        fragments.extend(
            FragmentBuilder::new(self.summary(anr, facts.severity))
                .source(path)
                .meta("chunk_method", "anr_summary")
                .meta("chunk_type", "summary")
                .build(),
        );

        let blocks = self.thread_blocks(content)?;
        for block in &blocks {
            let text = block.text();
            let is_blocked = waiting.is_match(&text);
            let held_mutexes = held
                .captures(&text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim())
                .filter(|mutexes| !mutexes.is_empty());
            if !(IMPORTANT_THREADS.contains(&block.name) || is_blocked || held_mutexes.is_some()) {
                continue;
            }

            fragments.extend(
                FragmentBuilder::new(text.as_str())
                    .source(path)
                    .meta("chunk_method", "anr_thread")
                    .meta("chunk_type", "thread")
                    .meta("thread_name", block.name)
                    .meta("is_main_thread", block.name == "main")
                    .meta("is_blocked", is_blocked)
                    .meta_opt("held_mutexes", held_mutexes)
                    .meta(
                        "has_stack_trace",
                        java_stack.is_match(&text) || native_stack.is_match(&text),
                    )
                    .build(),
            );
        }

        if let Some(main) = blocks.iter().find(|block| block.name == "main") {
            let text = main.text();
            let lowered = text.to_lowercase();
            if MAIN_STACK_ALERTS.iter().any(|word| lowered.contains(word)) || text.contains("ANR") {
                fragments.extend(
                    FragmentBuilder::new(text)
                        .source(path)
                        .meta("chunk_method", "anr_main_stack")
                        .meta("chunk_type", "critical_stack")
                        .meta("thread_name", "main")
                        .meta("severity", Severity::Critical)
                        .build(),
                );
            }
        }

        Ok(fragments)
    }
}

/// Critical when the main thread is stuck, otherwise graded by how many threads wait on locks.
pub fn anr_severity(
    main_state: Option<ThreadState>,
    main_blocked: bool,
    blocked_threads: usize,
) -> Severity {
    let main_not_running = matches!(main_state, Some(state) if state != ThreadState::Running);
    if main_blocked || main_not_running {
        Severity::Critical
    } else if blocked_threads >= 3 {
        Severity::High
    } else if blocked_threads >= 2 {
        Severity::Medium
    } else {
        Severity::Low
    }
}
