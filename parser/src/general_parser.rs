use crate::base_parser::{ceil_char_boundary, floor_char_boundary, standard_fragments, LogParser};
use crate::facts::{FormatFacts, GeneralFacts, StructuralFacts};
use crate::fragment::FragmentBuilder;
use crate::patterns::{PatternTable, GENERAL_PATTERNS};
use crate::{Fragment, LogFormat, ParseError, ParserConfig, Severity};
use chrono::NaiveDateTime;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Occurrences of a level counted before weighting
const LEVEL_COUNT_CAP: usize = 10;
/// Cap on the error-keyword contribution to the score
const ERROR_KEYWORD_CAP: u32 = 30;
/// Scores above this switch segmentation to error-centered windows
const ERROR_CONTEXT_THRESHOLD: u32 = 50;
/// Fraction of lines carrying a timestamp for a log to count as timestamped
const TIMESTAMP_DENSITY: f64 = 0.3;

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Generic application logs. Permissive on purpose: it is probed last and is the
/// registry's guaranteed fallback.
pub struct GeneralLogParser {
    patterns: PatternTable,
    config: ParserConfig,
}

impl GeneralLogParser {
    pub fn new(config: &ParserConfig) -> Result<Self, ParseError> {
        Ok(Self {
            patterns: PatternTable::compile(LogFormat::General, GENERAL_PATTERNS)?,
            config: config.clone(),
        })
    }

    fn time_range(&self, content: &str) -> Result<Option<(NaiveDateTime, NaiveDateTime)>, ParseError> {
        let standard = self.patterns.get("timestamp")?;
        let iso = self.patterns.get("iso_timestamp")?;

        let mut range: Option<(NaiveDateTime, NaiveDateTime)> = None;
        for m in standard.find_iter(content).chain(iso.find_iter(content)) {
            if let Some(ts) = parse_timestamp(m.as_str()) {
                range = Some(match range {
                    Some((lo, hi)) => (lo.min(ts), hi.max(ts)),
                    None => (ts, ts),
                });
            }
        }
        Ok(range)
    }

    /// One window per error keyword, snapped outward to whole lines.
    fn error_context_fragments(&self, content: &str, path: &Path) -> Result<Vec<Fragment>, ParseError> {
        let errors = self.patterns.get("error_keywords")?;
        let java_trace = self.patterns.get("stack_trace")?;
        let python_trace = self.patterns.get("python_trace")?;

        let mut fragments = Vec::new();
        let mut line = 0usize;
        let mut scanned = 0usize;

        for (index, m) in errors.find_iter(content).enumerate() {
            line += content.as_bytes()[scanned..m.start()]
                .iter()
                .filter(|b| **b == b'\n')
                .count();
            scanned = m.start();

            let mut start = floor_char_boundary(content, m.start().saturating_sub(self.config.error_context_before));
            if start > 0 {
                start = content[..start].rfind('\n').map_or(0, |i| i + 1);
            }
            let mut end = ceil_char_boundary(content, m.start().saturating_add(self.config.error_context_after));
            if end < content.len() {
                end = content[end..].find('\n').map_or(content.len(), |i| end + i);
            }

            let window = &content[start..end];
            let has_stack_trace = java_trace.is_match(window) || python_trace.is_match(window);

            fragments.extend(
                FragmentBuilder::new(window)
                    .source(path)
                    .meta("chunk_method", "error_context")
                    .meta("error_index", index)
                    .meta("error_type", m.as_str())
                    .meta("error_line", line)
                    .meta("has_stack_trace", has_stack_trace)
                    .meta("context_type", "error")
                    .build(),
            );
        }
        Ok(fragments)
    }

    /// Blocks of whole lines, closed once the size target is reached on a timestamped line.
    fn time_block_fragments(&self, content: &str, path: &Path) -> Result<Vec<Fragment>, ParseError> {
        let standard = self.patterns.get("timestamp")?;
        let iso = self.patterns.get("iso_timestamp")?;
        let errors = self.patterns.get("error_keywords")?;
        let overlap_lines = (self.config.chunk_overlap / 50).max(1);

        let mut fragments = Vec::new();
        let mut block: Vec<&str> = Vec::new();
        let mut size = 0usize;
        let mut fresh = false;

        for line in content.lines() {
            let stamped = standard.is_match(line) || iso.is_match(line);
            block.push(line);
            size += line.len() + 1;
            if !line.trim().is_empty() {
                fresh = true;
            }

            if size >= self.config.chunk_size && stamped {
                let text = block.join("\n");
                fragments.extend(
                    FragmentBuilder::new(text.as_str())
                        .source(path)
                        .meta("chunk_method", "time_block")
                        .meta_opt("block_start_time", leading_timestamp(&block, standard, iso))
                        .meta("block_error_count", errors.find_iter(&text).count())
                        .meta("context_type", "temporal")
                        .build(),
                );

                let keep_from = block.len().saturating_sub(overlap_lines);
                block = block.split_off(keep_from);
                size = block.iter().map(|l| l.len() + 1).sum();
                fresh = false;
            }
        }

        if fresh {
            let text = block.join("\n");
            fragments.extend(
                FragmentBuilder::new(text.as_str())
                    .source(path)
                    .meta("chunk_method", "time_block_final")
                    .meta_opt("block_start_time", leading_timestamp(&block, standard, iso))
                    .meta("block_error_count", errors.find_iter(&text).count())
                    .meta("context_type", "temporal")
                    .build(),
            );
        }
        Ok(fragments)
    }
}

impl LogParser for GeneralLogParser {
    fn format(&self) -> LogFormat {
        LogFormat::General
    }

    fn name(&self) -> &'static str {
        "general_parser"
    }

    fn can_parse(&self, _path: &Path, sample: &str) -> bool {
        ["timestamp", "iso_timestamp", "level"]
            .iter()
            .any(|name| self.patterns.is_match(name, sample).unwrap_or(false))
    }

    fn patterns(&self) -> &PatternTable {
        &self.patterns
    }

    fn analyze(&self, content: &str) -> Result<StructuralFacts, ParseError> {
        let p = &self.patterns;
        let total_lines = content.split('\n').count();

        let timestamp_count = p.count("timestamp", content)?;
        let iso_count = p.count("iso_timestamp", content)?;
        let has_timestamps = (timestamp_count + iso_count) as f64 > total_lines as f64 * TIMESTAMP_DENSITY;

        let mut level_counts: BTreeMap<String, usize> = BTreeMap::new();
        for caps in p.get("level_any_case")?.captures_iter(content) {
            *level_counts.entry(caps[1].to_uppercase()).or_insert(0) += 1;
        }

        let error_count = p.count("error_keywords", content)?;
        let stack_trace_count = p.count("stack_trace", content)? + p.count("python_trace", content)?;
        let score = severity_score(&level_counts, error_count);

        let facts = GeneralFacts {
            total_lines,
            has_timestamps,
            timestamp_format: if iso_count > timestamp_count { "iso" } else { "standard" },
            level_counts,
            error_count,
            stack_trace_count,
            time_range: self.time_range(content)?,
            severity_score: score,
        };

        Ok(StructuralFacts::new(
            self.name(),
            content,
            severity_label(score),
            FormatFacts::General(facts),
        ))
    }

    fn segment(
        &self,
        content: &str,
        path: &Path,
        facts: &StructuralFacts,
    ) -> Result<Vec<Fragment>, ParseError> {
        let general = facts.general()?;

        if general.severity_score > ERROR_CONTEXT_THRESHOLD {
            info!(score = general.severity_score, "High severity log, using error-context strategy");
            let fragments = self.error_context_fragments(content, path)?;
            if !fragments.is_empty() {
                return Ok(fragments);
            }
            warn!("No error keywords found despite high score, falling back to standard split");
        } else if general.has_timestamps {
            info!("Timestamped log, using time-block strategy");
            return self.time_block_fragments(content, path);
        }

        debug!("Using standard split strategy");
        Ok(standard_fragments(content, path, &self.config))
    }
}

/// Weighted level counts plus keyword hits, clamped to `[0, 100]`.
pub fn severity_score(level_counts: &BTreeMap<String, usize>, error_count: usize) -> u32 {
    let levels: u32 = level_counts
        .iter()
        .map(|(level, count)| level_weight(level) * (*count).min(LEVEL_COUNT_CAP) as u32)
        .sum();
    let keywords = (error_count.min(ERROR_KEYWORD_CAP as usize) as u32 * 2).min(ERROR_KEYWORD_CAP);
    (levels + keywords).min(100)
}

fn level_weight(level: &str) -> u32 {
    match level {
        "FATAL" => 20,
        "CRITICAL" => 15,
        "ERROR" => 10,
        "WARN" | "WARNING" => 5,
        _ => 0,
    }
}

fn severity_label(score: u32) -> Severity {
    if score >= 80 {
        Severity::Critical
    } else if score > ERROR_CONTEXT_THRESHOLD {
        Severity::High
    } else if score >= 20 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn leading_timestamp(block: &[&str], standard: &Regex, iso: &Regex) -> Option<String> {
    block
        .iter()
        .find_map(|line| standard.find(line).or_else(|| iso.find(line)))
        .map(|m| m.as_str().to_string())
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&normalized, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> GeneralLogParser {
        GeneralLogParser::new(&ParserConfig::default()).unwrap()
    }

    fn counts(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_general_can_parse() {
        let parser = parser();
        assert!(parser.can_parse(Path::new("a.log"), "2024-01-01 10:00:00 started"));
        assert!(parser.can_parse(Path::new("a.log"), "2024-01-01T10:00:00Z started"));
        assert!(parser.can_parse(Path::new("a.log"), "[WARN] disk almost full"));
        assert!(!parser.can_parse(Path::new("a.log"), "just some prose without markers"));
    }

    #[test]
    fn test_severity_score_weights_and_caps() {
        assert_eq!(severity_score(&counts(&[("ERROR", 2)]), 0), 20);
        assert_eq!(severity_score(&counts(&[("WARN", 1), ("WARNING", 1)]), 0), 10);
        assert_eq!(severity_score(&counts(&[("ERROR", 50)]), 0), 100);
        assert_eq!(severity_score(&counts(&[("INFO", 500)]), 0), 0);
        assert_eq!(severity_score(&counts(&[]), 100), 30);
        assert_eq!(severity_score(&counts(&[("FATAL", 10), ("ERROR", 10)]), 100), 100);
    }

    #[test]
    fn test_severity_score_is_monotonic() {
        let mut previous = 0;
        for errors in 0..40 {
            let score = severity_score(&counts(&[("WARN", 3)]), errors);
            assert!(score >= previous);
            assert!(score <= 100);
            previous = score;
        }
        let mut previous = 0;
        for fatal in 0..15 {
            let score = severity_score(&counts(&[("FATAL", fatal), ("ERROR", 1)]), 3);
            assert!(score >= previous);
            previous = score;
        }
    }

    #[test]
    fn test_analyze_counts() {
        let content = "2024-03-01 12:00:00 INFO service started\n\
                       2024-03-01 12:00:05 ERROR connection failed\n\
                       Traceback (most recent call last):\n  File \"app.py\", line 10, in <module>\n\
                       2024-03-01 12:00:09 warning retrying\n";
        let facts = parser().analyze(content).unwrap();
        let general = facts.general().unwrap();

        assert_eq!(general.total_lines, 6);
        assert!(general.has_timestamps);
        assert_eq!(general.level_counts.get("ERROR"), Some(&1));
        assert_eq!(general.level_counts.get("WARNING"), Some(&1));
        assert_eq!(general.stack_trace_count, 1);
        // "ERROR" and "failed"
        assert_eq!(general.error_count, 2);
        assert_eq!(general.severity_score, 10 + 5 + 4);

        let (start, end) = general.time_range.unwrap();
        assert_eq!(start.to_string(), "2024-03-01 12:00:00");
        assert_eq!(end.to_string(), "2024-03-01 12:00:09");
    }

    #[test]
    fn test_high_severity_uses_error_context() {
        let mut content = String::new();
        for i in 0..8 {
            content.push_str(&format!("step {i} ok\nFATAL worker {i} died\n"));
        }
        let parser = parser();
        let facts = parser.analyze(&content).unwrap();
        assert!(facts.general().unwrap().severity_score > 50);

        let fragments = parser.segment(&content, Path::new("w.log"), &facts).unwrap();
        assert_eq!(fragments.len(), 8);
        assert!(fragments
            .iter()
            .all(|f| f.get_str("chunk_method") == Some("error_context")));
        assert_eq!(fragments[1].get_i64("error_line"), Some(3));
    }

    #[test]
    fn test_error_window_snaps_to_lines() {
        let config = ParserConfig {
            error_context_before: 5,
            error_context_after: 5,
            ..ParserConfig::default()
        };
        let parser = GeneralLogParser::new(&config).unwrap();
        let content = "first line\nsecond line has an error inside\nthird line\n";
        let fragments = parser.error_context_fragments(content, Path::new("x.log")).unwrap();

        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].content, "second line has an error inside");
    }

    #[test]
    fn test_trailing_newline_adds_no_overlap_only_block() {
        let config = ParserConfig {
            chunk_size: 60,
            chunk_overlap: 50,
            ..ParserConfig::default()
        };
        let parser = GeneralLogParser::new(&config).unwrap();
        for tail in ["\n", "\n\n"] {
            let content = format!(
                "2024-01-01 10:00:00 INFO aaaaaaaaaaaaaaaaaaaa\n2024-01-01 10:00:01 INFO bbbbbbbbbbbbbbbbbbbb{tail}"
            );
            let facts = parser.analyze(&content).unwrap();
            let fragments = parser.segment(&content, Path::new("t.log"), &facts).unwrap();

            assert_eq!(fragments.len(), 1);
            assert_eq!(fragments[0].get_str("chunk_method"), Some("time_block"));
            assert_eq!(fragments[0].content.lines().count(), 2);
        }
    }

    #[test]
    fn test_time_blocks_carry_overlap() {
        let config = ParserConfig {
            chunk_size: 120,
            chunk_overlap: 100,
            ..ParserConfig::default()
        };
        let parser = GeneralLogParser::new(&config).unwrap();
        let content = (0..20)
            .map(|i| format!("2024-01-01 10:00:{i:02} INFO request {i} handled"))
            .collect::<Vec<_>>()
            .join("\n");
        let facts = parser.analyze(&content).unwrap();
        let fragments = parser.segment(&content, Path::new("t.log"), &facts).unwrap();

        assert!(fragments.len() > 1);
        assert_eq!(fragments[0].get_str("chunk_method"), Some("time_block"));
        assert_eq!(fragments[0].get_str("block_start_time"), Some("2024-01-01 10:00:00"));

        // two overlap lines: the last two lines of a block open the next one
        let first_lines: Vec<&str> = fragments[0].content.lines().collect();
        let second_lines: Vec<&str> = fragments[1].content.lines().collect();
        assert_eq!(&first_lines[first_lines.len() - 2..], &second_lines[..2]);
    }

    #[test]
    fn test_plain_text_uses_standard_split() {
        let parser = parser();
        let content = "plain words without markers\n".repeat(5);
        let facts = parser.analyze(&content).unwrap();
        let fragments = parser.segment(&content, Path::new("p.txt"), &facts).unwrap();

        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].get_str("chunk_method"), Some("standard"));
        assert_eq!(facts.severity, Severity::Low);
    }
}
