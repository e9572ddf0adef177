use crate::fragment::{merge_facts, FragmentBuilder};
use crate::patterns::PatternTable;
use crate::splitter::split_spans;
use crate::{Fragment, LogFormat, ParseError, ParserConfig, StructuralFacts};
use std::path::Path;
use tracing::{debug, info};

/// Detect / analyze / segment logic for one log dialect.
///
/// Implementations must be pure functions of their inputs so a single registry can be
/// shared across threads parsing different files.
pub trait LogParser: Send + Sync {
    /// The dialect this parser handles
    fn format(&self) -> LogFormat;

    /// Identity recorded in every fragment's `parser` field (e.g. "anr_parser")
    fn name(&self) -> &'static str;

    /// Checks if this parser recognizes the content, using the path and a bounded sample
    fn can_parse(&self, path: &Path, sample: &str) -> bool;

    /// The compiled pattern table this parser reads from
    fn patterns(&self) -> &PatternTable;

    /// Extracts per-file facts
    fn analyze(&self, content: &str) -> Result<StructuralFacts, ParseError>;

    /// Splits the content into fragments, guided by the facts
    fn segment(
        &self,
        content: &str,
        path: &Path,
        facts: &StructuralFacts,
    ) -> Result<Vec<Fragment>, ParseError>;

    /// Runs analyze, then segment, then stamps every fragment with the file's facts.
    fn parse(&self, path: &Path, content: &str) -> Result<Vec<Fragment>, ParseError> {
        let facts = self.analyze(content)?;
        debug!(parser = self.name(), severity = facts.severity.as_str(), "Structure analyzed");

        let fragments = self.segment(content, path, &facts)?;
        let fragments = attach_facts(fragments, &facts)?;

        info!(
            "{} parsing complete: {} fragments from {}",
            self.format(),
            fragments.len(),
            path.display()
        );
        Ok(fragments)
    }
}

/// Adds `log_type`, `parser` and `file_type` to every fragment, then the remaining facts
/// without overwriting fragment-specific keys. Blank fragments are dropped.
pub fn attach_facts(
    fragments: Vec<Fragment>,
    facts: &StructuralFacts,
) -> Result<Vec<Fragment>, ParseError> {
    let meta = facts.to_metadata()?;

    Ok(fragments
        .into_iter()
        .filter(|fragment| !fragment.content.trim().is_empty())
        .map(|mut fragment| {
            fragment
                .metadata
                .insert("log_type".to_string(), facts.format.into());
            fragment
                .metadata
                .insert("parser".to_string(), facts.parser.into());
            fragment
                .metadata
                .insert("file_type".to_string(), "log".into());
            merge_facts(&mut fragment, &meta);
            fragment
        })
        .collect())
}

/// File content read once, plus the prefix the detectors look at.
#[derive(Debug, Clone)]
pub struct LogSample {
    content: String,
    sample_end: usize,
}

impl LogSample {
    pub fn new(content: String, sample_chars: usize) -> Self {
        let sample_end = sample_prefix(&content, sample_chars).len();
        Self { content, sample_end }
    }

    /// Reads `path`, replacing invalid UTF-8 sequences instead of failing.
    pub fn read(path: &Path, sample_chars: usize) -> Result<Self, ParseError> {
        let bytes = std::fs::read(path).map_err(|source| ParseError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let content = String::from_utf8_lossy(&bytes).into_owned();
        Ok(Self::new(content, sample_chars))
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sample(&self) -> &str {
        &self.content[..self.sample_end]
    }
}

/// The first `sample_chars` characters of `content`.
pub fn sample_prefix(content: &str, sample_chars: usize) -> &str {
    let end = content
        .char_indices()
        .nth(sample_chars)
        .map_or(content.len(), |(idx, _)| idx);
    &content[..end]
}

/// The standard strategy: recursive separator split with overlap.
///
/// Shared by every format that has no better structure to exploit. Each fragment records
/// its byte span so overlapping text can be dropped when stitching fragments back together.
pub fn standard_fragments(content: &str, path: &Path, config: &ParserConfig) -> Vec<Fragment> {
    split_spans(content, config.chunk_size, config.chunk_overlap)
        .into_iter()
        .enumerate()
        .filter_map(|(index, span)| {
            FragmentBuilder::new(&content[span.clone()])
                .source(path)
                .meta("chunk_method", "standard")
                .meta("chunk_index", index)
                .meta("context_type", "general")
                .meta("start_offset", span.start)
                .meta("end_offset", span.end)
                .build()
        })
        .collect()
}

/// Snaps a byte offset down to the nearest char boundary.
pub(crate) fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Snaps a byte offset up to the nearest char boundary.
pub(crate) fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
