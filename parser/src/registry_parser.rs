use crate::base_parser::{sample_prefix, LogParser, LogSample};
use crate::general_parser::GeneralLogParser;
use crate::parsers::all_parsers;
use crate::{Fragment, LogFormat, ParseError, ParserConfig};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// ParserRegistry - holds the parsers in probing order and picks one per file
///
/// ## Adding a New Parser
///
/// To add a new built-in parser, you only need to modify `parsers.rs`. No changes to this
/// file are required! See `parsers.rs` for instructions.
///
/// The registry is read-only once built, so one instance can be shared behind an `Arc`
/// by any number of concurrent parses.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn LogParser>>,
    fallback: GeneralLogParser,
    config: ParserConfig,
}

impl ParserRegistry {
    /// Create a new registry with all parsers from the central registry
    ///
    /// Every pattern table is compiled here, once.
    pub fn new(config: ParserConfig) -> Result<Self, ParseError> {
        info!("Initializing ParserRegistry");
        let parsers = all_parsers(&config)?;
        Self::with_parsers(config, parsers)
    }

    /// Create a registry probing exactly `parsers`, in order.
    ///
    /// The general parser is still kept aside as the unconditional fallback.
    pub fn with_parsers(
        config: ParserConfig,
        parsers: Vec<Box<dyn LogParser>>,
    ) -> Result<Self, ParseError> {
        let fallback = GeneralLogParser::new(&config)?;

        for parser in &parsers {
            let table = parser.patterns();
            debug!("Parser '{}' compiled {} patterns", parser.name(), table.len());
            if table.format() != parser.format() {
                warn!(
                    "Parser '{}' handles {} but reads the {} pattern table",
                    parser.name(),
                    parser.format(),
                    table.format()
                );
            }
        }

        info!(
            "Registered {} parsers: {}",
            parsers.len(),
            parsers.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ")
        );

        Ok(Self {
            parsers,
            fallback,
            config,
        })
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Register a custom parser ahead of a trailing general parser
    pub fn register(&mut self, parser: Box<dyn LogParser>) {
        let index = match self.parsers.last() {
            Some(last) if last.format() == LogFormat::General => self.parsers.len() - 1,
            _ => self.parsers.len(),
        };
        self.register_at(index, parser);
    }

    /// Register a custom parser at an explicit priority (0 is probed first)
    pub fn register_at(&mut self, index: usize, parser: Box<dyn LogParser>) {
        let index = index.min(self.parsers.len());
        info!("Registering parser '{}' at position {}", parser.name(), index);
        self.parsers.insert(index, parser);
    }

    /// Formats in probing order
    pub fn available_formats(&self) -> Vec<LogFormat> {
        self.parsers.iter().map(|p| p.format()).collect()
    }

    /// Get the first parser handling `format`
    pub fn get_parser(&self, format: LogFormat) -> Option<&dyn LogParser> {
        debug!("Looking up parser for format: {}", format);
        let result = self
            .parsers
            .iter()
            .find(|p| p.format() == format)
            .map(|p| p.as_ref());

        match result {
            Some(parser) => Some(parser),
            None if format == LogFormat::General => Some(&self.fallback),
            None => {
                warn!("Parser not found for format: {}", format);
                None
            }
        }
    }

    /// The format whose parser would be tried first for this sample.
    pub fn detect_format(&self, path: &Path, sample: &str) -> LogFormat {
        self.parsers
            .iter()
            .find(|p| p.can_parse(path, sample))
            .map_or(LogFormat::General, |p| p.format())
    }

    /// Reads `path` and turns it into fragments.
    ///
    /// Never fails: an unreadable file is logged and yields no fragments, and a parser that
    /// errors or panics is skipped in favour of the next one.
    pub fn parse(&self, path: &Path) -> Vec<Fragment> {
        info!("Parsing log file: {}", path.display());

        let sample = match LogSample::read(path, self.config.sample_chars) {
            Ok(sample) => sample,
            Err(e) => {
                error!("{}", e);
                return Vec::new();
            }
        };
        debug!(
            "Read {} bytes, {} byte sample for format detection",
            sample.content().len(),
            sample.sample().len()
        );

        self.probe(path, sample.content(), sample.sample())
    }

    /// Same pipeline as [`parse`](Self::parse) for content already in memory.
    pub fn parse_content(&self, path: &Path, content: &str) -> Vec<Fragment> {
        self.probe(path, content, sample_prefix(content, self.config.sample_chars))
    }

    fn probe(&self, path: &Path, content: &str, sample: &str) -> Vec<Fragment> {
        if content.is_empty() {
            debug!("{} is empty, nothing to parse", path.display());
            return Vec::new();
        }

        for parser in &self.parsers {
            let recognized = parser.can_parse(path, sample);
            debug!("Parser '{}' can_parse result: {}", parser.name(), recognized);
            if !recognized {
                continue;
            }

            match run_guarded(parser.as_ref(), path, content) {
                Ok(fragments) if !fragments.is_empty() => {
                    info!("Selected parser: {}", parser.name());
                    return fragments;
                }
                Ok(_) => warn!(
                    "Parser '{}' produced no fragments for {}, trying next",
                    parser.name(),
                    path.display()
                ),
                Err(e) => warn!(
                    "Parser '{}' failed on {}: {}, trying next",
                    parser.name(),
                    path.display(),
                    e
                ),
            }
        }

        info!("Falling back to general parser for {}", path.display());
        match run_guarded(&self.fallback, path, content) {
            Ok(fragments) => fragments,
            Err(e) => {
                error!("General fallback failed on {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }
}

/// Runs a full parse, turning a panic into [`ParseError::Panicked`].
fn run_guarded(
    parser: &dyn LogParser,
    path: &Path,
    content: &str,
) -> Result<Vec<Fragment>, ParseError> {
    panic::catch_unwind(AssertUnwindSafe(|| parser.parse(path, content))).unwrap_or_else(
        |payload| {
            Err(ParseError::Panicked {
                parser: parser.name().to_string(),
                message: panic_message(&*payload),
            })
        },
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
