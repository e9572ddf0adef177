// Log classification and parsing crate
// Detects the dialect of a diagnostic log, analyzes its structure and splits it into
// fragments ready for indexing

pub mod types;
pub mod config;
pub mod patterns;
pub mod facts;
pub mod fragment;
pub mod splitter;
pub mod base_parser;
pub mod parsers;
pub mod registry_parser;
pub mod batch;

// Individual parser implementations
pub mod general_parser;
pub mod anr_parser;
pub mod tombstone_parser;

// Re-export main types
pub use types::*;
pub use config::ParserConfig;
pub use facts::{StructuralFacts, FormatFacts, GeneralFacts, AnrFacts, TombstoneFacts, CrashType, ThreadState};
pub use fragment::FragmentBuilder;
pub use base_parser::{LogParser, LogSample};
pub use registry_parser::ParserRegistry;
pub use batch::{parse_files, BatchStatus, FileOutcome};

// Re-export parsers
pub use general_parser::GeneralLogParser;
pub use anr_parser::AnrParser;
pub use tombstone_parser::TombstoneParser;
