//! Central parser registration module
//!
//! The default probing order lives here. When adding a new log dialect, you only need to:
//! 1. Create your parser file (e.g., logcat_parser.rs) implementing `LogParser`
//! 2. Add its pattern table and indicator set to `patterns.rs`
//! 3. Add it to the `all_parsers()` function below, ahead of the general parser
//!
//! No need to modify base_parser.rs or registry_parser.rs.

use crate::anr_parser::AnrParser;
use crate::base_parser::LogParser;
use crate::general_parser::GeneralLogParser;
use crate::tombstone_parser::TombstoneParser;
use crate::{ParseError, ParserConfig};
use tracing::info;

/// Boxes a list of parsers as trait objects
///
/// Usage:
/// ```rust,ignore
/// let parsers = register_parsers![
///     AnrParser::new(&config)?,
///     GeneralLogParser::new(&config)?,
/// ];
/// ```
#[macro_export]
macro_rules! register_parsers {
    ($($parser:expr),* $(,)?) => {
        vec![
            $(Box::new($parser) as Box<dyn $crate::base_parser::LogParser>),*
        ]
    };
}

/// Returns every built-in parser in probing order.
///
/// Specific dialects come first. The general parser is last because it accepts almost
/// anything with a timestamp or a level token.
///
/// ```rust,ignore
/// pub fn all_parsers(config: &ParserConfig) -> Result<Vec<Box<dyn LogParser>>, ParseError> {
///     Ok(register_parsers![
///         AnrParser::new(config)?,
///         LogcatParser::new(config)?,  // <-- Add your parser here
///         GeneralLogParser::new(config)?,
///     ])
/// }
/// ```
pub fn all_parsers(config: &ParserConfig) -> Result<Vec<Box<dyn LogParser>>, ParseError> {
    info!("Initializing parser collection");

    Ok(register_parsers![
        AnrParser::new(config)?,
        TombstoneParser::new(config)?,
        GeneralLogParser::new(config)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogFormat;

    #[test]
    fn test_default_order() {
        let parsers = all_parsers(&ParserConfig::default()).unwrap();
        let formats: Vec<LogFormat> = parsers.iter().map(|p| p.format()).collect();

        assert_eq!(
            formats,
            vec![LogFormat::AndroidAnr, LogFormat::AndroidTombstone, LogFormat::General]
        );
        for parser in &parsers {
            assert_eq!(parser.patterns().format(), parser.format());
            assert!(!parser.patterns().is_empty());
        }
    }

    #[test]
    fn test_register_macro() {
        let config = ParserConfig::default();
        let parsers = register_parsers![GeneralLogParser::new(&config).unwrap()];
        assert_eq!(parsers.len(), 1);
        assert_eq!(parsers[0].name(), "general_parser");
    }
}
