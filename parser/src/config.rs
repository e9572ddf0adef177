use serde::{Deserialize, Serialize};

/// Tuning knobs for detection and segmentation.
///
/// All sizes are in bytes of UTF-8 text. Missing fields fall back to the defaults when
/// deserialized, so callers can keep only the overrides in their own config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Target fragment size for the standard and time-block strategies
    pub chunk_size: usize,
    /// Overlap carried between consecutive standard / time-block fragments
    pub chunk_overlap: usize,
    /// Number of characters inspected by the format detectors
    pub sample_chars: usize,
    /// Context kept before an error keyword in the error-context strategy
    pub error_context_before: usize,
    /// Context kept after an error keyword in the error-context strategy
    pub error_context_after: usize,
    /// Frames kept in the condensed tombstone backtrace
    pub max_backtrace_frames: usize,
    /// Memory map lines kept in the tombstone technical fragment
    pub memory_map_lines: usize,
    /// Lines kept before the first crash marker in the tombstone context fragment
    pub crash_context_lines: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            chunk_overlap: 200,
            sample_chars: 5000,
            error_context_before: 1000,
            error_context_after: 2000,
            max_backtrace_frames: 10,
            memory_map_lines: 20,
            crash_context_lines: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ParserConfig = serde_json::from_str(r#"{"chunk_size": 500}"#).unwrap();

        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.sample_chars, 5000);
    }
}
