use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// The log dialects this crate knows how to classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Application logs with timestamps and/or level tokens (universal fallback)
    General,
    /// Android "Application Not Responding" thread dumps
    AndroidAnr,
    /// Android native crash reports
    AndroidTombstone,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::General => "general",
            LogFormat::AndroidAnr => "android_anr",
            LogFormat::AndroidTombstone => "android_tombstone",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse severity label shared by every format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn is_at_least_high(&self) -> bool {
        *self >= Severity::High
    }
}

/// A scalar metadata value attached to a fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetaValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<u32> for MetaValue {
    fn from(v: u32) -> Self {
        MetaValue::Int(i64::from(v))
    }
}

impl From<usize> for MetaValue {
    fn from(v: usize) -> Self {
        MetaValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::Float(v)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Text(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Text(v)
    }
}

impl From<LogFormat> for MetaValue {
    fn from(v: LogFormat) -> Self {
        MetaValue::Text(v.as_str().to_string())
    }
}

impl From<Severity> for MetaValue {
    fn from(v: Severity) -> Self {
        MetaValue::Text(v.as_str().to_string())
    }
}

pub type Metadata = BTreeMap<String, MetaValue>;

/// The unit handed to indexing: a piece of log text plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub content: String,
    pub metadata: Metadata,
}

impl Fragment {
    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.metadata.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MetaValue::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(MetaValue::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(MetaValue::as_bool)
    }

    /// Fragments that already carry a `chunk_method` must not be split again downstream.
    pub fn is_pre_chunked(&self) -> bool {
        self.metadata.contains_key("chunk_method")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Failed to read {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("Pattern '{name}' is not defined for {format}")]
    MissingPattern { format: LogFormat, name: String },
    #[error("Expected {expected} facts, got {found}")]
    FactsMismatch { expected: LogFormat, found: LogFormat },
    #[error("JSON encode error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Parser '{parser}' panicked: {message}")]
    Panicked { parser: String, message: String },
}
