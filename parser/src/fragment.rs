use crate::{Fragment, MetaValue, Metadata};
use std::path::Path;

/// Builds a [`Fragment`] from text and metadata.
///
/// `build` returns `None` for whitespace-only content so empty fragments never reach the
/// index.
#[derive(Debug, Clone)]
pub struct FragmentBuilder {
    content: String,
    metadata: Metadata,
}

impl FragmentBuilder {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    /// Records the originating path.
    pub fn source(mut self, path: &Path) -> Self {
        self.metadata
            .insert("source".to_string(), path.display().to_string().into());
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Like [`meta`](Self::meta) but skips `None`.
    pub fn meta_opt<V: Into<MetaValue>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.meta(key, value),
            None => self,
        }
    }

    /// Finishes the fragment, stamping `chunk_size` with the content length.
    pub fn build(mut self) -> Option<Fragment> {
        if self.content.trim().is_empty() {
            return None;
        }
        self.metadata
            .insert("chunk_size".to_string(), self.content.len().into());
        Some(Fragment {
            content: self.content,
            metadata: self.metadata,
        })
    }
}

/// Copies every entry of `facts` into `fragment` unless the fragment already has that key.
pub fn merge_facts(fragment: &mut Fragment, facts: &Metadata) {
    for (key, value) in facts {
        fragment
            .metadata
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_content_is_dropped() {
        assert!(FragmentBuilder::new("  \n\t ").build().is_none());
    }

    #[test]
    fn test_builder_records_source_and_size() {
        let fragment = FragmentBuilder::new("hello")
            .source(Path::new("/tmp/app.log"))
            .meta("chunk_method", "standard")
            .meta_opt::<i64>("pid", None)
            .build()
            .unwrap();

        assert_eq!(fragment.get_str("source"), Some("/tmp/app.log"));
        assert_eq!(fragment.get_i64("chunk_size"), Some(5));
        assert!(fragment.get("pid").is_none());
        assert!(fragment.is_pre_chunked());
    }

    #[test]
    fn test_merge_keeps_fragment_keys() {
        let mut fragment = FragmentBuilder::new("main stack")
            .meta("severity", "critical")
            .build()
            .unwrap();
        let mut facts = Metadata::new();
        facts.insert("severity".to_string(), "low".into());
        facts.insert("total_threads".to_string(), 4usize.into());

        merge_facts(&mut fragment, &facts);

        assert_eq!(fragment.get_str("severity"), Some("critical"));
        assert_eq!(fragment.get_i64("total_threads"), Some(4));
    }
}
