//
// extract.rs
//
// Extractor strategies and source access used by reindexing
//

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::element::{Element, Extraction, Use};
use crate::store::Store;

/// Produces the elements and uses of one store.
///
/// Selected per project kind. Elements may be emitted in any order.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, store: &Store, text: &str) -> anyhow::Result<Extraction>;
}

/// Extractor for project kinds without code intelligence.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExtractor;

#[async_trait]
impl Extractor for NoopExtractor {
    async fn extract(&self, _store: &Store, _text: &str) -> anyhow::Result<Extraction> {
        Ok(Extraction::default())
    }
}

/// One line of the JSON-lines extraction format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "lowercase")]
pub enum Record {
    Element(Element),
    Use(Use),
}

/// Parses a JSON-lines extraction stream. Blank lines are skipped.
pub fn parse_json_lines<R: BufRead>(reader: R) -> anyhow::Result<Extraction> {
    let mut extraction = Extraction::default();
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read extraction line {}", i + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(&line)
            .with_context(|| format!("Invalid extraction record on line {}", i + 1))?;
        match record {
            Record::Element(elem) => extraction.elements.push(elem),
            Record::Use(u) => extraction.uses.push(u),
        }
    }
    Ok(extraction)
}

/// Reads extractions written next to each source file by an external front end,
/// e.g. `src/Main.java.codex.jsonl` for `src/Main.java`.
#[derive(Debug, Clone)]
pub struct SidecarExtractor {
    suffix: String,
}

impl Default for SidecarExtractor {
    fn default() -> Self {
        Self::new(".codex.jsonl")
    }
}

impl SidecarExtractor {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    pub fn sidecar_path(&self, store: &Store) -> Option<PathBuf> {
        let path = store.path()?;
        let mut name = path.file_name()?.to_os_string();
        name.push(&self.suffix);
        Some(path.with_file_name(name))
    }
}

#[async_trait]
impl Extractor for SidecarExtractor {
    async fn extract(&self, store: &Store, _text: &str) -> anyhow::Result<Extraction> {
        let path = self
            .sidecar_path(store)
            .ok_or_else(|| anyhow!("No sidecar location for {}", store))?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        parse_json_lines(content.as_bytes())
    }
}

/// Read access to the full text of a store.
#[async_trait]
pub trait SourceReader: Send + Sync {
    async fn read(&self, store: &Store) -> anyhow::Result<String>;
}

/// Reads files from disk. Archive entries are not readable.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsReader;

#[async_trait]
impl SourceReader for FsReader {
    async fn read(&self, store: &Store) -> anyhow::Result<String> {
        let path = store
            .path()
            .ok_or_else(|| anyhow!("Cannot read archive entry {}", store))?;
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Kind, Ref};

    const LINES: &str = r#"
{"record":"element","kind":"Type","name":"Foo","offset":6,"length":3,"public":true}
{"record":"element","kind":"Func","name":"bar","path":["Foo"],"offset":18,"length":3,"signature":"def bar(): Int"}

{"record":"use","target":["bar","Foo"],"kind":"Func","offset":40,"length":3}
"#;

    #[test]
    fn test_parse_json_lines() {
        let extraction = parse_json_lines(LINES.as_bytes()).unwrap();
        assert_eq!(extraction.elements.len(), 2);
        assert_eq!(extraction.elements[1].path, vec!["Foo"]);
        assert_eq!(
            extraction.elements[1].signature.as_deref(),
            Some("def bar(): Int")
        );
        assert_eq!(extraction.uses.len(), 1);
        assert_eq!(extraction.uses[0].target, Ref::new(["bar", "Foo"]));
        assert_eq!(extraction.uses[0].kind, Kind::Func);
    }

    #[test]
    fn test_parse_error_names_line() {
        let err = parse_json_lines("\n{\"record\":\"element\"}\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[test]
    fn test_sidecar_path() {
        let extractor = SidecarExtractor::default();
        assert_eq!(
            extractor.sidecar_path(&Store::file("/p/src/Main.java")),
            Some(PathBuf::from("/p/src/Main.java.codex.jsonl"))
        );
        assert_eq!(
            extractor.sidecar_path(&Store::entry("/l.jar", "a/B.java")),
            None
        );
    }

    #[tokio::test]
    async fn test_sidecar_extractor_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("Foo.scala");
        std::fs::write(&source, "class Foo").unwrap();
        std::fs::write(dir.path().join("Foo.scala.codex.jsonl"), LINES).unwrap();

        let extraction = SidecarExtractor::default()
            .extract(&Store::file(&source), "class Foo")
            .await
            .unwrap();
        assert_eq!(extraction.elements.len(), 2);
    }

    #[tokio::test]
    async fn test_sidecar_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = SidecarExtractor::default()
            .extract(&Store::file(dir.path().join("None.java")), "")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fs_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rs");
        std::fs::write(&path, "fn a() {}").unwrap();
        assert_eq!(FsReader.read(&Store::file(&path)).await.unwrap(), "fn a() {}");
        assert!(FsReader.read(&Store::entry("/x.jar", "a.rs")).await.is_err());
    }
}
