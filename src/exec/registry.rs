//! Artifact sources and the per-build registry.
//!
//! Leaf steps produce [`ArtifactSource`]s and register them under a
//! [`SourceName`]; every later step in the same build can stream their
//! contents. The registry is the only shared mutable state of a build.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::core::types::SourceName;

/// An async reader over one artifact file.
pub type ArtifactReader = Box<dyn AsyncRead + Send + Unpin>;

/// Errors from artifact lookup and streaming.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// No source registered under the requested name.
    #[error("unknown artifact source: {0}")]
    UnknownSource(SourceName),

    /// A registry file path must be of the form `<source>/<rest>`.
    #[error("malformed artifact path: {0}")]
    MalformedPath(String),

    /// The source has no file at the requested path.
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A handle to the bytes produced by a step.
///
/// Read-only once registered; the producing step owns the backing
/// resources and frees them on release.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Stream the entire tree into the destination.
    async fn stream_to(&self, dest: &dyn ArtifactDestination) -> Result<(), ArtifactError>;

    /// Stream a single named file.
    async fn stream_file(&self, path: &str) -> Result<ArtifactReader, ArtifactError>;
}

/// A sink that artifact trees are streamed into.
#[async_trait]
pub trait ArtifactDestination: Send + Sync {
    async fn stream_in(&self, path: &str, contents: ArtifactReader) -> Result<(), ArtifactError>;
}

#[derive(Default)]
struct Sources {
    order: Vec<SourceName>,
    by_name: HashMap<SourceName, Arc<dyn ArtifactSource>>,
}

/// Named map of artifact sources scoped to one build.
///
/// Registration is last-writer-wins; a name keeps its original position
/// in the enumeration order when re-registered. Reads and writes are
/// serialized, so callers observe a linearizable history, and
/// [`snapshot`](ArtifactRegistry::snapshot) returns a stable view.
#[derive(Default)]
pub struct ArtifactRegistry {
    sources: RwLock<Sources>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under a name, replacing any previous holder.
    pub fn register(&self, name: SourceName, source: Arc<dyn ArtifactSource>) {
        let mut sources = self.sources.write().expect("registry lock poisoned");
        if !sources.by_name.contains_key(&name) {
            sources.order.push(name.clone());
        }
        sources.by_name.insert(name, source);
    }

    /// Look up the source registered under a name.
    pub fn lookup(&self, name: &SourceName) -> Option<Arc<dyn ArtifactSource>> {
        let sources = self.sources.read().expect("registry lock poisoned");
        sources.by_name.get(name).cloned()
    }

    /// A stable snapshot of all sources, in registration order.
    pub fn snapshot(&self) -> Vec<(SourceName, Arc<dyn ArtifactSource>)> {
        let sources = self.sources.read().expect("registry lock poisoned");
        sources
            .order
            .iter()
            .map(|name| {
                let source = sources.by_name[name].clone();
                (name.clone(), source)
            })
            .collect()
    }

    /// Stream a file addressed as `<source>/<rest>` from the named source.
    pub async fn stream_file(&self, path: &str) -> Result<ArtifactReader, ArtifactError> {
        let (name, rest) = path
            .split_once('/')
            .filter(|(name, rest)| !name.is_empty() && !rest.is_empty())
            .ok_or_else(|| ArtifactError::MalformedPath(path.to_string()))?;

        let name = SourceName::new(name);
        let source = self
            .lookup(&name)
            .ok_or(ArtifactError::UnknownSource(name))?;

        source.stream_file(rest).await
    }
}

/// Prefixes every streamed path with the source's registered name.
struct ScopedDestination<'a> {
    prefix: &'a str,
    dest: &'a dyn ArtifactDestination,
}

#[async_trait]
impl ArtifactDestination for ScopedDestination<'_> {
    async fn stream_in(&self, path: &str, contents: ArtifactReader) -> Result<(), ArtifactError> {
        self.dest
            .stream_in(&format!("{}/{}", self.prefix, path), contents)
            .await
    }
}

/// The registry is itself a source: the union of everything registered,
/// each tree scoped under its name.
#[async_trait]
impl ArtifactSource for ArtifactRegistry {
    async fn stream_to(&self, dest: &dyn ArtifactDestination) -> Result<(), ArtifactError> {
        for (name, source) in self.snapshot() {
            let scoped = ScopedDestination {
                prefix: name.as_str(),
                dest,
            };
            source.stream_to(&scoped).await?;
        }
        Ok(())
    }

    async fn stream_file(&self, path: &str) -> Result<ArtifactReader, ArtifactError> {
        ArtifactRegistry::stream_file(self, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::AsyncReadExt;
    use tokio::sync::Mutex;

    /// In-memory source serving a fixed set of files.
    struct StaticSource {
        files: HashMap<String, Vec<u8>>,
    }

    impl StaticSource {
        fn new(files: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                files: files
                    .iter()
                    .map(|(path, contents)| (path.to_string(), contents.as_bytes().to_vec()))
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl ArtifactSource for StaticSource {
        async fn stream_to(&self, dest: &dyn ArtifactDestination) -> Result<(), ArtifactError> {
            for (path, contents) in &self.files {
                dest.stream_in(path, Box::new(Cursor::new(contents.clone())))
                    .await?;
            }
            Ok(())
        }

        async fn stream_file(&self, path: &str) -> Result<ArtifactReader, ArtifactError> {
            let contents = self
                .files
                .get(path)
                .ok_or_else(|| ArtifactError::FileNotFound(path.to_string()))?;
            Ok(Box::new(Cursor::new(contents.clone())))
        }
    }

    /// Destination that records everything streamed into it.
    #[derive(Default)]
    struct CollectingDestination {
        files: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl ArtifactDestination for CollectingDestination {
        async fn stream_in(
            &self,
            path: &str,
            mut contents: ArtifactReader,
        ) -> Result<(), ArtifactError> {
            let mut buf = Vec::new();
            contents.read_to_end(&mut buf).await?;
            self.files.lock().await.push((path.to_string(), buf));
            Ok(())
        }
    }

    async fn read_all(mut reader: ArtifactReader) -> String {
        let mut buf = String::new();
        reader.read_to_string(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = ArtifactRegistry::new();
        let source = StaticSource::new(&[("file", "contents")]);

        registry.register(SourceName::new("in"), source);

        assert!(registry.lookup(&SourceName::new("in")).is_some());
        assert!(registry.lookup(&SourceName::new("missing")).is_none());
    }

    #[tokio::test]
    async fn test_snapshot_preserves_registration_order() {
        let registry = ArtifactRegistry::new();
        for name in ["c", "a", "b"] {
            registry.register(SourceName::new(name), StaticSource::new(&[]));
        }

        let names: Vec<String> = registry
            .snapshot()
            .into_iter()
            .map(|(name, _)| name.as_str().to_string())
            .collect();

        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_register_is_last_writer_wins_and_keeps_position() {
        let registry = ArtifactRegistry::new();
        registry.register(
            SourceName::new("in"),
            StaticSource::new(&[("file", "old")]),
        );
        registry.register(SourceName::new("other"), StaticSource::new(&[]));
        registry.register(
            SourceName::new("in"),
            StaticSource::new(&[("file", "new")]),
        );

        let reader = registry.stream_file("in/file").await.unwrap();
        assert_eq!(read_all(reader).await, "new");

        let names: Vec<String> = registry
            .snapshot()
            .into_iter()
            .map(|(name, _)| name.as_str().to_string())
            .collect();
        assert_eq!(names, vec!["in", "other"]);
    }

    #[tokio::test]
    async fn test_stream_file_dispatches_to_named_source() {
        let registry = ArtifactRegistry::new();
        registry.register(
            SourceName::new("in"),
            StaticSource::new(&[("dir/file.txt", "hello")]),
        );

        let reader = registry.stream_file("in/dir/file.txt").await.unwrap();

        assert_eq!(read_all(reader).await, "hello");
    }

    #[tokio::test]
    async fn test_stream_file_unknown_source() {
        let registry = ArtifactRegistry::new();

        let err = match registry.stream_file("nope/file").await {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };

        assert!(matches!(err, ArtifactError::UnknownSource(_)));
    }

    #[tokio::test]
    async fn test_stream_file_malformed_path() {
        let registry = ArtifactRegistry::new();
        registry.register(SourceName::new("in"), StaticSource::new(&[]));

        for path in ["no-separator", "/leading", "trailing/"] {
            let err = match registry.stream_file(path).await {
                Ok(_) => panic!("expected an error for path {:?}", path),
                Err(e) => e,
            };
            assert!(
                matches!(err, ArtifactError::MalformedPath(_)),
                "path {:?} should be malformed",
                path
            );
        }
    }

    #[tokio::test]
    async fn test_registry_streams_all_sources_scoped_by_name() {
        let registry = ArtifactRegistry::new();
        registry.register(
            SourceName::new("first"),
            StaticSource::new(&[("a.txt", "1")]),
        );
        registry.register(
            SourceName::new("second"),
            StaticSource::new(&[("b.txt", "2")]),
        );

        let dest = CollectingDestination::default();
        ArtifactSource::stream_to(&registry, &dest).await.unwrap();

        let mut paths: Vec<String> = dest
            .files
            .lock()
            .await
            .iter()
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["first/a.txt", "second/b.txt"]);
    }

    #[tokio::test]
    async fn test_concurrent_registration_is_safe() {
        let registry = Arc::new(ArtifactRegistry::new());

        let mut handles = vec![];
        for i in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.register(
                    SourceName::new(format!("source-{}", i)),
                    StaticSource::new(&[]),
                );
                registry.lookup(&SourceName::new(format!("source-{}", i)))
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }
        assert_eq!(registry.snapshot().len(), 16);
    }
}
