use crate::directives::IncludeRoots;
use crate::error::TransformError;
use crate::transform::{Transformed, Transformer};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Host syntax a document is written in.
#[derive(Debug, Clone)]
pub enum DocumentKind {
    Markdown,
    /// reStructuredText, with the roots `literalinclude` paths resolve from.
    Rst(IncludeRoots),
}

impl DocumentKind {
    pub fn name(&self) -> &'static str {
        match self {
            DocumentKind::Markdown => "markdown",
            DocumentKind::Rst(_) => "rst",
        }
    }
}

/// A document to transform.
///
/// Tasks own their input so they can run in parallel without shared state
/// besides the [`Transformer`].
#[derive(Debug)]
pub struct DocumentTask {
    kind: DocumentKind,
    path: PathBuf,
    content: String,
}

impl DocumentTask {
    pub fn new(kind: DocumentKind, path: PathBuf, content: String) -> Self {
        Self {
            kind,
            path,
            content,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Transforms the document and consumes the task to produce a result.
    pub fn run(self, transformer: &Transformer<'_>) -> DocumentResult {
        log::debug!("Transforming {} ({})", self.path.display(), self.kind.name());

        let start = Instant::now();
        let outcome = match &self.kind {
            DocumentKind::Markdown => transformer.transform_markdown(&self.content),
            DocumentKind::Rst(roots) => transformer.transform_rst(&self.content, roots),
        };
        let duration = start.elapsed();

        DocumentResult {
            path: self.path,
            original: self.content,
            duration,
            outcome,
        }
    }
}

/// Result of transforming a single document.
pub struct DocumentResult {
    path: PathBuf,
    original: String,
    duration: Duration,
    outcome: Result<Transformed, TransformError>,
}

impl DocumentResult {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn transformed(&self) -> Option<&Transformed> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&TransformError> {
        self.outcome.as_ref().err()
    }

    /// New content, if it differs from the input.
    pub fn changed_content(&self) -> Option<&str> {
        self.transformed()
            .filter(|t| t.changed(&self.original))
            .map(|t| t.content.as_str())
    }
}

/// Transforms all tasks in parallel using the provided thread pool.
///
/// Returns a tuple of (results in task order, total parallel duration).
pub fn transform_documents(
    tasks: Vec<DocumentTask>,
    transformer: &Transformer<'_>,
    thread_pool: &rayon::ThreadPool,
) -> (Vec<DocumentResult>, Duration) {
    let parallel_start = Instant::now();
    let results: Vec<DocumentResult> = thread_pool.install(|| {
        tasks
            .into_par_iter()
            .map(|task| task.run(transformer))
            .collect()
    });
    let parallel_duration = parallel_start.elapsed();

    (results, parallel_duration)
}
