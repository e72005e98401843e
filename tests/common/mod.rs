//! Common test utilities for integration tests
//!
//! This module contains shared test fixtures and helper functions used across
//! integration tests. These utilities are not compiled into the library.

use anyhow::Result;
use mdbook::book::{Book, BookItem};
use mdbook::preprocess::{CmdPreprocessor, Preprocessor};
use mdbook::MDBook;
use mdbook_pytabs::{PyTabsPreprocessor, PythonVersion, UpgradeError, Upgrader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Isolated test fixture with automatic cleanup
///
/// Creates a temporary copy of a test fixture book, allowing tests to run
/// in parallel without interfering with each other. Fixtures keep their
/// cache under the book root, so the copy isolates the cache too.
pub struct TestFixture {
    _book_dir: TempDir,
    book_path: PathBuf,
}

impl TestFixture {
    /// Create a new test fixture from the default basic_book directory
    pub fn new() -> Result<Self> {
        Self::new_from("tests/fixtures/basic_book")
    }

    /// Create a new test fixture from a specific source directory
    pub fn new_from(source: impl AsRef<Path>) -> Result<Self> {
        let book_dir = TempDir::new()?;

        // Copy fixture to temp location
        copy_dir_all(source.as_ref(), book_dir.path())?;

        Ok(Self {
            book_path: book_dir.path().to_path_buf(),
            _book_dir: book_dir,
        })
    }

    /// Get the path to the book directory
    pub fn book_path(&self) -> &Path {
        &self.book_path
    }

    /// Appends keys to `[preprocessor.pytabs]`, the last table of every
    /// fixture's book.toml.
    pub fn append_config(&self, lines: &str) -> Result<()> {
        let path = self.book_path.join("book.toml");
        let mut content = std::fs::read_to_string(&path)?;
        content.push_str(lines);
        content.push('\n');
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overwrites a chapter source file.
    pub fn write_chapter(&self, relative: &str, content: &str) -> Result<()> {
        std::fs::write(self.book_path.join("src").join(relative), content)?;
        Ok(())
    }

    /// Number of entries in the fixture's persistent cache.
    pub fn cached_entries(&self) -> usize {
        std::fs::read_dir(self.book_path.join(".pytabs-cache/content"))
            .map(|dir| dir.count())
            .unwrap_or(0)
    }
}

/// Deterministic stand-in for ruff that counts its invocations.
///
/// From 3.9 on, `List[`/`Set[` become `list[`/`set[` and the matching
/// `typing` import is dropped. Source containing `syntax error` is rejected.
#[derive(Default)]
pub struct StubUpgrader {
    calls: AtomicUsize,
}

impl StubUpgrader {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Upgrader for StubUpgrader {
    fn upgrade(&self, source: &str, target: PythonVersion) -> Result<String, UpgradeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if source.contains("syntax error") {
            return Err(UpgradeError::Unparseable {
                target,
                message: "invalid syntax".to_string(),
            });
        }
        if target < PythonVersion::new(3, 9) {
            return Ok(source.to_string());
        }
        Ok(source
            .replace("from typing import List\n", "")
            .replace("from typing import Set\n", "")
            .replace("List[", "list[")
            .replace("Set[", "set["))
    }
}

/// Helper to run preprocessor on a test book
///
/// Wraps an MDBook instance and simulates how mdBook would invoke the
/// preprocessor, with [`StubUpgrader`] in place of ruff.
pub struct PreprocessorTest {
    book: MDBook,
    upgrader: Arc<StubUpgrader>,
}

impl PreprocessorTest {
    /// Create a preprocessor test from a fixture
    pub fn from_fixture(fixture: &TestFixture) -> Result<Self> {
        let book = MDBook::load(fixture.book_path())?;
        Ok(Self {
            book,
            upgrader: Arc::new(StubUpgrader::default()),
        })
    }

    /// Upgrader invocations across all runs of this test.
    pub fn oracle_calls(&self) -> usize {
        self.upgrader.calls()
    }

    /// Run the preprocessor on the test book
    pub fn run(&self) -> Result<Book> {
        // Create JSON input like mdbook would send
        let input_json = serde_json::json!([
            {
                "root": self.book.root,
                "config": self.book.config,
                "renderer": "html",
                "mdbook_version": mdbook::MDBOOK_VERSION,
            },
            self.book.book
        ]);

        let input_str = serde_json::to_string(&input_json)?;
        let (ctx, book) = CmdPreprocessor::parse_input(input_str.as_bytes())?;

        let preprocessor = PyTabsPreprocessor::with_upgrader(self.upgrader.clone());
        preprocessor.run(&ctx, book)
    }
}

/// Content of the chapter at `path` (relative to the book's src directory).
pub fn chapter_content<'a>(book: &'a Book, path: &str) -> Option<&'a str> {
    book.iter().find_map(|item| match item {
        BookItem::Chapter(ch) if ch.path.as_deref() == Some(Path::new(path)) => {
            Some(ch.content.as_str())
        }
        _ => None,
    })
}

/// Recursively copy all files and directories from src to dst
fn copy_dir_all(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<()> {
    std::fs::create_dir_all(&dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        if ty.is_dir() {
            copy_dir_all(entry.path(), dst.as_ref().join(entry.file_name()))?;
        } else {
            std::fs::copy(entry.path(), dst.as_ref().join(entry.file_name()))?;
        }
    }
    Ok(())
}
