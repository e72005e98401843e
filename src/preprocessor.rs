use crate::cache::{Eviction, FileStore, FragmentCache};
use crate::config::{PyTabsConfig, Settings};
use crate::rendering::{transform_documents, DocumentResult};
use crate::reporting;
use crate::task_collector::collect_chapter_tasks;
use crate::transform::Transformer;
use crate::upgrade::{RuffUpgrader, Upgrader};
use anyhow::{Context, Result};
use mdbook::book::{Book, BookItem};
use mdbook::preprocess::{Preprocessor, PreprocessorContext};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An mdBook preprocessor that turns Python code blocks into version tabs.
///
/// # Overview
///
/// Every fenced block tagged with one of the configured languages is
/// upgraded for each Python version in the configured range. When the
/// upgraded code differs between versions, the block is replaced by one tab
/// per distinct rendering:
///
/// ````markdown
/// === "Python 3.7+"
///     ```python
///     from typing import List
///     x: List[int]
///     ```
///
/// ===! "Python 3.9+"
///     ```python
///     x: list[int]
///     ```
/// ````
///
/// # Configuration
///
/// ```toml
/// [preprocessor.pytabs]
/// min_version = "3.7"
/// max_version = "3.12"
/// ```
///
/// # Security
///
/// The upgrader command is validated to prevent command injection: it cannot
/// contain shell metacharacters (`;`, `|`, `&`, `` ` ``) or parent directory
/// traversal (`..`).
pub struct PyTabsPreprocessor {
    upgrader: Option<Arc<dyn Upgrader>>,
}

impl PyTabsPreprocessor {
    pub fn new() -> Self {
        Self { upgrader: None }
    }

    /// Uses `upgrader` instead of the configured command.
    pub fn with_upgrader(upgrader: Arc<dyn Upgrader>) -> Self {
        Self {
            upgrader: Some(upgrader),
        }
    }
}

impl Default for PyTabsPreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor for PyTabsPreprocessor {
    fn name(&self) -> &str {
        "pytabs"
    }

    fn run(&self, ctx: &PreprocessorContext, mut book: Book) -> Result<Book> {
        let config = PyTabsConfig::from_preprocessor_context(ctx)?;
        let settings = config
            .validate()
            .context("Invalid [preprocessor.pytabs] configuration")?;

        let upgrader: Arc<dyn Upgrader> = match &self.upgrader {
            Some(upgrader) => Arc::clone(upgrader),
            None => Arc::new(RuffUpgrader::new(
                config.upgrader.command.clone(),
                config.upgrader.timeout(),
            )),
        };

        let cache = open_cache(&config, &ctx.root);
        if let Some(cache) = &cache {
            cache.mark_build_start();
        }

        let result = process_book(&config, &settings, upgrader.as_ref(), cache.as_ref(), &mut book);

        if let Some(cache) = &cache {
            let persisted = if result.is_ok() {
                cache.finish_build()
            } else {
                cache.abort_build()
            };
            if let Err(e) = persisted {
                log::warn!("Failed to persist cache: {}", e);
            }
        }

        result.map(|()| book)
    }

    fn supports_renderer(&self, renderer: &str) -> bool {
        renderer != "not-supported"
    }
}

/// Opens the persistent cache, or `None` with `no_cache`.
///
/// A cache directory that cannot be created degrades to a memory-only cache.
pub fn open_cache(config: &PyTabsConfig, root: &Path) -> Option<FragmentCache> {
    if config.no_cache {
        return None;
    }

    let store = config
        .resolve_cache_dir(root)
        .and_then(|dir| {
            FileStore::open(&dir)
                .with_context(|| format!("Failed to open cache directory {}", dir.display()))
        });
    match store {
        Ok(store) => {
            log::debug!("Using cache directory: {}", store.root().display());
            Some(FragmentCache::with_store(
                Box::new(store),
                Eviction::OnBuildFinished,
            ))
        }
        Err(e) => {
            log::warn!("{:#}, caching in memory only", e);
            Some(FragmentCache::in_memory(Eviction::OnBuildFinished))
        }
    }
}

fn process_book(
    config: &PyTabsConfig,
    settings: &Settings,
    upgrader: &dyn Upgrader,
    cache: Option<&FragmentCache>,
    book: &mut Book,
) -> Result<()> {
    let tasks = collect_chapter_tasks(book, &settings.languages)?;
    let transformer = Transformer::new(settings, upgrader, cache);

    if tasks.is_empty() {
        reporting::print_summary(&transformer.stats(), None, &[], Default::default());
        return Ok(());
    }

    let thread_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.worker_count())
        .build()
        .context("Failed to create thread pool")?;
    log::debug!(
        "Transforming {} chapter(s) on {} thread(s)",
        tasks.len(),
        thread_pool.current_num_threads()
    );

    let (results, parallel_duration) = transform_documents(tasks, &transformer, &thread_pool);

    let failed_results: Vec<&DocumentResult> = results.iter().filter(|r| !r.success()).collect();
    if !failed_results.is_empty() {
        return reporting::report_failures(&failed_results);
    }
    reporting::report_diagnostics(&results);

    let mut updates: HashMap<PathBuf, String> = results
        .iter()
        .filter_map(|r| {
            r.changed_content()
                .map(|content| (r.path().to_path_buf(), content.to_string()))
        })
        .collect();

    // Process all chapters recursively (including nested ones)
    book.for_each_mut(|item| {
        if let BookItem::Chapter(chapter) = item {
            if let Some(content) = chapter.path.as_ref().and_then(|p| updates.remove(p)) {
                chapter.content = content;
            }
        }
    });

    reporting::print_summary(
        &transformer.stats(),
        cache.map(FragmentCache::stats),
        &results,
        parallel_duration,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_supports_renderer() {
        let preprocessor = PyTabsPreprocessor::new();
        assert!(preprocessor.supports_renderer("html"));
        assert!(preprocessor.supports_renderer("markdown"));
        assert!(!preprocessor.supports_renderer("not-supported"));
        assert_eq!(preprocessor.name(), "pytabs");
    }

    #[test]
    fn test_open_cache_respects_no_cache() {
        let tmp = TempDir::new().unwrap();
        let config = PyTabsConfig {
            no_cache: true,
            ..Default::default()
        };
        assert!(open_cache(&config, tmp.path()).is_none());
    }

    #[test]
    fn test_open_cache_under_root() {
        let tmp = TempDir::new().unwrap();
        let config = PyTabsConfig {
            cache_dir: Some(PathBuf::from("cache")),
            ..Default::default()
        };
        assert!(open_cache(&config, tmp.path()).is_some());
        assert!(tmp.path().join("cache/CACHEDIR.TAG").exists());
    }

    #[test]
    #[serial]
    fn test_default_caches_of_two_books_do_not_evict_each_other() {
        let tmp = TempDir::new().unwrap();
        let (first, second) = (tmp.path().join("first"), tmp.path().join("second"));
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();
        std::env::set_var("XDG_CACHE_HOME", tmp.path().join("xdg"));
        let config = PyTabsConfig::default();
        let ok = |value: &str| -> Result<String, std::convert::Infallible> { Ok(value.to_string()) };

        let cache = open_cache(&config, &first).unwrap();
        cache.mark_build_start();
        cache.get_or_compute("from-first", || ok("1")).unwrap();
        cache.finish_build().unwrap();

        let cache = open_cache(&config, &second).unwrap();
        cache.mark_build_start();
        cache.get_or_compute("from-second", || ok("2")).unwrap();
        cache.finish_build().unwrap();

        let reopened = open_cache(&config, &first).unwrap();
        std::env::remove_var("XDG_CACHE_HOME");
        assert_eq!(reopened.get("from-first").as_deref(), Some("1"));
        assert_eq!(reopened.get("from-second"), None);
    }
}
