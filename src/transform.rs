//! Fragment pipeline shared by both hosts.
//!
//! ```text
//! locate -> fingerprint -> cache hit? -> ladder -> tab block -> render -> re-indent
//! ```
//!
//! Rendered blocks are cached at depth zero; the fragment's own indent is
//! applied afterwards, so the same block nested at different depths is
//! computed once.

use crate::cache::{FragmentCache, FragmentKey};
use crate::config::{FailurePolicy, Settings};
use crate::directives::{self, DirectiveRegistry, IncludeRoots};
use crate::error::{Diagnostic, TransformError, UpgradeError};
use crate::extractor::{extract_fragments, line_ending, Segment};
use crate::fragment::CodeFragment;
use crate::ladder::LadderBuilder;
use crate::rst::{self, Node};
use crate::tabs::{indent_lines, render, MarkdownTabs, TabBlock, TabSyntax};
use crate::upgrade::Upgrader;
use crate::version::PythonVersion;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Cached rendering of a fragment whose ladder has a single step. The
/// source block is kept exactly as written.
const UNCHANGED: &str = "";

/// Output of transforming one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub content: String,
    /// Problems that left a fragment untouched.
    pub diagnostics: Vec<Diagnostic>,
    /// Number of fragments handed to the pipeline.
    pub fragments: usize,
}

impl Transformed {
    pub fn changed(&self, original: &str) -> bool {
        self.content != original
    }
}

/// Counters across every document a [`Transformer`] processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformStats {
    pub fragments: usize,
    /// Fragments whose block was computed rather than served from cache.
    pub rendered: usize,
    /// Rendered fragments that became tab sets.
    pub tabbed: usize,
    pub failed: usize,
    pub oracle_calls: usize,
}

#[derive(Debug, Default)]
struct Counters {
    fragments: AtomicUsize,
    rendered: AtomicUsize,
    tabbed: AtomicUsize,
    failed: AtomicUsize,
    oracle_calls: AtomicUsize,
}

/// Turns documents into their tabbed form.
///
/// Shared by reference across worker threads; all state is behind atomics
/// or the cache's own locking.
pub struct Transformer<'a> {
    settings: &'a Settings,
    upgrader: &'a dyn Upgrader,
    cache: Option<&'a FragmentCache>,
    registry: DirectiveRegistry,
    counters: Counters,
}

impl<'a> Transformer<'a> {
    pub fn new(
        settings: &'a Settings,
        upgrader: &'a dyn Upgrader,
        cache: Option<&'a FragmentCache>,
    ) -> Self {
        Self {
            settings,
            upgrader,
            cache,
            registry: DirectiveRegistry::new(settings.compat_mode),
            counters: Counters::default(),
        }
    }

    pub fn settings(&self) -> &Settings {
        self.settings
    }

    pub fn stats(&self) -> TransformStats {
        TransformStats {
            fragments: self.counters.fragments.load(Ordering::Relaxed),
            rendered: self.counters.rendered.load(Ordering::Relaxed),
            tabbed: self.counters.tabbed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            oracle_calls: self.counters.oracle_calls.load(Ordering::Relaxed),
        }
    }

    /// Renders `fragment` through `syntax`, indented for its position.
    ///
    /// Returns `None` when no version changes the code, so the block stays
    /// as written.
    pub fn render_fragment(
        &self,
        fragment: &CodeFragment,
        syntax: &dyn TabSyntax,
    ) -> Result<Option<Vec<String>>, UpgradeError> {
        self.counters.fragments.fetch_add(1, Ordering::Relaxed);

        let key = FragmentKey {
            code: &fragment.code,
            language: &fragment.language,
            range: self.settings.range,
            title_template: self.settings.title.as_str(),
            meta: &fragment.meta,
            syntax: syntax.id(),
            render: self.settings.render,
        }
        .compute_hash();

        let compute = || self.compute_block(fragment, syntax);
        let rendered = match self.cache {
            Some(cache) => cache.get_or_compute(&key, compute)?,
            None => compute()?,
        };

        if rendered == UNCHANGED {
            return Ok(None);
        }
        let lines: Vec<String> = rendered.split('\n').map(str::to_string).collect();
        Ok(Some(indent_lines(&lines, &fragment.indent)))
    }

    fn compute_block(
        &self,
        fragment: &CodeFragment,
        syntax: &dyn TabSyntax,
    ) -> Result<String, UpgradeError> {
        self.counters.rendered.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Building ladder for {} fragment at line {}",
            fragment.language,
            fragment.line
        );

        let counting = |source: &str, target: PythonVersion| {
            self.counters.oracle_calls.fetch_add(1, Ordering::Relaxed);
            self.upgrader.upgrade(source, target)
        };
        let builder = LadderBuilder::new(
            self.settings.range,
            &self.settings.title,
            &self.settings.languages,
            &counting,
        );

        let ladder = builder.build(&fragment.code, &fragment.language)?;
        for skipped in ladder.skipped() {
            log::warn!("line {}: skipping version: {}", fragment.line, skipped);
        }
        if ladder.is_single() {
            return Ok(UNCHANGED.to_string());
        }
        self.counters.tabbed.fetch_add(1, Ordering::Relaxed);

        let block = TabBlock::from_ladder(ladder.into_steps(), self.settings.render.reverse_order);
        Ok(render(&block, fragment, syntax, &self.settings.render).join("\n"))
    }

    /// Applies the failure policy to an upgrade failure.
    fn fail(
        &self,
        error: TransformError,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<(), TransformError> {
        match self.settings.on_upgrade_failure {
            FailurePolicy::Fail => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                Err(error)
            }
            FailurePolicy::Warn => {
                self.warn(&error, diagnostics);
                Ok(())
            }
        }
    }

    /// Records a fragment that is left as written. Locator errors always
    /// end up here, whatever the failure policy.
    fn warn(&self, error: &TransformError, diagnostics: &mut Vec<Diagnostic>) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        let (line, message) = match error {
            TransformError::Upgrade { line, source } => (*line, source.to_string()),
            TransformError::Locate { line, source } => (*line, source.to_string()),
        };
        log::warn!("line {}: {}, leaving block unchanged", line, message);
        diagnostics.push(Diagnostic::new(line, message));
    }

    /// Transforms a markdown document.
    pub fn transform_markdown(&self, content: &str) -> Result<Transformed, TransformError> {
        let doc = extract_fragments(content, &self.settings.languages);
        let mut diagnostics = doc.diagnostics.clone();
        let mut lines = Vec::with_capacity(doc.segments.len());
        let mut fragments = 0;
        let mut rewritten = doc.markers > 0;

        for segment in &doc.segments {
            match segment {
                Segment::Text(line) => lines.push(line.clone()),
                Segment::Fragment { fragment, raw } => {
                    fragments += 1;
                    match self.render_fragment(fragment, &MarkdownTabs) {
                        Ok(Some(rendered)) => {
                            lines.extend(rendered);
                            rewritten = true;
                        }
                        Ok(None) => lines.extend(raw.iter().cloned()),
                        Err(source) => {
                            let error = TransformError::Upgrade {
                                line: fragment.line,
                                source,
                            };
                            self.fail(error, &mut diagnostics)?;
                            lines.extend(raw.iter().cloned());
                        }
                    }
                }
            }
        }

        // Untouched documents are returned byte for byte
        let content = if rewritten {
            doc.join(&lines)
        } else {
            content.to_string()
        };
        Ok(Transformed {
            content,
            diagnostics,
            fragments,
        })
    }

    /// Transforms a reStructuredText document.
    pub fn transform_rst(
        &self,
        content: &str,
        roots: &IncludeRoots,
    ) -> Result<Transformed, TransformError> {
        let lines: Vec<String> = content.lines().map(str::to_string).collect();
        let mut level = RstLevel {
            roots,
            diagnostics: Vec::new(),
            fragments: 0,
        };

        let output = self.transform_rst_level(&lines, 0, 0, &mut level)?;
        let content = match output {
            Some(new_lines) => {
                let ending = line_ending(content);
                let mut joined = new_lines.join(ending);
                if content.ends_with('\n') && !new_lines.is_empty() {
                    joined.push_str(ending);
                }
                joined
            }
            None => content.to_string(),
        };

        Ok(Transformed {
            content,
            diagnostics: level.diagnostics,
            fragments: level.fragments,
        })
    }

    /// Returns `None` when nothing at this level or below changed.
    fn transform_rst_level(
        &self,
        lines: &[String],
        depth: usize,
        line_offset: usize,
        level: &mut RstLevel<'_>,
    ) -> Result<Option<Vec<String>>, TransformError> {
        let syntax = self.registry.syntax();
        let mut output = Vec::with_capacity(lines.len());
        let mut changed = false;

        for node in rst::parse(lines) {
            let directive = match node {
                Node::Text(line) => {
                    output.push(line);
                    continue;
                }
                Node::Directive(directive) => directive,
            };
            let line = line_offset + directive.line;

            let Some(registration) = self.registry.lookup(&directive.name) else {
                // Container: scan its content one level deeper
                let nested = self.transform_rst_level(
                    &directive.content,
                    depth + 1,
                    line_offset + directive.content_line - 1,
                    level,
                )?;
                match nested {
                    Some(content) => {
                        output.extend(directive.reassemble(&content));
                        changed = true;
                    }
                    None => output.extend(directive.raw),
                }
                continue;
            };

            let located = directives::locate(
                &directive,
                registration,
                depth,
                line,
                level.roots,
                &self.settings.languages,
            );
            match located {
                Ok(Some(fragment)) => {
                    level.fragments += 1;
                    match self.render_fragment(&fragment, &syntax) {
                        Ok(Some(rendered)) => {
                            output.extend(rendered);
                            changed = true;
                        }
                        Ok(None) => output.extend(directive.raw),
                        Err(source) => {
                            self.fail(
                                TransformError::Upgrade { line, source },
                                &mut level.diagnostics,
                            )?;
                            output.extend(directive.raw);
                        }
                    }
                }
                Ok(None) => output.extend(directive.raw),
                Err(source) => {
                    self.warn(
                        &TransformError::Locate { line, source },
                        &mut level.diagnostics,
                    );
                    output.extend(directive.raw);
                }
            }
        }

        Ok(changed.then_some(output))
    }
}

struct RstLevel<'r> {
    roots: &'r IncludeRoots,
    diagnostics: Vec<Diagnostic>,
    fragments: usize,
}
