//! Markdown block locator.
//!
//! Splits a document into verbatim lines and the fenced code blocks that
//! should be upgraded. Control comments switch processing off:
//!
//! ````markdown
//! <!-- pytabs: disable-block -->
//! ```python
//! # left alone
//! ```
//!
//! <!-- pytabs: disable -->
//! ...everything up to the next enable is left alone...
//! <!-- pytabs: enable -->
//! ````
//!
//! Marker lines are dropped from the output. Fences nested in `=== "Title"`
//! tab blocks are found at any depth; their depth and the titles of the
//! enclosing tabs are recorded on the fragment.

use crate::error::{Diagnostic, LocatorError};
use crate::fence::{info_language, FenceLine, FenceTracker};
use crate::fragment::{BlockMeta, CodeFragment};
use pulldown_cmark::{CodeBlockKind, Event, Parser, Tag};

/// A piece of a scanned document, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// A line copied to the output unchanged.
    Text(String),
    /// An eligible code block. `raw` holds its source lines, fences
    /// included, for verbatim fallback.
    Fragment {
        fragment: CodeFragment,
        raw: Vec<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedDocument {
    pub segments: Vec<Segment>,
    pub diagnostics: Vec<Diagnostic>,
    pub trailing_newline: bool,
    /// `"\r\n"` for CRLF documents, `"\n"` otherwise.
    pub line_ending: &'static str,
    /// Marker lines dropped from the output.
    pub markers: usize,
}

impl ScannedDocument {
    pub fn fragments(&self) -> impl Iterator<Item = &CodeFragment> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Fragment { fragment, .. } => Some(fragment),
            Segment::Text(_) => None,
        })
    }

    /// Reassembles the document from the given lines, keeping the
    /// original trailing newline.
    pub fn join(&self, lines: &[String]) -> String {
        let ending = if self.line_ending.is_empty() {
            "\n"
        } else {
            self.line_ending
        };
        let mut out = lines.join(ending);
        if self.trailing_newline && !lines.is_empty() {
            out.push_str(ending);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Disable,
    Enable,
    DisableBlock,
}

struct OpenFence {
    line: usize,
    indent: String,
    head: String,
    language: String,
    eligible: bool,
    depth: usize,
    enclosing_tabs: Vec<String>,
    raw: Vec<String>,
}

/// Line-based state machine over one document.
struct Locator<'a> {
    languages: &'a [String],
    fence: FenceTracker,
    enabled: bool,
    skip_next: bool,
    /// Open tab markers as (indent width, title), outermost first.
    tabs: Vec<(usize, String)>,
    current: Option<OpenFence>,
    doc: ScannedDocument,
}

impl<'a> Locator<'a> {
    fn new(languages: &'a [String]) -> Self {
        Self {
            languages,
            fence: FenceTracker::new(),
            enabled: true,
            skip_next: false,
            tabs: Vec::new(),
            current: None,
            doc: ScannedDocument::default(),
        }
    }

    fn process_line(&mut self, line: &str, line_num: usize) {
        if self.current.is_some() {
            let closed = self.fence.update(line) == FenceLine::Close;
            if let Some(open) = self.current.as_mut() {
                open.raw.push(line.to_string());
            }
            if closed {
                self.close_fence(line);
            }
            return;
        }

        match parse_marker(line) {
            Some(Ok(marker)) => {
                match marker {
                    Marker::Disable => self.enabled = false,
                    Marker::Enable => self.enabled = true,
                    Marker::DisableBlock => self.skip_next = true,
                }
                self.doc.markers += 1;
                return;
            }
            Some(Err(keyword)) => {
                let err = LocatorError::UnknownMarker(keyword.to_string());
                self.doc.diagnostics.push(Diagnostic::new(line_num, err.to_string()));
            }
            None => {}
        }

        let skip = std::mem::take(&mut self.skip_next);
        let width = indent_width(line);
        if !line.trim().is_empty() {
            self.tabs.retain(|(tab_width, _)| *tab_width < width);
        }

        match self.fence.update(line) {
            FenceLine::Open { info } => {
                let indent = &line[..line.len() - line.trim_start().len()];
                let language = info_language(info).to_string();
                let eligible =
                    self.enabled && !skip && self.languages.iter().any(|l| *l == language);
                self.current = Some(OpenFence {
                    line: line_num,
                    indent: indent.to_string(),
                    head: line.trim_start().to_string(),
                    language,
                    eligible,
                    depth: self.tabs.len(),
                    enclosing_tabs: self.tabs.iter().map(|(_, t)| t.clone()).collect(),
                    raw: vec![line.to_string()],
                });
            }
            _ => {
                if let Some(title) = parse_tab_marker(line) {
                    self.tabs.push((width, title.to_string()));
                }
                self.doc.segments.push(Segment::Text(line.to_string()));
            }
        }
    }

    fn close_fence(&mut self, tail: &str) {
        let Some(open) = self.current.take() else {
            return;
        };

        if !open.eligible {
            log::trace!("Passing through block at line {}", open.line);
            self.doc
                .segments
                .extend(open.raw.into_iter().map(Segment::Text));
            return;
        }

        let body = &open.raw[1..open.raw.len() - 1];
        let code = body
            .iter()
            .map(|l| l.strip_prefix(open.indent.as_str()).unwrap_or_else(|| l.trim_start()))
            .collect::<Vec<_>>()
            .join("\n");

        let fragment = CodeFragment {
            code,
            language: open.language,
            meta: BlockMeta::Fence {
                head: open.head,
                tail: tail.trim_start().to_string(),
            },
            depth: open.depth,
            indent: open.indent,
            line: open.line,
            enclosing_tabs: open.enclosing_tabs,
        };
        self.doc.segments.push(Segment::Fragment {
            fragment,
            raw: open.raw,
        });
    }

    fn finish(mut self) -> ScannedDocument {
        // An unterminated fence is left as it is
        if let Some(open) = self.current.take() {
            log::debug!("Unterminated fence at line {}", open.line);
            self.doc
                .segments
                .extend(open.raw.into_iter().map(Segment::Text));
        }
        self.doc
    }
}

/// Finds the upgradable code blocks in a markdown document.
///
/// Only blocks whose language tag is in `languages` become fragments;
/// everything else, including disabled blocks, is returned as text.
///
/// # Example
///
/// ```
/// use mdbook_pytabs::extractor::extract_fragments;
///
/// let doc = extract_fragments("# Title\n\n```python\nx = 1\n```\n", &["python".to_string()]);
/// let fragments: Vec<_> = doc.fragments().collect();
/// assert_eq!(fragments.len(), 1);
/// assert_eq!(fragments[0].code, "x = 1");
/// ```
pub fn extract_fragments(content: &str, languages: &[String]) -> ScannedDocument {
    let mut locator = Locator::new(languages);
    for (idx, line) in content.lines().enumerate() {
        locator.process_line(line, idx + 1);
    }
    let mut doc = locator.finish();
    doc.trailing_newline = content.ends_with('\n');
    doc.line_ending = line_ending(content);
    doc
}

/// Line terminator to write a rewritten document with. A document whose
/// first line ends in `\r\n` is treated as CRLF throughout.
pub fn line_ending(content: &str) -> &'static str {
    match content.find('\n') {
        Some(i) if content[..i].ends_with('\r') => "\r\n",
        _ => "\n",
    }
}

/// Cheap check whether a chapter may contain an eligible block.
///
/// Uses pulldown-cmark for top-level fences. Fences nested in tab blocks
/// are not fenced code to CommonMark; they end up inside paragraphs,
/// indented code or HTML blocks, so the source of those is checked line
/// by line. May report blocks that are disabled, never misses one.
pub fn contains_eligible_fragment(content: &str, languages: &[String]) -> bool {
    let eligible = |info: &str| languages.iter().any(|l| l == info_language(info.trim()));

    for (event, range) in Parser::new(content).into_offset_iter() {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) => {
                if eligible(&info) {
                    return true;
                }
            }
            Event::Start(Tag::Paragraph)
            | Event::Start(Tag::HtmlBlock)
            | Event::Start(Tag::CodeBlock(CodeBlockKind::Indented)) => {
                let mut fence = FenceTracker::new();
                let nested = content[range].lines().any(|line| match fence.update(line) {
                    FenceLine::Open { info } => eligible(info),
                    _ => false,
                });
                if nested {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// Keyword of a `<!-- pytabs: keyword -->` line. `Err` carries an
/// unrecognized keyword.
fn parse_marker(line: &str) -> Option<Result<Marker, &str>> {
    let rest = line.trim().strip_prefix("<!--")?;
    let rest = rest.strip_prefix(' ').unwrap_or(rest);
    let rest = rest.strip_prefix("pytabs:")?;
    let keyword = rest.strip_suffix("-->")?.trim();

    Some(match keyword {
        "disable" => Ok(Marker::Disable),
        "enable" => Ok(Marker::Enable),
        "disable-block" => Ok(Marker::DisableBlock),
        other => Err(other),
    })
}

/// Title of a `=== "Title"` line (`===!` and `===+` included).
pub fn parse_tab_marker(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix("===")?;
    let rest = rest
        .strip_prefix('!')
        .or_else(|| rest.strip_prefix('+'))
        .unwrap_or(rest);
    let rest = rest.strip_prefix(' ')?.trim();
    rest.strip_prefix('"')?.strip_suffix('"')
}
