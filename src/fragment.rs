/// Where a fragment came from, in the terms of its host document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockMeta {
    /// A fenced markdown block. `head` and `tail` are the fence lines with
    /// the block's own indentation removed, e.g. ```` ```python title="x" ````.
    Fence { head: String, tail: String },
    /// A reST directive. `options` are the ones forwarded to the emitted
    /// `code-block`, in source order; flags have no value.
    Directive {
        options: Vec<(String, Option<String>)>,
    },
}

/// A code block found by a locator. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeFragment {
    /// Code with the block's indentation stripped, lines joined by `\n`.
    pub code: String,
    /// Declared language tag, empty if absent.
    pub language: String,
    pub meta: BlockMeta,
    /// Number of enclosing tab blocks or directives.
    pub depth: usize,
    /// Leading whitespace of the block's first line, reapplied on output.
    pub indent: String,
    /// 1-indexed line of the block's first line.
    pub line: usize,
    /// Titles of the enclosing tab blocks, outermost first.
    pub enclosing_tabs: Vec<String>,
}

impl CodeFragment {
    /// Caption from the originating block, if it had one.
    pub fn caption(&self) -> Option<&str> {
        match &self.meta {
            BlockMeta::Directive { options } => options
                .iter()
                .find(|(name, _)| name == "caption")
                .and_then(|(_, value)| value.as_deref()),
            BlockMeta::Fence { head, .. } => head
                .split_once("title=\"")
                .and_then(|(_, rest)| rest.split_once('"'))
                .map(|(title, _)| title),
        }
    }
}
