//! Tab block synthesis.
//!
//! A [`Ladder`](crate::ladder::Ladder) becomes a [`TabBlock`], which is rendered
//! through a [`TabSyntax`]. The renderer only knows the syntax capabilities;
//! the two hosts differ solely in their `TabSyntax` implementation:
//!
//! ````text
//! === "Python 3.7+"               .. tab-set::
//!     ```python
//!     from typing import List         .. tab-item:: Python 3.7+
//!     x: List[str]                        :sync: 3.7
//!     ```
//!                                         .. code-block:: python
//! ===! "Python 3.9+"
//!     ```python                               from typing import List
//!     x: list[str]                            x: List[str]
//!     ```
//! ````

use crate::config::DefaultTab;
use crate::fragment::{BlockMeta, CodeFragment};
use crate::ladder::LadderStep;

/// Options handed to `code-block` directives. Anything else a source
/// directive carries is dropped when it is re-emitted.
pub const CODE_BLOCK_OPTIONS: &[&str] = &[
    "linenos",
    "lineno-start",
    "emphasize-lines",
    "caption",
    "name",
    "class",
    "dedent",
    "force",
];

/// Opt-out flag recognized on intercepted directives.
pub const NO_UPGRADE_OPTION: &str = "no-upgrade";

/// A synthesized block: either one rendering or a titled set of children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabBlock {
    Leaf(LadderStep),
    Branch(Vec<TabBlock>),
}

impl TabBlock {
    /// Root branch whose children are exactly the ladder's steps.
    pub fn from_ladder(steps: Vec<LadderStep>, reverse_order: bool) -> Self {
        let mut children: Vec<TabBlock> = steps.into_iter().map(TabBlock::Leaf).collect();
        if reverse_order {
            children.reverse();
        }
        TabBlock::Branch(children)
    }

    /// The step that titles this block: itself for leaves, the first child's
    /// lead step for branches.
    pub fn lead(&self) -> Option<&LadderStep> {
        match self {
            TabBlock::Leaf(step) => Some(step),
            TabBlock::Branch(children) => children.first().and_then(TabBlock::lead),
        }
    }

    /// All leaf steps in document order.
    pub fn leaves(&self) -> Vec<&LadderStep> {
        match self {
            TabBlock::Leaf(step) => vec![step],
            TabBlock::Branch(children) => children.iter().flat_map(TabBlock::leaves).collect(),
        }
    }
}

/// Host-specific block syntax.
pub trait TabSyntax: Send + Sync {
    /// Stable identifier, part of every cache key.
    fn id(&self) -> &'static str;

    /// One level of indentation.
    fn indent_unit(&self) -> &str {
        "    "
    }

    /// How many indent units tab markers sit below the branch opener.
    fn tab_depth(&self) -> usize;

    /// Lines opening a tab set.
    fn open_branch(&self) -> Vec<String>;

    /// Lines closing a tab set.
    fn close_branch(&self) -> Vec<String> {
        Vec::new()
    }

    /// Lines opening one titled tab. Content follows one unit deeper.
    fn open_tab(&self, title: &str, step: &LadderStep, selected: bool) -> Vec<String>;

    /// A standalone code block holding `code`.
    fn wrap_leaf(&self, code: &str, fragment: &CodeFragment) -> Vec<String>;
}

/// Rendering switches that do not depend on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderOptions {
    pub default_tab: DefaultTab,
    pub reverse_order: bool,
}

/// Renders a block for `fragment` at depth zero.
///
/// Callers re-indent the result with [`indent_lines`]. A branch with a single
/// child renders as that child's plain code block.
pub fn render(
    block: &TabBlock,
    fragment: &CodeFragment,
    syntax: &dyn TabSyntax,
    options: &RenderOptions,
) -> Vec<String> {
    match block {
        TabBlock::Leaf(step) => syntax.wrap_leaf(&step.code, fragment),
        TabBlock::Branch(children) if children.len() == 1 => {
            render(&children[0], fragment, syntax, options)
        }
        TabBlock::Branch(children) => {
            let unit = syntax.indent_unit();
            let tab_prefix = unit.repeat(syntax.tab_depth());
            let content_prefix = format!("{}{}", tab_prefix, unit);
            let selected = selected_index(children, options.default_tab);

            let mut lines = syntax.open_branch();
            for (i, child) in children.iter().enumerate() {
                let Some(lead) = child.lead() else {
                    continue;
                };
                if i > 0 {
                    lines.push(String::new());
                }
                let marked = i == selected && i != 0;
                lines.extend(indent_lines(
                    &syntax.open_tab(&lead.title, lead, marked),
                    &tab_prefix,
                ));
                lines.extend(indent_lines(
                    &render(child, fragment, syntax, options),
                    &content_prefix,
                ));
            }
            lines.extend(syntax.close_branch());
            lines
        }
    }
}

fn selected_index(children: &[TabBlock], default_tab: DefaultTab) -> usize {
    let versions = children.iter().enumerate().filter_map(|(i, c)| c.lead().map(|s| (i, s.version)));
    let chosen = match default_tab {
        DefaultTab::Highest => versions.max_by_key(|(_, v)| *v),
        DefaultTab::Lowest => versions.min_by_key(|(_, v)| *v),
    };
    chosen.map(|(i, _)| i).unwrap_or(0)
}

/// Prefixes every non-empty line with `indent`. Empty lines stay empty.
pub fn indent_lines(lines: &[String], indent: &str) -> Vec<String> {
    lines
        .iter()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", indent, line)
            }
        })
        .collect()
}

/// Lines of `code`, keeping a trailing empty line.
fn code_lines(code: &str) -> impl Iterator<Item = &str> {
    (!code.is_empty())
        .then(|| code.split('\n'))
        .into_iter()
        .flatten()
}

/// `=== "Title"` tabs with the fenced block indented beneath.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownTabs;

impl TabSyntax for MarkdownTabs {
    fn id(&self) -> &'static str {
        "markdown-tabbed"
    }

    fn tab_depth(&self) -> usize {
        0
    }

    fn open_branch(&self) -> Vec<String> {
        Vec::new()
    }

    fn open_tab(&self, title: &str, _step: &LadderStep, selected: bool) -> Vec<String> {
        let marker = if selected { "===!" } else { "===" };
        vec![format!("{} \"{}\"", marker, title)]
    }

    fn wrap_leaf(&self, code: &str, fragment: &CodeFragment) -> Vec<String> {
        let (head, tail) = match &fragment.meta {
            BlockMeta::Fence { head, tail } => (head.clone(), tail.clone()),
            BlockMeta::Directive { .. } => (format!("```{}", fragment.language), "```".to_string()),
        };
        let mut lines = vec![head];
        lines.extend(code_lines(code).map(str::to_string));
        lines.push(tail);
        lines
    }
}

/// `.. tab-set::` / `.. tab-item::` directives holding `.. code-block::`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectiveTabs {
    /// Emit `:no-upgrade:` on generated code blocks so that an intercepting
    /// `code-block` handler leaves them alone when the output is re-parsed.
    pub mark_no_upgrade: bool,
}

impl TabSyntax for DirectiveTabs {
    fn id(&self) -> &'static str {
        if self.mark_no_upgrade {
            "rst-tab-set"
        } else {
            "rst-tab-set-compat"
        }
    }

    fn tab_depth(&self) -> usize {
        1
    }

    fn open_branch(&self) -> Vec<String> {
        vec![".. tab-set::".to_string(), String::new()]
    }

    fn open_tab(&self, title: &str, step: &LadderStep, selected: bool) -> Vec<String> {
        let unit = self.indent_unit();
        let mut lines = vec![
            format!(".. tab-item:: {}", title),
            format!("{}:sync: {}", unit, step.version),
        ];
        if selected {
            lines.push(format!("{}:selected:", unit));
        }
        lines.push(String::new());
        lines
    }

    fn wrap_leaf(&self, code: &str, fragment: &CodeFragment) -> Vec<String> {
        let unit = self.indent_unit();
        let mut lines = vec![format!(".. code-block:: {}", fragment.language)];
        if let BlockMeta::Directive { options } = &fragment.meta {
            for (name, value) in options {
                if !CODE_BLOCK_OPTIONS.contains(&name.as_str()) {
                    continue;
                }
                match value {
                    Some(value) => lines.push(format!("{}:{}: {}", unit, name, value)),
                    None => lines.push(format!("{}:{}:", unit, name)),
                }
            }
        }
        if self.mark_no_upgrade {
            lines.push(format!("{}:{}:", unit, NO_UPGRADE_OPTION));
        }
        lines.push(String::new());
        let code: Vec<String> = code_lines(code).map(str::to_string).collect();
        lines.extend(indent_lines(&code, unit));
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::PythonVersion;
    use pretty_assertions::assert_eq;

    fn step(minor: u32, code: &str) -> LadderStep {
        LadderStep {
            version: PythonVersion::new(3, minor),
            code: code.to_string(),
            title: format!("Python 3.{}+", minor),
        }
    }

    fn fence_fragment(indent: &str) -> CodeFragment {
        CodeFragment {
            code: String::new(),
            language: "python".to_string(),
            meta: BlockMeta::Fence {
                head: "```python".to_string(),
                tail: "```".to_string(),
            },
            depth: 0,
            indent: indent.to_string(),
            line: 1,
            enclosing_tabs: Vec::new(),
        }
    }

    fn lowest() -> RenderOptions {
        RenderOptions {
            default_tab: DefaultTab::Lowest,
            reverse_order: false,
        }
    }

    #[test]
    fn test_markdown_tabs() {
        let block = TabBlock::from_ladder(
            vec![
                step(7, "from typing import Set\n\ny: Set[str]"),
                step(9, "\ny: set[str]"),
            ],
            false,
        );
        let lines = render(&block, &fence_fragment(""), &MarkdownTabs, &lowest());
        let expected = "=== \"Python 3.7+\"\n    ```python\n    from typing import Set\n\n    y: Set[str]\n    ```\n\n=== \"Python 3.9+\"\n    ```python\n\n    y: set[str]\n    ```";
        assert_eq!(lines.join("\n"), expected);
    }

    #[test]
    fn test_single_step_renders_plain_block() {
        let block = TabBlock::from_ladder(vec![step(7, "x = 1")], false);
        let lines = render(&block, &fence_fragment(""), &MarkdownTabs, &RenderOptions::default());
        assert_eq!(lines, vec!["```python", "x = 1", "```"]);
    }

    #[test]
    fn test_highest_tab_is_marked_selected() {
        let block = TabBlock::from_ladder(vec![step(7, "a"), step(9, "b"), step(10, "c")], false);
        let lines = render(&block, &fence_fragment(""), &MarkdownTabs, &RenderOptions::default());
        let markers: Vec<&String> = lines.iter().filter(|l| l.starts_with("===")).collect();
        assert_eq!(
            markers,
            vec!["=== \"Python 3.7+\"", "=== \"Python 3.9+\"", "===! \"Python 3.10+\""]
        );
    }

    #[test]
    fn test_reverse_order_puts_newest_first() {
        let block = TabBlock::from_ladder(vec![step(7, "a"), step(9, "b")], true);
        let lines = render(&block, &fence_fragment(""), &MarkdownTabs, &RenderOptions::default());
        assert_eq!(lines[0], "=== \"Python 3.9+\"");
        assert!(lines.contains(&"=== \"Python 3.7+\"".to_string()));
    }

    #[test]
    fn test_indent_lines_leaves_blank_lines_empty() {
        let lines = vec!["a".to_string(), String::new(), " ".to_string()];
        assert_eq!(indent_lines(&lines, "  "), vec!["  a", "", "   "]);
    }

    #[test]
    fn test_directive_tabs() {
        let fragment = CodeFragment {
            meta: BlockMeta::Directive {
                options: vec![
                    ("caption".to_string(), Some("Example".to_string())),
                    ("linenos".to_string(), None),
                ],
            },
            ..fence_fragment("")
        };
        let block = TabBlock::from_ladder(vec![step(7, "x: List[int]"), step(9, "x: list[int]")], false);
        let syntax = DirectiveTabs {
            mark_no_upgrade: true,
        };
        let lines = render(&block, &fragment, &syntax, &lowest());
        let expected = vec![
            ".. tab-set::",
            "",
            "    .. tab-item:: Python 3.7+",
            "        :sync: 3.7",
            "",
            "        .. code-block:: python",
            "            :caption: Example",
            "            :linenos:",
            "            :no-upgrade:",
            "",
            "            x: List[int]",
            "",
            "    .. tab-item:: Python 3.9+",
            "        :sync: 3.9",
            "",
            "        .. code-block:: python",
            "            :caption: Example",
            "            :linenos:",
            "            :no-upgrade:",
            "",
            "            x: list[int]",
        ];
        assert_eq!(lines, expected);
    }

    #[test]
    fn test_leaves_in_order() {
        let block = TabBlock::from_ladder(vec![step(7, "a"), step(9, "b")], false);
        let versions: Vec<String> = block.leaves().iter().map(|s| s.version.to_string()).collect();
        assert_eq!(versions, vec!["3.7", "3.9"]);
    }
}
