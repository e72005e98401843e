//! Minimal reStructuredText explicit-markup parser.
//!
//! Only directive blocks are recognized; everything else is opaque text.
//! A directive spans its `.. name:: argument` line and every following line
//! that is blank or indented deeper than the marker:
//!
//! ```text
//! .. code-block:: python      <- name, argument
//!    :caption: Example        <- options
//!    :linenos:
//!                             <- blank line ends the options
//!    print("hello")           <- content, de-indented
//! ```
//!
//! Trailing blank lines are not part of the block. Content is returned
//! de-indented so it can be parsed again as a nested level.

/// One top-level item of a parsed level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Directive(Directive),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub argument: String,
    pub options: Vec<(String, Option<String>)>,
    /// Message for the first option line that could not be parsed.
    pub malformed: Option<String>,
    /// Leading whitespace of the `..` line.
    pub indent: String,
    /// 1-indexed line of the `..` line within the parsed text.
    pub line: usize,
    /// Marker, option and separator lines, unchanged.
    pub header: Vec<String>,
    /// Whitespace removed from every content line.
    pub content_indent: String,
    /// De-indented content.
    pub content: Vec<String>,
    /// 1-indexed line of the first content line within the parsed text.
    pub content_line: usize,
    /// Every source line of the block.
    pub raw: Vec<String>,
}

impl Directive {
    pub fn option(&self, name: &str) -> Option<Option<&str>> {
        self.options
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_deref())
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.option(name).is_some()
    }

    /// Content re-joined with `\n`.
    pub fn body(&self) -> String {
        self.content.join("\n")
    }

    /// Header followed by `content` re-indented to the original depth.
    pub fn reassemble(&self, content: &[String]) -> Vec<String> {
        let mut lines = self.header.clone();
        lines.extend(content.iter().map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", self.content_indent, line)
            }
        }));
        lines
    }
}

/// Parses one level of a document.
pub fn parse(lines: &[String]) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = &lines[i];
        let Some((name, argument)) = parse_marker(line) else {
            nodes.push(Node::Text(line.clone()));
            i += 1;
            continue;
        };

        let width = indent_width(line);
        let mut end = i + 1;
        while end < lines.len()
            && (lines[end].trim().is_empty() || indent_width(&lines[end]) > width)
        {
            end += 1;
        }
        while end > i + 1 && lines[end - 1].trim().is_empty() {
            end -= 1;
        }

        let directive = build_directive(name, argument, &lines[i..end], i + 1);
        nodes.push(Node::Directive(directive));
        i = end;
    }

    nodes
}

fn build_directive(name: &str, argument: &str, block: &[String], line: usize) -> Directive {
    let marker = &block[0];
    let mut options: Vec<(String, Option<String>)> = Vec::new();
    let mut malformed = None;

    let mut k = 1;
    let mut option_width = None;
    while k < block.len() {
        let current = &block[k];
        let trimmed = current.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Some(field) = trimmed.strip_prefix(':') {
            match field.split_once(':') {
                Some((option, value)) if !option.is_empty() => {
                    let value = value.trim();
                    options.push((
                        option.to_string(),
                        (!value.is_empty()).then(|| value.to_string()),
                    ));
                    option_width = Some(indent_width(current));
                }
                _ => {
                    if malformed.is_none() {
                        malformed = Some(format!("cannot parse option line {:?}", trimmed));
                    }
                }
            }
            k += 1;
            continue;
        }
        // Continuation of the previous option's value
        match (options.last_mut(), option_width) {
            (Some((_, value)), Some(w)) if indent_width(current) > w => {
                let joined = match value.take() {
                    Some(v) => format!("{} {}", v, trimmed),
                    None => trimmed.to_string(),
                };
                *value = Some(joined);
                k += 1;
            }
            _ => break,
        }
    }
    while k < block.len() && block[k].trim().is_empty() {
        k += 1;
    }

    let body = &block[k..];
    let content_indent = common_indent(body);
    let content = body
        .iter()
        .map(|l| {
            l.strip_prefix(content_indent.as_str())
                .unwrap_or_else(|| l.trim_start())
                .to_string()
        })
        .collect();

    Directive {
        name: name.to_string(),
        argument: argument.to_string(),
        options,
        malformed,
        indent: marker[..marker.len() - marker.trim_start().len()].to_string(),
        line,
        header: block[..k].to_vec(),
        content_indent,
        content,
        content_line: line + k,
        raw: block.to_vec(),
    }
}

/// `(name, argument)` of a `.. name:: argument` line.
fn parse_marker(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim_start().strip_prefix("..")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let (name, argument) = rest.trim_start().split_once("::")?;
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    if !argument.is_empty() && !argument.starts_with(char::is_whitespace) {
        return None;
    }
    Some((name, argument.trim()))
}

fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 8 } else { 1 })
        .sum()
}

/// Longest whitespace prefix shared by all non-blank lines.
fn common_indent(lines: &[String]) -> String {
    let mut common: Option<&str> = None;
    for line in lines.iter().filter(|l| !l.trim().is_empty()) {
        let indent = &line[..line.len() - line.trim_start().len()];
        common = Some(match common {
            None => indent,
            Some(current) => {
                let shared = current
                    .char_indices()
                    .zip(indent.chars())
                    .take_while(|((_, a), b)| a == b)
                    .last()
                    .map(|((i, c), _)| i + c.len_utf8())
                    .unwrap_or(0);
                &current[..shared]
            }
        });
    }
    common.unwrap_or("").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    fn directives(nodes: &[Node]) -> Vec<&Directive> {
        nodes
            .iter()
            .filter_map(|n| match n {
                Node::Directive(d) => Some(d),
                Node::Text(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_code_block_with_options() {
        let source = lines(
            "Intro\n\n.. code-block:: python\n   :caption: Example\n   :linenos:\n\n   def f():\n       return 1\n\nOutro",
        );
        let nodes = parse(&source);
        let found = directives(&nodes);
        assert_eq!(found.len(), 1);

        let d = found[0];
        assert_eq!(d.name, "code-block");
        assert_eq!(d.argument, "python");
        assert_eq!(
            d.options,
            vec![
                ("caption".to_string(), Some("Example".to_string())),
                ("linenos".to_string(), None),
            ]
        );
        assert_eq!(d.body(), "def f():\n    return 1");
        assert_eq!(d.line, 3);
        assert_eq!(d.content_line, 7);
        assert_eq!(d.content_indent, "   ");
        assert!(d.has_flag("linenos"));
        assert!(!d.has_flag("no-upgrade"));

        // Trailing blank line stays outside the block
        assert_eq!(nodes.last(), Some(&Node::Text("Outro".to_string())));
        assert_eq!(nodes[nodes.len() - 2], Node::Text(String::new()));
    }

    #[test]
    fn test_nested_directive_content() {
        let source = lines(".. note::\n\n   .. code-block:: py\n\n      x = 1\n");
        let nodes = parse(&source);
        let outer = directives(&nodes)[0];
        assert_eq!(outer.name, "note");

        let inner_nodes = parse(&outer.content);
        let inner = directives(&inner_nodes)[0];
        assert_eq!(inner.name, "code-block");
        assert_eq!(inner.body(), "x = 1");
        assert_eq!(outer.content_line + inner.content_line - 1, 5);
    }

    #[test]
    fn test_comments_and_targets_are_text() {
        let source = lines(".. a comment\n.. _label:\n..not-a-directive:: x\n");
        let nodes = parse(&source);
        assert!(directives(&nodes).is_empty());
        assert_eq!(nodes.len(), 3);
    }

    #[test]
    fn test_option_continuation() {
        let source = lines(".. literalinclude:: a.py\n   :emphasize-lines: 1,\n      3\n");
        let nodes = parse(&source);
        let d = directives(&nodes)[0];
        assert_eq!(d.option("emphasize-lines"), Some(Some("1, 3")));
        assert!(d.content.is_empty());
    }

    #[test]
    fn test_malformed_option_is_recorded() {
        let source = lines(".. code-block:: python\n   :caption Example\n\n   x\n");
        let nodes = parse(&source);
        let d = directives(&nodes)[0];
        assert!(d.malformed.is_some());
        assert_eq!(d.body(), "x");
    }

    #[test]
    fn test_reassemble_keeps_header_and_indent() {
        let source = lines(".. note::\n   :class: tip\n\n   Some text.\n\n   More.");
        let nodes = parse(&source);
        let d = directives(&nodes)[0];
        assert_eq!(d.reassemble(&d.content), source);
    }

    #[test]
    fn test_directive_without_content() {
        let source = lines(".. tab-set::\n\nText");
        let nodes = parse(&source);
        let d = directives(&nodes)[0];
        assert!(d.content.is_empty());
        assert_eq!(d.header, vec![".. tab-set::"]);
    }
}
