//! Which reST directives are intercepted, and how they become fragments.
//!
//! The same two handlers are registered under different names depending on
//! the mode:
//!
//! | name                    | default | compat |
//! |-------------------------|---------|--------|
//! | `pytabs-code-block`     | yes     | yes    |
//! | `pytabs-literalinclude` | yes     | yes    |
//! | `code-block`            | yes, honours `:no-upgrade:` | no |
//! | `literalinclude`        | yes, honours `:no-upgrade:` | no |
//!
//! Unregistered directives are containers whose content is scanned again.

use crate::error::LocatorError;
use crate::fragment::{BlockMeta, CodeFragment};
use crate::rst::Directive;
use crate::tabs::{DirectiveTabs, CODE_BLOCK_OPTIONS, NO_UPGRADE_OPTION};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Code is the directive content.
    CodeBlock,
    /// Code is read from the file named by the argument.
    LiteralInclude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub kind: HandlerKind,
    /// Leave the directive alone when it carries `:no-upgrade:`.
    pub honours_no_upgrade: bool,
}

/// Directive names mapped to handlers.
#[derive(Debug, Clone)]
pub struct DirectiveRegistry {
    entries: Vec<(&'static str, Registration)>,
    compat_mode: bool,
}

impl DirectiveRegistry {
    pub fn new(compat_mode: bool) -> Self {
        let mut entries = vec![
            (
                "pytabs-code-block",
                Registration {
                    kind: HandlerKind::CodeBlock,
                    honours_no_upgrade: false,
                },
            ),
            (
                "pytabs-literalinclude",
                Registration {
                    kind: HandlerKind::LiteralInclude,
                    honours_no_upgrade: false,
                },
            ),
        ];
        if !compat_mode {
            entries.push((
                "code-block",
                Registration {
                    kind: HandlerKind::CodeBlock,
                    honours_no_upgrade: true,
                },
            ));
            entries.push((
                "literalinclude",
                Registration {
                    kind: HandlerKind::LiteralInclude,
                    honours_no_upgrade: true,
                },
            ));
        }
        Self {
            entries,
            compat_mode,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Registration> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, r)| *r)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(n, _)| *n)
    }

    /// Tab syntax for this mode. Generated code blocks are marked
    /// `:no-upgrade:` whenever the built-in `code-block` is intercepted.
    pub fn syntax(&self) -> DirectiveTabs {
        DirectiveTabs {
            mark_no_upgrade: !self.compat_mode,
        }
    }
}

/// Where `literalinclude` paths are resolved from.
#[derive(Debug, Clone)]
pub struct IncludeRoots {
    /// Directory of the document being processed.
    pub doc_dir: PathBuf,
    /// Root that absolute (`/`-prefixed) paths are relative to.
    pub source_root: PathBuf,
}

impl IncludeRoots {
    pub fn new(doc_dir: impl Into<PathBuf>, source_root: impl Into<PathBuf>) -> Self {
        Self {
            doc_dir: doc_dir.into(),
            source_root: source_root.into(),
        }
    }

    pub fn resolve(&self, argument: &str) -> Result<PathBuf, LocatorError> {
        let argument = argument.trim();
        if argument.is_empty() {
            return Err(LocatorError::UnresolvedInclude(argument.to_string()));
        }
        Ok(match argument.strip_prefix('/') {
            Some(rooted) => self.source_root.join(rooted),
            None => self.doc_dir.join(argument),
        })
    }
}

/// Turns an intercepted directive into a fragment.
///
/// Returns `Ok(None)` when the directive is left as written: it opted out
/// with `:no-upgrade:`, or its language is not one of `languages`.
pub fn locate(
    directive: &Directive,
    registration: Registration,
    depth: usize,
    line: usize,
    roots: &IncludeRoots,
    languages: &[String],
) -> Result<Option<CodeFragment>, LocatorError> {
    if registration.honours_no_upgrade && directive.has_flag(NO_UPGRADE_OPTION) {
        return Ok(None);
    }
    if let Some(message) = &directive.malformed {
        return Err(LocatorError::MalformedOption {
            directive: directive.name.clone(),
            message: message.clone(),
        });
    }

    let (language, code) = match registration.kind {
        HandlerKind::CodeBlock => {
            let language = directive.argument.split_whitespace().next().unwrap_or("");
            if !eligible(language, languages) {
                return Ok(None);
            }
            (language.to_string(), directive.body())
        }
        HandlerKind::LiteralInclude => {
            let language = directive.option("language").flatten().unwrap_or("");
            if !eligible(language, languages) {
                return Ok(None);
            }
            check_include_options(directive)?;
            let path = roots.resolve(&directive.argument)?;
            (language.to_string(), read_include(&path, directive)?)
        }
    };

    let options = directive
        .options
        .iter()
        .filter(|(name, _)| name != NO_UPGRADE_OPTION)
        .cloned()
        .collect();

    Ok(Some(CodeFragment {
        code,
        language,
        meta: BlockMeta::Directive { options },
        depth,
        indent: directive.indent.clone(),
        line,
        enclosing_tabs: Vec::new(),
    }))
}

fn eligible(language: &str, languages: &[String]) -> bool {
    languages.iter().any(|l| l == language)
}

/// `literalinclude` options that choose which part of the file is shown.
const SELECTION_OPTIONS: &[&str] = &[
    "lines",
    "start-after",
    "start-at",
    "end-before",
    "end-at",
    "prepend",
    "append",
    "encoding",
];

/// Rejects options that would make the included text differ from what
/// `literalinclude` itself shows, such as `:pyobject:` or `:diff:`.
fn check_include_options(directive: &Directive) -> Result<(), LocatorError> {
    let unsupported = |option: String| LocatorError::UnsupportedOption {
        directive: directive.name.clone(),
        option,
    };

    for (name, _) in &directive.options {
        let known = name == "language"
            || name == NO_UPGRADE_OPTION
            || SELECTION_OPTIONS.contains(&name.as_str())
            || CODE_BLOCK_OPTIONS.contains(&name.as_str());
        if !known {
            return Err(unsupported(name.clone()));
        }
    }
    if let Some(encoding) = directive.option("encoding").flatten() {
        if !matches!(
            encoding.to_ascii_lowercase().as_str(),
            "utf-8" | "utf8" | "utf-8-sig"
        ) {
            return Err(unsupported(format!("encoding: {}", encoding)));
        }
    }
    Ok(())
}

fn read_include(path: &Path, directive: &Directive) -> Result<String, LocatorError> {
    let text = std::fs::read_to_string(path).map_err(|source| LocatorError::UnreadableInclude {
        path: path.to_path_buf(),
        source,
    })?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    select_lines(text, directive).map_err(|message| LocatorError::IncludeSelection {
        path: path.to_path_buf(),
        message,
    })
}

/// Applies the selection options in the order `literalinclude` does:
/// start pattern, end pattern, `lines`, then `prepend` and `append`.
fn select_lines(text: &str, directive: &Directive) -> Result<String, String> {
    let option = |name: &str| directive.option(name).flatten();
    let mut lines: Vec<&str> = text.lines().collect();

    let start = match (option("start-at"), option("start-after")) {
        (Some(pattern), _) => Some(("start-at", pattern, true)),
        (None, Some(pattern)) => Some(("start-after", pattern, false)),
        (None, None) => None,
    };
    if let Some((name, pattern, inclusive)) = start {
        let found = lines
            .iter()
            .position(|line| line.contains(pattern))
            .ok_or_else(|| format!("{} pattern not found: {}", name, pattern))?;
        lines.drain(..if inclusive { found } else { found + 1 });
    }

    let end = match (option("end-at"), option("end-before")) {
        (Some(pattern), _) => Some(("end-at", pattern, true)),
        (None, Some(pattern)) => Some(("end-before", pattern, false)),
        (None, None) => None,
    };
    if let Some((name, pattern, inclusive)) = end {
        let found = lines
            .iter()
            .position(|line| line.contains(pattern))
            .ok_or_else(|| format!("{} pattern not found: {}", name, pattern))?;
        lines.truncate(if inclusive { found + 1 } else { found });
    }

    if let Some(spec) = option("lines") {
        let wanted = parse_line_spec(spec, lines.len())?;
        if wanted.iter().any(|&n| n >= lines.len()) {
            log::warn!("line number spec {:?} is out of range (1-{})", spec, lines.len());
        }
        lines = wanted.into_iter().filter_map(|n| lines.get(n).copied()).collect();
        if lines.is_empty() {
            return Err(format!("line number spec {:?} selects nothing", spec));
        }
    }

    if let Some(prepend) = option("prepend") {
        lines.insert(0, prepend);
    }
    if let Some(append) = option("append") {
        lines.push(append);
    }
    Ok(lines.join("\n"))
}

/// 0-based line indices for a spec like `1,3-5,8-`.
fn parse_line_spec(spec: &str, total: usize) -> Result<Vec<usize>, String> {
    let invalid = || format!("invalid line number spec: {:?}", spec);
    let number = |s: &str| {
        s.trim()
            .parse::<usize>()
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(invalid)
    };

    let mut items = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        match part.split_once('-') {
            None => items.push(number(part)? - 1),
            Some((start, end)) => {
                let (start, end) = (start.trim(), end.trim());
                if end.contains('-') || (start.is_empty() && end.is_empty()) {
                    return Err(invalid());
                }
                let start = if start.is_empty() { 1 } else { number(start)? };
                let end = if end.is_empty() {
                    start.max(total)
                } else {
                    number(end)?
                };
                if start > end {
                    return Err(invalid());
                }
                items.extend(start - 1..end);
            }
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rst::{parse, Node};
    use std::fs;
    use tempfile::TempDir;

    fn first_directive(text: &str) -> Directive {
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        parse(&lines)
            .into_iter()
            .find_map(|n| match n {
                Node::Directive(d) => Some(d),
                Node::Text(_) => None,
            })
            .unwrap()
    }

    fn langs() -> Vec<String> {
        vec!["python".to_string()]
    }

    fn roots(dir: &Path) -> IncludeRoots {
        IncludeRoots::new(dir.join("docs"), dir)
    }

    #[test]
    fn test_registration_by_mode() {
        let full = DirectiveRegistry::new(false);
        assert_eq!(
            full.names().collect::<Vec<_>>(),
            vec![
                "pytabs-code-block",
                "pytabs-literalinclude",
                "code-block",
                "literalinclude"
            ]
        );
        assert!(full.lookup("code-block").unwrap().honours_no_upgrade);
        assert!(full.syntax().mark_no_upgrade);

        let compat = DirectiveRegistry::new(true);
        assert!(compat.lookup("code-block").is_none());
        assert!(compat.lookup("literalinclude").is_none());
        assert_eq!(
            compat.lookup("pytabs-literalinclude").unwrap().kind,
            HandlerKind::LiteralInclude
        );
        assert!(!compat.syntax().mark_no_upgrade);
    }

    #[test]
    fn test_code_block_fragment() {
        let tmp = TempDir::new().unwrap();
        let d = first_directive(".. code-block:: python\n   :caption: Ex\n   :no-upgrade:\n\n   x = 1\n");
        let reg = DirectiveRegistry::new(true).lookup("pytabs-code-block").unwrap();

        // pytabs-* directives ignore the opt-out flag; it is not forwarded
        let fragment = locate(&d, reg, 1, 4, &roots(tmp.path()), &langs())
            .unwrap()
            .unwrap();
        assert_eq!(fragment.code, "x = 1");
        assert_eq!(fragment.depth, 1);
        assert_eq!(fragment.line, 4);
        assert_eq!(
            fragment.meta,
            BlockMeta::Directive {
                options: vec![("caption".to_string(), Some("Ex".to_string()))]
            }
        );
    }

    #[test]
    fn test_no_upgrade_is_honoured_by_builtins() {
        let tmp = TempDir::new().unwrap();
        let d = first_directive(".. code-block:: python\n   :no-upgrade:\n\n   x = 1\n");
        let reg = DirectiveRegistry::new(false).lookup("code-block").unwrap();
        assert!(locate(&d, reg, 0, 1, &roots(tmp.path()), &langs())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_other_language_passes_through() {
        let tmp = TempDir::new().unwrap();
        let d = first_directive(".. code-block:: rust\n\n   fn main() {}\n");
        let reg = DirectiveRegistry::new(false).lookup("code-block").unwrap();
        assert!(locate(&d, reg, 0, 1, &roots(tmp.path()), &langs())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_literalinclude_relative_and_rooted() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("docs")).unwrap();
        fs::write(tmp.path().join("docs/local.py"), "a = 1\n").unwrap();
        fs::write(tmp.path().join("shared.py"), "b = 2\n").unwrap();
        let reg = DirectiveRegistry::new(false).lookup("literalinclude").unwrap();

        let d = first_directive(".. literalinclude:: local.py\n   :language: python\n");
        let fragment = locate(&d, reg, 0, 1, &roots(tmp.path()), &langs())
            .unwrap()
            .unwrap();
        assert_eq!(fragment.code, "a = 1");
        assert_eq!(fragment.language, "python");

        let d = first_directive(".. literalinclude:: /shared.py\n   :language: python\n");
        let fragment = locate(&d, reg, 0, 1, &roots(tmp.path()), &langs())
            .unwrap()
            .unwrap();
        assert_eq!(fragment.code, "b = 2");
    }

    #[test]
    fn test_literalinclude_without_language_passes_through() {
        let tmp = TempDir::new().unwrap();
        let reg = DirectiveRegistry::new(false).lookup("literalinclude").unwrap();
        let d = first_directive(".. literalinclude:: missing.py\n");
        assert!(locate(&d, reg, 0, 1, &roots(tmp.path()), &langs())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_missing_include_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let reg = DirectiveRegistry::new(false).lookup("literalinclude").unwrap();
        let d = first_directive(".. literalinclude:: missing.py\n   :language: python\n");
        let err = locate(&d, reg, 0, 1, &roots(tmp.path()), &langs()).unwrap_err();
        assert!(matches!(err, LocatorError::UnreadableInclude { .. }));
    }

    fn include(tmp: &TempDir, options: &str) -> Result<Option<CodeFragment>, LocatorError> {
        fs::create_dir_all(tmp.path().join("docs")).unwrap();
        fs::write(
            tmp.path().join("docs/mod.py"),
            "import os\n\n# start\ndef f():\n    return 1\n# end\n\nVALUE = 2\n",
        )
        .unwrap();
        let reg = DirectiveRegistry::new(false).lookup("literalinclude").unwrap();
        let d = first_directive(&format!(
            ".. literalinclude:: mod.py\n   :language: python\n{}",
            options
        ));
        locate(&d, reg, 0, 1, &roots(tmp.path()), &langs())
    }

    fn included(options: &str) -> String {
        let tmp = TempDir::new().unwrap();
        include(&tmp, options).unwrap().unwrap().code
    }

    #[test]
    fn test_literalinclude_lines() {
        assert_eq!(included("   :lines: 4-5\n"), "def f():\n    return 1");
        assert_eq!(included("   :lines: 1, 8\n"), "import os\nVALUE = 2");
        assert_eq!(included("   :lines: 7-\n"), "\nVALUE = 2");
        assert_eq!(included("   :lines: -1\n"), "import os");
    }

    #[test]
    fn test_literalinclude_start_after_end_before() {
        assert_eq!(
            included("   :start-after: # start\n   :end-before: # end\n"),
            "def f():\n    return 1"
        );
    }

    #[test]
    fn test_literalinclude_start_at_end_at() {
        assert_eq!(
            included("   :start-at: # start\n   :end-at: # end\n"),
            "# start\ndef f():\n    return 1\n# end"
        );
    }

    #[test]
    fn test_literalinclude_lines_apply_after_patterns() {
        assert_eq!(
            included("   :start-after: # start\n   :lines: 2\n"),
            "    return 1"
        );
    }

    #[test]
    fn test_literalinclude_prepend_append() {
        assert_eq!(
            included("   :lines: 4-5\n   :prepend: class C:\n   :append: # done\n"),
            "class C:\ndef f():\n    return 1\n# done"
        );
    }

    #[test]
    fn test_literalinclude_forwarded_options_are_accepted() {
        assert_eq!(
            included("   :lines: 8\n   :caption: Value\n   :linenos:\n   :encoding: utf-8\n"),
            "VALUE = 2"
        );
    }

    #[test]
    fn test_literalinclude_unsupported_options() {
        let tmp = TempDir::new().unwrap();
        let err = include(&tmp, "   :pyobject: f\n").unwrap_err();
        assert!(matches!(
            err,
            LocatorError::UnsupportedOption { ref option, .. } if option == "pyobject"
        ));

        let err = include(&tmp, "   :encoding: latin-1\n").unwrap_err();
        assert!(matches!(err, LocatorError::UnsupportedOption { .. }));
    }

    #[test]
    fn test_literalinclude_selection_errors() {
        let tmp = TempDir::new().unwrap();
        let err = include(&tmp, "   :start-after: missing marker\n").unwrap_err();
        assert!(err.to_string().contains("start-after pattern not found"));

        assert!(matches!(
            include(&tmp, "   :lines: 3-1\n").unwrap_err(),
            LocatorError::IncludeSelection { .. }
        ));
        assert!(matches!(
            include(&tmp, "   :lines: 40-50\n").unwrap_err(),
            LocatorError::IncludeSelection { .. }
        ));
    }

    #[test]
    fn test_parse_line_spec() {
        assert_eq!(parse_line_spec("1,3-4,6-", 7).unwrap(), vec![0, 2, 3, 5, 6]);
        assert_eq!(parse_line_spec("-2", 7).unwrap(), vec![0, 1]);
        assert!(parse_line_spec("0", 7).is_err());
        assert!(parse_line_spec("-", 7).is_err());
        assert!(parse_line_spec("a", 7).is_err());
    }

    #[test]
    fn test_malformed_option_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let reg = DirectiveRegistry::new(false).lookup("code-block").unwrap();
        let d = first_directive(".. code-block:: python\n   :caption\n\n   x\n");
        let err = locate(&d, reg, 0, 1, &roots(tmp.path()), &langs()).unwrap_err();
        assert!(matches!(err, LocatorError::MalformedOption { .. }));
    }
}
