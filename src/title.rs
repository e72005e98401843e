//! Tab title templates.
//!
//! A template such as `"Python {min_version}+"` is validated once at
//! configuration time and rendered for every ladder step.

use crate::error::ConfigError;
use crate::version::PythonVersion;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Version,
    Major,
    Minor,
}

/// A validated tab title template.
///
/// Recognized placeholders are `{min_version}` (`3.9`), `{major}` and
/// `{minor}`. Literal braces are written `{{` and `}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl TitleTemplate {
    pub fn parse(template: &str) -> Result<Self, ConfigError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for ch in chars.by_ref() {
                        if ch == '}' {
                            closed = true;
                            break;
                        }
                        name.push(ch);
                    }
                    if !closed {
                        return Err(ConfigError::UnknownPlaceholder {
                            template: template.to_string(),
                            placeholder: name,
                        });
                    }
                    let segment = match name.as_str() {
                        "min_version" => Segment::Version,
                        "major" => Segment::Major,
                        "minor" => Segment::Minor,
                        _ => {
                            return Err(ConfigError::UnknownPlaceholder {
                                template: template.to_string(),
                                placeholder: name,
                            })
                        }
                    };
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                }
                _ => literal.push(ch),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        if !segments.iter().any(|s| !matches!(s, Segment::Literal(_))) {
            return Err(ConfigError::MissingPlaceholder(template.to_string()));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    /// The template text as configured.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn render(&self, version: PythonVersion) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Version => out.push_str(&version.to_string()),
                Segment::Major => out.push_str(&version.major.to_string()),
                Segment::Minor => out.push_str(&version.minor.to_string()),
            }
        }
        out
    }
}

impl Default for TitleTemplate {
    fn default() -> Self {
        Self {
            source: "Python {min_version}+".to_string(),
            segments: vec![
                Segment::Literal("Python ".to_string()),
                Segment::Version,
                Segment::Literal("+".to_string()),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template() {
        let template = TitleTemplate::default();
        assert_eq!(template.render(PythonVersion::new(3, 10)), "Python 3.10+");
        assert_eq!(template, TitleTemplate::parse("Python {min_version}+").unwrap());
    }

    #[test]
    fn test_major_minor_placeholders() {
        let template = TitleTemplate::parse("py{major}{minor}").unwrap();
        assert_eq!(template.render(PythonVersion::new(3, 9)), "py39");
    }

    #[test]
    fn test_escaped_braces() {
        let template = TitleTemplate::parse("{{{min_version}}}").unwrap();
        assert_eq!(template.render(PythonVersion::new(3, 8)), "{3.8}");
    }

    #[test]
    fn test_missing_placeholder_fails() {
        assert!(matches!(
            TitleTemplate::parse("Python"),
            Err(ConfigError::MissingPlaceholder(_))
        ));
        assert!(matches!(
            TitleTemplate::parse("{{min_version}}"),
            Err(ConfigError::MissingPlaceholder(_))
        ));
    }

    #[test]
    fn test_unknown_placeholder_fails() {
        assert!(matches!(
            TitleTemplate::parse("Python {version}"),
            Err(ConfigError::UnknownPlaceholder { .. })
        ));
        assert!(matches!(
            TitleTemplate::parse("Python {min_version"),
            Err(ConfigError::UnknownPlaceholder { .. })
        ));
    }
}
