//! Code fence tracking for line-by-line scanning.

/// What a line means to the fence state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FenceLine<'a> {
    /// Opens a fence; `info` is the trimmed info string.
    Open { info: &'a str },
    /// Closes the current fence.
    Close,
    /// Inside a fence.
    Content,
    /// Outside any fence.
    Text,
}

/// Tracks code fence state during line-by-line processing.
///
/// Fences use backticks or tildes (three or more). The closing fence must
/// use the same character and be at least as long as the opening fence.
#[derive(Debug, Default)]
pub struct FenceTracker {
    fence_char: Option<char>,
    fence_len: usize,
}

impl FenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_fence(&self) -> bool {
        self.fence_char.is_some()
    }

    /// Update fence state based on a line.
    pub fn update<'a>(&mut self, line: &'a str) -> FenceLine<'a> {
        let trimmed = line.trim_start();

        if let Some(fence_char) = self.fence_char {
            if is_closing_fence(trimmed, fence_char, self.fence_len) {
                self.fence_char = None;
                self.fence_len = 0;
                return FenceLine::Close;
            }
            return FenceLine::Content;
        }

        match detect_fence(trimmed) {
            Some((ch, len)) => {
                self.fence_char = Some(ch);
                self.fence_len = len;
                FenceLine::Open {
                    info: trimmed[len * ch.len_utf8()..].trim(),
                }
            }
            None => FenceLine::Text,
        }
    }
}

/// Fence character and length if `trimmed` opens a fence.
fn detect_fence(trimmed: &str) -> Option<(char, usize)> {
    let first = trimmed.chars().next()?;
    if first != '`' && first != '~' {
        return None;
    }

    let count = trimmed.chars().take_while(|&c| c == first).count();
    if count < 3 {
        return None;
    }
    // Backtick info strings may not contain backticks
    if first == '`' && trimmed[count..].contains('`') {
        return None;
    }
    Some((first, count))
}

fn is_closing_fence(trimmed: &str, expected_char: char, min_len: usize) -> bool {
    let first = match trimmed.chars().next() {
        Some(c) if c == expected_char => c,
        _ => return false,
    };

    let count = trimmed.chars().take_while(|&c| c == first).count();
    if count < min_len {
        return false;
    }

    trimmed[count..].chars().all(char::is_whitespace)
}

/// Language tag of a fence info string: its first token.
///
/// `python title="a.py"` and `py,linenums` both yield the bare tag.
pub fn info_language(info: &str) -> &str {
    info.split(|c: char| c.is_whitespace() || c == ',' || c == '{')
        .next()
        .unwrap_or("")
}
