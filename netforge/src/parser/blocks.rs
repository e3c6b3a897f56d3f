//! Balanced-bracket block scanner
//!
//! Locates self-contained `( ... )` blocks inside raw definition text by
//! counting bracket depth, never by pattern matching, because blocks nest
//! arbitrarily deep and span many lines. Brackets inside double-quoted
//! strings (with backslash escapes) do not count toward depth.
//!
//! All offsets are byte offsets into the original text; spans are half-open.

use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum BlockError {
    #[error("Unbalanced block starting at byte {0}")]
    Unbalanced(usize),
    #[error("Expected quoted name after marker at byte {0}")]
    MissingName(usize),
}

/// Half-open byte range of one block, `text[start..end]` is `( ... )`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Offset of the closing bracket.
    pub fn close(&self) -> usize {
        self.end - 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedBlock {
    pub name: String,
    pub span: Span,
}

/// A file cut into marker blocks and the text between them.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Gap(Span),
    Block(NamedBlock),
}

impl Segment {
    pub fn span(&self) -> Span {
        match self {
            Segment::Gap(span) => *span,
            Segment::Block(block) => block.span,
        }
    }
}

/// Given the offset of an opening bracket, return the offset just past its
/// matching closer.
pub fn find_block_end(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&b'(') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[open..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Find every block opening with `marker` (e.g. `(symbol `) followed by a
/// quoted name. Scanning resumes after each block's end, so blocks nested
/// inside an accepted block are never reported.
pub fn scan_named_blocks(text: &str, marker: &str) -> Result<Vec<NamedBlock>, BlockError> {
    Ok(segments(text, marker)?
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Block(block) => Some(block),
            Segment::Gap(_) => None,
        })
        .collect())
}

/// Cut `text` into gaps and marker blocks. Concatenating every segment's
/// slice in order reproduces `text` byte for byte.
pub fn segments(text: &str, marker: &str) -> Result<Vec<Segment>, BlockError> {
    let mut out = Vec::new();
    let mut cursor = 0;
    let mut search_from = 0;

    while let Some(found) = find_outside_strings(text, marker, search_from) {
        let name = match read_quoted(text, found + marker.len()) {
            Some((name, _)) => name,
            None => {
                // `(symbol` without a quoted name is not a definition head
                search_from = found + marker.len();
                continue;
            }
        };
        let end = find_block_end(text, found).ok_or(BlockError::Unbalanced(found))?;

        if found > cursor {
            out.push(Segment::Gap(Span { start: cursor, end: found }));
        }
        out.push(Segment::Block(NamedBlock {
            name,
            span: Span { start: found, end },
        }));
        cursor = end;
        search_from = end;
    }

    if cursor < text.len() {
        out.push(Segment::Gap(Span { start: cursor, end: text.len() }));
    }
    Ok(out)
}

/// Direct child blocks of `parent`, in order.
pub fn child_blocks(text: &str, parent: Span) -> Vec<Span> {
    let bytes = text.as_bytes();
    let mut children = Vec::new();
    let mut i = parent.start + 1;
    let mut in_string = false;
    let mut escaped = false;

    while i < parent.close() {
        let byte = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match byte {
            b'"' => {
                in_string = true;
                i += 1;
            }
            b'(' => match find_block_end(text, i) {
                Some(end) if end <= parent.end => {
                    children.push(Span { start: i, end });
                    i = end;
                }
                _ => break,
            },
            _ => i += 1,
        }
    }
    children
}

/// First direct child whose keyword is `keyword`.
pub fn find_child(text: &str, parent: Span, keyword: &str) -> Option<Span> {
    child_blocks(text, parent)
        .into_iter()
        .find(|child| block_keyword(text, *child) == keyword)
}

/// The bare word right after the opening bracket.
pub fn block_keyword(text: &str, span: Span) -> &str {
    let inner = &text[span.start + 1..span.close()];
    let trimmed = inner.trim_start();
    let len = trimmed
        .find(|c: char| c.is_whitespace() || c == '(' || c == ')' || c == '"')
        .unwrap_or(trimmed.len());
    &trimmed[..len]
}

/// Direct atom tokens after the keyword (child blocks skipped), unquoted,
/// each with its byte range in `text` (quotes included).
pub fn atoms(text: &str, span: Span) -> Vec<(String, Range<usize>)> {
    let bytes = text.as_bytes();
    let keyword = block_keyword(text, span);
    let mut i = span.start + 1;
    while i < span.close() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i += keyword.len();

    let mut out = Vec::new();
    while i < span.close() {
        let byte = bytes[i];
        if byte.is_ascii_whitespace() {
            i += 1;
        } else if byte == b'"' {
            match read_quoted(text, i) {
                Some((value, range)) => {
                    i = range.end;
                    out.push((value, range));
                }
                None => break,
            }
        } else if byte == b'(' {
            match find_block_end(text, i) {
                Some(end) => i = end,
                None => break,
            }
        } else {
            let start = i;
            while i < span.close()
                && !bytes[i].is_ascii_whitespace()
                && bytes[i] != b'('
                && bytes[i] != b')'
            {
                i += 1;
            }
            out.push((text[start..i].to_string(), start..i));
        }
    }
    out
}

/// The first atom following the keyword.
pub fn first_argument(text: &str, span: Span) -> Option<(String, Range<usize>)> {
    atoms(text, span).into_iter().next()
}

/// Every block opening with `marker` (no name requirement), skipping over
/// each match so nested occurrences are not reported.
pub fn scan_blocks(text: &str, marker: &str) -> Result<Vec<Span>, BlockError> {
    let mut out = Vec::new();
    let mut from = 0;
    while let Some(found) = find_outside_strings(text, marker, from) {
        let end = find_block_end(text, found).ok_or(BlockError::Unbalanced(found))?;
        out.push(Span { start: found, end });
        from = end;
    }
    Ok(out)
}

/// The first top-level block of a definition, skipping leading whitespace.
pub fn root_block(text: &str) -> Result<Span, BlockError> {
    let start = text
        .find(|c: char| !c.is_whitespace())
        .filter(|&i| text.as_bytes()[i] == b'(')
        .ok_or(BlockError::Unbalanced(0))?;
    let end = find_block_end(text, start).ok_or(BlockError::Unbalanced(start))?;
    Ok(Span { start, end })
}

/// Read a double-quoted string starting at (or after whitespace from) `from`.
/// Returns the unescaped value and the byte range including quotes.
fn read_quoted(text: &str, from: usize) -> Option<(String, Range<usize>)> {
    let bytes = text.as_bytes();
    let mut i = from;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if bytes.get(i) != Some(&b'"') {
        return None;
    }
    let start = i;
    i += 1;
    let mut value = String::new();
    let mut escaped = false;
    let mut chunk_start = i;
    while i < bytes.len() {
        let byte = bytes[i];
        if escaped {
            escaped = false;
            chunk_start = i;
        } else if byte == b'\\' {
            value.push_str(&text[chunk_start..i]);
            escaped = true;
        } else if byte == b'"' {
            value.push_str(&text[chunk_start..i]);
            return Some((value, start..i + 1));
        }
        i += 1;
    }
    None
}

fn find_outside_strings(text: &str, needle: &str, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let needle = needle.as_bytes();
    let mut in_string = false;
    let mut escaped = false;
    let mut i = from;
    while i < bytes.len() {
        let byte = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
        } else if byte == b'"' {
            in_string = true;
        } else if bytes[i..].starts_with(needle) {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Quote a value for emission, escaping backslashes and quotes.
pub fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
