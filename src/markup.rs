//! Template slicing for the indexing step.
//!
//! A template is cut into its top-level elements by scanning the authored
//! source, so each slot keeps the exact bytes the author wrote (attribute
//! order, quoting, `$`/`@`/`:` prefixes) instead of a DOM re-serialization.

use lazy_static::lazy_static;
use serde::Serialize;
use std::collections::HashSet;

use crate::path::ScenePath;

lazy_static! {
    static ref VOID_TAGS: HashSet<&'static str> = [
        "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
        "source", "track", "wbr",
    ]
    .into_iter()
    .collect();
    static ref RAW_TEXT_TAGS: HashSet<&'static str> =
        ["script", "style", "textarea", "title"].into_iter().collect();
}

/// One top-level element of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSlot {
    pub path: ScenePath,
    pub tag: String,
    /// Outer markup, exactly as authored.
    pub markup: String,
    /// Inner markup, exactly as authored.
    pub template: String,
    /// Byte range of `markup` inside the scanned template.
    pub start: usize,
    pub end: usize,
    /// Offset of `template` inside the scanned template.
    pub inner_start: usize,
}

pub(crate) struct OpenTag {
    /// Lowercased tag name.
    pub(crate) name: String,
    /// End of the name as written.
    pub(crate) name_end: usize,
    /// Just past the closing `>`.
    pub(crate) end: usize,
    pub(crate) self_closing: bool,
    /// False when the input ran out before the tag was closed.
    pub(crate) closed: bool,
}

/// Slices `template` into its top-level elements, numbered from zero in
/// document order. Text, comments and stray closing tags are skipped.
pub fn top_level_elements(template: &str) -> Vec<ElementSlot> {
    let mut slots = Vec::new();
    let mut ordinal = 0u32;
    let mut i = 0;

    while let Some(offset) = template[i..].find('<') {
        let start = i + offset;
        let rest = &template[start..];

        if rest.starts_with("<!--") {
            i = skip_comment(template, start);
            continue;
        }
        if rest.starts_with("</") || rest.starts_with("<!") || rest.starts_with("<?") {
            i = skip_past_gt(template, start);
            continue;
        }

        match open_tag_at(template, start) {
            Some(open) => {
                let (inner_end, end) = element_end(template, &open);
                slots.push(ElementSlot {
                    path: ScenePath::from_segments(vec![ordinal]),
                    tag: open.name.clone(),
                    markup: template[start..end].to_string(),
                    template: template[open.end..inner_end].to_string(),
                    start,
                    end,
                    inner_start: open.end,
                });
                ordinal += 1;
                i = end;
            }
            None => i = start + 1,
        }
    }

    slots
}

pub fn is_void_tag(tag: &str) -> bool {
    VOID_TAGS.contains(tag.to_ascii_lowercase().as_str())
}

pub fn is_raw_text_tag(tag: &str) -> bool {
    RAW_TEXT_TAGS.contains(tag.to_ascii_lowercase().as_str())
}

fn skip_comment(src: &str, start: usize) -> usize {
    src[start + 4..]
        .find("-->")
        .map(|pos| start + 4 + pos + 3)
        .unwrap_or(src.len())
}

fn skip_past_gt(src: &str, start: usize) -> usize {
    src[start..]
        .find('>')
        .map(|pos| start + pos + 1)
        .unwrap_or(src.len())
}

/// Parses the opening tag starting at `start`. Quoted attribute values may
/// contain `>`.
pub(crate) fn open_tag_at(src: &str, start: usize) -> Option<OpenTag> {
    let bytes = src.as_bytes();
    let mut pos = start + 1;
    if bytes.get(start) != Some(&b'<') {
        return None;
    }
    if pos >= bytes.len() || !bytes[pos].is_ascii_alphabetic() {
        return None;
    }
    while pos < bytes.len() {
        let b = bytes[pos];
        if b.is_ascii_whitespace() || b == b'>' || b == b'/' {
            break;
        }
        pos += 1;
    }
    let name = src[start + 1..pos].to_ascii_lowercase();
    let name_end = pos;

    let mut quote: Option<u8> = None;
    let mut last_significant = b'<';
    while pos < bytes.len() {
        let b = bytes[pos];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => {
                return Some(OpenTag {
                    name,
                    name_end,
                    end: pos + 1,
                    self_closing: last_significant == b'/',
                    closed: true,
                });
            }
            None => {}
        }
        if !b.is_ascii_whitespace() {
            last_significant = b;
        }
        pos += 1;
    }
    // Unterminated opening tag swallows the rest of the input
    Some(OpenTag {
        name,
        name_end,
        end: src.len(),
        self_closing: true,
        closed: false,
    })
}

/// Returns `(inner_end, element_end)` for an element whose opening tag was
/// already parsed.
fn element_end(src: &str, open: &OpenTag) -> (usize, usize) {
    if open.self_closing || VOID_TAGS.contains(open.name.as_str()) {
        return (open.end, open.end);
    }

    if RAW_TEXT_TAGS.contains(open.name.as_str()) {
        let closing = format!("</{}", open.name);
        let lower = src[open.end..].to_ascii_lowercase();
        return match lower.find(&closing) {
            Some(pos) => {
                let inner_end = open.end + pos;
                (inner_end, skip_past_gt(src, inner_end))
            }
            None => (src.len(), src.len()),
        };
    }

    let mut stack = vec![open.name.clone()];
    let mut i = open.end;
    while let Some(offset) = src[i..].find('<') {
        let start = i + offset;
        let rest = &src[start..];

        if rest.starts_with("<!--") {
            i = skip_comment(src, start);
            continue;
        }
        if let Some(after) = rest.strip_prefix("</") {
            let name_len = after
                .find(|c: char| c.is_ascii_whitespace() || c == '>')
                .unwrap_or(after.len());
            let name = after[..name_len].to_ascii_lowercase();
            let next = skip_past_gt(src, start);
            if let Some(depth) = stack.iter().rposition(|open| *open == name) {
                stack.truncate(depth);
                if stack.is_empty() {
                    return (start, next);
                }
            }
            i = next;
            continue;
        }
        if rest.starts_with("<!") || rest.starts_with("<?") {
            i = skip_past_gt(src, start);
            continue;
        }

        match open_tag_at(src, start) {
            Some(nested) => {
                if RAW_TEXT_TAGS.contains(nested.name.as_str()) && !nested.self_closing {
                    let (_, end) = element_end(src, &nested);
                    i = end;
                } else {
                    if !nested.self_closing && !VOID_TAGS.contains(nested.name.as_str()) {
                        stack.push(nested.name);
                    }
                    i = nested.end;
                }
            }
            None => i = start + 1,
        }
    }

    (src.len(), src.len())
}
