//! Template grammar.
//!
//! The parser is stateless: every extractor runs a fresh scan over the
//! string it is given and yields matches lazily, left to right.
//!
//! - Interpolation: `{{ name }}` (dotted identifier only)
//! - Binding: `:name="'literal'"` or `:name="key"`
//! - Listener: `@event="handler"`
//! - Directive: `$name` or `$name="key"`
//!
//! Attributes, listeners and directives are only read from the first
//! (top-level) opening tag of a fragment.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

use crate::config::SyntaxConfig;
use crate::error::{Result, RuntimeError};
use crate::markup;
use crate::node::Node;

lazy_static! {
    /// Tags treated as passthrough markup. Anything else is a component.
    pub static ref STANDARD_TAGS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        // Document
        s.insert("html");
        s.insert("head");
        s.insert("body");
        s.insert("title");
        s.insert("meta");
        s.insert("link");
        s.insert("script");
        s.insert("style");
        s.insert("template");
        s.insert("slot");
        // Sectioning
        s.insert("div");
        s.insert("span");
        s.insert("p");
        s.insert("section");
        s.insert("article");
        s.insert("aside");
        s.insert("header");
        s.insert("footer");
        s.insert("main");
        s.insert("nav");
        s.insert("h1");
        s.insert("h2");
        s.insert("h3");
        s.insert("h4");
        s.insert("h5");
        s.insert("h6");
        // Text
        s.insert("a");
        s.insert("b");
        s.insert("i");
        s.insert("u");
        s.insert("em");
        s.insert("strong");
        s.insert("small");
        s.insert("code");
        s.insert("pre");
        s.insert("blockquote");
        s.insert("label");
        s.insert("br");
        s.insert("hr");
        // Lists and tables
        s.insert("ul");
        s.insert("ol");
        s.insert("li");
        s.insert("dl");
        s.insert("dt");
        s.insert("dd");
        s.insert("table");
        s.insert("thead");
        s.insert("tbody");
        s.insert("tfoot");
        s.insert("tr");
        s.insert("td");
        s.insert("th");
        // Forms
        s.insert("form");
        s.insert("input");
        s.insert("button");
        s.insert("select");
        s.insert("option");
        s.insert("textarea");
        s.insert("fieldset");
        s.insert("legend");
        // Media
        s.insert("img");
        s.insert("picture");
        s.insert("source");
        s.insert("video");
        s.insert("audio");
        s.insert("canvas");
        s.insert("iframe");
        s.insert("figure");
        s.insert("figcaption");
        s.insert("details");
        s.insert("summary");
        s.insert("dialog");
        // SVG
        s.insert("svg");
        s.insert("g");
        s.insert("path");
        s.insert("circle");
        s.insert("rect");
        s.insert("line");
        s.insert("polygon");
        s.insert("polyline");
        s.insert("ellipse");
        s.insert("defs");
        s.insert("use");
        s.insert("text");
        s
    };
}

// ═══════════════════════════════════════════════════════════════════════════════
// MATCH TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Interpolation {
    /// Token exactly as written, delimiters included.
    pub raw: String,
    pub name: String,
    pub start: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Attribute {
    pub tag: String,
    /// Name without the binding prefix.
    pub name: String,
    pub raw: String,
    pub value: String,
    pub binding: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Listener {
    pub tag: String,
    /// Event name without the listener prefix.
    pub name: String,
    pub raw: String,
    pub handler: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Directive {
    pub tag: String,
    /// Directive name including its prefix, e.g. `$if`.
    pub name: String,
    /// Name without the prefix, e.g. `if`.
    pub key: String,
    pub raw: String,
    pub value: Option<String>,
    /// Markup fragment the directive was read from.
    pub template: String,
}

/// Opening tag of a markup fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHead<'a> {
    pub name: &'a str,
    pub attributes: &'a str,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYNTAX
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Syntax {
    config: SyntaxConfig,
    interpolation_re: Regex,
    attribute_re: Regex,
    listener_re: Regex,
    directive_re: Regex,
}

impl Syntax {
    pub fn new(config: SyntaxConfig) -> Result<Self> {
        config.validate()?;
        let open = regex::escape(&config.interpolation_delimiters[0]);
        let close = regex::escape(&config.interpolation_delimiters[1]);
        let binding = regex::escape(&config.binding_delimiter);
        let listener = regex::escape(&config.listener_delimiter);
        let directive = regex::escape(&config.directive_delimiter);

        let interpolation_re = compile(&format!(r"{}\s*([a-zA-Z0-9_.$]+)\s*{}", open, close))?;
        let attribute_re = compile(&format!(
            r#"\s+({})?([a-zA-Z][a-zA-Z0-9._-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#,
            binding
        ))?;
        let listener_re = compile(&format!(
            r#"\s+{}([a-zA-Z0-9_:.-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#,
            listener
        ))?;
        let directive_re = compile(&format!(
            r#"\s+({}[a-zA-Z0-9_-]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'))?"#,
            directive
        ))?;

        Ok(Self {
            config,
            interpolation_re,
            attribute_re,
            listener_re,
            directive_re,
        })
    }

    pub fn config(&self) -> &SyntaxConfig {
        &self.config
    }

    pub fn is_standard_tag(&self, tag: &str) -> bool {
        STANDARD_TAGS.contains(tag.to_ascii_lowercase().as_str())
    }

    /// Whether `tag` names a user component rather than passthrough markup.
    pub fn is_custom_tag(&self, tag: &str) -> bool {
        !self.is_standard_tag(tag)
    }

    /// The sole component heuristic: a node is custom unless its tag is a
    /// standard HTML/SVG tag.
    pub fn is_custom_node(&self, node: &Node) -> bool {
        self.is_custom_tag(node.tag())
    }

    /// Opening tag of `markup`, after optional trimming.
    pub fn first_tag<'a>(&self, markup: &'a str) -> Option<TagHead<'a>> {
        let source = if self.config.trim_whitespace {
            markup.trim()
        } else {
            markup
        };
        let open = markup::open_tag_at(source, 0).filter(|open| open.closed)?;
        let mut attributes = source[open.name_end..open.end - 1].trim_end();
        if open.self_closing {
            attributes = attributes.strip_suffix('/').unwrap_or(attributes).trim_end();
        }
        Some(TagHead {
            name: &source[1..open.name_end],
            attributes,
        })
    }

    pub fn extract_interpolations<'a>(
        &'a self,
        template: &'a str,
    ) -> impl Iterator<Item = Interpolation> + 'a {
        self.interpolation_re
            .captures_iter(template)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some(Interpolation {
                    raw: whole.as_str().to_string(),
                    name: caps.get(1)?.as_str().to_string(),
                    start: whole.start(),
                })
            })
    }

    /// Byte ranges of the outermost custom elements in `template`, found at
    /// any depth. Raw-text elements are not searched.
    pub fn custom_element_ranges(&self, template: &str) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        self.collect_custom_ranges(template, 0, &mut ranges);
        ranges
    }

    fn collect_custom_ranges(&self, template: &str, offset: usize, ranges: &mut Vec<(usize, usize)>) {
        for slot in markup::top_level_elements(template) {
            if self.is_custom_tag(&slot.tag) {
                ranges.push((offset + slot.start, offset + slot.end));
            } else if !markup::is_raw_text_tag(&slot.tag) {
                self.collect_custom_ranges(&slot.template, offset + slot.inner_start, ranges);
            }
        }
    }

    pub fn extract_attributes<'a>(
        &'a self,
        markup: &'a str,
    ) -> impl Iterator<Item = Attribute> + 'a {
        self.first_tag(markup).into_iter().flat_map(move |head| {
            self.attribute_re
                .captures_iter(head.attributes)
                .filter_map(move |caps| {
                    Some(Attribute {
                        tag: head.name.to_string(),
                        name: caps.get(2)?.as_str().to_string(),
                        raw: caps.get(0)?.as_str().trim().to_string(),
                        value: quoted_value(&caps, 3, 4),
                        binding: caps.get(1).is_some(),
                    })
                })
        })
    }

    pub fn extract_listeners<'a>(&'a self, markup: &'a str) -> impl Iterator<Item = Listener> + 'a {
        self.first_tag(markup).into_iter().flat_map(move |head| {
            self.listener_re
                .captures_iter(head.attributes)
                .filter_map(move |caps| {
                    Some(Listener {
                        tag: head.name.to_string(),
                        name: caps.get(1)?.as_str().to_string(),
                        raw: caps.get(0)?.as_str().trim().to_string(),
                        handler: quoted_value(&caps, 2, 3),
                    })
                })
        })
    }

    pub fn extract_directives<'a>(
        &'a self,
        markup: &'a str,
    ) -> impl Iterator<Item = Directive> + 'a {
        self.first_tag(markup).into_iter().flat_map(move |head| {
            self.directive_re
                .captures_iter(head.attributes)
                .filter_map(move |caps| {
                    let name = caps.get(1)?.as_str();
                    if !self.config.custom_directives.is_empty()
                        && !self.config.custom_directives.iter().any(|d| d == name)
                    {
                        return None;
                    }
                    let value = caps.get(2).or_else(|| caps.get(3));
                    let key = name
                        .strip_prefix(self.config.directive_delimiter.as_str())
                        .unwrap_or(name);
                    Some(Directive {
                        tag: head.name.to_string(),
                        name: name.to_string(),
                        key: key.to_string(),
                        raw: caps.get(0)?.as_str().trim().to_string(),
                        value: value.map(|m| m.as_str().to_string()),
                        template: markup.to_string(),
                    })
                })
        })
    }

    /// Resolves an attribute to the value its node receives.
    ///
    /// Plain attributes are literals. Bindings holding a quoted string are
    /// literals too; bare bindings go through `lookup` and may resolve to
    /// nothing.
    pub fn resolve_attribute(
        &self,
        attribute: &Attribute,
        lookup: impl Fn(&str) -> Option<Value>,
    ) -> Option<Value> {
        if !attribute.binding {
            return Some(Value::String(attribute.value.clone()));
        }
        let expression = attribute.value.trim();
        match string_literal(expression) {
            Some(literal) => Some(Value::String(literal.to_string())),
            None => lookup(expression),
        }
    }

    /// Replaces every interpolation of `name` in `template` with `value`.
    pub fn replace_interpolation(&self, template: &str, name: &str, value: &str) -> String {
        self.interpolation_re
            .replace_all(template, |caps: &Captures| {
                if caps.get(1).map(|m| m.as_str()) == Some(name) {
                    value.to_string()
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned()
    }

    /// String-level `$if`: a truthy value strips the directive from its tag,
    /// a falsy one removes the element carrying it.
    pub fn apply_directive(&self, template: &str, directive: &Directive, value: bool) -> String {
        let Some(slot) = markup::top_level_elements(template)
            .into_iter()
            .find(|slot| self.first_tag(&slot.markup).is_some() && slot.markup.contains(&directive.raw))
        else {
            return template.to_string();
        };

        if value {
            let stripped = strip_first(&slot.markup, &directive.raw);
            format!("{}{}{}", &template[..slot.start], stripped, &template[slot.end..])
        } else {
            format!("{}{}", &template[..slot.start], &template[slot.end..])
        }
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| RuntimeError::InvalidConfig {
        reason: e.to_string(),
    })
}

fn quoted_value(caps: &Captures, double: usize, single: usize) -> String {
    caps.get(double)
        .or_else(|| caps.get(single))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

fn string_literal(expression: &str) -> Option<&str> {
    let bytes = expression.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'\'' || first == b'"') && first == last {
            return Some(&expression[1..expression.len() - 1]);
        }
    }
    None
}

/// Removes the first occurrence of `needle` along with the whitespace that
/// preceded it.
fn strip_first(haystack: &str, needle: &str) -> String {
    match haystack.find(needle) {
        Some(pos) => {
            let head = haystack[..pos].trim_end();
            format!("{}{}", head, &haystack[pos + needle.len()..])
        }
        None => haystack.to_string(),
    }
}
