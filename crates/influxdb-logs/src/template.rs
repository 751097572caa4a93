// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Message templates.
//!
//! A template is text with named holes that are filled from the event's
//! properties when the message is rendered:
//!
//! ```text
//! User {user} did {count:D3} things    ->  User alice did 003 things
//! ```
//!
//! Supported hole syntax is `{name}`, `{@name}`, `{$name}`, `{name,alignment}`
//! and `{name:format}`. `{{` and `}}` produce literal braces. A hole without a
//! matching property is left in the output as written.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::event::Value;

/// Turns a property value into text for the rendered message.
///
/// This is the extension point for locale or format rules. `format` is the
/// text after `:` in a hole, if any.
pub trait PropertyFormatter: Send + Sync {
    fn format(&self, value: &Value, format: Option<&str>) -> String;
}

/// Formatter used unless the configuration supplies another one.
///
/// Understands `F<n>` (fixed decimals), `D<n>` (zero padded integer) and
/// `X`/`x` (hexadecimal integer). Anything else falls back to the value's
/// display form.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFormatter;

impl PropertyFormatter for DefaultFormatter {
    #[allow(clippy::cast_precision_loss)]
    fn format(&self, value: &Value, format: Option<&str>) -> String {
        let Some(spec) = format.filter(|f| !f.is_empty()) else {
            return value.to_string();
        };
        let Some(first) = spec.chars().next() else {
            return value.to_string();
        };
        let (kind, digits) = spec.split_at(first.len_utf8());
        let precision = digits.parse::<usize>().ok();

        match (kind, value) {
            ("F" | "f", Value::F64(n)) => format!("{n:.*}", precision.unwrap_or(2)),
            ("F" | "f", Value::I64(n)) => format!("{:.*}", precision.unwrap_or(2), *n as f64),
            ("F" | "f", Value::U64(n)) => format!("{:.*}", precision.unwrap_or(2), *n as f64),
            ("D" | "d", Value::I64(n)) if *n < 0 => {
                format!("-{:0width$}", n.unsigned_abs(), width = precision.unwrap_or(0))
            }
            ("D" | "d", Value::I64(n)) => format!("{n:0width$}", width = precision.unwrap_or(0)),
            ("D" | "d", Value::U64(n)) => format!("{n:0width$}", width = precision.unwrap_or(0)),
            ("X", Value::I64(n)) => format!("{n:0width$X}", width = precision.unwrap_or(0)),
            ("X", Value::U64(n)) => format!("{n:0width$X}", width = precision.unwrap_or(0)),
            ("x", Value::I64(n)) => format!("{n:0width$x}", width = precision.unwrap_or(0)),
            ("x", Value::U64(n)) => format!("{n:0width$x}", width = precision.unwrap_or(0)),
            _ => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Text(String),
    Hole {
        name: String,
        alignment: Option<i32>,
        format: Option<String>,
        raw: String,
    },
}

/// A parsed message template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    text: String,
    tokens: Vec<Token>,
}

fn hole_regex() -> &'static Regex {
    static HOLE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    HOLE.get_or_init(|| {
        Regex::new(r"\{\{|\}\}|\{[@$]?([A-Za-z0-9_]+)(?:,(-?[0-9]+))?(?::([^{}]*))?\}")
            .expect("hole pattern is valid")
    })
}

impl MessageTemplate {
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut last = 0;

        for caps in hole_regex().captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            literal.push_str(&text[last..whole.start()]);
            last = whole.end();

            match whole.as_str() {
                "{{" => literal.push('{'),
                "}}" => literal.push('}'),
                raw => {
                    if !literal.is_empty() {
                        tokens.push(Token::Text(std::mem::take(&mut literal)));
                    }
                    tokens.push(hole_from(&caps, raw));
                }
            }
        }
        literal.push_str(&text[last..]);
        if !literal.is_empty() {
            tokens.push(Token::Text(literal));
        }

        Self {
            text: text.to_string(),
            tokens,
        }
    }

    /// The raw template text, as written by the caller.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Names of the properties referenced by the template, in order.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Hole { name, .. } => Some(name.as_str()),
            Token::Text(_) => None,
        })
    }

    #[must_use]
    pub fn render(
        &self,
        properties: &BTreeMap<String, Value>,
        formatter: &dyn PropertyFormatter,
    ) -> String {
        let mut out = String::with_capacity(self.text.len());
        for token in &self.tokens {
            match token {
                Token::Text(text) => out.push_str(text),
                Token::Hole {
                    name,
                    alignment,
                    format,
                    raw,
                } => match properties.get(name) {
                    Some(value) => {
                        let rendered = formatter.format(value, format.as_deref());
                        push_aligned(&mut out, &rendered, *alignment);
                    }
                    None => out.push_str(raw),
                },
            }
        }
        out
    }
}

fn hole_from(caps: &Captures<'_>, raw: &str) -> Token {
    Token::Hole {
        name: caps
            .get(1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        alignment: caps.get(2).and_then(|m| m.as_str().parse().ok()),
        format: caps.get(3).map(|m| m.as_str().to_string()),
        raw: raw.to_string(),
    }
}

fn push_aligned(out: &mut String, rendered: &str, alignment: Option<i32>) {
    let width = alignment.map_or(0, |a| a.unsigned_abs() as usize);
    let pad = width.saturating_sub(rendered.chars().count());
    match alignment {
        Some(a) if a < 0 => {
            out.push_str(rendered);
            out.extend(std::iter::repeat(' ').take(pad));
        }
        _ => {
            out.extend(std::iter::repeat(' ').take(pad));
            out.push_str(rendered);
        }
    }
}
