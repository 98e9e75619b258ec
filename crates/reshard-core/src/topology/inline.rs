//! Inline expressions for compact data node lists.
//!
//! `ds_${0..1}.t_order_${['a', 'b']}` expands to
//! `ds_0.t_order_a, ds_0.t_order_b, ds_1.t_order_a, ds_1.t_order_b`.
//! Placeholders may also be written `$->{...}`. Top-level commas separate
//! independent segments whose expansions are concatenated in order.

use super::error::ConfigurationParseError;

/// Upper bound on the number of values one expression may expand to.
pub const MAX_EXPANSION: usize = 65_536;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Range { start: i64, end: i64 },
    List(Vec<String>),
}

impl Part {
    fn len(&self) -> usize {
        match self {
            Part::Literal(_) => 1,
            Part::Range { start, end } => (end.abs_diff(*start) as usize).saturating_add(1),
            Part::List(items) => items.len(),
        }
    }

    fn values(&self) -> Vec<String> {
        match self {
            Part::Literal(text) => vec![text.clone()],
            Part::Range { start, end } => (*start..=*end).map(|v| v.to_string()).collect(),
            Part::List(items) => items.clone(),
        }
    }
}

/// A parsed inline expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineExpression {
    source: String,
    segments: Vec<Vec<Part>>,
}

impl InlineExpression {
    /// Parse an expression.
    pub fn parse(text: &str) -> Result<Self, ConfigurationParseError> {
        let invalid = |reason: &str| ConfigurationParseError::InvalidInlineExpression {
            expression: text.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut total = 0usize;
        for raw in split_top_level(text).ok_or_else(|| invalid("unbalanced braces"))? {
            let raw = raw.trim();
            if raw.is_empty() {
                return Err(invalid("empty segment"));
            }
            let parts = parse_segment(raw).map_err(|reason| invalid(&reason))?;
            let count = parts
                .iter()
                .try_fold(1usize, |acc, part| acc.checked_mul(part.len()))
                .filter(|count| *count <= MAX_EXPANSION)
                .ok_or_else(|| invalid("expansion too large"))?;
            total += count;
            if total > MAX_EXPANSION {
                return Err(invalid("expansion too large"));
            }
            segments.push(parts);
        }

        Ok(Self {
            source: text.to_string(),
            segments,
        })
    }

    /// The original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Expand into concrete values, in declaration order.
    pub fn expand(&self) -> Vec<String> {
        let mut result = Vec::new();
        for parts in &self.segments {
            let mut acc = vec![String::new()];
            for part in parts {
                let values = part.values();
                acc = acc
                    .iter()
                    .flat_map(|prefix| values.iter().map(move |v| format!("{}{}", prefix, v)))
                    .collect();
            }
            result.extend(acc);
        }
        result
    }
}

/// Split on commas that are not inside a placeholder.
fn split_top_level(text: &str) -> Option<Vec<&str>> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, ch) in text.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                pieces.push(&text[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    pieces.push(&text[start..]);
    Some(pieces)
}

/// Locate the next placeholder opener, returning its offset and length.
fn find_placeholder(text: &str) -> Option<(usize, usize)> {
    let plain = text.find("${").map(|i| (i, 2));
    let arrow = text.find("$->{").map(|i| (i, 4));
    match (plain, arrow) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_segment(raw: &str) -> Result<Vec<Part>, String> {
    let mut parts = Vec::new();
    let mut rest = raw;
    while let Some((start, open_len)) = find_placeholder(rest) {
        if start > 0 {
            parts.push(Part::Literal(rest[..start].to_string()));
        }
        let after = &rest[start + open_len..];
        let close = after.find('}').ok_or("unclosed placeholder")?;
        parts.push(parse_placeholder(after[..close].trim())?);
        rest = &after[close + 1..];
    }
    if !rest.is_empty() {
        parts.push(Part::Literal(rest.to_string()));
    }
    Ok(parts)
}

fn parse_placeholder(body: &str) -> Result<Part, String> {
    if let Some((start, end)) = body.split_once("..") {
        let start: i64 = start
            .trim()
            .parse()
            .map_err(|_| format!("non-numeric range start '{}'", start.trim()))?;
        let end: i64 = end
            .trim()
            .parse()
            .map_err(|_| format!("non-numeric range end '{}'", end.trim()))?;
        if start > end {
            return Err(format!("descending range {}..{}", start, end));
        }
        return Ok(Part::Range { start, end });
    }

    if let Some(inner) = body.strip_prefix('[').and_then(|b| b.strip_suffix(']')) {
        let items: Vec<String> = inner
            .split(',')
            .map(|item| unquote(item.trim()).to_string())
            .filter(|item| !item.is_empty())
            .collect();
        if items.is_empty() {
            return Err("empty list".to_string());
        }
        return Ok(Part::List(items));
    }

    Err(format!("unsupported placeholder '{}'", body))
}

fn unquote(item: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = item.strip_prefix(quote).and_then(|i| i.strip_suffix(quote)) {
            return inner;
        }
    }
    item
}
