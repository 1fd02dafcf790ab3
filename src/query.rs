//! Small query-text helpers
//!
//! The service does not implement a query language; it only needs two
//! pieces of text handling: duration literals from HTTP parameters
//! (`10s`, `1h30m`) and the database/retention-policy pair of an ad hoc
//! record query, which must name exactly one fully-qualified measurement
//! (`"db"."rp".measurement`).

use std::time::Duration;

use crate::error::{Result, SluiceError};
use crate::models::Dbrp;

/// Parse a duration literal such as `10s`, `250ms`, or `1h30m`.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(SluiceError::request("empty duration"));
    }

    let mut total = Duration::ZERO;
    let mut chars = s.chars().peekable();
    while chars.peek().is_some() {
        let mut value: u64 = 0;
        let mut digits = 0;
        while let Some(c) = chars.peek().copied() {
            if let Some(d) = c.to_digit(10) {
                value = value
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(d as u64))
                    .ok_or_else(|| SluiceError::request(format!("duration too large: {:?}", s)))?;
                digits += 1;
                chars.next();
            } else {
                break;
            }
        }
        if digits == 0 {
            return Err(SluiceError::request(format!("invalid duration: {:?}", s)));
        }

        let mut unit = String::new();
        while let Some(c) = chars.peek().copied() {
            if c.is_ascii_alphabetic() || c == 'µ' {
                unit.push(c);
                chars.next();
            } else {
                break;
            }
        }
        let step = match unit.as_str() {
            "ns" => Duration::from_nanos(value),
            "u" | "µ" | "us" => Duration::from_micros(value),
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            "d" => Duration::from_secs(value * 86_400),
            "w" => Duration::from_secs(value * 604_800),
            "" => return Err(SluiceError::request(format!("missing duration unit: {:?}", s))),
            other => {
                return Err(SluiceError::request(format!(
                    "unknown duration unit {:?} in {:?}",
                    other, s
                )))
            }
        };
        total += step;
    }
    Ok(total)
}

/// Extract the DBRP of an ad hoc record query.
///
/// The statement must be a SELECT over exactly one measurement source
/// carrying both database and retention policy.
pub fn fully_qualified_source(q: &str) -> Result<Dbrp> {
    let trimmed = q.trim_start();
    if !starts_with_keyword(trimmed, "select") {
        return Err(SluiceError::query("query is not a select statement"));
    }

    let from_idx = find_keyword(q, "from")
        .ok_or_else(|| SluiceError::query("query has no from clause"))?;
    let source = q[from_idx..].trim_start();

    let (segments, rest) = parse_source_segments(source)?;
    if rest.trim_start().starts_with(',') {
        return Err(SluiceError::query(
            "query must have exactly one measurement source",
        ));
    }
    if segments.len() < 3 || segments[0].is_empty() || segments[1].is_empty() {
        return Err(SluiceError::query(
            "could not determine database and retention policy, is the query fully qualified?",
        ));
    }
    Ok(Dbrp::new(segments[0].clone(), segments[1].clone()))
}

fn starts_with_keyword(s: &str, keyword: &str) -> bool {
    match s.get(..keyword.len()) {
        Some(head) => {
            head.eq_ignore_ascii_case(keyword)
                && s[keyword.len()..]
                    .chars()
                    .next()
                    .map_or(true, |c| c.is_whitespace())
        }
        None => false,
    }
}

/// Byte offset just past a top-level (unquoted) keyword.
fn find_keyword(s: &str, keyword: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'"' || b == b'\'' {
                    quote = Some(b);
                } else if s
                    .get(i..i + keyword.len())
                    .is_some_and(|w| w.eq_ignore_ascii_case(keyword))
                {
                    let before_ok = i == 0 || bytes[i - 1].is_ascii_whitespace();
                    let after = i + keyword.len();
                    let after_ok =
                        after >= bytes.len() || bytes[after].is_ascii_whitespace();
                    if before_ok && after_ok {
                        return Some(after);
                    }
                }
            }
        }
        i += 1;
    }
    None
}

/// Parse a dotted, optionally quoted source like `"db"."rp".measurement`.
/// Returns the segments and the unconsumed remainder.
fn parse_source_segments(s: &str) -> Result<(Vec<String>, &str)> {
    let mut segments = Vec::new();
    let mut rest = s;
    loop {
        let (segment, after) = parse_segment(rest)?;
        segments.push(segment);
        if let Some(stripped) = after.strip_prefix('.') {
            rest = stripped;
        } else {
            return Ok((segments, after));
        }
    }
}

fn parse_segment(s: &str) -> Result<(String, &str)> {
    if let Some(inner) = s.strip_prefix('"') {
        let end = inner
            .find('"')
            .ok_or_else(|| SluiceError::query("unterminated quoted identifier"))?;
        Ok((inner[..end].to_string(), &inner[end + 1..]))
    } else {
        let end = s
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(s.len());
        Ok((s[..end].to_string(), &s[end..]))
    }
}
