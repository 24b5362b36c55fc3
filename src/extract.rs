//! Pull the translated text out of a model reply.
//!
//! The model is asked for `{"result": "..."}` but replies may wrap the object
//! in prose, and the `result` value is sometimes a language → text mapping
//! written as a quoted literal (`{'English': 'hi', 'Chinese': '嗨'}`).

use serde_json::Value;
use std::collections::HashMap;
use std::iter::Peekable;
use std::str::CharIndices;
use thiserror::Error;
use tracing::warn;

use crate::error::{Result, TranslatorError};

/// Field the model is instructed to put its answer in
pub const RESULT_FIELD: &str = "result";

/// Syntactic failures of the literal-mapping stage
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LiteralError {
    #[error("not a mapping literal")]
    NotAMapping,
    #[error("unexpected '{0}' at byte {1}")]
    Unexpected(char, usize),
    #[error("unterminated literal")]
    Unterminated,
}

/// Extract the translation for `target_lang` from `reply`.
///
/// Fails with [`TranslatorError::Extraction`] when no JSON object carrying a
/// `result` field can be found. Once the field is found, nothing fails: a
/// value that does not parse as a mapping is returned as is.
pub fn extract(reply: &str, target_lang: &str) -> Result<String> {
    let object = balanced_objects(reply)
        .filter_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
        .find(|value| value.get(RESULT_FIELD).is_some())
        .ok_or_else(|| TranslatorError::Extraction(excerpt(reply)))?;

    Ok(match &object[RESULT_FIELD] {
        Value::String(text) => match parse_literal_mapping(text) {
            Ok(mapping) => mapping.get(target_lang).cloned().unwrap_or_else(|| text.clone()),
            Err(_) => text.clone(),
        },
        Value::Object(mapping) => match mapping.get(target_lang) {
            Some(Value::String(text)) => text.clone(),
            _ => Value::Object(mapping.clone()).to_string(),
        },
        other => other.to_string(),
    })
}

/// Like [`extract`], but degrades to the raw reply when nothing can be extracted.
pub fn extract_or_raw(reply: &str, target_lang: &str) -> String {
    match extract(reply, target_lang) {
        Ok(text) => text,
        Err(e) => {
            warn!("{}; using raw reply", e);
            reply.to_string()
        }
    }
}

/// Balanced `{...}` substrings in order of their opening brace.
/// Braces inside double-quoted strings do not count.
fn balanced_objects(text: &str) -> impl Iterator<Item = &str> {
    text.char_indices()
        .filter(|&(_, c)| c == '{')
        .filter_map(move |(start, _)| balanced_end(&text[start..]).map(|end| &text[start..start + end]))
}

/// Byte length of the balanced object at the start of `text`
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a flat mapping literal with single- or double-quoted string keys and values.
pub fn parse_literal_mapping(text: &str) -> std::result::Result<HashMap<String, String>, LiteralError> {
    let mut chars = text.char_indices().peekable();
    let mut mapping = HashMap::new();

    skip_whitespace(&mut chars);
    match chars.next() {
        Some((_, '{')) => {}
        _ => return Err(LiteralError::NotAMapping),
    }

    loop {
        skip_whitespace(&mut chars);
        match chars.peek().copied() {
            Some((_, '}')) => {
                chars.next();
                break;
            }
            Some(_) => {}
            None => return Err(LiteralError::Unterminated),
        }

        let key = parse_quoted(&mut chars)?;
        skip_whitespace(&mut chars);
        expect(&mut chars, ':')?;
        skip_whitespace(&mut chars);
        let value = parse_quoted(&mut chars)?;
        mapping.insert(key, value);

        skip_whitespace(&mut chars);
        match chars.next() {
            Some((_, ',')) => {}
            Some((_, '}')) => break,
            Some((offset, c)) => return Err(LiteralError::Unexpected(c, offset)),
            None => return Err(LiteralError::Unterminated),
        }
    }

    skip_whitespace(&mut chars);
    match chars.next() {
        None => Ok(mapping),
        Some((offset, c)) => Err(LiteralError::Unexpected(c, offset)),
    }
}

fn skip_whitespace(chars: &mut Peekable<CharIndices<'_>>) {
    while chars.next_if(|&(_, c)| c.is_whitespace()).is_some() {}
}

fn expect(chars: &mut Peekable<CharIndices<'_>>, wanted: char) -> std::result::Result<(), LiteralError> {
    match chars.next() {
        Some((_, c)) if c == wanted => Ok(()),
        Some((offset, c)) => Err(LiteralError::Unexpected(c, offset)),
        None => Err(LiteralError::Unterminated),
    }
}

fn parse_quoted(chars: &mut Peekable<CharIndices<'_>>) -> std::result::Result<String, LiteralError> {
    let quote = match chars.next() {
        Some((_, c @ ('\'' | '"'))) => c,
        Some((offset, c)) => return Err(LiteralError::Unexpected(c, offset)),
        None => return Err(LiteralError::Unterminated),
    };

    let mut out = String::new();
    loop {
        match chars.next() {
            Some((_, '\\')) => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, c)) => out.push(c),
                None => return Err(LiteralError::Unterminated),
            },
            Some((_, c)) if c == quote => return Ok(out),
            Some((_, c)) => out.push(c),
            None => return Err(LiteralError::Unterminated),
        }
    }
}

fn excerpt(text: &str) -> String {
    let head: String = text.chars().take(120).collect();
    if head.len() < text.len() {
        format!("{}...", head)
    } else {
        head
    }
}
