// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Parsers for the environment representation of structured APM settings.
//!
//! They return errors; deciding what to log and which fallback to store is left to the
//! transforms registered in [`super::apm`].

use std::collections::HashMap;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("bad format for entry {entry:?}, expected name=rate")]
    MalformedEntry { entry: String },
    #[error("unable to parse rate of entry {entry:?}: {source}")]
    InvalidRate {
        entry: String,
        source: std::num::ParseFloatError,
    },
    #[error("unterminated quoted field")]
    UnterminatedQuote,
    #[error("separator {0:?} is not a single byte character")]
    InvalidSeparator(char),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ParseError {
    /// Whether the input text itself is malformed.
    ///
    /// Every variant but [`ParseError::InvalidSeparator`] is reported to the operator as the same
    /// format error, a non numeric rate included.
    pub fn is_format_error(&self) -> bool {
        match self {
            ParseError::MalformedEntry { .. }
            | ParseError::InvalidRate { .. }
            | ParseError::UnterminatedQuote
            | ParseError::Csv(_)
            | ParseError::Json(_) => true,
            ParseError::InvalidSeparator(_) => false,
        }
    }
}

/// Splits one delimited record into its fields.
///
/// Leading whitespace of every field is dropped before looking for an opening quote. A quoted
/// field may contain the separator and escapes quotes by doubling them. Any other quote is kept
/// as a literal character, including a quote inside a quoted field that isn't followed by a
/// separator. Only the first record of `s` is read.
pub fn split_csv_string(s: &str, sep: char) -> Result<Vec<String>, ParseError> {
    if !sep.is_ascii() || sep == '"' || sep == '\n' || sep == '\r' {
        return Err(ParseError::InvalidSeparator(sep));
    }
    if s.is_empty() {
        return Ok(Vec::new());
    }
    let normalized = normalize_record(s, sep)?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(sep as u8)
        .from_reader(normalized.as_bytes());

    let mut record = csv::StringRecord::new();
    if !reader.read_record(&mut record)? {
        return Ok(Vec::new());
    }
    Ok(record.iter().map(String::from).collect())
}

/// Rewrites the first record of loosely formatted input as strict CSV.
///
/// Leading whitespace of the fields is removed and literal quotes inside quoted fields are
/// doubled. A quoted field reaching the end of the input is an error, unless a literal quote was
/// already kept in it, in which case it is closed.
fn normalize_record(s: &str, sep: char) -> Result<String, ParseError> {
    enum State {
        FieldStart,
        Unquoted,
        Quoted { literal_quote: bool },
        QuoteInQuoted { literal_quote: bool },
    }

    let mut out = String::with_capacity(s.len() + 2);
    let mut state = State::FieldStart;
    for c in s.chars() {
        state = match (state, c) {
            (State::Quoted { literal_quote }, '"') => State::QuoteInQuoted { literal_quote },
            (State::Quoted { literal_quote }, c) => {
                out.push(c);
                State::Quoted { literal_quote }
            }
            // doubled quote
            (State::QuoteInQuoted { literal_quote }, '"') => {
                out.push_str("\"\"");
                State::Quoted { literal_quote }
            }
            (State::QuoteInQuoted { .. }, c) if c == sep => {
                out.push('"');
                out.push(c);
                State::FieldStart
            }
            (State::QuoteInQuoted { .. }, '\n' | '\r') => {
                out.push('"');
                return Ok(out);
            }
            (State::QuoteInQuoted { .. }, c) => {
                out.push_str("\"\"");
                out.push(c);
                State::Quoted {
                    literal_quote: true,
                }
            }
            (_, '\n' | '\r') => return Ok(out),
            (_, c) if c == sep => {
                out.push(c);
                State::FieldStart
            }
            (State::FieldStart, c) if c.is_whitespace() => State::FieldStart,
            (State::FieldStart, '"') => {
                out.push('"');
                State::Quoted {
                    literal_quote: false,
                }
            }
            (_, c) => {
                out.push(c);
                State::Unquoted
            }
        };
    }
    match state {
        State::Quoted {
            literal_quote: false,
        } => Err(ParseError::UnterminatedQuote),
        State::Quoted {
            literal_quote: true,
        }
        | State::QuoteInQuoted { .. } => {
            out.push('"');
            Ok(out)
        }
        State::FieldStart | State::Unquoted => Ok(out),
    }
}

/// Parses one `name=rate` token
pub fn parse_name_and_rate(token: &str) -> Result<(&str, f64), ParseError> {
    let mut parts = token.split('=');
    let (Some(name), Some(rate), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ParseError::MalformedEntry {
            entry: token.to_string(),
        });
    };
    let rate = rate.parse::<f64>().map_err(|source| ParseError::InvalidRate {
        entry: token.to_string(),
        source,
    })?;
    Ok((name, rate))
}

/// Parses analyzed spans of the form
/// `service_name|operation_name=rate,other_service|other_operation=rate`.
///
/// The first malformed entry fails the whole string, nothing parsed before it is returned.
/// A name appearing twice keeps the last rate.
pub fn parse_analyzed_spans(s: &str) -> Result<HashMap<String, f64>, ParseError> {
    let mut analyzed_spans = HashMap::new();
    if s.is_empty() {
        return Ok(analyzed_spans);
    }
    for token in s.split(',') {
        let (name, rate) = parse_name_and_rate(token)?;
        analyzed_spans.insert(name.to_string(), rate);
    }
    Ok(analyzed_spans)
}

/// Parses a JSON array of string to string objects
pub fn parse_string_map_list(s: &str) -> Result<Vec<HashMap<String, String>>, ParseError> {
    Ok(serde_json::from_str(s)?)
}
