//! Path Template Mini-Format
//!
//! Dataset locations are described by templates such as
//! `corr/CORR-{visit:07d}-{ccd:03d}.fits`. A template is parsed once into
//! segments and rendered against a data id per dataset instance.
//!
//! Supported placeholders:
//! - `{key}` - substituted verbatim
//! - `{key:07d}` - integer substituted with zero padding

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GenError;

/// One coordinate value of a dataset identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdValue {
    Int(i64),
    Text(String),
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for IdValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for IdValue {
    fn from(v: u64) -> Self {
        Self::Int(v as i64)
    }
}

impl From<u32> for IdValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for IdValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for IdValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// A dataset identifier: named coordinates (visit, ccd, tract, patch,
/// filter, ...) locating one unit of data.
///
/// Keys iterate in sorted order, so anything derived from a data id
/// (paths, command lines, log names) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataId {
    values: BTreeMap<String, IdValue>,
}

impl DataId {
    /// Creates an empty data id (used by repository-level datasets).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a coordinate, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<IdValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Sets a coordinate in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<IdValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Looks up a coordinate.
    pub fn get(&self, key: &str) -> Option<&IdValue> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns a copy of this id extended with the coordinates of
    /// `other` (`other` wins on shared keys).
    pub fn merged(&self, other: &DataId) -> DataId {
        let mut values = self.values.clone();
        values.extend(other.values.clone());
        DataId { values }
    }

    /// Renders the id as a task selector, e.g.
    /// `--id filter=HSC-R patch=8,7 tract=0`.
    pub fn ident(&self, prefix: &str) -> String {
        let mut out = prefix.to_string();
        for (key, value) in &self.values {
            out.push(' ');
            out.push_str(key);
            out.push('=');
            out.push_str(&value.to_string());
        }
        out
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.values {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}={}", key, value)?;
            first = false;
        }
        Ok(())
    }
}

/// One parsed segment of a path template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field { key: String, width: usize },
}

/// A parsed path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parses a template string into segments.
    ///
    /// Returns an error on unbalanced braces or a malformed field spec.
    pub fn parse(raw: &str) -> Result<Self, GenError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    let mut field = String::new();
                    let mut closed = false;
                    for fc in chars.by_ref() {
                        if fc == '}' {
                            closed = true;
                            break;
                        }
                        field.push(fc);
                    }
                    if !closed {
                        return Err(GenError::BadTemplate {
                            template: raw.to_string(),
                            reason: "unterminated '{'".to_string(),
                        });
                    }
                    segments.push(parse_field(raw, &field)?);
                }
                '}' => {
                    return Err(GenError::BadTemplate {
                        template: raw.to_string(),
                        reason: "unmatched '}'".to_string(),
                    });
                }
                _ => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Renders the template against a data id.
    ///
    /// `dataset` is only used to produce a useful error message when a
    /// required coordinate is missing.
    pub fn render(&self, dataset: &str, id: &DataId) -> Result<String, GenError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field { key, width } => {
                    let value = id.get(key).ok_or_else(|| GenError::MissingIdKey {
                        dataset: dataset.to_string(),
                        key: key.clone(),
                    })?;
                    match (value, *width) {
                        (IdValue::Int(v), w) if w > 0 => {
                            out.push_str(&format!("{:0width$}", v, width = w));
                        }
                        (value, _) => out.push_str(&value.to_string()),
                    }
                }
            }
        }
        Ok(out)
    }

    /// The coordinate keys this template requires.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field { key, .. } => Some(key.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// The template source string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Parses the inside of a `{...}` placeholder: `key` or `key:07d`.
fn parse_field(raw: &str, field: &str) -> Result<Segment, GenError> {
    let bad = |reason: &str| GenError::BadTemplate {
        template: raw.to_string(),
        reason: reason.to_string(),
    };

    let (key, spec) = match field.split_once(':') {
        Some((key, spec)) => (key, Some(spec)),
        None => (field, None),
    };

    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(bad("empty or non-alphanumeric field key"));
    }

    let width = match spec {
        None => 0,
        Some(spec) => {
            let digits = spec
                .strip_suffix('d')
                .ok_or_else(|| bad("field spec must end in 'd'"))?;
            digits
                .parse::<usize>()
                .map_err(|_| bad("field width is not a number"))?
        }
    };

    Ok(Segment::Field {
        key: key.to_string(),
        width,
    })
}
