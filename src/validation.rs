//! Request field validation
//!
//! Request fields are checked before a request reaches the transport, so a
//! malformed identifier costs no network round trip.

use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

/// A request field that carries an identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    /// Base-36 post id
    Article,
    /// Subreddit display name
    Subreddit,
    /// Base-36 comment id
    Comment,
    /// Account name
    Username,
    /// `t<digit>_<id>` reference
    Fullname,
}

impl Field {
    /// Every field
    pub const ALL: [Field; 5] = [
        Field::Article,
        Field::Subreddit,
        Field::Comment,
        Field::Username,
        Field::Fullname,
    ];

    /// Field name as it appears in error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Article => "article",
            Field::Subreddit => "subreddit",
            Field::Comment => "comment",
            Field::Username => "username",
            Field::Fullname => "fullname",
        }
    }

    fn default_pattern(&self) -> &'static str {
        match self {
            Field::Article | Field::Comment => r"^[0-9a-z]{1,13}$",
            Field::Subreddit => r"^[A-Za-z0-9][A-Za-z0-9_]{2,20}$",
            Field::Username => r"^[A-Za-z0-9_-]{3,20}$",
            Field::Fullname => r"^t[1-6]_[0-9a-z]{1,13}$",
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Field::Article | Field::Comment => "expected a base-36 id of 1 to 13 characters",
            Field::Subreddit => {
                "expected 3 to 21 letters, digits or underscores, not starting with an underscore"
            }
            Field::Username => "expected 3 to 20 letters, digits, underscores or dashes",
            Field::Fullname => "expected t<1-6>_<base-36 id>",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checks request fields before they are sent
pub trait Validator: Send + Sync {
    /// Accept `value` for `field`, or fail with [`Error::Validation`]
    fn validate(&self, field: Field, value: &str) -> Result<()>;
}

/// Accepts everything
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(&self, _field: Field, _value: &str) -> Result<()> {
        Ok(())
    }
}

/// Pattern-based validator with one anchored regex per field
#[derive(Clone, Debug)]
pub struct RegexValidator {
    patterns: HashMap<Field, Regex>,
}

impl RegexValidator {
    /// Validator with the built-in patterns for every field
    pub fn new() -> Result<Self> {
        let patterns = Field::ALL
            .iter()
            .map(|field| Ok((*field, compile(*field, field.default_pattern())?)))
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self { patterns })
    }

    /// Replace the pattern for one field
    ///
    /// The pattern is matched against the whole value, so anchors are
    /// optional.
    pub fn with_pattern(mut self, field: Field, pattern: &str) -> Result<Self> {
        let anchored = format!("^(?:{pattern})$");
        self.patterns.insert(field, compile(field, &anchored)?);
        Ok(self)
    }
}

fn compile(field: Field, pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .size_limit(1024 * 1024)
        .build()
        .map_err(|e| {
            Error::config(
                format!("invalid {field} pattern {pattern:?}: {e}"),
                format!("validation.{field}"),
            )
        })
}

impl Validator for RegexValidator {
    fn validate(&self, field: Field, value: &str) -> Result<()> {
        let matches = self
            .patterns
            .get(&field)
            .is_some_and(|pattern| pattern.is_match(value));
        if matches {
            return Ok(());
        }
        Err(Error::Validation {
            field: field.to_string(),
            value: value.to_string(),
            reason: if value.is_empty() {
                "must not be empty".to_string()
            } else {
                field.describe().to_string()
            },
        })
    }
}
