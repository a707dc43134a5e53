//! Field validation
//!
//! Rules are checked for every field and every failure is collected, so a
//! form submission reports all of its problems at once.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$").expect("valid regex")
});

/// A single failed rule
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Field is missing or blank
    Empty { field: &'static str },

    /// Field is shorter than allowed
    TooShort { field: &'static str, min: usize },

    /// Field exceeds maximum length
    TooLong { field: &'static str, max: usize },

    /// Value doesn't match the required format
    InvalidFormat { field: &'static str, reason: &'static str },

    /// Value is not one of the accepted choices
    InvalidVariant { field: &'static str, value: String },

    /// Number outside an inclusive range
    OutOfRange { field: &'static str, min: i64, max: i64 },
}

impl ValidationError {
    pub fn field(&self) -> &'static str {
        match self {
            Self::Empty { field }
            | Self::TooShort { field, .. }
            | Self::TooLong { field, .. }
            | Self::InvalidFormat { field, .. }
            | Self::InvalidVariant { field, .. }
            | Self::OutOfRange { field, .. } => field,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty { field } => write!(f, "{} cannot be empty", field),
            Self::TooShort { field, min } => {
                write!(f, "{} must be at least {} characters", field, min)
            }
            Self::TooLong { field, max } => {
                write!(f, "{} exceeds maximum length of {} characters", field, max)
            }
            Self::InvalidFormat { field, reason } => write!(f, "{}: {}", field, reason),
            Self::InvalidVariant { field, value } => {
                write!(f, "invalid {} value: '{}'", field, value)
            }
            Self::OutOfRange { field, min, max } => {
                write!(f, "{} must be between {} and {}", field, min, max)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Every failure from one validation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    /// Messages grouped by field name.
    pub fn by_field(&self) -> BTreeMap<&'static str, Vec<String>> {
        let mut out: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
        for e in &self.0 {
            out.entry(e.field()).or_default().push(e.to_string());
        }
        out
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&messages.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

impl From<ValidationError> for ValidationErrors {
    fn from(e: ValidationError) -> Self {
        Self(vec![e])
    }
}

impl Serialize for ValidationErrors {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.by_field().serialize(serializer)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Rule {
    Required,
    MinLen(usize),
    MaxLen(usize),
    Email,
    Numeric,
    InList(&'static [&'static str]),
    /// `YYYY-MM-DD`
    Date,
    /// Whole number within inclusive bounds
    Range(i64, i64),
}

impl Rule {
    fn check(self, field: &'static str, value: &str) -> Option<ValidationError> {
        let format = |reason| ValidationError::InvalidFormat { field, reason };
        match self {
            Self::Required => value.trim().is_empty().then_some(ValidationError::Empty { field }),
            Self::MinLen(min) => {
                (value.chars().count() < min).then_some(ValidationError::TooShort { field, min })
            }
            Self::MaxLen(max) => {
                (value.chars().count() > max).then_some(ValidationError::TooLong { field, max })
            }
            Self::Email => (!EMAIL.is_match(value)).then(|| format("must be a valid email address")),
            Self::Numeric => (!value.parse::<f64>().is_ok_and(f64::is_finite))
                .then(|| format("must be numeric")),
            Self::InList(choices) => (!choices.contains(&value)).then(|| ValidationError::InvalidVariant {
                field,
                value: value.to_string(),
            }),
            Self::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .is_err()
                .then(|| format("must be a date (YYYY-MM-DD)")),
            Self::Range(min, max) => match value.parse::<i64>() {
                Ok(n) if (min..=max).contains(&n) => None,
                Ok(_) => Some(ValidationError::OutOfRange { field, min, max }),
                Err(_) => Some(format("must be a whole number")),
            },
        }
    }
}

/// Collects failures across fields.
///
/// A blank optional field skips its remaining rules; a blank required field
/// reports only [`ValidationError::Empty`].
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(&mut self, name: &'static str, value: Option<&str>, rules: &[Rule]) -> &mut Self {
        let value = value.unwrap_or("");
        if value.trim().is_empty() {
            if rules.iter().any(|r| matches!(r, Rule::Required)) {
                self.errors.push(ValidationError::Empty { field: name });
            }
            return self;
        }
        self.errors.extend(
            rules
                .iter()
                .filter(|r| !matches!(r, Rule::Required))
                .filter_map(|r| r.check(name, value)),
        );
        self
    }

    pub fn finish(&mut self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(std::mem::take(&mut self.errors)))
        }
    }
}
