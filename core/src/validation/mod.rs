//! Collect-all validation.
//!
//! Every rule is evaluated and every failure recorded, so the caller can show
//! all problems with a form at once. Validation failures are data, returned
//! as [`ValidationErrors`]; they only become an [`EngineError`] at the point
//! where an operation refuses to continue.

pub mod forms;
pub mod gas;
pub mod references;

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::EngineError;

pub const BLANK_MESSAGE: &str = "This field cannot be blank";
pub const SELECTION_MESSAGE: &str = "This field must be selected";
pub const INVALID_SELECTION_MESSAGE: &str = "This field must be a valid selection";

static EMAIL_RX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("email pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    field_errors: Vec<FieldError>,
    non_field_errors: Vec<String>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.field_errors.is_empty() && self.non_field_errors.is_empty()
    }

    pub fn add_field_error(&mut self, field: &'static str, message: impl Into<String>) {
        self.field_errors.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn add_non_field_error(&mut self, message: impl Into<String>) {
        self.non_field_errors.push(message.into());
    }

    /// Every field failure, in the order the rules were evaluated.
    pub fn field_errors(&self) -> &[FieldError] {
        &self.field_errors
    }

    pub fn non_field_errors(&self) -> &[String] {
        &self.non_field_errors
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.field_errors.iter().any(|e| e.field == field)
    }

    pub fn messages_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.field_errors
            .iter()
            .filter(move |e| e.field == field)
            .map(|e| e.message.as_str())
    }

    /// The message shown next to a field: the last one registered for it.
    pub fn message_for(&self, field: &str) -> Option<&str> {
        self.field_errors
            .iter()
            .rev()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.field_errors.extend(other.field_errors);
        self.non_field_errors.extend(other.non_field_errors);
    }

    pub fn into_result(self) -> Result<(), EngineError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for error in &self.field_errors {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", error.field, error.message)?;
            first = false;
        }
        for message in &self.non_field_errors {
            if !first {
                f.write_str("; ")?;
            }
            f.write_str(message)?;
            first = false;
        }
        Ok(())
    }
}

/// Accumulates failures from a sequence of checks.
#[derive(Debug, Default)]
pub struct Validator {
    errors: ValidationErrors,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_field(&mut self, ok: bool, field: &'static str, message: impl Into<String>) {
        if !ok {
            self.errors.add_field_error(field, message);
        }
    }

    pub fn check(&mut self, ok: bool, message: impl Into<String>) {
        if !ok {
            self.errors.add_non_field_error(message);
        }
    }

    pub fn not_blank(&mut self, value: &str, field: &'static str) {
        self.check_field(!value.trim().is_empty(), field, BLANK_MESSAGE);
    }

    pub fn max_chars(&mut self, value: &str, max: usize, field: &'static str) {
        self.check_field(
            value.chars().count() <= max,
            field,
            format!(
                "This field cannot be more than {} characters long",
                group_thousands(max as f64)
            ),
        );
    }

    pub fn selected(&mut self, id: i64, field: &'static str) {
        self.check_field(id > 0, field, SELECTION_MESSAGE);
    }

    pub fn in_bounds<T>(&mut self, value: T, bounds: Bounds<T>, field: &'static str)
    where
        T: Copy + PartialOrd + Into<f64>,
    {
        self.check_field(bounds.contains(value), field, bounds.message());
    }

    /// Range check that only applies when a value was supplied.
    pub fn opt_in_bounds<T>(&mut self, value: Option<T>, bounds: Bounds<T>, field: &'static str)
    where
        T: Copy + PartialOrd + Into<f64>,
    {
        if let Some(value) = value {
            self.in_bounds(value, bounds, field);
        }
    }

    pub fn email(&mut self, value: &str, field: &'static str) {
        self.check_field(
            value.is_empty() || EMAIL_RX.is_match(value),
            field,
            "This field must be a valid email address",
        );
    }

    pub fn http_url(&mut self, value: &str, field: &'static str) {
        self.check_field(
            value.is_empty() || is_http_url(value),
            field,
            "This field must be a valid HTTP or HTTPS URL",
        );
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    pub fn finish(self) -> ValidationErrors {
        self.errors
    }
}

/// Inclusive numeric range used by the field rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds<T> {
    pub min: T,
    pub max: T,
}

impl<T: Copy + PartialOrd + Into<f64>> Bounds<T> {
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: T) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn message(&self) -> String {
        format!(
            "This field must be between {} and {} inclusive",
            group_thousands(self.min.into()),
            group_thousands(self.max.into())
        )
    }
}

/// Render a number with `,` between thousands groups (`7000` → `7,000`).
fn group_thousands(value: f64) -> String {
    let text = value.to_string();
    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.as_str()),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    match frac_part {
        Some(frac) => format!("{sign}{grouped}.{frac}"),
        None => format!("{sign}{grouped}"),
    }
}

fn is_http_url(value: &str) -> bool {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    match rest {
        Some(rest) => {
            let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
            !host.is_empty() && !host.contains(char::is_whitespace)
        }
        None => false,
    }
}
