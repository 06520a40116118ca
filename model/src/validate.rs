//! Field-level validation of request bodies.
//!
//! Request bodies deserialize into structs whose fields are all optional, so that a missing field
//! and a field of the wrong shape both surface as the same [`Error::validation_fails`].

use crate::error::Error;
use serde::Deserialize;

/// A required field.
pub fn required<T>(field: Option<T>) -> Result<T, Error> {
    field.ok_or_else(Error::validation_fails)
}

/// A required, non-blank string.
pub fn required_text(field: Option<String>) -> Result<String, Error> {
    text(required(field)?)
}

/// A non-blank string.
pub fn text(s: String) -> Result<String, Error> {
    if s.trim().is_empty() {
        return Err(Error::validation_fails());
    }
    Ok(s)
}

/// An optional string which, if present, must not be blank.
pub fn optional_text(field: Option<String>) -> Result<Option<String>, Error> {
    field.map(text).transpose()
}

/// A plausible email address: a non-empty local part and a dotted domain, without whitespace.
pub fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else { return false; };
    !local.is_empty()
        && !domain.contains('@')
        && !s.chars().any(char::is_whitespace)
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}

/// An email address.
pub fn email(s: String) -> Result<String, Error> {
    if !is_email(&s) {
        return Err(Error::validation_fails());
    }
    Ok(s)
}

/// A string of exactly `len` characters.
pub fn exact_len(s: String, len: usize) -> Result<String, Error> {
    if s.chars().count() != len {
        return Err(Error::validation_fails());
    }
    Ok(s)
}

/// A string of at least `len` characters.
pub fn min_len(s: String, len: usize) -> Result<String, Error> {
    if s.chars().count() < len {
        return Err(Error::validation_fails());
    }
    Ok(s)
}

/// A numeric field which clients may send either as a JSON number or as a numeric string.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Numeric {
    /// Canonical text for this number, if it really is one.
    pub fn into_text(self) -> Result<String, Error> {
        match self {
            Self::Int(n) => Ok(n.to_string()),
            Self::Float(x) if x.is_finite() => Ok(x.to_string()),
            Self::Text(s) if s.trim().parse::<f64>().map_or(false, f64::is_finite) => {
                Ok(s.trim().to_string())
            }
            _ => Err(Error::validation_fails()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn emails() {
        assert!(is_email("joao@fastmail.com"));
        assert!(is_email("a.b+c@mail.example.org"));
        assert!(!is_email("joao"));
        assert!(!is_email("joao@localhost"));
        assert!(!is_email("@mail.com"));
        assert!(!is_email("joao@mail..com"));
        assert!(!is_email("jo ao@mail.com"));
        assert!(!is_email("a@b@mail.com"));
    }

    #[test]
    fn numerics() {
        let parse = |json: &str| serde_json::from_str::<Numeric>(json).unwrap().into_text();
        assert_eq!(parse("42").unwrap(), "42");
        assert_eq!(parse("\" 42 \"").unwrap(), "42");
        assert_eq!(parse("\"12.5\"").unwrap(), "12.5");
        parse("\"12B\"").unwrap_err();
        parse("\"\"").unwrap_err();
    }

    #[test]
    fn texts() {
        assert_eq!(required_text(Some("x".into())).unwrap(), "x");
        required_text(Some("  ".into())).unwrap_err();
        required_text(None).unwrap_err();
        assert_eq!(optional_text(None).unwrap(), None);
        exact_len("12345-678".into(), 9).unwrap();
        exact_len("12345678".into(), 9).unwrap_err();
        min_len("secret".into(), 6).unwrap();
        min_len("short".into(), 6).unwrap_err();
    }
}
