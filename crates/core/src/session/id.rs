//! Validated session identifiers.

use std::fmt;

use crate::Error;

/// Longest accepted session identifier, in bytes.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Client session identifier.
///
/// Construction fails fast on empty, oversized or control-character ids; an
/// unknown but well-formed id is never an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Result<Self, Error> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::InvalidSession("session id must not be empty".into()));
        }
        if id.len() > MAX_SESSION_ID_LEN {
            return Err(Error::InvalidSession(format!(
                "session id too long: {} bytes (max {MAX_SESSION_ID_LEN})",
                id.len()
            )));
        }
        if id.chars().any(char::is_control) {
            return Err(Error::InvalidSession("session id contains control characters".into()));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for SessionId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_id() {
        let id = SessionId::new("sess-7f3a").unwrap();
        assert_eq!(id.as_str(), "sess-7f3a");
        assert_eq!(id.to_string(), "sess-7f3a");
    }

    #[test]
    fn test_rejects_empty_and_blank() {
        assert!(matches!(SessionId::new(""), Err(Error::InvalidSession(_))));
        assert!(matches!(SessionId::new("   "), Err(Error::InvalidSession(_))));
    }

    #[test]
    fn test_rejects_oversized() {
        let id = "x".repeat(MAX_SESSION_ID_LEN + 1);
        assert!(SessionId::new(id).is_err());
        assert!(SessionId::new("x".repeat(MAX_SESSION_ID_LEN)).is_ok());
    }

    #[test]
    fn test_rejects_control_chars() {
        assert!(SessionId::try_from("abc\n").is_err());
    }
}
