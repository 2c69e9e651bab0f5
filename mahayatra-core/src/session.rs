use chrono::Utc;
use rand::distributions::Uniform;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::LockError;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const MAX_LEN: usize = 128;

/// Correlates the holds of one booking attempt. Not a credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// `session_{unix millis}_{9 random base36 chars}`.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let pick = Uniform::from(0..BASE36.len());
        let suffix: String = (0..9).map(|_| BASE36[rng.sample(pick)] as char).collect();
        Self(format!("session_{}_{}", Utc::now().timestamp_millis(), suffix))
    }

    pub fn parse(raw: &str) -> Result<Self, LockError> {
        if raw.is_empty() || raw.len() > MAX_LEN || raw.chars().any(|c| c.is_whitespace() || c == '|') {
            return Err(LockError::InvalidSession(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = LockError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(value: SessionId) -> Self {
        value.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("session_"));

        let suffix = a.as_str().rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 9);
        assert!(suffix.bytes().all(|c| BASE36.contains(&c)));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse("has space").is_err());
        assert!(SessionId::parse("pipe|sep").is_err());
        assert!(SessionId::parse(&"x".repeat(129)).is_err());
        assert_eq!(SessionId::parse("session_1_abc").unwrap().as_str(), "session_1_abc");
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: SessionId = serde_json::from_str("\"session_42_x\"").unwrap();
        assert_eq!(ok.as_str(), "session_42_x");
        assert!(serde_json::from_str::<SessionId>("\"\"").is_err());
    }
}
