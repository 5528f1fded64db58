use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Single environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    key: String,
    value: String,
}

impl KeyValue {
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Renders as `KEY=VALUE`, the form docker `-e` and process environments expect.
impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

impl FromStr for KeyValue {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((k, v)) if !k.is_empty() => Ok(KeyValue::new(k, v)),
            _ => Err(ModelError::InvalidEnv(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_on_first_equals() {
        let kv: KeyValue = "FOO=a=b".parse().unwrap();
        assert_eq!(kv.key(), "FOO");
        assert_eq!(kv.value(), "a=b");
        assert_eq!(kv.to_string(), "FOO=a=b");
    }

    #[test]
    fn parse_rejects_missing_key() {
        assert!("=bar".parse::<KeyValue>().is_err());
        assert!("bar".parse::<KeyValue>().is_err());
    }
}
