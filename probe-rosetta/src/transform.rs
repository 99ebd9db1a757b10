use std::fmt;
use std::str::FromStr;

use base64::Engine;
use serde::Deserialize;

use crate::error::VaultError;

/// A single value transformation in a mapping chain. The textual form in
/// the Rosetta document is `base64Decode`, `toUpper`, `toLower`,
/// `prefix(value)`, `suffix(value)`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Transformation {
    Base64Decode,
    ToUpper,
    ToLower,
    Prefix(String),
    Suffix(String),
}

impl Transformation {
    pub fn apply(&self, input: String) -> Result<String, VaultError> {
        match self {
            Transformation::Base64Decode => {
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(input.as_bytes())
                    .map_err(|e| {
                        VaultError::Mapping(format!("base64Decode failed: {}", e))
                    })?;
                String::from_utf8(decoded)
                    .map_err(|_| VaultError::Mapping("base64Decode produced non-utf8".to_string()))
            }
            Transformation::ToUpper => Ok(input.to_uppercase()),
            Transformation::ToLower => Ok(input.to_lowercase()),
            Transformation::Prefix(value) => Ok(format!("{}{}", value, input)),
            Transformation::Suffix(value) => Ok(format!("{}{}", input, value)),
        }
    }
}

impl FromStr for Transformation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base64Decode" => Ok(Transformation::Base64Decode),
            "toUpper" => Ok(Transformation::ToUpper),
            "toLower" => Ok(Transformation::ToLower),
            other => {
                if let Some(arg) = other.strip_prefix("prefix(").and_then(|r| r.strip_suffix(')')) {
                    Ok(Transformation::Prefix(arg.to_string()))
                } else if let Some(arg) =
                    other.strip_prefix("suffix(").and_then(|r| r.strip_suffix(')'))
                {
                    Ok(Transformation::Suffix(arg.to_string()))
                } else {
                    Err(format!("{} is not a valid transformation", other))
                }
            }
        }
    }
}

impl TryFrom<String> for Transformation {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transformation::Base64Decode => write!(f, "base64Decode"),
            Transformation::ToUpper => write!(f, "toUpper"),
            Transformation::ToLower => write!(f, "toLower"),
            Transformation::Prefix(value) => write!(f, "prefix({})", value),
            Transformation::Suffix(value) => write!(f, "suffix({})", value),
        }
    }
}

/// Apply a chain of transformations in order.
pub fn apply_chain(
    transformations: &[Transformation],
    input: String,
) -> Result<String, VaultError> {
    transformations
        .iter()
        .try_fold(input, |value, t| t.apply(value))
}
