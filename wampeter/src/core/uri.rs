use std::{
    fmt::Display,
    sync::LazyLock,
};

use regex::Regex;
use serde::{
    Deserialize,
    Serialize,
    de::{
        Unexpected,
        Visitor,
    },
};
use thiserror::Error;

/// Error for an invalid URI.
#[derive(Debug, Error)]
#[error("invalid URI")]
pub struct InvalidUri;

/// Validates a strict URI.
pub fn validate_strict_uri<S>(uri: S) -> Result<(), InvalidUri>
where
    S: AsRef<str>,
{
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^([0-9a-z_]+\.)*([0-9a-z_]+)$").unwrap());
    if !RE.is_match(uri.as_ref()) {
        return Err(InvalidUri);
    }
    Ok(())
}

/// A uniform resource identifier, used in many aspects of WAMP messaging for identifying resources,
/// such as realms, procedures, and error reasons.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Uri(String);

impl Uri {
    /// Constructs a URI directly from a value known to be valid, skipping validation.
    pub(crate) fn from_known<S>(value: S) -> Self
    where
        S: Into<String>,
    {
        Self(value.into())
    }
}

impl Display for Uri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for Uri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Uri {
    type Error = InvalidUri;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_strict_uri(&value)?;
        Ok(Self(value))
    }
}

impl TryFrom<&str> for Uri {
    type Error = InvalidUri;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        validate_strict_uri(value)?;
        Ok(Self(value.to_owned()))
    }
}

impl Into<String> for Uri {
    fn into(self) -> String {
        self.0
    }
}

struct UriVisitor;

impl<'de> Visitor<'de> for UriVisitor {
    type Value = Uri;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "a URI")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Uri::try_from(v.to_owned()).map_err(|_| E::invalid_value(Unexpected::Str(&v), &self))
    }
}

impl<'de> Deserialize<'de> for Uri {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(UriVisitor)
    }
}

#[cfg(test)]
mod uri_test {
    use crate::core::uri::{
        Uri,
        validate_strict_uri,
    };

    #[test]
    fn validates_strict_uris() {
        assert_matches::assert_matches!(validate_strict_uri("com"), Ok(()));
        assert_matches::assert_matches!(validate_strict_uri("com123"), Ok(()));
        assert_matches::assert_matches!(validate_strict_uri("com.example.add"), Ok(()));
        assert_matches::assert_matches!(validate_strict_uri("com.example.ADD"), Err(_));
        assert_matches::assert_matches!(validate_strict_uri("com.example.add_123-@!!"), Err(_));
        assert_matches::assert_matches!(validate_strict_uri("com.1"), Ok(()));
        assert_matches::assert_matches!(validate_strict_uri("."), Err(_));
        assert_matches::assert_matches!(validate_strict_uri(".."), Err(_));
        assert_matches::assert_matches!(validate_strict_uri(".com.example.add1"), Err(_));
        assert_matches::assert_matches!(validate_strict_uri("com.example#"), Err(_));
        assert_matches::assert_matches!(validate_strict_uri("com..example"), Err(_));
    }

    #[test]
    fn fails_deserialization_invalid_uri() {
        assert_matches::assert_matches!(serde_json::from_str::<Uri>(r#""com.example.ADD""#), Err(err) => {
            assert!(err.to_string().contains("expected a URI"));
        });
    }
}
