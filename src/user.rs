use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Identity value reserved for users that should receive a generated, cached identity.
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

/// Attributes of a user, sent to the server along with the identity for flag evaluation.
pub type Attributes = HashMap<String, AttributeValue>;

/// A single user attribute.
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string attribute.
    String(String),
    /// A numeric attribute.
    Number(f64),
    /// A boolean attribute.
    Boolean(bool),
    /// A set of strings.
    Set(Vec<String>),
    /// Explicit absence of a value.
    Null,
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// The user flags are evaluated for.
///
/// The identity is kept as a loosely-typed [`AttributeValue`] because it comes from the caller
/// as-is. The client normalizes it into a string when the user is validated.
///
/// ```
/// # use unlaunch::User;
/// let user = User::new("user-123").with_attribute("country", "US");
/// assert_eq!(user.identity(), Some("user-123"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique identity of the user. `None`, `""`, and `"anonymous"` request a generated identity.
    #[serde(default)]
    pub identity: Option<AttributeValue>,
    /// Arbitrary attributes used by targeting rules on the server.
    #[serde(default)]
    pub attributes: Attributes,
}

impl User {
    /// Create a user with the given identity and no attributes.
    pub fn new(identity: impl Into<String>) -> User {
        User {
            identity: Some(AttributeValue::String(identity.into())),
            attributes: Attributes::new(),
        }
    }

    /// Create a user that will be assigned a generated identity, reused across sessions when a
    /// storage backend is available.
    pub fn anonymous() -> User {
        User::new(ANONYMOUS_IDENTITY)
    }

    /// Add an attribute to the user.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> User {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns the identity if it is a string.
    ///
    /// Users returned by the client always carry a string identity.
    pub fn identity(&self) -> Option<&str> {
        match &self.identity {
            Some(AttributeValue::String(s)) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_numeric_identity() {
        let user: User = serde_json::from_str(r#"{"identity": 42, "attributes": {"plan": "pro"}}"#)
            .unwrap();

        assert_eq!(user.identity, Some(AttributeValue::Number(42.0)));
        assert_eq!(user.identity(), None);
        assert_eq!(
            user.attributes.get("plan"),
            Some(&AttributeValue::String("pro".to_owned()))
        );
    }

    #[test]
    fn attributes_serialize_untagged() {
        let user = User::new("bob")
            .with_attribute("age", 42.0)
            .with_attribute("beta", true)
            .with_attribute("groups", vec!["a".to_owned(), "b".to_owned()]);

        let json = serde_json::to_value(&user).unwrap();

        assert_eq!(json["identity"], "bob");
        assert_eq!(json["attributes"]["age"], 42.0);
        assert_eq!(json["attributes"]["beta"], true);
        assert_eq!(json["attributes"]["groups"], serde_json::json!(["a", "b"]));
    }
}
