//! Normalization of caller-supplied users.
use std::sync::Arc;

use uuid::Uuid;

use crate::{
    storage::KeyValueStore,
    user::{AttributeValue, User, ANONYMOUS_IDENTITY},
    Error, Result,
};

/// Storage key of the cached anonymous identity.
const ANONYMOUS_ID_KEY: &str = "ul:$anonUserId";

/// Makes sure a user carries a usable string identity.
///
/// 1. A non-empty identity other than `"anonymous"` is kept, numbers are converted to strings.
/// 2. A missing, empty, or `"anonymous"` identity is replaced with a generated one. The generated
///    identity is cached in storage, if available, and reused on later calls.
/// 3. Anything else is an [`Error::InvalidUser`].
pub(crate) struct UserValidator {
    storage: Option<Arc<dyn KeyValueStore>>,
}

impl UserValidator {
    pub fn new(storage: Option<Arc<dyn KeyValueStore>>) -> UserValidator {
        UserValidator { storage }
    }

    pub async fn validate_user(&self, user: Option<&User>) -> Result<User> {
        let Some(user) = user else {
            return Err(Error::InvalidUser(
                "a user with an identity, or an anonymous user, must be specified".to_owned(),
            ));
        };

        let mut user = user.clone();
        let identity = match &user.identity {
            None | Some(AttributeValue::Null) => None,
            Some(AttributeValue::String(s)) if s.is_empty() || s == ANONYMOUS_IDENTITY => None,
            Some(AttributeValue::String(s)) => Some(s.clone()),
            Some(AttributeValue::Number(n)) => Some(n.to_string()),
            Some(other) => {
                return Err(Error::InvalidUser(format!(
                    "identity must be a string or a number, got {other:?}"
                )));
            }
        };

        let identity = match identity {
            Some(identity) => identity,
            None => self.anonymous_identity().await,
        };
        user.identity = Some(AttributeValue::String(identity));

        Ok(user)
    }

    async fn anonymous_identity(&self) -> String {
        if let Some(cached) = self.cached_anonymous_identity().await {
            return cached;
        }

        let identity = Uuid::new_v4().to_string();
        log::debug!(target: "unlaunch", identity = identity.as_str(); "generated anonymous identity");

        if let Some(storage) = &self.storage {
            if let Err(err) = storage.set(ANONYMOUS_ID_KEY, &identity).await {
                log::warn!(target: "unlaunch", "storage is unavailable, so the anonymous identity cannot be cached: {err}");
            }
        }

        identity
    }

    async fn cached_anonymous_identity(&self) -> Option<String> {
        let storage = self.storage.as_ref()?;
        // Read errors are not logged. If reading fails, writing the new identity will most likely
        // fail too and be logged there.
        storage
            .get(ANONYMOUS_ID_KEY)
            .await
            .ok()
            .flatten()
            .filter(|identity| !identity.is_empty())
    }
}
