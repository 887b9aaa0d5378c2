// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::collections::HashSet;
use std::sync::Arc;

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Decides whether a presented API key may use the protected routes.
pub trait CredentialCheck: Send + Sync {
    fn verify(&self, presented: Option<&str>) -> bool;
}

/// Accepts every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl CredentialCheck for AllowAll {
    fn verify(&self, _presented: Option<&str>) -> bool {
        true
    }
}

/// Static allow-list of API keys.
#[derive(Debug, Clone)]
pub struct ApiKeys {
    keys: HashSet<String>,
}

impl ApiKeys {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl CredentialCheck for ApiKeys {
    fn verify(&self, presented: Option<&str>) -> bool {
        presented.is_some_and(|key| self.keys.contains(key))
    }
}

/// Pick the check matching `require_api_key` / `api_keys` settings.
pub fn from_settings(require: bool, keys: &[String]) -> Arc<dyn CredentialCheck> {
    if require {
        Arc::new(ApiKeys::new(keys.iter().cloned()))
    } else {
        Arc::new(AllowAll)
    }
}
