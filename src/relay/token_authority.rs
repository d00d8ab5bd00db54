use crate::constants::AUTH_TOKEN_ENV_PREFIX;
use subtle::ConstantTimeEq;
use tracing::{debug, error};

/// Validates caller credentials against the configured credential set.
///
/// A credential's identity is its index in the set, stable for the lifetime
/// of the configuration. An empty set denies everything.
#[derive(Debug, Clone, Default)]
pub struct TokenAuthority {
    credentials: Vec<String>,
}

impl TokenAuthority {
    pub fn new(credentials: Vec<String>) -> Self {
        if credentials.is_empty() {
            error!("No valid tokens configured; every request will be rejected");
        }
        Self { credentials }
    }

    /// Collect every `AUTH_TOKEN_*` variable, ordered by variable name
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut tokens: Vec<(String, String)> = vars
            .into_iter()
            .filter(|(name, value)| name.starts_with(AUTH_TOKEN_ENV_PREFIX) && !value.is_empty())
            .collect();
        tokens.sort_by(|a, b| a.0.cmp(&b.0));
        Self::new(tokens.into_iter().map(|(_, value)| value).collect())
    }

    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn validate(&self, credential: &str) -> bool {
        self.identity_of(credential).is_some()
    }

    /// Index of `credential` in the configured set
    pub fn identity_of(&self, credential: &str) -> Option<usize> {
        if self.credentials.is_empty() {
            error!("No valid tokens found in configuration; denying credential");
            return None;
        }
        let presented = credential.as_bytes();
        let identity = self.credentials.iter().position(|known| {
            known.len() == presented.len() && bool::from(known.as_bytes().ct_eq(presented))
        });
        debug!("Is token valid? {}", identity.is_some());
        identity
    }
}
