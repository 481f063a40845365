use std::time::Duration;

use crate::database::constants::{DEFAULT_REDIRECT_LIMIT, DEFAULT_TIMEOUT};

/// Controls how redirect responses are followed by the request executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedirectPolicy {
    /// Hops allowed before the request fails with a redirect-limit error.
    pub max_hops: usize,
    /// Re-send the headers of the original request on every hop.
    pub preserve_headers: bool,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self {
            max_hops: DEFAULT_REDIRECT_LIMIT,
            preserve_headers: true,
        }
    }
}

/// Client configuration shared by a reference and everything derived from it.
#[derive(Clone, Debug)]
pub struct DatabaseSettings {
    timeout: Duration,
    redirect_policy: RedirectPolicy,
    default_headers: Vec<(String, String)>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            redirect_policy: RedirectPolicy::default(),
            default_headers: Vec::new(),
        }
    }
}

impl DatabaseSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_redirect_policy(mut self, policy: RedirectPolicy) -> Self {
        self.redirect_policy = policy;
        self
    }

    /// Adds a header sent with every request, e.g. an `Authorization` bearer token.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn redirect_policy(&self) -> &RedirectPolicy {
        &self.redirect_policy
    }

    pub fn default_headers(&self) -> &[(String, String)] {
        &self.default_headers
    }
}
