//! Runtime configuration for the HTTP bridge.
//!
//! The configuration is shared between the handler and whatever daemon
//! code mutates it at runtime (for example when the allowed origin list is
//! edited over RPC), so every field sits behind a reader/writer lock.
//! Read accessors take the shared lock and return copies; mutation
//! accessors serialize behind the exclusive lock.

use std::sync::{PoisonError, RwLock};

/// Response headers owned by the CORS layer. User-supplied header maps may
/// not override them.
const CORS_OWNED_HEADERS: [&str; 3] = [
    "Access-Control-Allow-Origin",
    "Access-Control-Allow-Methods",
    "Access-Control-Allow-Credentials",
];

/// Shared server configuration guarded by a reader/writer lock.
#[derive(Debug, Default)]
pub struct ServerConfig {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    allowed_origins: Vec<String>,
    allowed_methods: Vec<String>,
    allow_credentials: bool,
    headers: Vec<(String, Vec<String>)>,
    version: String,
}

impl ServerConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the origins allowed by the CSRF checks.
    pub fn allowed_origins(&self) -> Vec<String> {
        self.read().allowed_origins.clone()
    }

    /// Replaces the allowed origin list.
    pub fn set_allowed_origins<I, S>(&self, origins: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.write().allowed_origins = origins.into_iter().map(Into::into).collect();
    }

    /// Appends origins to the allowed list.
    pub fn append_allowed_origins<I, S>(&self, origins: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.write()
            .allowed_origins
            .extend(origins.into_iter().map(Into::into));
    }

    /// Returns the allowed HTTP methods.
    pub fn allowed_methods(&self) -> Vec<String> {
        self.read().allowed_methods.clone()
    }

    /// Replaces the allowed HTTP method list.
    pub fn set_allowed_methods<I, S>(&self, methods: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.write().allowed_methods = methods.into_iter().map(Into::into).collect();
    }

    /// Returns whether credentialed requests are allowed.
    pub fn allow_credentials(&self) -> bool {
        self.read().allow_credentials
    }

    /// Sets whether credentialed requests are allowed.
    pub fn set_allow_credentials(&self, flag: bool) {
        self.write().allow_credentials = flag;
    }

    /// Returns the user-supplied headers with the CORS-owned entries
    /// filtered out.
    pub fn api_headers(&self) -> Vec<(String, Vec<String>)> {
        self.read()
            .headers
            .iter()
            .filter(|(name, _)| !skip_api_header(name))
            .cloned()
            .collect()
    }

    /// Replaces the user-supplied header map.
    ///
    /// CORS-owned headers are accepted here but never written out; the
    /// filter lives in [`ServerConfig::api_headers`].
    pub fn set_headers<I, S>(&self, headers: I)
    where
        I: IntoIterator<Item = (S, Vec<String>)>,
        S: Into<String>,
    {
        self.write().headers = headers
            .into_iter()
            .map(|(name, values)| (name.into(), values))
            .collect();
    }

    /// Returns the daemon version string used by the user-agent handshake.
    pub fn version(&self) -> String {
        self.read().version.clone()
    }

    /// Sets the daemon version string.
    pub fn set_version(&self, version: impl Into<String>) {
        self.write().version = version.into();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn skip_api_header(name: &str) -> bool {
    CORS_OWNED_HEADERS
        .iter()
        .any(|owned| owned.eq_ignore_ascii_case(name))
}
