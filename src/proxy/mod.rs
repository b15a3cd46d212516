//! Proxy endpoints, their selection and where they are loaded from.

pub mod selector;
pub mod source;

pub use selector::ProxySelector;

use crate::errors::{Result, SpeedTestError};
use crate::results::DIRECT;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use url::Url;

/// Protocol spoken by a proxy endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Http,
    Https,
    #[serde(alias = "socks")]
    Socks5,
}

impl ProxyKind {
    /// URL scheme understood by the HTTP client.
    ///
    /// SOCKS endpoints resolve host names on the proxy side.
    fn scheme(&self) -> &'static str {
        match self {
            ProxyKind::Http => "http",
            ProxyKind::Https => "https",
            ProxyKind::Socks5 => "socks5h",
        }
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyKind::Http => write!(f, "http"),
            ProxyKind::Https => write!(f, "https"),
            ProxyKind::Socks5 => write!(f, "socks5"),
        }
    }
}

/// A named proxy the engine can route probes through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    /// Label used for selection and reporting.
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProxyKind,
    pub server: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ProxyEndpoint {
    /// Create an endpoint without credentials.
    pub fn new(
        name: impl Into<String>,
        kind: ProxyKind,
        server: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            server: server.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Attach credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Render the endpoint as a proxy URL for the HTTP client.
    pub fn proxy_url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}://{}:{}",
            self.kind.scheme(),
            self.server,
            self.port
        ))
        .map_err(|e| {
            SpeedTestError::config(format!(
                "proxy {:?} has an invalid address: {}",
                self.name, e
            ))
            .with_source(e)
        })?;

        if let Some(ref username) = self.username {
            // Only fails for URLs that cannot carry credentials.
            let _ = url.set_username(username);
            let _ = url.set_password(self.password.as_deref());
        }

        Ok(url)
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {}:{})", self.name, self.kind, self.server, self.port)
    }
}

/// Rename endpoints so that every name is unique.
///
/// Samples and results are keyed by name. A repeated name, or one that
/// collides with the direct route, gets the first free ` #2`, ` #3`...
/// suffix; first occurrences keep theirs.
pub fn unique_names(endpoints: Vec<ProxyEndpoint>) -> Vec<ProxyEndpoint> {
    let mut taken: HashSet<String> = HashSet::from([DIRECT.to_string()]);

    endpoints
        .into_iter()
        .map(|mut endpoint| {
            if !taken.contains(&endpoint.name) {
                taken.insert(endpoint.name.clone());
                return endpoint;
            }

            let renamed = (2u64..)
                .map(|n| format!("{} #{}", endpoint.name, n))
                .find(|candidate| !taken.contains(candidate))
                .unwrap_or_default();
            warn!("Duplicate proxy name {:?}, using {:?}", endpoint.name, renamed);
            taken.insert(renamed.clone());
            endpoint.name = renamed;
            endpoint
        })
        .collect()
}
