//! Storage targets addressed by URI

use crate::errors::{Error, Result};
use std::fmt::{self, Display};
use std::str::FromStr;
use url::Url;

const REDACTED: &str = "****";

/// A storage backend location such as `hdfs://namenode:8020/warehouse`
///
/// Scheme and authority are normalized to lowercase so that targets that
/// differ only in case share cache entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    url: Url,
    scheme: String,
    authority: String,
}

impl Target {
    /// Parse an absolute URI into a target
    pub fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).map_err(|e| Error::invalid_target(uri, e.to_string()))?;
        Ok(Self::from_url(url))
    }

    /// Build a target from an already parsed URL
    pub fn from_url(url: Url) -> Self {
        let scheme = url.scheme().to_lowercase();
        let authority = authority_of(&url).to_lowercase();
        Self {
            url,
            scheme,
            authority,
        }
    }

    /// Normalized scheme, e.g. `hdfs`
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Normalized authority (`user@host:port`), empty when the URI has none
    ///
    /// A password in the URI is never part of the authority.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

fn authority_of(url: &Url) -> String {
    let mut authority = String::new();
    if !url.username().is_empty() {
        authority.push_str(url.username());
        authority.push('@');
    }
    if let Some(host) = url.host_str() {
        authority.push_str(host);
    }
    if let Some(port) = url.port() {
        authority.push(':');
        authority.push_str(&port.to_string());
    }
    authority
}

impl Display for Target {
    /// Writes the URI with any password masked
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.url.password().is_none() {
            return write!(f, "{}", self.url);
        }
        let mut redacted = self.url.clone();
        if redacted.set_password(Some(REDACTED)).is_err() {
            return f.write_str(REDACTED);
        }
        write!(f, "{redacted}")
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for Target {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
