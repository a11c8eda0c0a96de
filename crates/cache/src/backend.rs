//! Contracts for the storage backend that produces cached resources

use fspool_core::{BoxError, Target};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form properties handed to the backend factory on every create
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendConfig {
    properties: BTreeMap<String, String>,
}

impl BackendConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// An open session to a remote storage backend
///
/// The cache never inspects the resource; it only shares it and eventually
/// calls [`BackendResource::close`] exactly once.
pub trait BackendResource: Send + Sync + 'static {
    fn close(&self) -> Result<(), BoxError>;
}

/// Creates backend resources on cache misses
///
/// Must be safe to call repeatedly with the same arguments.
pub trait BackendFactory: Send + Sync + 'static {
    type Resource: BackendResource;

    fn create(&self, target: &Target, config: &BackendConfig) -> Result<Self::Resource, BoxError>;
}
