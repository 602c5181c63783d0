//! Client configuration types.
//!
//! Plain structs with `Default` impls; the `runlens` binary maps its flags
//! onto them. Call [`ClientConfig::validate`] before use.

use std::num::NonZeroU32;
use std::time::Duration;

use runlens_core::DEFAULT_PAGE_SIZE;

/// Errors from [`ClientConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("`{name}` must not be empty")]
    Empty { name: &'static str },
    #[error("`{name}` must be greater than zero")]
    Zero { name: &'static str },
    #[error("store base url must start with http:// or https://, got {url:?}")]
    InvalidUrl { url: String },
}

/// Top-level client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Rows per page for table views.
    pub page_size: NonZeroU32,
    /// Deadline after which an in-flight slot request is cancelled. `None`
    /// disables the deadline. A fired deadline is handled exactly like a
    /// superseded request: silently.
    pub request_deadline: Option<Duration>,
    pub store: StoreConfig,
    pub aggregation: AggregationConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            request_deadline: None,
            store: StoreConfig::default(),
            aggregation: AggregationConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Checks the configuration for values that cannot work.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.aggregation.validate()
    }
}

/// HTTP record store connection settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base URL; queries are POSTed to `{base_url}/query`.
    pub base_url: String,
    /// Transport-level timeout. Expiry is a store failure, not a cancellation.
    pub request_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl StoreConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] for a non-HTTP base URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.starts_with("http://") || self.base_url.starts_with("https://") {
            Ok(())
        } else {
            Err(ConfigError::InvalidUrl {
                url: self.base_url.clone(),
            })
        }
    }
}

/// How the aggregation orchestrator builds and post-processes its query.
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Payload field holding a record's source identifier.
    pub source_field: String,
    /// Payload field holding a record's state kind.
    pub kind_field: String,
    /// State kinds to include; one sub-predicate per source per kind. Empty
    /// matches every kind.
    pub kinds: Vec<String>,
    /// Payload fields tried in order to derive a record's timestamp (epoch millis).
    pub timestamp_fields: Vec<String>,
    /// Records requested per page while walking the result set.
    pub page_limit: u32,
    /// Upper bound on pages followed per fetch.
    pub max_pages: u32,
    pub reference: ReferenceConfig,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            source_field: "workflowId".to_string(),
            kind_field: "status".to_string(),
            kinds: vec![
                "scheduled".to_string(),
                "running".to_string(),
                "completed".to_string(),
                "failed".to_string(),
            ],
            timestamp_fields: vec!["startedAt".to_string(), "scheduledAt".to_string()],
            page_limit: 500,
            max_pages: 20,
            reference: ReferenceConfig::default(),
        }
    }
}

impl AggregationConfig {
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for empty field names or zero limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_field.is_empty() {
            return Err(ConfigError::Empty {
                name: "source_field",
            });
        }
        if self.timestamp_fields.is_empty() {
            return Err(ConfigError::Empty {
                name: "timestamp_fields",
            });
        }
        if !self.kinds.is_empty() && self.kind_field.is_empty() {
            return Err(ConfigError::Empty { name: "kind_field" });
        }
        if self.page_limit == 0 {
            return Err(ConfigError::Zero { name: "page_limit" });
        }
        if self.max_pages == 0 {
            return Err(ConfigError::Zero { name: "max_pages" });
        }
        self.reference.validate()
    }
}

/// Source of the id -> display-name reference cache.
#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    /// Type tag of the records listed to build the cache.
    pub record_type: String,
    /// Payload field holding the display name.
    pub name_field: String,
    /// Explicit bound on the listing query.
    pub limit: u32,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            record_type: "workflow".to_string(),
            name_field: "name".to_string(),
            limit: 1000,
        }
    }
}

impl ReferenceConfig {
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for an empty field or a zero limit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.record_type.is_empty() {
            return Err(ConfigError::Empty {
                name: "reference.record_type",
            });
        }
        if self.name_field.is_empty() {
            return Err(ConfigError::Empty {
                name: "reference.name_field",
            });
        }
        if self.limit == 0 {
            return Err(ConfigError::Zero {
                name: "reference.limit",
            });
        }
        Ok(())
    }
}
