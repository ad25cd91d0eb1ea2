//! Error routing: map client error statuses to a fallback document
//!
//! The table is validated once against the scanned asset set and never
//! changes during a run.

use crate::core::asset::AssetSet;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default cache duration for fallback responses
pub const DEFAULT_ERROR_CACHE_TTL_SECS: u64 = 10;

fn default_cache_ttl() -> u64 {
    DEFAULT_ERROR_CACHE_TTL_SECS
}

/// One error route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRoute {
    /// Status code the CDN receives from storage (4xx)
    pub status: u16,
    /// Fallback document key (relative asset path, leading `/` allowed)
    pub document: String,
    /// Status code returned to the viewer
    pub response_status: u16,
    /// Seconds the CDN caches the fallback response
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl ErrorRoute {
    /// Route `status` to `document`, answering with `response_status`
    pub fn new(status: u16, document: impl Into<String>, response_status: u16) -> Self {
        ErrorRoute {
            status,
            document: document.into(),
            response_status,
            cache_ttl_secs: DEFAULT_ERROR_CACHE_TTL_SECS,
        }
    }

    /// Override the fallback cache duration
    pub fn with_cache_ttl(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = secs;
        self
    }

    /// Fallback document as an asset key
    pub fn document_key(&self) -> &str {
        self.document.trim_start_matches('/')
    }
}

/// CDN custom error response entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomErrorResponse {
    pub error_code: u16,
    pub response_page_path: String,
    pub response_code: String,
    #[serde(rename = "ErrorCachingMinTTL")]
    pub error_caching_min_ttl: u64,
}

/// Validated status-code to fallback mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorRoutingTable {
    routes: BTreeMap<u16, ErrorRoute>,
}

impl ErrorRoutingTable {
    /// Validate `routes` against the scanned assets
    ///
    /// # Examples
    ///
    /// ```
    /// use sitebinder::core::asset::{Asset, AssetSet};
    /// use sitebinder::core::routing::{ErrorRoute, ErrorRoutingTable};
    ///
    /// let assets: AssetSet = vec![Asset::new("error.html", b"oops".to_vec(), "text/html")]
    ///     .into_iter()
    ///     .collect();
    ///
    /// let routes = [ErrorRoute::new(404, "/error.html", 404)];
    /// let table = ErrorRoutingTable::new(&routes, &assets).unwrap();
    /// assert_eq!(table.lookup(404).unwrap().document_key(), "error.html");
    ///
    /// let missing = [ErrorRoute::new(404, "missing.html", 404)];
    /// assert!(ErrorRoutingTable::new(&missing, &assets).is_err());
    /// ```
    pub fn new(routes: &[ErrorRoute], assets: &AssetSet) -> Result<Self, ConfigError> {
        let table = Self::check_routes(routes)?;

        for route in table.values() {
            if !assets.contains(route.document_key()) {
                return Err(ConfigError::MissingDocument {
                    status: route.status,
                    document: route.document.clone(),
                });
            }
        }

        Ok(ErrorRoutingTable { routes: table })
    }

    /// Checks that need no assets: status ranges and unique matched codes
    ///
    /// Run before anything is read so a malformed table aborts without I/O.
    pub fn check(routes: &[ErrorRoute]) -> Result<(), ConfigError> {
        Self::check_routes(routes).map(|_| ())
    }

    fn check_routes(routes: &[ErrorRoute]) -> Result<BTreeMap<u16, ErrorRoute>, ConfigError> {
        let mut table = BTreeMap::new();

        for route in routes {
            if !(400..=499).contains(&route.status) {
                return Err(ConfigError::StatusOutOfRange(route.status));
            }
            if !(100..=599).contains(&route.response_status) {
                return Err(ConfigError::InvalidResponseStatus(route.response_status));
            }
            if table.insert(route.status, route.clone()).is_some() {
                return Err(ConfigError::DuplicateRoute(route.status));
            }
        }

        Ok(table)
    }

    /// Route for `status`, if configured
    pub fn lookup(&self, status: u16) -> Option<&ErrorRoute> {
        self.routes.get(&status)
    }

    /// Routes ordered by status code
    pub fn routes(&self) -> impl Iterator<Item = &ErrorRoute> {
        self.routes.values()
    }

    /// Number of routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route is configured
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Render as CDN custom error responses
    pub fn custom_error_responses(&self) -> Vec<CustomErrorResponse> {
        self.routes
            .values()
            .map(|route| CustomErrorResponse {
                error_code: route.status,
                response_page_path: format!("/{}", route.document_key()),
                response_code: route.response_status.to_string(),
                error_caching_min_ttl: route.cache_ttl_secs,
            })
            .collect()
    }
}
