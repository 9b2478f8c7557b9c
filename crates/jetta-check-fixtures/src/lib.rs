#![warn(missing_docs)]
//! # jetta-check-fixtures
//!
//! ## Purpose
//! Composes the request client and the schema validator into the per-test
//! context used by the `jetta-receiver` scenarios.
//!
//! ## Responsibilities
//! - Resolve harness configuration (target base URL, schemas root) from
//!   defaults and environment overrides.
//! - Build a fresh [`ApiContext`] for each test function.
//! - Define the receiver's request/response payloads.
//! - Install the test log subscriber.
//!
//! ## Data flow
//! [`HarnessConfig::from_env`] -> [`ApiContext::new`] -> scenario test uses
//! `context.rest` for requests and `context.jsv` for schema checks.
//!
//! ## Ownership and lifetimes
//! [`ApiContext`] owns both utilities by value; nothing is shared between
//! tests.
//!
//! ## Error model
//! Setup failures surface as [`FixtureError`]; utility errors convert into it
//! through `From`.

use std::path::{Path, PathBuf};

use jetta_check_rest::{Response, Rest, RestError};
use jetta_check_validator::{JsonSchemaValidator, SchemaSource, ValidatorError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Default address of the receiver under test.
pub const DEFAULT_BASE_URL: &str = "http://my-server.com:5002";
/// Receiver route.
pub const JETTA_RECEIVER_PATH: &str = "/jetta-receiver";
/// Schema of the receiver's add response, relative to the schemas root.
pub const JETTA_SCHEMA_FILE: &str = "jetta_schema.json";
/// Overrides [`HarnessConfig::base_url`].
pub const BASE_URL_ENV: &str = "JETTA_CHECK_BASE_URL";
/// Overrides [`HarnessConfig::schemas_root`].
pub const SCHEMAS_ROOT_ENV: &str = "JETTA_CHECK_SCHEMAS_ROOT";

/// `action` value for adding a car.
pub const ADD_ACTION: &str = "add";
/// `result` returned for a successful add.
pub const RESULT_ADDED: &str = "added successfully";
/// `result` returned when make/model are empty.
pub const RESULT_NO_CONTENT: &str = "No Content";

/// Harness configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Base URL of the system under test.
    pub base_url: Url,
    /// Directory holding the JSON schemas.
    pub schemas_root: PathBuf,
}

impl HarnessConfig {
    /// Creates a configuration from explicit values.
    ///
    /// # Errors
    /// Returns [`FixtureError::InvalidBaseUrl`] when `base_url` does not parse.
    pub fn new(base_url: &str, schemas_root: impl Into<PathBuf>) -> Result<Self, FixtureError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            schemas_root: schemas_root.into(),
        })
    }

    /// Defaults overridden by `JETTA_CHECK_BASE_URL` and
    /// `JETTA_CHECK_SCHEMAS_ROOT`.
    ///
    /// # Errors
    /// Returns [`FixtureError::InvalidBaseUrl`] for an unparsable override.
    pub fn from_env() -> Result<Self, FixtureError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`HarnessConfig::from_env`] with a custom variable lookup.
    ///
    /// # Errors
    /// Returns [`FixtureError::InvalidBaseUrl`] for an unparsable override.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, FixtureError> {
        let base_url = lookup(BASE_URL_ENV)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let schemas_root = lookup(SCHEMAS_ROOT_ENV)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_schemas_root);

        Self::new(base_url.trim(), schemas_root)
    }

    /// Joins `path` onto the base URL.
    ///
    /// # Errors
    /// Returns [`FixtureError::InvalidBaseUrl`] when the result is not a URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, FixtureError> {
        self.base_url
            .join(path)
            .map_err(|source| FixtureError::InvalidBaseUrl {
                value: format!("{}{path}", self.base_url),
                source,
            })
    }

    /// Full URL of the receiver route.
    ///
    /// # Errors
    /// See [`HarnessConfig::endpoint`].
    pub fn jetta_receiver_url(&self) -> Result<String, FixtureError> {
        self.endpoint(JETTA_RECEIVER_PATH).map(String::from)
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base url is valid"),
            schemas_root: default_schemas_root(),
        }
    }
}

fn parse_base_url(value: &str) -> Result<Url, FixtureError> {
    Url::parse(value).map_err(|source| FixtureError::InvalidBaseUrl {
        value: value.to_string(),
        source,
    })
}

/// `schemas/` at the workspace root.
pub fn default_schemas_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .ancestors()
        .nth(2)
        .unwrap_or(manifest_dir)
        .join("schemas")
}

/// Per-test context holding one request client and one schema validator.
pub struct ApiContext {
    /// Fresh HTTP session.
    pub rest: Rest,
    /// Validator rooted at [`HarnessConfig::schemas_root`].
    pub jsv: JsonSchemaValidator,
    /// Configuration the context was built from.
    pub config: HarnessConfig,
}

impl ApiContext {
    /// Builds a context and makes sure test logging is installed.
    ///
    /// # Errors
    /// Returns [`FixtureError::Rest`] when the HTTP client cannot be built and
    /// [`FixtureError::Validator`] when the schemas root is unusable.
    pub fn new(config: HarnessConfig) -> Result<Self, FixtureError> {
        init_test_logging();
        let rest = Rest::new()?;
        let jsv = JsonSchemaValidator::new(&config.schemas_root)?;
        debug!(
            base_url = %config.base_url,
            schemas_root = %jsv.root_path_schemas().display(),
            "api context ready"
        );

        Ok(Self { rest, jsv, config })
    }

    /// Builds a context from [`HarnessConfig::from_env`].
    ///
    /// # Errors
    /// See [`HarnessConfig::from_env`] and [`ApiContext::new`].
    pub fn from_env() -> Result<Self, FixtureError> {
        Self::new(HarnessConfig::from_env()?)
    }

    /// Validates a response body against a schema file under the schemas
    /// root.
    ///
    /// # Errors
    /// Propagates every [`ValidatorError`], including
    /// [`ValidatorError::NotJson`] for non-JSON bodies.
    pub fn validate_schema(
        &self,
        response: &Response,
        schema_file: &str,
    ) -> Result<bool, ValidatorError> {
        let source = SchemaSource::file(self.jsv.schema_file(schema_file));
        self.jsv.is_response_valid(response.json.as_ref(), &source)
    }
}

/// Installs a `tracing` fmt subscriber writing through the test harness.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`. Safe to call from
/// every test; only the first call installs anything.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Car described in receiver payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Car {
    /// Manufacturer.
    pub make: String,
    /// Model name.
    pub model: String,
}

/// Request body accepted by the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddCarRequest {
    /// Requested action, `add`.
    pub action: String,
    /// Car to add.
    pub car: Car,
}

impl AddCarRequest {
    /// `add` request for `make`/`model`.
    pub fn add(make: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            action: ADD_ACTION.to_string(),
            car: Car {
                make: make.into(),
                model: model.into(),
            },
        }
    }
}

/// Response body returned by the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverResponse {
    /// Outcome text.
    pub result: String,
    /// Echoed car, absent for the no-content outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub car: Option<Car>,
}

/// Fixture setup errors.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// Base URL override or joined endpoint is not a URL.
    #[error("invalid base url `{value}`: {source}")]
    InvalidBaseUrl {
        /// Offending value.
        value: String,
        /// Parse failure.
        source: url::ParseError,
    },
    /// Request client failure.
    #[error("rest client error: {0}")]
    Rest(#[from] RestError),
    /// Schema validator failure.
    #[error("schema validator error: {0}")]
    Validator(#[from] ValidatorError),
}
