#![warn(missing_docs)]
//! # jetta-check-validator
//!
//! ## Purpose
//! Validates JSON responses against Draft 7 JSON Schema documents stored under
//! one schemas directory.
//!
//! ## Responsibilities
//! - Load schema files and dereference `$ref` relative to each file's own
//!   location (same document, sibling files, `file://` URLs).
//! - Resolve any reference left in the schema against the configured schemas
//!   root at validation time.
//! - Report violations as a deduplicated list of [`ValidationFailure`]
//!   records.
//!
//! ## Data flow
//! [`SchemaSource`] -> dereferenced schema -> compiled Draft 7 validator ->
//! violations -> deduplication -> `Ok(true)` or
//! [`ValidatorError::Violations`].
//!
//! ## Ownership and lifetimes
//! The validator owns only its root path. Schemas are loaded per call; nothing
//! is cached between calls.
//!
//! ## Error model
//! Every failure is an error, never `Ok(false)`. Argument and precondition
//! problems ([`ValidatorError::Configuration`], [`ValidatorError::NotJson`])
//! are raised before any file is read.
//!
//! ## Example
//! ```rust
//! use jetta_check_validator::{JsonSchemaValidator, SchemaSource, ValidatorError};
//! use serde_json::json;
//!
//! let validator = JsonSchemaValidator::new("schemas").unwrap();
//! let source = SchemaSource::FromValue(json!({"type": "object", "required": ["car"]}));
//!
//! assert!(validator.is_response_valid(Some(&json!({"car": {}})), &source).unwrap());
//! assert!(matches!(
//!     validator.is_response_valid(Some(&json!({})), &source),
//!     Err(ValidatorError::Violations { .. })
//! ));
//! ```

mod resolve;

use std::borrow::Cow;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use jsonschema::{Draft, ErrorIterator, JSONSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::resolve::{RootDirResolver, TextEncoding, load_dereferenced};

/// Where the schema for one validation call comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaSource {
    /// Schema file, dereferenced before validation.
    FromFile {
        /// Path to the schema document.
        path: PathBuf,
        /// Text encoding label (`utf-8` when `None`, `utf-8-sig` strips a BOM).
        encoding: Option<String>,
    },
    /// Already parsed schema, used as is.
    FromValue(Value),
}

impl SchemaSource {
    /// UTF-8 schema file.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::FromFile {
            path: path.into(),
            encoding: None,
        }
    }

    /// Builds a source from two optional arguments of which exactly one must be
    /// set.
    ///
    /// # Errors
    /// Returns [`ValidatorError::Configuration`] when both or neither are given.
    pub fn from_options(
        schema_path: Option<PathBuf>,
        schema: Option<Value>,
        encoding: Option<String>,
    ) -> Result<Self, ValidatorError> {
        match (schema_path, schema) {
            (Some(path), None) => Ok(Self::FromFile { path, encoding }),
            (None, Some(schema)) => Ok(Self::FromValue(schema)),
            (None, None) => Err(ValidatorError::Configuration(
                "at least one argument is required: schema_path or schema".to_string(),
            )),
            (Some(_), Some(_)) => Err(ValidatorError::Configuration(
                "schema_path and schema cannot be used at the same time".to_string(),
            )),
        }
    }

    fn display_path(&self) -> Option<String> {
        match self {
            Self::FromFile { path, .. } => Some(path.display().to_string()),
            Self::FromValue(_) => None,
        }
    }
}

/// One distinct schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    /// Keys locating the violated sub-schema, from the schema root.
    pub schema_path: Vec<String>,
    /// Human-readable description of the violation.
    pub error_message: String,
    /// Bracket-indexed location in the validated document (`['car']['make']`).
    pub response_path: String,
}

/// Draft 7 JSON Schema validator rooted at one schemas directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonSchemaValidator {
    root_path_schemas: PathBuf,
}

impl JsonSchemaValidator {
    /// Creates a validator; a relative root is made absolute against the
    /// current directory.
    ///
    /// # Errors
    /// Returns [`ValidatorError::Io`] when the path cannot be made absolute.
    pub fn new(root_path_schemas: impl AsRef<Path>) -> Result<Self, ValidatorError> {
        let root = root_path_schemas.as_ref();
        let root_path_schemas =
            std::path::absolute(root).map_err(|source| ValidatorError::Io {
                path: root.to_path_buf(),
                source,
            })?;

        Ok(Self { root_path_schemas })
    }

    /// Absolute schemas root.
    pub fn root_path_schemas(&self) -> &Path {
        &self.root_path_schemas
    }

    /// Path of `name` under the schemas root.
    pub fn schema_file(&self, name: &str) -> PathBuf {
        self.root_path_schemas.join(name)
    }

    /// Reads a schema file and dereferences every `$ref` relative to the
    /// file's location.
    ///
    /// # Errors
    /// Returns [`ValidatorError::UnsupportedEncoding`], [`ValidatorError::Io`],
    /// [`ValidatorError::InvalidText`], [`ValidatorError::Decode`] or
    /// [`ValidatorError::UnresolvableReference`].
    pub fn load_schema(path: &Path, encoding: Option<&str>) -> Result<Value, ValidatorError> {
        load_dereferenced(path, encoding)
    }

    /// Validates `json_response` against the schema from `source`.
    ///
    /// Returns `Ok(true)` when the document conforms; any violation is an
    /// error carrying the schema path and the deduplicated failure list.
    ///
    /// # Errors
    /// - [`ValidatorError::NotJson`] when `json_response` is `None`.
    /// - Schema loading errors (see [`JsonSchemaValidator::load_schema`]).
    /// - [`ValidatorError::InvalidSchema`] when the schema does not compile.
    /// - [`ValidatorError::Violations`] when the document does not conform.
    pub fn is_response_valid(
        &self,
        json_response: Option<&Value>,
        source: &SchemaSource,
    ) -> Result<bool, ValidatorError> {
        let Some(instance) = json_response else {
            return Err(ValidatorError::NotJson);
        };

        let (schema, encoding): (Cow<'_, Value>, TextEncoding) = match source {
            SchemaSource::FromValue(schema) => (Cow::Borrowed(schema), TextEncoding::Utf8),
            SchemaSource::FromFile { path, encoding } => (
                Cow::Owned(Self::load_schema(path, encoding.as_deref())?),
                TextEncoding::from_label(encoding.as_deref())?,
            ),
        };

        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .with_resolver(RootDirResolver::new(self.root_path_schemas.clone(), encoding))
            .compile(&schema)
            .map_err(|error| ValidatorError::InvalidSchema(error.to_string()))?;

        let failures = match compiled.validate(instance) {
            Ok(()) => Vec::new(),
            Err(errors) => unique_failures(errors),
        };

        if failures.is_empty() {
            return Ok(true);
        }

        let schema_path = source.display_path();
        debug!(
            schema = schema_path.as_deref().unwrap_or("<inline>"),
            failures = failures.len(),
            "response failed schema validation"
        );
        Err(ValidatorError::Violations {
            schema_path,
            failures,
        })
    }
}

/// Keeps the first violation per schema path, comparing paths as sets of
/// segments. Output order is first-seen order.
fn unique_failures(errors: ErrorIterator<'_>) -> Vec<ValidationFailure> {
    let mut seen: HashSet<BTreeSet<String>> = HashSet::new();
    let mut failures = Vec::new();

    for error in errors {
        let error_message = error.to_string();
        let schema_path = error.schema_path.into_vec();
        if !seen.insert(schema_path.iter().cloned().collect()) {
            continue;
        }

        let response_path = error
            .instance_path
            .into_vec()
            .iter()
            .map(|segment| format!("['{segment}']"))
            .collect();

        failures.push(ValidationFailure {
            schema_path,
            error_message,
            response_path,
        });
    }

    failures
}

#[derive(Serialize)]
#[serde(untagged)]
enum ReportEntry<'a> {
    Header { abspath: Option<&'a str> },
    Failure(&'a ValidationFailure),
}

fn render_failures(schema_path: &Option<String>, failures: &[ValidationFailure]) -> String {
    let mut entries = Vec::with_capacity(failures.len() + 1);
    entries.push(ReportEntry::Header {
        abspath: schema_path.as_deref(),
    });
    entries.extend(failures.iter().map(ReportEntry::Failure));

    serde_json::to_string_pretty(&entries).unwrap_or_else(|_| format!("{failures:?}"))
}

/// Schema validator errors.
#[derive(Debug, Error)]
pub enum ValidatorError {
    /// Invalid combination of schema arguments.
    #[error("validator configuration error: {0}")]
    Configuration(String),
    /// The value to validate was not JSON.
    #[error("Validator: Received response is not in JSON format")]
    NotJson,
    /// Schema file could not be read.
    #[error("failed to read schema {}: {source}", path.display())]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Encoding label is not supported.
    #[error("unsupported schema encoding: {0}")]
    UnsupportedEncoding(String),
    /// Schema bytes are not valid text in the requested encoding.
    #[error("schema {} is not valid UTF-8: {source}", path.display())]
    InvalidText {
        /// Offending path.
        path: PathBuf,
        /// Underlying decode error.
        source: std::string::FromUtf8Error,
    },
    /// Schema text is not valid JSON.
    #[error("schema {} is not valid JSON: {source}", path.display())]
    Decode {
        /// Offending path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// A `$ref` target could not be located.
    #[error("unresolvable $ref `{reference}` in {}", path.display())]
    UnresolvableReference {
        /// The reference as written.
        reference: String,
        /// Document containing the reference.
        path: PathBuf,
    },
    /// Schema is not a valid Draft 7 schema.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    /// Document does not conform to the schema.
    #[error(
        "JSON Validator: Validation failed with error(s): {}",
        render_failures(.schema_path, .failures)
    )]
    Violations {
        /// Schema file used, `None` for inline schemas.
        schema_path: Option<String>,
        /// Deduplicated violations.
        failures: Vec<ValidationFailure>,
    },
}

#[cfg(test)]
mod tests {
    //! Unit tests for argument checks and failure deduplication.

    use super::*;
    use serde_json::json;

    fn validator() -> JsonSchemaValidator {
        JsonSchemaValidator::new("schemas").expect("root should be absolute")
    }

    fn failures(result: Result<bool, ValidatorError>) -> Vec<ValidationFailure> {
        match result {
            Err(ValidatorError::Violations { failures, .. }) => failures,
            other => panic!("expected violations, got {other:?}"),
        }
    }

    #[test]
    fn root_path_is_absolute() {
        let validator = validator();
        assert!(validator.root_path_schemas().is_absolute());
        assert!(validator.schema_file("jetta_schema.json").ends_with("schemas/jetta_schema.json"));
    }

    #[test]
    fn both_or_neither_schema_arguments_are_rejected() {
        assert!(matches!(
            SchemaSource::from_options(None, None, None),
            Err(ValidatorError::Configuration(_))
        ));
        assert!(matches!(
            SchemaSource::from_options(
                Some(PathBuf::from("does-not-exist.json")),
                Some(json!({})),
                None
            ),
            Err(ValidatorError::Configuration(_))
        ));
        assert_eq!(
            SchemaSource::from_options(Some(PathBuf::from("a.json")), None, None)
                .expect("path alone is valid"),
            SchemaSource::file("a.json")
        );
    }

    #[test]
    fn absent_json_fails_before_loading_schema() {
        let result = validator().is_response_valid(None, &SchemaSource::file("missing.json"));
        assert!(matches!(result, Err(ValidatorError::NotJson)));
        assert_eq!(
            ValidatorError::NotJson.to_string(),
            "Validator: Received response is not in JSON format"
        );
    }

    #[test]
    fn sibling_violations_at_same_schema_path_are_reported_once() {
        let source = SchemaSource::FromValue(json!({
            "type": "array",
            "items": {"type": "string"}
        }));

        let failures = failures(validator().is_response_valid(Some(&json!([1, "ok", 2])), &source));

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].schema_path, vec!["items", "type"]);
        assert_eq!(failures[0].response_path, "['0']");
    }

    #[test]
    fn missing_required_property_points_at_document_root() {
        let source = SchemaSource::FromValue(json!({
            "type": "object",
            "required": ["result", "car"],
            "properties": {"result": {"type": "string"}}
        }));

        let failures = failures(
            validator().is_response_valid(Some(&json!({"result": "added successfully"})), &source),
        );

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].schema_path, vec!["required"]);
        assert_eq!(failures[0].response_path, "");
        assert!(failures[0].error_message.contains("car"));
    }

    #[test]
    fn distinct_schema_paths_are_all_kept_in_order() {
        let source = SchemaSource::FromValue(json!({
            "type": "object",
            "properties": {
                "car": {
                    "type": "object",
                    "properties": {
                        "make": {"type": "string"},
                        "model": {"type": "string"}
                    }
                }
            }
        }));

        let failures = failures(
            validator().is_response_valid(Some(&json!({"car": {"make": 1, "model": 2}})), &source),
        );

        assert_eq!(failures.len(), 2);
        let paths: Vec<&str> = failures
            .iter()
            .map(|failure| failure.response_path.as_str())
            .collect();
        assert!(paths.contains(&"['car']['make']"));
        assert!(paths.contains(&"['car']['model']"));
    }

    #[test]
    fn violation_message_embeds_schema_path_and_records() {
        let error = ValidatorError::Violations {
            schema_path: Some("/schemas/jetta_schema.json".to_string()),
            failures: vec![ValidationFailure {
                schema_path: vec!["required".to_string()],
                error_message: "\"car\" is a required property".to_string(),
                response_path: String::new(),
            }],
        };

        let message = error.to_string();
        assert!(message.starts_with("JSON Validator: Validation failed with error(s): ["));
        assert!(message.contains("\"abspath\": \"/schemas/jetta_schema.json\""));
        assert!(message.contains("\"schema_path\": [\n      \"required\"\n    ]"));
        assert!(message.contains("\"response_path\": \"\""));
    }

    #[test]
    fn invalid_schema_is_reported() {
        let source = SchemaSource::FromValue(json!({"type": 12}));
        assert!(matches!(
            validator().is_response_valid(Some(&json!({})), &source),
            Err(ValidatorError::InvalidSchema(_))
        ));
    }
}
