//! Schema file loading and `$ref` dereferencing.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use jsonschema::{SchemaResolver, SchemaResolverError};
use serde_json::{Map, Value, json};
use tracing::debug;
use url::Url;

use crate::ValidatorError;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// `(document, JSON pointer)` identity of one reference target.
type RefKey = (PathBuf, String);

/// Loads `path` and replaces every `$ref` with the sub-schema it points to.
pub(crate) fn load_dereferenced(
    path: &Path,
    encoding: Option<&str>,
) -> Result<Value, ValidatorError> {
    let encoding = TextEncoding::from_label(encoding)?;
    let path = canonical(path)?;
    let mut loader = DocumentLoader {
        encoding,
        documents: HashMap::new(),
    };
    let root = loader.document(&path)?;
    let mut stack = Vec::new();
    loader.walk(&root, &path, &mut stack)
}

/// Supported schema text encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextEncoding {
    Utf8,
    Utf8Sig,
}

impl TextEncoding {
    pub(crate) fn from_label(label: Option<&str>) -> Result<Self, ValidatorError> {
        let Some(label) = label else {
            return Ok(Self::Utf8);
        };

        match label.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "utf-8-sig" | "utf8-sig" => Ok(Self::Utf8Sig),
            _ => Err(ValidatorError::UnsupportedEncoding(label.to_string())),
        }
    }

    fn decode(self, raw: Vec<u8>, path: &Path) -> Result<String, ValidatorError> {
        let raw = match self {
            Self::Utf8 => raw,
            Self::Utf8Sig => match raw.strip_prefix(UTF8_BOM) {
                Some(rest) => rest.to_vec(),
                None => raw,
            },
        };

        String::from_utf8(raw).map_err(|source| ValidatorError::InvalidText {
            path: path.to_path_buf(),
            source,
        })
    }
}

struct DocumentLoader {
    encoding: TextEncoding,
    documents: HashMap<PathBuf, Arc<Value>>,
}

impl DocumentLoader {
    fn document(&mut self, path: &Path) -> Result<Arc<Value>, ValidatorError> {
        if let Some(document) = self.documents.get(path) {
            return Ok(Arc::clone(document));
        }

        let raw = fs::read(path).map_err(|source| ValidatorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let text = self.encoding.decode(raw, path)?;
        let document: Value =
            serde_json::from_str(&text).map_err(|source| ValidatorError::Decode {
                path: path.to_path_buf(),
                source,
            })?;

        debug!(schema = %path.display(), "loaded schema document");
        let document = Arc::new(document);
        self.documents
            .insert(path.to_path_buf(), Arc::clone(&document));
        Ok(document)
    }

    fn walk(
        &mut self,
        node: &Value,
        base: &Path,
        stack: &mut Vec<RefKey>,
    ) -> Result<Value, ValidatorError> {
        match node {
            Value::Object(map) => {
                if let Some(Value::String(reference)) = map.get("$ref") {
                    return self.follow(reference, base, stack);
                }

                let mut resolved = Map::with_capacity(map.len());
                for (key, value) in map {
                    resolved.insert(key.clone(), self.walk(value, base, stack)?);
                }
                Ok(Value::Object(resolved))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.walk(item, base, stack))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    fn follow(
        &mut self,
        reference: &str,
        base: &Path,
        stack: &mut Vec<RefKey>,
    ) -> Result<Value, ValidatorError> {
        let (document, fragment) = reference.split_once('#').unwrap_or((reference, ""));
        let Some(target) = target_path(document, base, reference)? else {
            // Remote documents are left for the validation-time resolver.
            return Ok(json!({ "$ref": reference }));
        };

        let key = (target.clone(), fragment.to_string());
        if stack.contains(&key) {
            debug!(reference, "cyclic $ref left unexpanded");
            return Ok(json!({ "$ref": file_reference(&target, fragment, reference)? }));
        }

        let root = self.document(&target)?;
        let referent = if fragment.is_empty() {
            root.as_ref()
        } else {
            root.pointer(fragment)
                .ok_or_else(|| ValidatorError::UnresolvableReference {
                    reference: reference.to_string(),
                    path: base.to_path_buf(),
                })?
        };

        stack.push(key);
        let resolved = self.walk(referent, &target, stack);
        stack.pop();
        resolved
    }
}

/// Maps the document part of a `$ref` onto a local file.
///
/// Returns `None` for non-file URLs.
fn target_path(
    document: &str,
    base: &Path,
    reference: &str,
) -> Result<Option<PathBuf>, ValidatorError> {
    if document.is_empty() {
        return Ok(Some(base.to_path_buf()));
    }

    match Url::parse(document) {
        Ok(url) if url.scheme() == "file" => {
            let path = url
                .to_file_path()
                .map_err(|()| ValidatorError::UnresolvableReference {
                    reference: reference.to_string(),
                    path: base.to_path_buf(),
                })?;
            canonical(&path).map(Some)
        }
        Ok(_) => Ok(None),
        Err(_) => {
            let directory = base.parent().unwrap_or_else(|| Path::new(""));
            canonical(&directory.join(document)).map(Some)
        }
    }
}

fn file_reference(
    target: &Path,
    fragment: &str,
    reference: &str,
) -> Result<String, ValidatorError> {
    let url = Url::from_file_path(target).map_err(|()| {
        ValidatorError::UnresolvableReference {
            reference: reference.to_string(),
            path: target.to_path_buf(),
        }
    })?;
    Ok(format!("{url}#{fragment}"))
}

fn canonical(path: &Path) -> Result<PathBuf, ValidatorError> {
    fs::canonicalize(path).map_err(|source| ValidatorError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Validation-time resolver that serves schema documents from one directory.
///
/// Relative references in a schema without `$id` arrive here as
/// `json-schema:///<relative path>`, which is mapped onto the root directory.
/// `file://` URLs are read directly. Both are decoded with the encoding of the
/// schema being validated.
pub(crate) struct RootDirResolver {
    root: PathBuf,
    encoding: TextEncoding,
}

impl RootDirResolver {
    pub(crate) fn new(root: PathBuf, encoding: TextEncoding) -> Self {
        Self { root, encoding }
    }
}

impl SchemaResolver for RootDirResolver {
    fn resolve(
        &self,
        _root_schema: &Value,
        url: &Url,
        _original_reference: &str,
    ) -> Result<Arc<Value>, SchemaResolverError> {
        let path = match url.scheme() {
            "file" => url
                .to_file_path()
                .map_err(|()| anyhow!("not a local file url: {url}"))?,
            "json-schema" => self.root.join(url.path().trim_start_matches('/')),
            scheme => bail!("unsupported $ref scheme `{scheme}` in {url}"),
        };

        let raw = fs::read(&path)
            .with_context(|| format!("failed to read schema {}", path.display()))?;
        let text = self.encoding.decode(raw, &path)?;
        let document: Value = serde_json::from_str(&text)
            .with_context(|| format!("schema {} is not valid JSON", path.display()))?;
        debug!(schema = %path.display(), "resolved external $ref");
        Ok(Arc::new(document))
    }
}
