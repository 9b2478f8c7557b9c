#![warn(missing_docs)]
//! # jetta-check-rest
//!
//! ## Purpose
//! Thin request client used by the API scenario tests.
//!
//! ## Responsibilities
//! - Issue GET/POST/PUT/PATCH requests through one blocking HTTP session.
//! - Normalize every transport response into a stable [`Response`] shape.
//! - Own session state (cookies and session headers) and allow tests to reset
//!   it between steps.
//!
//! ## Data flow
//! Test case -> verb method ([`Rest::get`], [`Rest::post`], ...) ->
//! [`Rest::send_request`] -> `reqwest` transport -> [`Response`].
//!
//! ## Ownership and lifetimes
//! [`Response`] owns its body text and parsed JSON so assertions never borrow
//! from the transport buffer.
//!
//! ## Error model
//! Transport failures are propagated as [`RestError::Transport`] and never
//! retried. A body that is not JSON is not an error: [`Response::json`] is
//! simply `None`.
//!
//! ## Security and privacy notes
//! Request logging never prints header values or credentials, only header
//! names.
//!
//! ## Example
//! ```rust
//! use jetta_check_rest::Response;
//!
//! let response = Response::from_parts(200, r#"{"result":"ok"}"#.to_string());
//! assert_eq!(response.json_at("/result").and_then(|v| v.as_str()), Some("ok"));
//!
//! let html = Response::from_parts(502, "<html>bad gateway</html>".to_string());
//! assert!(html.json.is_none());
//! ```

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use reqwest::blocking::Client;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub use reqwest::Method;

/// Normalized result of one HTTP call.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// HTTP status code.
    pub status_code: u16,
    /// Raw response payload as text.
    pub body: String,
    /// Parsed payload, `None` when the body is not valid JSON.
    pub json: Option<Value>,
}

impl Response {
    /// Builds a response from status and raw body, parsing JSON when possible.
    pub fn from_parts(status_code: u16, body: String) -> Self {
        let json = serde_json::from_str(&body).ok();
        Self {
            status_code,
            body,
            json,
        }
    }

    /// Looks up a value in the parsed body by JSON pointer (`/car/make`).
    pub fn json_at(&self, pointer: &str) -> Option<&Value> {
        self.json.as_ref()?.pointer(pointer)
    }
}

/// Credentials handed to the transport unmodified.
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    /// HTTP basic auth.
    Basic {
        /// Account username.
        username: String,
        /// Optional password.
        password: Option<String>,
    },
    /// `Authorization: Bearer <token>`.
    Bearer(String),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Bearer(_) => f.debug_tuple("Bearer").field(&"<redacted>").finish(),
        }
    }
}

/// Per-request arguments forwarded to the transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// Query string pairs.
    pub params: Vec<(String, String)>,
    /// JSON body.
    pub json: Option<Value>,
    /// Form-encoded body. Takes precedence over `json` when both are set.
    pub form: Vec<(String, String)>,
    /// Extra headers for this request only.
    pub headers: Vec<(String, String)>,
    /// Log each non-empty request argument.
    pub log_request: bool,
    /// Log the response body when non-empty.
    pub log_response: bool,
}

impl RequestOptions {
    /// Empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }

    /// Serializes `body` and sets it as the JSON body.
    ///
    /// # Errors
    /// Returns [`RestError::Encode`] when `body` cannot be represented as JSON.
    pub fn json_body<T: Serialize>(self, body: &T) -> Result<Self, RestError> {
        let value = serde_json::to_value(body).map_err(RestError::Encode)?;
        Ok(self.json(value))
    }

    /// Appends one query parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Appends one form field.
    pub fn form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((name.into(), value.into()));
        self
    }

    /// Appends one request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Enables or disables request argument logging.
    pub fn log_request(mut self, enabled: bool) -> Self {
        self.log_request = enabled;
        self
    }

    /// Enables or disables response body logging.
    pub fn log_response(mut self, enabled: bool) -> Self {
        self.log_response = enabled;
        self
    }
}

/// Cookie store that can be emptied while the client keeps a handle to it.
#[derive(Default)]
struct SessionCookies {
    jar: RwLock<Jar>,
}

impl SessionCookies {
    fn clear(&self) {
        let mut jar = self.jar.write().unwrap_or_else(PoisonError::into_inner);
        *jar = Jar::default();
    }
}

impl CookieStore for SessionCookies {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.jar
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .set_cookies(cookie_headers, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.jar
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .cookies(url)
    }
}

/// HTTP session wrapper returning normalized [`Response`] values.
///
/// The session is not meant to be shared between concurrently running tests;
/// create one per test.
pub struct Rest {
    client: Client,
    cookies: Arc<SessionCookies>,
    headers: HeaderMap,
}

impl Rest {
    /// Creates a session with no cookies and no session headers.
    ///
    /// # Errors
    /// Returns [`RestError::Transport`] when the HTTP client cannot be built
    /// (for example when the TLS backend fails to initialize).
    pub fn new() -> Result<Self, RestError> {
        let cookies = Arc::new(SessionCookies::default());
        let client = Client::builder()
            .cookie_provider(Arc::clone(&cookies))
            .build()?;

        Ok(Self {
            client,
            cookies,
            headers: HeaderMap::new(),
        })
    }

    /// Drops every cookie held by the session.
    pub fn clear_cookies(&self) {
        self.cookies.clear();
        debug!("API: session cookies cleared");
    }

    /// Sets a header sent with every subsequent request.
    ///
    /// # Errors
    /// Returns [`RestError::InvalidHeader`] when name or value is not a legal
    /// HTTP header.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), RestError> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Sets a session `Authorization: Bearer <token>` header.
    ///
    /// # Errors
    /// Returns [`RestError::InvalidHeader`] when the token contains characters
    /// not allowed in a header value.
    pub fn set_bearer_token(&mut self, token: &str) -> Result<(), RestError> {
        self.set_header(AUTHORIZATION.as_str(), &format!("Bearer {token}"))
    }

    /// Returns the session headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Removes the session `Authorization` header.
    ///
    /// # Errors
    /// Returns [`RestError::HeaderNotSet`] when no such header is set.
    pub fn clear_auth_header(&mut self) -> Result<(), RestError> {
        self.headers
            .remove(AUTHORIZATION)
            .map(|_| ())
            .ok_or_else(|| RestError::HeaderNotSet(AUTHORIZATION.to_string()))
    }

    /// Sends a GET request; `params` become the query string.
    ///
    /// # Errors
    /// See [`Rest::send_request`].
    pub fn get(
        &self,
        url: &str,
        params: &[(&str, &str)],
        options: RequestOptions,
    ) -> Result<Response, RestError> {
        let options = params
            .iter()
            .fold(options, |options, (name, value)| options.param(*name, *value));
        self.send_request(Method::GET, url, None, options)
    }

    /// Sends a POST request with the payload carried by `options`.
    ///
    /// # Errors
    /// See [`Rest::send_request`].
    pub fn post(
        &self,
        url: &str,
        auth: Option<&Auth>,
        options: RequestOptions,
    ) -> Result<Response, RestError> {
        self.send_request(Method::POST, url, auth, options)
    }

    /// Sends a PUT request with an optional JSON body.
    ///
    /// # Errors
    /// See [`Rest::send_request`].
    pub fn put(
        &self,
        url: &str,
        body: Option<&Value>,
        options: RequestOptions,
    ) -> Result<Response, RestError> {
        let options = match body {
            Some(body) => options.json(body.clone()),
            None => options,
        };
        self.send_request(Method::PUT, url, None, options)
    }

    /// Sends a PATCH request with a JSON body and/or form data.
    ///
    /// # Errors
    /// See [`Rest::send_request`].
    pub fn patch(
        &self,
        url: &str,
        body: Option<&Value>,
        data: &[(&str, &str)],
        options: RequestOptions,
    ) -> Result<Response, RestError> {
        let options = match body {
            Some(body) => options.json(body.clone()),
            None => options,
        };
        let options = data
            .iter()
            .fold(options, |options, (name, value)| options.form_field(*name, *value));
        self.send_request(Method::PATCH, url, None, options)
    }

    /// Sends one request and normalizes the transport response.
    ///
    /// # Errors
    /// Returns [`RestError::InvalidHeader`] for illegal per-request headers and
    /// [`RestError::Transport`] when the request cannot be sent or the body
    /// cannot be read.
    pub fn send_request(
        &self,
        method: Method,
        url: &str,
        auth: Option<&Auth>,
        options: RequestOptions,
    ) -> Result<Response, RestError> {
        info!("API: Request: {method} {url}");
        if options.log_request {
            log_request_arguments(&options);
        }

        let mut request = self
            .client
            .request(method, url)
            .headers(self.headers.clone());
        for (name, value) in &options.headers {
            let (name, value) = parse_header(name, value)?;
            request = request.header(name, value);
        }

        request = match auth {
            Some(Auth::Basic { username, password }) => {
                request.basic_auth(username, password.as_deref())
            }
            Some(Auth::Bearer(token)) => request.bearer_auth(token),
            None => request,
        };

        if !options.params.is_empty() {
            request = request.query(&options.params);
        }
        if let Some(json) = &options.json {
            request = request.json(json);
        }
        if !options.form.is_empty() {
            request = request.form(&options.form);
        }

        let transport_response = request.send()?;
        let status_code = transport_response.status().as_u16();
        let body = transport_response.text()?;
        let response = Response::from_parts(status_code, body);

        info!("API: Response status: {status_code}");
        if options.log_response && !response.body.is_empty() {
            info!("API: Response body: {}", response.body);
        }

        Ok(response)
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), RestError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| RestError::InvalidHeader(name.to_string()))?;
    let header_value =
        HeaderValue::from_str(value).map_err(|_| RestError::InvalidHeader(name.to_string()))?;
    Ok((header_name, header_value))
}

fn log_request_arguments(options: &RequestOptions) {
    if !options.params.is_empty() {
        info!(argument = "params", "{}", to_log_text(&options.params));
    }
    if let Some(json) = options.json.as_ref().filter(|json| has_content(json)) {
        info!(argument = "json", "{}", to_log_text(json));
    }
    if !options.form.is_empty() {
        info!(argument = "data", "{}", to_log_text(&options.form));
    }
    if !options.headers.is_empty() {
        let names: Vec<&str> = options.headers.iter().map(|(name, _)| name.as_str()).collect();
        info!(argument = "headers", "{}", to_log_text(&names));
    }
}

/// `null`, `false`, `0`, `""`, `[]` and `{}` carry nothing worth logging.
fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn to_log_text<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|error| format!("<unserializable: {error}>"))
}

/// Request client errors.
#[derive(Debug, Error)]
pub enum RestError {
    /// Network, connection, or body read failure from the transport.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    /// Header name or value is not legal HTTP.
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    /// A session header was removed but never set.
    #[error("session header is not set: {0}")]
    HeaderNotSet(String),
    /// Request body could not be serialized.
    #[error("request body encode failure: {0}")]
    Encode(serde_json::Error),
}
