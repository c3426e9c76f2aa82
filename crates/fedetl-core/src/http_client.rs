use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;

pub const USER_AGENT: &str = "federal-reserve-etl/1.0";

/// Authentication applied to outgoing requests.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum HttpAuth {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
}

impl Debug for HttpAuth {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

/// GET request envelope used by client transport calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub auth: HttpAuth,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            auth: HttpAuth::None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_auth(mut self, auth: HttpAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// URL with the percent-encoded query string appended.
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(key, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(key),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query}", self.url)
    }
}

/// HTTP response envelope returned by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn ok_json(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    Connect,
    Timeout,
    Other,
}

/// Transport-level HTTP error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    kind: HttpErrorKind,
    message: String,
}

impl HttpError {
    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            kind: HttpErrorKind::Connect,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: HttpErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: HttpErrorKind::Other,
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> HttpErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

/// Blocking transport contract; the seam used by tests to script responses.
pub trait HttpClient: Send + Sync {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Production HTTP client backed by `reqwest::blocking`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::blocking::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_else(|_| reqwest::blocking::Client::new()),
        }
    }

    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let mut builder = self
            .client
            .get(&request.url)
            .query(&request.query)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        if let HttpAuth::Basic { username, password } = &request.auth {
            builder = builder.basic_auth(username, Some(password));
        }

        let response = builder.send().map_err(|e| {
            if e.is_timeout() {
                HttpError::timeout(format!("request timeout: {e}"))
            } else if e.is_connect() {
                HttpError::connect(format!("connection failed: {e}"))
            } else {
                HttpError::other(format!("request failed: {e}"))
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_owned(), value.to_owned()))
            })
            .collect();
        let body = response
            .text()
            .map_err(|e| HttpError::other(format!("failed to read response body: {e}")))?;

        Ok(HttpResponse {
            status,
            body,
            headers,
        })
    }
}

/// Per-client connection handle: transport plus default headers and auth.
#[derive(Clone)]
pub struct Session {
    transport: Arc<dyn HttpClient>,
    headers: BTreeMap<String, String>,
    auth: HttpAuth,
    timeout: Duration,
}

impl Session {
    pub fn new(transport: Arc<dyn HttpClient>, timeout: Duration) -> Self {
        let headers = BTreeMap::from([
            (String::from("user-agent"), String::from(USER_AGENT)),
            (String::from("accept"), String::from("application/json")),
        ]);
        Self {
            transport,
            headers,
            auth: HttpAuth::None,
            timeout,
        }
    }

    pub fn with_auth(mut self, auth: HttpAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse, HttpError> {
        let mut request = HttpRequest::get(url)
            .with_auth(self.auth.clone())
            .with_timeout(self.timeout);
        request.headers = self.headers.clone();
        for (name, value) in query {
            request = request.with_query(*name, *value);
        }
        self.transport.execute(request)
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("headers", &self.headers)
            .field("auth", &self.auth)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

type Scripted = Result<HttpResponse, HttpError>;

#[derive(Debug)]
struct Route {
    path: String,
    responses: VecDeque<Scripted>,
}

/// In-memory transport for offline tests.
///
/// Responses are keyed by URL path suffix. A route with several responses
/// hands them out in order and then keeps repeating the last one. Requests
/// with no matching route get a 404. Every request is recorded.
#[derive(Debug, Default)]
pub struct ScriptedHttpClient {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, path: &str, response: Scripted) -> Self {
        self.on_sequence(path, vec![response])
    }

    pub fn on_json(self, path: &str, status: u16, body: Value) -> Self {
        self.on(path, Ok(HttpResponse::new(status, body.to_string())))
    }

    pub fn on_sequence(self, path: &str, responses: Vec<Scripted>) -> Self {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Route {
                path: path.to_owned(),
                responses: responses.into(),
            });
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|request| request.url.ends_with(path))
            .count()
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let url = request.url.clone();
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(route) = routes.iter_mut().find(|route| url.ends_with(&route.path)) else {
            return Ok(HttpResponse::new(404, r#"{"error":"no route"}"#));
        };
        match route.responses.len() {
            0 => Ok(HttpResponse::new(404, r#"{"error":"no route"}"#)),
            1 => route
                .responses
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(HttpResponse::new(404, "{}"))),
            _ => route
                .responses
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(404, "{}"))),
        }
    }
}
