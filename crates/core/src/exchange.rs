//! Request and response values exchanged between the host, the strategies and
//! the store.

use serde::{Deserialize, Serialize};

/// Body served with the synthetic offline response.
pub const UNAVAILABLE_BODY: &str = "Content not available offline";

/// Header marking a response the worker synthesized itself.
pub const OFFLINE_HEADER: &str = "x-waypost-offline";

/// An intercepted request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Uppercase HTTP method.
    pub method: String,
    /// Absolute or origin-relative URL.
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<Vec<u8>>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self { method: "GET".into(), url: url.into(), headers: Vec::new(), body: None }
    }

    /// A POST carrying `payload` as a JSON body.
    pub fn post_json(url: impl Into<String>, payload: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(Self {
            method: "POST".into(),
            url: url.into(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: Some(serde_json::to_vec(payload)?),
        })
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }
}

/// A response, either fresh from the network or read back from a generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Vec<u8>>) -> Self {
        Self { status, headers, body: body.into() }
    }

    /// The synthetic 503 returned when neither network nor cache can answer.
    pub fn unavailable() -> Self {
        Self {
            status: 503,
            headers: vec![
                ("content-type".into(), "text/plain; charset=utf-8".into()),
                (OFFLINE_HEADER.into(), "1".into()),
            ],
            body: UNAVAILABLE_BODY.as_bytes().to_vec(),
        }
    }

    /// True for 2xx statuses.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Whether the worker produced this response without network or cache.
    pub fn is_synthetic(&self) -> bool {
        self.header(OFFLINE_HEADER).is_some()
    }
}

/// Label that decides which caching strategy serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Critical,
    Api,
    Static,
    Other,
}

impl ResourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Critical => "critical",
            ResourceClass::Api => "api",
            ResourceClass::Static => "static",
            ResourceClass::Other => "other",
        }
    }
}

/// How a fetch treats intermediate HTTP caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Default,
    /// Skip every HTTP cache so the deployed version is fetched.
    Reload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_response() {
        let response = Response::unavailable();
        assert_eq!(response.status, 503);
        assert!(!response.ok());
        assert!(response.is_synthetic());
        assert_eq!(response.text(), UNAVAILABLE_BODY);
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let response = Response::new(200, vec![("Content-Type".into(), "text/html".into())], "<p>");
        assert_eq!(response.header("content-type"), Some("text/html"));
        assert_eq!(response.header("etag"), None);
    }

    #[test]
    fn test_post_json_request() {
        let request = FetchRequest::post_json("/api/contact", &serde_json::json!({"name": "Ada"})).unwrap();
        assert!(!request.is_get());
        assert_eq!(request.body.as_deref(), Some(br#"{"name":"Ada"}"#.as_slice()));
        assert!(FetchRequest::get("/").is_get());
    }
}
