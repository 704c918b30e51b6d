//! Description of a request before it is sent

use super::ClientError;
use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

/// An HTTP call that can be issued more than once
///
/// The wrapper may send the same request up to three times (original, path
/// fallback, retry after refresh), so the body is kept as bytes.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub method: Method,
    /// Absolute URL or a path relative to the backend origin
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl PendingRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Set a header, replacing any previous value
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set a raw body
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, ClientError> {
        self.body = Some(Bytes::from(serde_json::to_vec(value)?));
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::CONTENT_TYPE;

    #[test]
    fn header_replaces_previous_value() {
        let request = PendingRequest::get("projects/")
            .header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
            .header(CONTENT_TYPE, HeaderValue::from_static("text/csv"));
        assert_eq!(request.headers.get_all(CONTENT_TYPE).iter().count(), 1);
        assert_eq!(request.headers[CONTENT_TYPE], "text/csv");
    }

    #[test]
    fn json_body_is_serialized_once() {
        let request = PendingRequest::post("projects/")
            .json(&serde_json::json!({"name": "Regression"}))
            .unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(
            request.body.as_deref(),
            Some(br#"{"name":"Regression"}"#.as_slice())
        );
    }
}
