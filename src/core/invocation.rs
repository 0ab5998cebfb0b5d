use std::{
    collections::{BTreeMap, HashMap},
    time::{Duration, Instant},
};

use bytes::Bytes;

/// Header carrying a traffic mark set by an upstream `once` policy.
pub const HEADER_TRAFFIC_MARK: &str = "x-traffic-mark";

/// Read/write access to request headers, regardless of the concrete request type.
pub trait HeaderCarrier {
    fn header(&self, key: &str) -> Option<&str>;
    fn set_header(&mut self, key: &str, value: String);
    fn for_each_header(&self, f: &mut dyn FnMut(&str, &str));
}

/// Case-insensitive header map. Keys are stored lower-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_ascii_lowercase(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(&key.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k.as_ref(), v);
        }
        headers
    }
}

impl HeaderCarrier for Headers {
    fn header(&self, key: &str) -> Option<&str> {
        self.get(key)
    }

    fn set_header(&mut self, key: &str, value: String) {
        self.insert(key, value);
    }

    fn for_each_header(&self, f: &mut dyn FnMut(&str, &str)) {
        for (k, v) in self.iter() {
            f(k, v);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub headers: Headers,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Value of a single cookie from the `cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers.get("cookie")?.split(';').find_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            (k == name).then_some(v)
        })
    }
}

/// Request for non-HTTP protocols; headers travel as attachments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RpcRequest {
    pub attachments: Headers,
    pub body: Bytes,
}

/// Call arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Args {
    #[default]
    None,
    Http(HttpRequest),
    Rpc(RpcRequest),
}

impl HeaderCarrier for Args {
    fn header(&self, key: &str) -> Option<&str> {
        match self {
            Args::None => None,
            Args::Http(req) => req.headers.get(key),
            Args::Rpc(req) => req.attachments.get(key),
        }
    }

    fn set_header(&mut self, key: &str, value: String) {
        match self {
            Args::None => {}
            Args::Http(req) => req.headers.insert(key, value),
            Args::Rpc(req) => req.attachments.insert(key, value),
        }
    }

    fn for_each_header(&self, f: &mut dyn FnMut(&str, &str)) {
        match self {
            Args::None => {}
            Args::Http(req) => req.headers.for_each_header(f),
            Args::Rpc(req) => req.attachments.for_each_header(f),
        }
    }
}

/// Per-call context: outgoing headers and an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    pub headers: Headers,
    pub deadline: Option<Instant>,
}

impl InvocationContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            headers: Headers::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

impl HeaderCarrier for InvocationContext {
    fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    fn set_header(&mut self, key: &str, value: String) {
        self.headers.insert(key, value);
    }

    fn for_each_header(&self, f: &mut dyn FnMut(&str, &str)) {
        self.headers.for_each_header(f);
    }
}

/// Tags chosen by the router for instance selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTags {
    kv: BTreeMap<String, String>,
    label: String,
}

impl RouteTags {
    pub fn new(kv: BTreeMap<String, String>) -> Self {
        let label = tags_label(&kv);
        Self { kv, label }
    }

    pub fn kv(&self) -> &BTreeMap<String, String> {
        &self.kv
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.kv.get(key).map(String::as_str)
    }

    /// Canonical `k:v|k:v` form, keys sorted.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_empty(&self) -> bool {
        self.kv.is_empty()
    }
}

pub fn tags_label(kv: &BTreeMap<String, String>) -> String {
    kv.iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join("|")
}

/// One call flowing through a handler chain.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub endpoint: String,
    pub protocol: String,
    pub port: String,
    pub microservice_name: String,
    pub version: String,
    pub app_id: String,
    pub schema_id: String,
    pub operation_id: String,
    pub source_service_name: String,
    pub source_app: String,
    pub source_tags: BTreeMap<String, String>,
    pub args: Args,
    pub reply: Option<Bytes>,
    pub ctx: InvocationContext,
    pub metadata: HashMap<String, String>,
    pub route_tags: RouteTags,
    pub strategy: String,
    pub filters: Vec<String>,
    /// Position of the next handler to run in the chain.
    pub handler_index: usize,
    mark: String,
}

impl Invocation {
    pub fn new(
        microservice_name: impl Into<String>,
        schema_id: impl Into<String>,
        operation_id: impl Into<String>,
    ) -> Self {
        Self {
            microservice_name: microservice_name.into(),
            schema_id: schema_id.into(),
            operation_id: operation_id.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: Args) -> Self {
        self.args = args;
        self
    }

    pub fn with_source(mut self, service: impl Into<String>, app: impl Into<String>) -> Self {
        self.source_service_name = service.into();
        self.source_app = app.into();
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Rewind to the first handler.
    pub fn reset(&mut self) {
        self.handler_index = 0;
    }

    pub fn mark(&mut self, mark: impl Into<String>) {
        self.mark = mark.into();
    }

    pub fn get_mark(&self) -> &str {
        &self.mark
    }

    /// Header lookup, context headers first.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.ctx.header(key).or_else(|| self.args.header(key))
    }

    /// Sets an outgoing header on the invocation context.
    pub fn set_header(&mut self, key: &str, value: impl Into<String>) {
        self.ctx.set_header(key, value.into());
    }

    /// Request headers merged with context headers; context wins.
    pub fn headers(&self) -> BTreeMap<String, String> {
        let mut merged = BTreeMap::new();
        let mut collect = |k: &str, v: &str| {
            merged.insert(k.to_string(), v.to_string());
        };
        self.args.for_each_header(&mut collect);
        self.ctx.for_each_header(&mut collect);
        merged
    }

    pub fn http_request(&self) -> Option<&HttpRequest> {
        match &self.args {
            Args::Http(req) => Some(req),
            _ => None,
        }
    }

    pub fn http_method(&self) -> Option<&str> {
        self.http_request().map(|r| r.method.as_str())
    }

    pub fn http_path(&self) -> Option<&str> {
        self.http_request().map(|r| r.path.as_str())
    }

    /// `service.schema.operation`, omitting empty trailing parts.
    pub fn operation_key(&self) -> String {
        let mut key = self.microservice_name.clone();
        for part in [&self.schema_id, &self.operation_id] {
            if part.is_empty() {
                break;
            }
            key.push('.');
            key.push_str(part);
        }
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive() {
        let mut h = Headers::new();
        h.insert("X-User", "jason");
        assert_eq!(h.get("x-user"), Some("jason"));
        assert_eq!(h.get("X-USER"), Some("jason"));
    }

    #[test]
    fn test_context_headers_override_request_headers() {
        let req = HttpRequest::new("GET", "/a")
            .with_header("user", "alice")
            .with_header("region", "eu");
        let mut inv = Invocation::new("svc", "", "").with_args(Args::Http(req));
        inv.set_header("user", "bob");

        let merged = inv.headers();
        assert_eq!(merged.get("user").map(String::as_str), Some("bob"));
        assert_eq!(merged.get("region").map(String::as_str), Some("eu"));
        assert_eq!(inv.header("user"), Some("bob"));
    }

    #[test]
    fn test_route_tags_label_sorted() {
        let tags = RouteTags::new(BTreeMap::from([
            ("version".to_string(), "1.0".to_string()),
            ("app".to_string(), "shop".to_string()),
        ]));
        assert_eq!(tags.label(), "app:shop|version:1.0");
    }

    #[test]
    fn test_cookie_lookup() {
        let req = HttpRequest::new("GET", "/").with_header("Cookie", "a=1; user=jason; b=2");
        assert_eq!(req.cookie("user"), Some("jason"));
        assert_eq!(req.cookie("missing"), None);
    }

    #[test]
    fn test_operation_key() {
        assert_eq!(Invocation::new("svc", "", "op").operation_key(), "svc");
        assert_eq!(Invocation::new("svc", "s", "op").operation_key(), "svc.s.op");
    }

    #[test]
    fn test_context_deadline() {
        let ctx = InvocationContext::with_timeout(Duration::from_secs(60));
        assert!(!ctx.is_expired());
        assert!(ctx.remaining().is_some());
        assert!(!InvocationContext::default().is_expired());
    }
}
