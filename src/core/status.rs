use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

/// Protocol-neutral status categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    Ok,
    BadRequest,
    Unauthorized,
    NotFound,
    TooManyRequests,
    InternalServerError,
    ServiceUnavailable,
    GatewayTimeout,
}

impl StatusKind {
    pub fn http_code(self) -> u16 {
        match self {
            StatusKind::Ok => 200,
            StatusKind::BadRequest => 400,
            StatusKind::Unauthorized => 401,
            StatusKind::NotFound => 404,
            StatusKind::TooManyRequests => 429,
            StatusKind::InternalServerError => 500,
            StatusKind::ServiceUnavailable => 503,
            StatusKind::GatewayTimeout => 504,
        }
    }

    fn grpc_code(self) -> u16 {
        match self {
            StatusKind::Ok => 0,
            StatusKind::BadRequest => 3,
            StatusKind::Unauthorized => 16,
            StatusKind::NotFound => 5,
            StatusKind::TooManyRequests => 8,
            StatusKind::InternalServerError => 13,
            StatusKind::ServiceUnavailable => 14,
            StatusKind::GatewayTimeout => 4,
        }
    }

    const ALL: [StatusKind; 8] = [
        StatusKind::Ok,
        StatusKind::BadRequest,
        StatusKind::Unauthorized,
        StatusKind::NotFound,
        StatusKind::TooManyRequests,
        StatusKind::InternalServerError,
        StatusKind::ServiceUnavailable,
        StatusKind::GatewayTimeout,
    ];
}

/// Maps status categories to protocol-specific codes. Unknown protocols use HTTP codes.
#[derive(Debug)]
pub struct StatusRegistry {
    tables: RwLock<HashMap<String, HashMap<StatusKind, u16>>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        let registry = Self {
            tables: RwLock::new(HashMap::new()),
        };
        registry.install(
            "grpc",
            StatusKind::ALL.iter().map(|k| (*k, k.grpc_code())).collect(),
        );
        registry
    }

    pub fn install(&self, protocol: &str, table: HashMap<StatusKind, u16>) {
        debug!(protocol = %protocol, entries = table.len(), "Installing status table");
        self.tables.write().insert(protocol.to_string(), table);
    }

    pub fn status(&self, protocol: &str, kind: StatusKind) -> u16 {
        self.tables
            .read()
            .get(protocol)
            .and_then(|t| t.get(&kind).copied())
            .unwrap_or_else(|| kind.http_code())
    }
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}
