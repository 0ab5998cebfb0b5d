use bytes::Bytes;

use super::{error::InvocationError, status::StatusKind};

/// Outcome delivered to a response callback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub status: u16,
    pub result: Option<Bytes>,
    pub err: Option<InvocationError>,
}

impl Response {
    pub fn ok(result: Option<Bytes>) -> Self {
        Self {
            status: StatusKind::Ok.http_code(),
            result,
            err: None,
        }
    }

    pub fn error(status: u16, err: impl Into<InvocationError>) -> Self {
        Self {
            status,
            result: None,
            err: Some(err.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err.is_none()
    }
}
