//! HTTP route handlers

pub mod entities;
pub mod health;
pub mod witness;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::domain::DomainKind;
use crate::types::MirrorError;

pub use entities::{get_entity, list_entities};
pub use health::health_check;
pub use witness::get_witness;

pub(crate) fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub fn error_response(err: &MirrorError) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": err.to_string() });
    json_response(err.status_code(), &body)
}

pub(crate) fn parse_domain(raw: &str) -> Result<DomainKind, MirrorError> {
    raw.parse()
        .map_err(|_| MirrorError::NotFound(format!("domain {}", raw)))
}
