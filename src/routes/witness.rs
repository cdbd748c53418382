//! GET /witness/{domain}/{level1}[/{level2}]
//!
//! Served from the last completed rebuild; the returned witness carries the
//! root it is valid against.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};

use super::{error_response, json_response, parse_domain};
use crate::merkle::{MirrorWitness, WitnessProvider};
use crate::server::AppState;
use crate::types::{MirrorError, Result};

fn parse_index(raw: &str) -> Result<u64> {
    raw.parse()
        .map_err(|_| MirrorError::InvalidSlot(format!("'{}' is not a slot index", raw)))
}

fn lookup(
    provider: &dyn WitnessProvider,
    domain: &str,
    level1: &str,
    level2: Option<&str>,
) -> Result<MirrorWitness> {
    let domain = parse_domain(domain)?;
    let level1 = parse_index(level1)?;
    let level2 = level2.map(parse_index).transpose()?;
    provider.get_witness(domain, level1, level2)
}

pub fn get_witness(
    state: &AppState,
    domain: &str,
    level1: &str,
    level2: Option<&str>,
) -> Response<Full<Bytes>> {
    match lookup(state.registry.as_ref(), domain, level1, level2) {
        Ok(witness) => json_response(StatusCode::OK, &witness),
        Err(e) => error_response(&e),
    }
}
