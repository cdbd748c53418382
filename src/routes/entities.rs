//! Entity lookup endpoints
//!
//! - GET /entities/{domain}/{key} - one canonical entity, 404 on unknown id
//! - GET /entities/{domain} - active entities, ordered by natural key

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use super::{error_response, json_response, parse_domain};
use crate::db::schemas::EntityDoc;
use crate::domain::{DomainKind, Entity};
use crate::server::AppState;
use crate::types::{MirrorError, Result};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityView {
    pub domain: DomainKind,
    pub key: String,
    pub active: bool,
    pub first_action_id: u64,
    pub last_action_id: u64,
    pub confirmed_action_id: Option<u64>,
    /// Head state, including actions not yet confirmed
    pub entity: Entity,
    /// State the ledger has committed to
    pub confirmed: Option<Entity>,
}

impl From<EntityDoc> for EntityView {
    fn from(doc: EntityDoc) -> Self {
        Self {
            domain: doc.domain,
            key: doc.key,
            active: doc.active,
            first_action_id: doc.first_action_id,
            last_action_id: doc.last_action_id,
            confirmed_action_id: doc.confirmed_action_id,
            entity: doc.body,
            confirmed: doc.confirmed,
        }
    }
}

/// Numeric order over `a:b` keys, so `2` sorts before `10`
fn key_order(key: &str) -> Vec<u64> {
    key.split(':')
        .map(|part| part.parse().unwrap_or(u64::MAX))
        .collect()
}

async fn fetch_entity(state: &AppState, domain: &str, key: &str) -> Result<EntityView> {
    let domain = parse_domain(domain)?;
    state
        .store
        .get_entity(domain, key)
        .await?
        .map(EntityView::from)
        .ok_or_else(|| MirrorError::NotFound(format!("{} {}", domain, key)))
}

async fn fetch_active(state: &AppState, domain: &str) -> Result<Vec<EntityView>> {
    let domain = parse_domain(domain)?;
    let mut docs = state.store.list_entities(domain, true).await?;
    docs.sort_by(|a, b| key_order(&a.key).cmp(&key_order(&b.key)));
    Ok(docs.into_iter().map(EntityView::from).collect())
}

pub async fn get_entity(state: &AppState, domain: &str, key: &str) -> Response<Full<Bytes>> {
    match fetch_entity(state, domain, key).await {
        Ok(view) => json_response(StatusCode::OK, &view),
        Err(e) => error_response(&e),
    }
}

pub async fn list_entities(state: &AppState, domain: &str) -> Response<Full<Bytes>> {
    match fetch_active(state, domain).await {
        Ok(views) => json_response(StatusCode::OK, &views),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Args;
    use crate::domain::Committee;
    use crate::jobs::SchedulerMetrics;
    use crate::merkle::MirrorRegistry;
    use crate::store::{MemoryStore, MirrorStore};
    use clap::Parser;
    use http_body_util::BodyExt;
    use std::sync::Arc;

    async fn state_with(keys: &[(u64, bool)]) -> AppState {
        let store = Arc::new(MemoryStore::new());
        for (id, active) in keys {
            let body = Entity::Committee(Committee {
                committee_id: *id,
                threshold: 1,
                members: vec!["pk".into()],
                ipfs_hash: String::new(),
            });
            let mut doc = EntityDoc::new(DomainKind::Committee, id.to_string(), body.clone(), *id);
            if *active {
                doc.set_confirmed(body, *id);
            }
            store.upsert_entity(doc).await.unwrap();
        }
        AppState::new(
            Args::parse_from(["ledger-mirror", "--dev-mode"]),
            store,
            Arc::new(MirrorRegistry::new()),
            Arc::new(SchedulerMetrics::new()),
        )
    }

    async fn body_json(response: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_entity_is_404() {
        let state = state_with(&[]).await;
        let response = get_entity(&state, "committee", "7").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = get_entity(&state, "nonsense", "7").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_entity_lookup() {
        let state = state_with(&[(3, false)]).await;
        let response = get_entity(&state, "committee", "3").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["key"], "3");
        assert_eq!(body["active"], false);
        assert_eq!(body["entity"]["family"], "committee");
        assert!(body["confirmed"].is_null());

        let state = state_with(&[(4, true)]).await;
        let body = body_json(get_entity(&state, "committee", "4").await).await;
        assert_eq!(body["confirmedActionId"], 4);
        assert_eq!(body["confirmed"]["family"], "committee");
    }

    #[tokio::test]
    async fn test_list_is_active_and_ordered() {
        let state = state_with(&[(10, true), (2, true), (5, false)]).await;
        let body = body_json(list_entities(&state, "committee").await).await;
        let keys: Vec<_> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["key"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(keys, vec!["2", "10"]);
    }
}
