//! Mirror rebuild from confirmed entities

use tracing::warn;

use crate::db::schemas::CursorName;
use crate::domain::DomainDescriptor;
use crate::merkle::MerkleMirror;
use crate::store::MirrorStore;
use crate::types::Result;

/// Rebuild a domain's mirror from scratch out of confirmed entity snapshots
pub async fn build_mirror(
    store: &dyn MirrorStore,
    domain: &DomainDescriptor,
) -> Result<MerkleMirror> {
    let watermark = store.cursor(domain.kind, CursorName::Watermark).await?;
    let entities = store.list_entities(domain.kind, true).await?;
    let placements = entities
        .iter()
        .filter_map(|e| e.confirmed.as_ref())
        .flat_map(|body| body.placements())
        .filter(|p| {
            let fits = domain.shape.holds(p);
            if !fits {
                warn!(
                    domain = %domain.kind,
                    level1 = p.level1,
                    level2 = ?p.level2,
                    "Skipping placement outside the tree"
                );
            }
            fits
        });
    MerkleMirror::build(domain.kind, domain.shape, placements, watermark)
}
