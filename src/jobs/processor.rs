//! Job handling
//!
//! A job rebuilds the mirrors it reads from the store, refuses to continue
//! unless each root equals the ledger's committed root, then gathers the
//! records to prove with their witnesses and hands them to the submitter.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::types::{Job, JobType};
use crate::db::schemas::CursorName;
use crate::domain::{DomainKind, Entity, KeyStatus, RequestStatus};
use crate::merkle::{MerkleMirror, MirrorWitness};
use crate::ledger::LedgerClient;
use crate::prover::{FinalizeInput, ProofSubmitter, RollupAction, RollupInput};
use crate::store::MirrorStore;
use crate::sync::build_mirror;
use crate::types::{Hash32, MirrorError, Result};

pub struct JobProcessor {
    store: Arc<dyn MirrorStore>,
    ledger: Arc<dyn LedgerClient>,
    submitter: Arc<dyn ProofSubmitter>,
    addresses: HashMap<DomainKind, String>,
    sender: String,
    batch_size: usize,
}

impl JobProcessor {
    pub fn new(
        store: Arc<dyn MirrorStore>,
        ledger: Arc<dyn LedgerClient>,
        submitter: Arc<dyn ProofSubmitter>,
        addresses: HashMap<DomainKind, String>,
        sender: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            ledger,
            submitter,
            addresses,
            sender: sender.into(),
            batch_size: batch_size.max(1),
        }
    }

    /// Handle one job. Returns the transaction hash, or None when the work
    /// was already done by the time the job ran.
    pub async fn process(&self, job: &Job) -> Result<Option<String>> {
        let target = job.job_type.target();
        info!(job_id = %job.id, job_type = %job.job_type, domain = %target, "Processing job");
        let mirror = self.checked_mirror(target).await?;

        let (actions, finalize) = match job.job_type.finalize_source() {
            None => {
                let actions = self.pending_actions(target, &mirror).await?;
                if actions.is_empty() {
                    info!(job_id = %job.id, "No pending actions, nothing to roll up");
                    return Ok(None);
                }
                (actions, None)
            }
            Some(source) => match self.finalize_input(job, source, &mirror).await? {
                Some(finalize) => (Vec::new(), Some(finalize)),
                None => {
                    info!(job_id = %job.id, unit_id = job.unique_id, "Unit no longer awaiting finalization");
                    return Ok(None);
                }
            },
        };

        let previous_action_hash = match actions.first() {
            Some(first) => self.previous_hash(target, first.action_id).await?,
            None => self.watermark_hash(target).await?,
        };
        let nonce = self.ledger.fetch_nonce(&self.sender).await?;

        let input = RollupInput {
            job_id: job.id.clone(),
            job_type: job.job_type,
            domain: target,
            address: self.address(target)?.to_string(),
            previous_root: mirror.root(),
            previous_action_hash,
            actions,
            finalize,
            sender: self.sender.clone(),
            nonce,
        };
        let tx_hash = self.submitter.submit(&input).await?;
        info!(
            job_id = %job.id,
            tx_hash = %tx_hash,
            actions = input.actions.len(),
            nonce,
            "Job submitted"
        );
        Ok(Some(tx_hash))
    }

    fn address(&self, domain: DomainKind) -> Result<&str> {
        self.addresses
            .get(&domain)
            .map(String::as_str)
            .ok_or_else(|| MirrorError::Config(format!("no contract address for {}", domain)))
    }

    /// Fresh mirror whose root equals the ledger's committed root
    async fn checked_mirror(&self, domain: DomainKind) -> Result<MerkleMirror> {
        let descriptor = domain.descriptor();
        let mirror = build_mirror(self.store.as_ref(), descriptor).await?;
        let state = self.ledger.fetch_state(self.address(domain)?).await?;

        // A contract that never rolled up commits to the empty tree
        let ledger_root = match state.field(descriptor.root_field) {
            Some(raw) => raw.parse::<Hash32>().map_err(MirrorError::Decode)?,
            None => MerkleMirror::build(domain, descriptor.shape, std::iter::empty(), None)?.root(),
        };
        if ledger_root != mirror.root() {
            return Err(MirrorError::RootMismatch {
                domain,
                local: mirror.root(),
                ledger: ledger_root.to_hex(),
            });
        }
        Ok(mirror)
    }

    async fn pending_actions(
        &self,
        domain: DomainKind,
        mirror: &MerkleMirror,
    ) -> Result<Vec<RollupAction>> {
        let descriptor = domain.descriptor();
        let from = self
            .store
            .cursor(domain, CursorName::Watermark)
            .await?
            .map(|w| w + 1)
            .unwrap_or(0);
        let records = self.store.actions_from(domain, from, self.batch_size).await?;

        let mut actions = Vec::with_capacity(records.len());
        for record in records {
            // An action whose slot lies outside the tree folds to a no-op
            let witness = match (descriptor.action_slot)(&record.action, record.action_id) {
                Some((level1, level2)) if descriptor.shape.contains(level1, level2) => {
                    Some(mirror.get_witness(level1, level2)?)
                }
                _ => None,
            };
            actions.push(RollupAction {
                action_id: record.action_id,
                action_hash: record.action_hash,
                payload: record.raw_payload,
                action: record.action,
                witness,
            });
        }
        Ok(actions)
    }

    async fn finalize_input(
        &self,
        job: &Job,
        source: DomainKind,
        target_mirror: &MerkleMirror,
    ) -> Result<Option<FinalizeInput>> {
        let unit_id = job.unique_id;
        let key = unit_id.to_string();
        let Some(unit) = self
            .store
            .get_entity(job.job_type.target(), &key)
            .await?
            .and_then(|doc| doc.confirmed)
        else {
            return Ok(None);
        };

        let target_witness = match (job.job_type, &unit) {
            (JobType::FinalizeRound1, Entity::Key(k)) if k.status == KeyStatus::Round1Contribution => {
                target_mirror.get_witness(k.committee_id, Some(k.key_id))?
            }
            (JobType::FinalizeRound2, Entity::Key(k)) if k.status == KeyStatus::Round2Contribution => {
                target_mirror.get_witness(k.committee_id, Some(k.key_id))?
            }
            (JobType::FinalizeResponse, Entity::Request(r)) if r.status == RequestStatus::Initialized => {
                target_mirror.get_witness(r.request_id, None)?
            }
            _ => return Ok(None),
        };

        let source_mirror = self.checked_mirror(source).await?;
        let mut members: Vec<u64> = self
            .store
            .list_entities(source, true)
            .await?
            .into_iter()
            .filter_map(|doc| match doc.confirmed {
                Some(Entity::Round1(c) | Entity::Round2(c)) if c.key_index == unit_id => {
                    Some(c.member_id)
                }
                Some(Entity::Response(r)) if r.request_id == unit_id => Some(r.member_id),
                _ => None,
            })
            .collect();
        members.sort_unstable();

        let members = members
            .into_iter()
            .map(|member_id| source_mirror.get_witness(unit_id, Some(member_id)))
            .collect::<Result<Vec<MirrorWitness>>>()?;

        Ok(Some(FinalizeInput {
            source,
            source_root: source_mirror.root(),
            unit_id,
            target_witness,
            members,
        }))
    }

    async fn previous_hash(&self, domain: DomainKind, action_id: u64) -> Result<Hash32> {
        Ok(self
            .store
            .actions_from(domain, action_id, 1)
            .await?
            .first()
            .map(|a| a.previous_action_hash)
            .unwrap_or_else(Hash32::genesis))
    }

    /// Hash of the last confirmed action, genesis when nothing is confirmed
    async fn watermark_hash(&self, domain: DomainKind) -> Result<Hash32> {
        match self.store.cursor(domain, CursorName::Watermark).await? {
            Some(w) => Ok(self
                .store
                .actions_from(domain, w, 1)
                .await?
                .first()
                .map(|a| a.action_hash)
                .unwrap_or_else(Hash32::genesis)),
            None => Ok(Hash32::genesis()),
        }
    }
}
