//! Chain-of-custody ledger.
//!
//! Every lifecycle transition of a piece of evidence appends one event. Events
//! are never updated or deleted. Each event carries the hash of its
//! predecessor, so an edit made behind the application's back breaks the
//! chain and shows up in `verify_chain`.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Actor, CustodyAction, CustodyDraft, CustodyEvent, EntityType};
use crate::store::{LocalStore, StoreError};

const CHAIN_DOMAIN: &str = "siteproof.custody.v1";

#[derive(Debug, Error)]
pub enum CustodyError {
    #[error("custody log write failed: {0}")]
    Store(#[from] StoreError),
}

/// Result of walking the whole ledger in insertion order.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChainVerification {
    pub events_checked: usize,
    pub first_broken: Option<BrokenLink>,
}

impl ChainVerification {
    pub fn is_intact(&self) -> bool {
        self.first_broken.is_none()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BrokenLink {
    pub seq: i64,
    pub event_id: String,
    pub reason: String,
}

/// Appends and reads custody events on behalf of one actor.
#[derive(Clone)]
pub struct CustodyLog {
    store: Arc<dyn LocalStore>,
    actor: Actor,
}

impl CustodyLog {
    pub fn new(store: Arc<dyn LocalStore>, actor: Actor) -> Self {
        Self { store, actor }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Append one event. Failures propagate: a lifecycle step that cannot be
    /// logged did not happen as far as the caller is concerned.
    pub async fn record(
        &self,
        action: CustodyAction,
        entity_type: EntityType,
        entity_id: &str,
        hash_at_time: Option<&str>,
        details: serde_json::Value,
    ) -> Result<CustodyEvent, CustodyError> {
        let draft = CustodyDraft {
            action,
            entity_type,
            entity_id: entity_id.to_string(),
            actor: self.actor.clone(),
            hash_at_time: hash_at_time.map(str::to_string),
            details,
            timestamp: Utc::now(),
        };
        let event = self.store.append_custody(draft).await?;
        debug!(seq = event.seq, action = action.as_str(), entity_id, "custody event");
        Ok(event)
    }

    /// Events for one entity, newest first.
    pub async fn chain_for(&self, entity_type: EntityType, entity_id: &str) -> Result<Vec<CustodyEvent>, CustodyError> {
        Ok(self.store.custody_chain(entity_type, entity_id).await?)
    }

    /// The latest `limit` events across all entities, newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<CustodyEvent>, CustodyError> {
        let events = self.store.custody_events().await?;
        Ok(events.into_iter().rev().take(limit).collect())
    }

    pub async fn count(&self) -> Result<i64, CustodyError> {
        Ok(self.store.custody_count().await?)
    }

    pub async fn verify_chain(&self) -> Result<ChainVerification, CustodyError> {
        let events = self.store.custody_events().await?;
        let result = verify_events(&events);
        if let Some(broken) = &result.first_broken {
            warn!(seq = broken.seq, event_id = %broken.event_id, reason = %broken.reason, "custody chain broken");
        }
        Ok(result)
    }
}

/// Hash of an event's content and its link to the previous event.
/// `event.event_hash` itself is not part of the input.
pub fn compute_event_hash(event: &CustodyEvent) -> String {
    let details = serde_json::to_string(&event.details).unwrap_or_default();
    let input = format!(
        "{CHAIN_DOMAIN}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}",
        event.seq,
        event.action.as_str(),
        event.entity_type.as_str(),
        event.entity_id,
        event.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
        event.user_id,
        event.hash_at_time.as_deref().unwrap_or_default(),
        details,
        event.prev_event_hash.as_deref().unwrap_or_default(),
    );
    format!("blake3:{}", blake3::hash(input.as_bytes()).to_hex())
}

/// Walk events in insertion order and report the first inconsistency.
pub fn verify_events(events: &[CustodyEvent]) -> ChainVerification {
    let mut prev: Option<&CustodyEvent> = None;

    for (checked, event) in events.iter().enumerate() {
        let expected_prev = prev.map(|p| p.event_hash.as_str());
        let broken = |reason: String| ChainVerification {
            events_checked: checked,
            first_broken: Some(BrokenLink {
                seq: event.seq,
                event_id: event.id.clone(),
                reason,
            }),
        };

        if let Some(p) = prev {
            if event.seq <= p.seq {
                return broken(format!("sequence {} does not follow {}", event.seq, p.seq));
            }
        }
        if event.prev_event_hash.as_deref() != expected_prev {
            return broken("previous hash does not match the preceding event".to_string());
        }
        if compute_event_hash(event) != event.event_hash {
            return broken("event content does not match its hash".to_string());
        }
        prev = Some(event);
    }

    ChainVerification {
        events_checked: events.len(),
        first_broken: None,
    }
}
