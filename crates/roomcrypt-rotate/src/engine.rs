//! Rotation pass over one room's items
//!
//! A pass runs in three stages, published as [`RotationPhase`] on a watch
//! channel:
//!   1. Fetch every item of the room (one store read)
//!   2. Re-key each item off the async runtime: open its sealed fields with
//!      the old key ring, seal them under the target, verify the round trip
//!   3. Write back the changed fields, one update per item, bounded by
//!      `max_concurrency`
//!
//! Writes are spawned tasks. Cancelling a pass (or dropping its future)
//! stops new writes from starting; a write already in flight runs to
//! completion so no item is left half-updated.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use roomcrypt_core::types::{Item, ItemPatch, SealedField};
use roomcrypt_core::{RoomError, RoomResult};
use roomcrypt_crypto::{
    classify, looks_like_ciphertext, Classification, CryptoError, EnvelopeCodec, KeyRing,
    KeySource,
};
use roomcrypt_store::ItemStore;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress of the current rotation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPhase {
    Idle,
    FetchingAll,
    /// Opening fields that will be stored as plaintext
    Decrypting,
    /// Opening fields and sealing them under the new secret
    ReEncrypting,
    PersistingUpdates,
}

impl std::fmt::Display for RotationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RotationPhase::Idle => "idle",
            RotationPhase::FetchingAll => "fetching",
            RotationPhase::Decrypting => "decrypting",
            RotationPhase::ReEncrypting => "re-encrypting",
            RotationPhase::PersistingUpdates => "persisting",
        };
        f.write_str(s)
    }
}

/// The settings transition that triggered a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationKind {
    SetPassword,
    ChangePassword,
    RemovePassword,
}

impl std::fmt::Display for RotationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RotationKind::SetPassword => "set-password",
            RotationKind::ChangePassword => "change-password",
            RotationKind::RemovePassword => "remove-password",
        };
        f.write_str(s)
    }
}

/// Where sealed fields end up
#[derive(Debug, Clone)]
pub enum RotationTarget {
    Sealed(KeySource),
    /// Password removed with `plaintext_on_remove` set
    Plaintext,
}

#[derive(Debug, Clone)]
pub struct RotationPlan {
    pub room_id: String,
    pub kind: RotationKind,
    /// Keys able to open the current content, in priority order
    pub from: KeyRing,
    pub to: RotationTarget,
}

/// Why an item was left as it was
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No key in the old ring opened this field
    Undecryptable { field: SealedField },
    /// The new envelope did not open back to the source plaintext
    VerificationFailed { field: SealedField },
    Crypto(String),
    Store(String),
    /// The pass was cancelled before this item's write started
    Cancelled,
    /// The worker task for this item did not finish
    Aborted(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Undecryptable { field } => {
                write!(f, "{field}: no candidate key opened the envelope")
            }
            FailureReason::VerificationFailed { field } => {
                write!(f, "{field}: round-trip verification failed")
            }
            FailureReason::Crypto(e) => write!(f, "crypto: {e}"),
            FailureReason::Store(e) => write!(f, "store: {e}"),
            FailureReason::Cancelled => f.write_str("cancelled"),
            FailureReason::Aborted(e) => write!(f, "aborted: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// New envelopes were written
    Updated,
    /// Every field was already in its target form
    Unchanged,
    Failed(FailureReason),
}

/// Aggregate result of a pass.
///
/// Failed items keep their previous value and are not counted as succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub room_id: String,
    pub total: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// (item id, reason), in completion order
    pub failures: Vec<(String, FailureReason)>,
}

impl RotationReport {
    fn new(room_id: &str, total: usize) -> Self {
        Self {
            room_id: room_id.to_string(),
            total,
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> usize {
        self.updated + self.unchanged
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        format!("re-encrypted {} of {} items", self.succeeded(), self.total)
    }

    /// Escalate a partial pass to an error.
    pub fn ensure_complete(&self) -> RoomResult<()> {
        if self.is_partial() {
            return Err(RoomError::RotationPartialFailure {
                succeeded: self.succeeded(),
                total: self.total,
            });
        }
        Ok(())
    }

    fn record(&mut self, item_id: String, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Updated => self.updated += 1,
            ItemOutcome::Unchanged => self.unchanged += 1,
            ItemOutcome::Failed(reason) => {
                warn!(room_id = %self.room_id, item_id, %reason, "item not rotated");
                self.failures.push((item_id, reason));
            }
        }
    }
}

/// Compute the field updates that move `item` onto `to`.
///
/// An empty patch means the item is already in its target form. Fields that
/// do not classify as ciphertext are legacy plaintext and are taken as-is.
/// Any field failing aborts the whole item, so an item is never written
/// with one field re-keyed and the other not.
pub fn rekey_item(
    codec: &EnvelopeCodec,
    from: &KeyRing,
    to: &RotationTarget,
    item: &Item,
) -> Result<ItemPatch, FailureReason> {
    let mut patch = ItemPatch::default();
    for (field, value) in item.sealed_fields() {
        if let Some(next) = rekey_field(codec, from, to, field, value)? {
            patch.set(field, next);
        }
    }
    Ok(patch)
}

fn rekey_field(
    codec: &EnvelopeCodec,
    from: &KeyRing,
    to: &RotationTarget,
    field: SealedField,
    value: &str,
) -> Result<Option<String>, FailureReason> {
    let classification = classify(value);
    if at_target(codec, to, value, classification) {
        return Ok(None);
    }

    let plaintext = match classification {
        Classification::Ciphertext { .. } => {
            from.resolve(codec, value)
                .map_err(|e| match e {
                    CryptoError::NoKeyMatched { .. } => FailureReason::Undecryptable { field },
                    other => FailureReason::Crypto(other.to_string()),
                })?
                .plaintext
        }
        Classification::Ambiguous => {
            debug!(%field, "ambiguous value treated as legacy plaintext");
            value.to_string()
        }
        Classification::Plaintext => value.to_string(),
    };

    match to {
        RotationTarget::Sealed(key) => codec
            .seal_verified(&plaintext, key)
            .map(Some)
            .map_err(|e| match e {
                CryptoError::RoundTripVerificationFailed => {
                    FailureReason::VerificationFailed { field }
                }
                other => FailureReason::Crypto(other.to_string()),
            }),
        RotationTarget::Plaintext => Ok(Some(plaintext)),
    }
}

fn at_target(
    codec: &EnvelopeCodec,
    to: &RotationTarget,
    value: &str,
    classification: Classification,
) -> bool {
    match to {
        RotationTarget::Plaintext => !classification.is_ciphertext(),
        RotationTarget::Sealed(key) => {
            classification.is_ciphertext()
                && matches!(codec.open(value, key), Ok(p) if !looks_like_ciphertext(&p))
        }
    }
}

/// Runs rotation passes against a store
pub struct RotationEngine {
    store: Arc<dyn ItemStore>,
    codec: EnvelopeCodec,
    max_concurrency: usize,
    phase_tx: watch::Sender<RotationPhase>,
}

impl RotationEngine {
    pub fn new(store: Arc<dyn ItemStore>, codec: EnvelopeCodec, max_concurrency: usize) -> Self {
        let (phase_tx, _) = watch::channel(RotationPhase::Idle);
        Self {
            store,
            codec,
            max_concurrency: max_concurrency.max(1),
            phase_tx,
        }
    }

    /// Follow phase changes of this engine's passes.
    pub fn subscribe(&self) -> watch::Receiver<RotationPhase> {
        self.phase_tx.subscribe()
    }

    pub fn phase(&self) -> RotationPhase {
        *self.phase_tx.borrow()
    }

    fn set_phase(&self, phase: RotationPhase) {
        info!(%phase, "rotation phase");
        self.phase_tx.send_replace(phase);
    }

    pub async fn rotate(&self, plan: RotationPlan) -> RoomResult<RotationReport> {
        self.rotate_with_cancel(plan, CancellationToken::new()).await
    }

    /// Run a pass. Only a failed fetch is an error; per-item failures are
    /// counted in the report.
    ///
    /// Items whose write has not started when `cancel` fires (or when the
    /// returned future is dropped) are reported as
    /// [`FailureReason::Cancelled`] and keep their old value.
    pub async fn rotate_with_cancel(
        &self,
        plan: RotationPlan,
        cancel: CancellationToken,
    ) -> RoomResult<RotationReport> {
        let _idle = IdleOnDrop(&self.phase_tx);
        let cancel = cancel.child_token();
        let _cancel_on_drop = cancel.clone().drop_guard();
        info!(room_id = %plan.room_id, kind = %plan.kind, "rotation pass starting");

        self.set_phase(RotationPhase::FetchingAll);
        let items = self.store.fetch_items(&plan.room_id).await?;
        let mut report = RotationReport::new(&plan.room_id, items.len());
        if items.is_empty() {
            info!(room_id = %plan.room_id, "rotation pass: room has no items");
            return Ok(report);
        }

        self.set_phase(match plan.to {
            RotationTarget::Sealed(_) => RotationPhase::ReEncrypting,
            RotationTarget::Plaintext => RotationPhase::Decrypting,
        });
        let plan = Arc::new(plan);
        let rekeyed: Vec<(String, Result<ItemPatch, FailureReason>)> = stream::iter(items)
            .map(|item| {
                let codec = self.codec.clone();
                let plan = Arc::clone(&plan);
                let cancel = cancel.clone();
                async move {
                    let item_id = item.id.clone();
                    if cancel.is_cancelled() {
                        return (item_id, Err(FailureReason::Cancelled));
                    }
                    let result = tokio::task::spawn_blocking(move || {
                        rekey_item(&codec, &plan.from, &plan.to, &item)
                    })
                    .await
                    .unwrap_or_else(|e| Err(FailureReason::Aborted(e.to_string())));
                    (item_id, result)
                }
            })
            .buffered(self.max_concurrency)
            .collect()
            .await;

        self.set_phase(RotationPhase::PersistingUpdates);
        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let mut writes = Vec::new();
        for (item_id, rekeyed) in rekeyed {
            let patch = match rekeyed {
                Ok(patch) if patch.is_empty() => {
                    report.record(item_id, ItemOutcome::Unchanged);
                    continue;
                }
                Ok(patch) => patch,
                Err(reason) => {
                    report.record(item_id, ItemOutcome::Failed(reason));
                    continue;
                }
            };

            let store = Arc::clone(&self.store);
            let permits = Arc::clone(&permits);
            let cancel = cancel.clone();
            let id = item_id.clone();
            let handle = tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return ItemOutcome::Failed(FailureReason::Aborted("write pool closed".into()));
                };
                if cancel.is_cancelled() {
                    return ItemOutcome::Failed(FailureReason::Cancelled);
                }
                match store.update_item_fields(&id, &patch).await {
                    Ok(()) => ItemOutcome::Updated,
                    Err(e) => ItemOutcome::Failed(FailureReason::Store(e.to_string())),
                }
            });
            writes.push((item_id, handle));
        }

        for (item_id, handle) in writes {
            let outcome = handle
                .await
                .unwrap_or_else(|e| ItemOutcome::Failed(FailureReason::Aborted(e.to_string())));
            report.record(item_id, outcome);
        }

        if report.is_partial() {
            warn!(
                room_id = %report.room_id,
                updated = report.updated,
                unchanged = report.unchanged,
                failed = report.failed(),
                total = report.total,
                "rotation pass incomplete: {}",
                report.summary()
            );
        } else {
            info!(
                room_id = %report.room_id,
                updated = report.updated,
                unchanged = report.unchanged,
                total = report.total,
                "rotation pass complete"
            );
        }
        Ok(report)
    }
}

impl std::fmt::Debug for RotationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationEngine")
            .field("codec", &self.codec)
            .field("max_concurrency", &self.max_concurrency)
            .field("phase", &self.phase())
            .finish()
    }
}

/// Returns the phase to `Idle` however the pass ends.
struct IdleOnDrop<'a>(&'a watch::Sender<RotationPhase>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(RotationPhase::Idle);
    }
}
