//! End-to-end rotation scenarios against the in-memory OpenDAL store.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use roomcrypt_core::config::RotationConfig;
use roomcrypt_core::types::{
    CredentialHash, Item, ItemKind, ItemPatch, NewItem, RoomSettings, SettingsChange,
};
use roomcrypt_core::RoomError;
use roomcrypt_crypto::{
    looks_like_ciphertext, EnvelopeCodec, KdfParams, KeyRing, KeySource, SecretCache,
};
use roomcrypt_rotate::{
    FailureReason, PasswordUpdate, RoomController, RotationEngine, RotationKind, RotationPhase,
    RotationPlan, RotationStatus, RotationTarget, SettingsRequest,
};
use roomcrypt_store::{ItemStore, OpendalStore, StoreError, StoreResult};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

fn codec() -> EnvelopeCodec {
    EnvelopeCodec::new(
        KdfParams {
            password_iterations: 10,
            room_id_iterations: 2,
        },
        false,
    )
}

fn controller_over(store: Arc<dyn ItemStore>, rotation: RotationConfig) -> RoomController {
    let cache = Arc::new(SecretCache::new(Duration::from_secs(60)));
    RoomController::new(store, codec(), cache, &rotation)
}

fn new_item(room: &str, kind: ItemKind, content: &str, name: Option<&str>) -> NewItem {
    NewItem {
        room_id: room.into(),
        kind,
        content: content.into(),
        display_name: name.map(str::to_string),
        language: None,
        file: None,
    }
}

fn set_password(pw: &str) -> SettingsRequest {
    SettingsRequest {
        password: PasswordUpdate::Set(SecretString::from(pw)),
        ..Default::default()
    }
}

fn remove_password() -> SettingsRequest {
    SettingsRequest {
        password: PasswordUpdate::Remove,
        ..Default::default()
    }
}

fn report(outcome: &roomcrypt_rotate::SettingsOutcome) -> &roomcrypt_rotate::RotationReport {
    match &outcome.rotation {
        RotationStatus::Completed(report) => report,
        other => panic!("expected a completed pass, got {other:?}"),
    }
}

/// Wraps a store and fails `update_item_fields` for chosen item ids.
/// Can also cancel a token once the first write has landed.
struct FlakyStore {
    inner: OpendalStore,
    fail_updates: Mutex<HashSet<String>>,
    cancel_after_write: Mutex<Option<CancellationToken>>,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: OpendalStore::memory().unwrap(),
            fail_updates: Mutex::new(HashSet::new()),
            cancel_after_write: Mutex::new(None),
        }
    }

    fn fail_on(&self, item_id: &str) {
        self.fail_updates.lock().unwrap().insert(item_id.to_string());
    }

    fn cancel_after_first_write(&self, token: CancellationToken) {
        *self.cancel_after_write.lock().unwrap() = Some(token);
    }
}

#[async_trait]
impl ItemStore for FlakyStore {
    async fn create_item(&self, item: NewItem) -> StoreResult<Item> {
        self.inner.create_item(item).await
    }

    async fn fetch_items(&self, room_id: &str) -> StoreResult<Vec<Item>> {
        self.inner.fetch_items(room_id).await
    }

    async fn update_item_fields(&self, item_id: &str, patch: &ItemPatch) -> StoreResult<()> {
        if self.fail_updates.lock().unwrap().contains(item_id) {
            return Err(StoreError::NotFound(format!("injected failure for {item_id}")));
        }
        self.inner.update_item_fields(item_id, patch).await?;
        if let Some(token) = self.cancel_after_write.lock().unwrap().take() {
            token.cancel();
        }
        Ok(())
    }

    async fn delete_item(
        &self,
        item_id: &str,
        credential: Option<&CredentialHash>,
    ) -> StoreResult<()> {
        self.inner.delete_item(item_id, credential).await
    }

    async fn room_settings(&self, room_id: &str) -> StoreResult<RoomSettings> {
        self.inner.room_settings(room_id).await
    }

    async fn update_room_secret(
        &self,
        room_id: &str,
        change: &SettingsChange,
    ) -> StoreResult<RoomSettings> {
        self.inner.update_room_secret(room_id, change).await
    }
}

#[tokio::test]
async fn setting_a_password_rekeys_room_id_content() {
    let store = Arc::new(OpendalStore::memory().unwrap());
    let ctl = controller_over(store.clone(), RotationConfig::default());

    ctl.create_item(new_item("room-1", ItemKind::Text, "hello", None))
        .await
        .unwrap();
    let before = store.fetch_items("room-1").await.unwrap();
    assert_eq!(
        codec()
            .open(&before[0].content, &KeySource::room_id("room-1"))
            .unwrap(),
        "hello"
    );

    let outcome = ctl.update_settings("room-1", set_password("p@ss")).await.unwrap();
    let report = report(&outcome);
    assert_eq!((report.updated, report.total), (1, 1));
    assert!(outcome.warning().is_none());
    assert!(outcome.settings.is_protected());

    let after = store.fetch_items("room-1").await.unwrap();
    let content = &after[0].content;
    assert_eq!(content.split(':').count(), 3, "password envelopes carry a salt");
    assert_eq!(
        codec().open(content, &KeySource::password("p@ss")).unwrap(),
        "hello"
    );
    assert!(codec()
        .open(content, &KeySource::room_id("room-1"))
        .map(|p| looks_like_ciphertext(&p))
        .unwrap_or(true));
}

#[tokio::test]
async fn corrupted_item_is_left_untouched_and_not_counted() {
    let store = Arc::new(OpendalStore::memory().unwrap());
    let ctl = controller_over(store.clone(), RotationConfig::default());
    ctl.update_settings("room-1", set_password("old")).await.unwrap();

    let good = ctl
        .create_item(new_item("room-1", ItemKind::Text, "good", None))
        .await
        .unwrap();
    let bad = ctl
        .create_item(new_item("room-1", ItemKind::Text, "bad", None))
        .await
        .unwrap();

    // Flip one payload character so the tag no longer verifies.
    let mut corrupted = bad.content.clone();
    let last = corrupted.pop().unwrap();
    let at = corrupted.len() - 4;
    let flipped = if &corrupted[at..at + 1] == "A" { "B" } else { "A" };
    corrupted.replace_range(at..at + 1, flipped);
    corrupted.push(last);
    store
        .update_item_fields(
            &bad.id,
            &ItemPatch {
                content: Some(corrupted.clone()),
                display_name: None,
            },
        )
        .await
        .unwrap();

    let outcome = ctl.update_settings("room-1", set_password("new")).await.unwrap();
    let report = report(&outcome);
    assert_eq!(report.total, 2);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(
        report.failures,
        vec![(
            bad.id.clone(),
            FailureReason::Undecryptable {
                field: roomcrypt_core::types::SealedField::Content
            }
        )]
    );
    assert_eq!(outcome.warning().as_deref(), Some("re-encrypted 1 of 2 items"));
    assert!(matches!(
        report.ensure_complete(),
        Err(RoomError::RotationPartialFailure {
            succeeded: 1,
            total: 2
        })
    ));

    let items = store.fetch_items("room-1").await.unwrap();
    let stored_bad = items.iter().find(|i| i.id == bad.id).unwrap();
    assert_eq!(stored_bad.content, corrupted);
    let stored_good = items.iter().find(|i| i.id == good.id).unwrap();
    assert_eq!(
        codec()
            .open(&stored_good.content, &KeySource::password("new"))
            .unwrap(),
        "good"
    );
}

#[tokio::test]
async fn second_pass_is_a_no_op() {
    let store = Arc::new(OpendalStore::memory().unwrap());
    let ctl = controller_over(store.clone(), RotationConfig::default());
    for body in ["a", "b", "c"] {
        ctl.create_item(new_item("room-1", ItemKind::Text, body, None))
            .await
            .unwrap();
    }
    ctl.update_settings("room-1", set_password("p")).await.unwrap();
    let first = store.fetch_items("room-1").await.unwrap();

    let engine = RotationEngine::new(store.clone(), codec(), 2);
    let again = engine
        .rotate(RotationPlan {
            room_id: "room-1".into(),
            kind: RotationKind::SetPassword,
            from: KeyRing::single(KeySource::room_id("room-1")),
            to: RotationTarget::Sealed(KeySource::password("p")),
        })
        .await
        .unwrap();

    assert_eq!((again.unchanged, again.updated, again.total), (3, 0, 3));
    assert_eq!(store.fetch_items("room-1").await.unwrap(), first);
}

#[tokio::test]
async fn removing_the_password_rekeys_to_the_room_id() {
    let store = Arc::new(OpendalStore::memory().unwrap());
    let ctl = controller_over(store.clone(), RotationConfig::default());
    ctl.update_settings("room-1", set_password("p")).await.unwrap();
    ctl.create_item(new_item("room-1", ItemKind::Code, "let x = 1;", None))
        .await
        .unwrap();

    let outcome = ctl.update_settings("room-1", remove_password()).await.unwrap();
    assert!(!outcome.settings.is_protected());
    assert_eq!(report(&outcome).updated, 1);

    let stored = &store.fetch_items("room-1").await.unwrap()[0];
    assert!(looks_like_ciphertext(&stored.content));
    assert_eq!(
        codec()
            .open(&stored.content, &KeySource::room_id("room-1"))
            .unwrap(),
        "let x = 1;"
    );

    // A fresh visitor needs no password any more.
    ctl.leave_room("room-1");
    let listed = ctl.list_items("room-1").await.unwrap();
    assert_eq!(listed[0].item.content, "let x = 1;");
}

#[tokio::test]
async fn removing_the_password_can_store_plaintext() {
    let store = Arc::new(OpendalStore::memory().unwrap());
    let rotation = RotationConfig {
        plaintext_on_remove: true,
        ..Default::default()
    };
    let ctl = controller_over(store.clone(), rotation);
    ctl.update_settings("room-1", set_password("p")).await.unwrap();
    ctl.create_item(new_item("room-1", ItemKind::Text, "open now", None))
        .await
        .unwrap();

    ctl.update_settings("room-1", remove_password()).await.unwrap();
    assert_eq!(store.fetch_items("room-1").await.unwrap()[0].content, "open now");
}

#[tokio::test]
async fn file_names_rotate_with_content() {
    let store = Arc::new(OpendalStore::memory().unwrap());
    let ctl = controller_over(store.clone(), RotationConfig::default());
    ctl.create_item(new_item(
        "room-1",
        ItemKind::File,
        "blobs/1234",
        Some("holiday.jpg"),
    ))
    .await
    .unwrap();

    let stored = &store.fetch_items("room-1").await.unwrap()[0];
    assert!(looks_like_ciphertext(stored.display_name.as_deref().unwrap()));

    ctl.update_settings("room-1", set_password("p")).await.unwrap();
    let stored = &store.fetch_items("room-1").await.unwrap()[0];
    let key = KeySource::password("p");
    assert_eq!(
        codec()
            .open(stored.display_name.as_deref().unwrap(), &key)
            .unwrap(),
        "holiday.jpg"
    );
    assert_eq!(codec().open(&stored.content, &key).unwrap(), "blobs/1234");
}

#[tokio::test]
async fn legacy_plaintext_is_sealed_on_rotation() {
    let store = Arc::new(OpendalStore::memory().unwrap());
    store
        .create_item(new_item("room-1", ItemKind::Url, "https://example.com", None))
        .await
        .unwrap();
    let ctl = controller_over(store.clone(), RotationConfig::default());

    let listed = ctl.list_items("room-1").await.unwrap();
    assert_eq!(listed[0].item.content, "https://example.com");
    assert!(!listed[0].locked);

    let outcome = ctl.update_settings("room-1", set_password("p")).await.unwrap();
    assert_eq!(report(&outcome).updated, 1);
    let stored = &store.fetch_items("room-1").await.unwrap()[0];
    assert_eq!(
        codec()
            .open(&stored.content, &KeySource::password("p"))
            .unwrap(),
        "https://example.com"
    );
}

#[tokio::test]
async fn failed_write_is_reported_and_item_stays_readable() {
    let store = Arc::new(FlakyStore::new());
    let ctl = controller_over(store.clone(), RotationConfig::default());
    let a = ctl
        .create_item(new_item("room-1", ItemKind::Text, "a", None))
        .await
        .unwrap();
    ctl.create_item(new_item("room-1", ItemKind::Text, "b", None))
        .await
        .unwrap();
    store.fail_on(&a.id);

    let outcome = ctl.update_settings("room-1", set_password("p")).await.unwrap();
    let report = report(&outcome);
    assert_eq!((report.succeeded(), report.total), (1, 2));
    assert!(matches!(report.failures[0].1, FailureReason::Store(_)));

    // The item left under the room-id key still opens with the new ring.
    let listed = ctl.list_items("room-1").await.unwrap();
    assert!(listed.iter().all(|o| !o.locked));
    let mut bodies: Vec<_> = listed.iter().map(|o| o.item.content.as_str()).collect();
    bodies.sort();
    assert_eq!(bodies, vec!["a", "b"]);
}

#[tokio::test]
async fn unauthorized_settings_change_runs_no_rotation() {
    let store = Arc::new(OpendalStore::memory().unwrap());
    let owner = controller_over(store.clone(), RotationConfig::default());
    owner.update_settings("room-1", set_password("right")).await.unwrap();
    owner
        .create_item(new_item("room-1", ItemKind::Text, "secret", None))
        .await
        .unwrap();
    let before = store.fetch_items("room-1").await.unwrap();

    // A second client holding a stale, wrong password.
    let intruder = controller_over(store.clone(), RotationConfig::default());
    intruder.cache().insert(roomcrypt_crypto::RoomSecretState::with_password(
        "room-1",
        SecretString::from("wrong"),
    ));
    let mut phases = intruder.engine().subscribe();

    let result = intruder.update_settings("room-1", set_password("mine")).await;
    assert!(matches!(result, Err(RoomError::Unauthorized(_))));
    assert!(!phases.has_changed().unwrap());
    assert_eq!(*phases.borrow_and_update(), RotationPhase::Idle);
    assert_eq!(store.fetch_items("room-1").await.unwrap(), before);
}

#[tokio::test]
async fn creating_without_a_key_is_refused() {
    let store = Arc::new(OpendalStore::memory().unwrap());
    let owner = controller_over(store.clone(), RotationConfig::default());
    owner.update_settings("room-1", set_password("p")).await.unwrap();

    let visitor = controller_over(store.clone(), RotationConfig::default());
    let result = visitor
        .create_item(new_item("room-1", ItemKind::Text, "x", None))
        .await;
    assert!(matches!(result, Err(RoomError::EncryptionKeyMissing { .. })));
    assert!(store.fetch_items("room-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn old_password_content_stays_readable_after_change() {
    let store = Arc::new(FlakyStore::new());
    let ctl = controller_over(store.clone(), RotationConfig::default());
    ctl.update_settings("room-1", set_password("v1")).await.unwrap();
    let stuck = ctl
        .create_item(new_item("room-1", ItemKind::Text, "from v1", None))
        .await
        .unwrap();
    store.fail_on(&stuck.id);

    ctl.update_settings("room-1", set_password("v2")).await.unwrap();
    let listed = ctl.list_items("room-1").await.unwrap();
    assert_eq!(listed[0].item.content, "from v1");
    assert!(!listed[0].locked);

    // A visitor who only knows the new password cannot read it.
    let visitor = controller_over(store.clone(), RotationConfig::default());
    visitor
        .enter_room("room-1", Some(SecretString::from("v2")))
        .await
        .unwrap();
    assert!(visitor.list_items("room-1").await.unwrap()[0].locked);

    assert!(visitor.remember_previous_password("room-1", SecretString::from("v1")));
    assert!(!visitor.list_items("room-1").await.unwrap()[0].locked);
}

#[tokio::test]
async fn cancelling_mid_pass_skips_pending_writes() {
    let store = Arc::new(FlakyStore::new());
    let ctl = controller_over(store.clone(), RotationConfig::default());
    for body in ["one", "two", "three", "four"] {
        ctl.create_item(new_item("room-1", ItemKind::Text, body, None))
            .await
            .unwrap();
    }

    let cancel = CancellationToken::new();
    store.cancel_after_first_write(cancel.clone());
    let engine = RotationEngine::new(store.clone(), codec(), 1);
    let report = engine
        .rotate_with_cancel(
            RotationPlan {
                room_id: "room-1".into(),
                kind: RotationKind::SetPassword,
                from: KeyRing::single(KeySource::room_id("room-1")),
                to: RotationTarget::Sealed(KeySource::password("p")),
            },
            cancel,
        )
        .await
        .unwrap();

    assert_eq!((report.updated, report.failed(), report.total), (1, 3, 4));
    assert!(report
        .failures
        .iter()
        .all(|(_, reason)| *reason == FailureReason::Cancelled));
    assert_eq!(report.summary(), "re-encrypted 1 of 4 items");
    assert_eq!(engine.phase(), RotationPhase::Idle);

    let ring = KeyRing::single(KeySource::password("p")).with(KeySource::room_id("room-1"));
    let mut bodies: Vec<String> = store
        .fetch_items("room-1")
        .await
        .unwrap()
        .iter()
        .map(|item| ring.resolve(&codec(), &item.content).unwrap().plaintext)
        .collect();
    bodies.sort();
    assert_eq!(bodies, ["four", "one", "three", "two"]);
}
