//! Credential store: per-marketplace, per-account secrets plus session tokens.
//!
//! # Invariants
//! - Refreshes for the same credential are serialized (one async lock per
//!   account). A caller that lost the race reuses the token the winner issued.
//! - After `max_auth_failures` consecutive rejections the credential is
//!   `Revoked`; further calls fail with `Auth(InvalidCredentials)` without
//!   touching the network until [`CredentialStore::insert`] replaces it.
//! - Secret values never appear in logs or errors.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use mps_config::secrets::ResolvedSecrets;
use mps_config::SyncSettings;
use mps_schemas::{AuthFailure, Credential, CredentialStatus, MarketplaceId, SyncError};
use tokio::sync::Mutex;

use crate::adapter::{AuthContext, MarketplaceAdapter};
use crate::error::Classification;

/// Tokens this close to expiry are treated as already expired.
const EXPIRY_SKEW_SECS: i64 = 30;

pub const DEFAULT_MAX_AUTH_FAILURES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    pub marketplace: MarketplaceId,
    pub account_id: String,
}

impl CredentialKey {
    pub fn new(marketplace: MarketplaceId, account_id: impl Into<String>) -> Self {
        Self {
            marketplace,
            account_id: account_id.into(),
        }
    }

    pub fn of(c: &Credential) -> Self {
        Self::new(c.marketplace, c.account_id.clone())
    }
}

impl std::fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.marketplace, self.account_id)
    }
}

struct Slot {
    credential: Credential,
    consecutive_failures: u32,
}

pub struct CredentialStore {
    slots: RwLock<HashMap<CredentialKey, Arc<Mutex<Slot>>>>,
    max_auth_failures: u32,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AUTH_FAILURES)
    }
}

impl CredentialStore {
    pub fn new(max_auth_failures: u32) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            max_auth_failures: max_auth_failures.max(1),
        }
    }

    /// Seed the store from resolved startup secrets, one credential per
    /// enabled marketplace.
    pub fn from_secrets(settings: &SyncSettings, secrets: &ResolvedSecrets) -> Self {
        let store = Self::default();
        for (m, s) in &secrets.marketplaces {
            let account_id = settings
                .marketplace(*m)
                .map(|ms| ms.account_id.clone())
                .unwrap_or_default();
            let mut c = Credential::new(*m, account_id, s.api_key.clone(), s.api_secret.clone());
            c.refresh_token = s.refresh_token.clone();
            store.insert(c);
        }
        store
    }

    /// Link (or replace) an account. Resets status and failure count.
    pub fn insert(&self, mut credential: Credential) {
        credential.status = CredentialStatus::Valid;
        let key = CredentialKey::of(&credential);
        let slot = Arc::new(Mutex::new(Slot {
            credential,
            consecutive_failures: 0,
        }));
        let mut map = match self.slots.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.insert(key, slot);
    }

    pub fn contains(&self, key: &CredentialKey) -> bool {
        self.slot(key).is_some()
    }

    fn slot(&self, key: &CredentialKey) -> Option<Arc<Mutex<Slot>>> {
        let map = match self.slots.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.get(key).cloned()
    }

    fn missing(key: &CredentialKey) -> SyncError {
        SyncError::auth(AuthFailure::InvalidCredentials, "no credentials linked for account")
            .with_marketplace(key.marketplace)
            .with_entity(key.account_id.clone())
    }

    /// Copy of the stored credential (secrets included; callers must not log it).
    pub async fn snapshot(&self, key: &CredentialKey) -> Option<Credential> {
        let slot = self.slot(key)?;
        let guard = slot.lock().await;
        Some(guard.credential.clone())
    }

    pub async fn status(&self, key: &CredentialKey) -> Option<CredentialStatus> {
        self.snapshot(key).await.map(|c| c.status)
    }

    /// Auth context for the next call, issuing a session token first when the
    /// adapter needs one and none is live.
    pub async fn session(
        &self,
        key: &CredentialKey,
        adapter: &dyn MarketplaceAdapter,
        now: DateTime<Utc>,
    ) -> Result<AuthContext, SyncError> {
        let slot = self.slot(key).ok_or_else(|| Self::missing(key))?;
        let mut guard = slot.lock().await;
        if guard.credential.status == CredentialStatus::Revoked {
            return Err(revoked(key));
        }
        if !adapter.uses_session_token()
            || guard
                .credential
                .has_live_token(now + ChronoDuration::seconds(EXPIRY_SKEW_SECS))
        {
            return Ok(AuthContext::from_credential(&guard.credential));
        }
        self.issue_locked(key, &mut guard, adapter).await
    }

    /// Force a new session token.
    ///
    /// `rejected` is the token the caller saw refused. When another caller
    /// already replaced it with a live token, that token is returned without
    /// a second exchange.
    pub async fn refresh(
        &self,
        key: &CredentialKey,
        adapter: &dyn MarketplaceAdapter,
        rejected: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AuthContext, SyncError> {
        let slot = self.slot(key).ok_or_else(|| Self::missing(key))?;
        let mut guard = slot.lock().await;
        if guard.credential.status == CredentialStatus::Revoked {
            return Err(revoked(key));
        }
        if !adapter.uses_session_token() {
            return Ok(AuthContext::from_credential(&guard.credential));
        }
        let current = guard.credential.access_token.as_deref();
        if current.is_some() && current != rejected && guard.credential.has_live_token(now) {
            return Ok(AuthContext::from_credential(&guard.credential));
        }
        guard.credential.status = CredentialStatus::Expired;
        guard.credential.access_token = None;
        self.issue_locked(key, &mut guard, adapter).await
    }

    async fn issue_locked(
        &self,
        key: &CredentialKey,
        slot: &mut Slot,
        adapter: &dyn MarketplaceAdapter,
    ) -> Result<AuthContext, SyncError> {
        match adapter.issue_token(&slot.credential).await {
            Ok(token) => {
                slot.credential.access_token = Some(token.access_token);
                slot.credential.token_expiry = token.expires_at;
                slot.credential.status = CredentialStatus::Valid;
                slot.consecutive_failures = 0;
                tracing::info!(account = %key, expires_at = ?slot.credential.token_expiry, "session token issued");
                Ok(AuthContext::from_credential(&slot.credential))
            }
            Err(e) if e.classify(false) == Classification::Transient => {
                tracing::warn!(account = %key, error = %e, "token endpoint unavailable");
                Err(SyncError::auth(
                    AuthFailure::TemporarilyUnavailable,
                    format!("token exchange failed: {e}"),
                )
                .with_marketplace(key.marketplace))
            }
            Err(e) => {
                self.count_rejection(key, slot);
                Err(SyncError::auth(
                    AuthFailure::InvalidCredentials,
                    format!("token exchange rejected: {e}"),
                )
                .with_marketplace(key.marketplace))
            }
        }
    }

    fn count_rejection(&self, key: &CredentialKey, slot: &mut Slot) {
        slot.consecutive_failures += 1;
        slot.credential.access_token = None;
        if slot.consecutive_failures >= self.max_auth_failures {
            slot.credential.status = CredentialStatus::Revoked;
            tracing::error!(
                account = %key,
                failures = slot.consecutive_failures,
                "credentials invalidated after repeated auth failures"
            );
        } else {
            slot.credential.status = CredentialStatus::Expired;
        }
    }

    /// A stateless call (no session token) was refused with 401/403.
    pub async fn record_rejection(&self, key: &CredentialKey) {
        if let Some(slot) = self.slot(key) {
            let mut guard = slot.lock().await;
            self.count_rejection(key, &mut guard);
        }
    }

    /// A call authenticated successfully.
    pub async fn record_success(&self, key: &CredentialKey) {
        if let Some(slot) = self.slot(key) {
            let mut guard = slot.lock().await;
            guard.consecutive_failures = 0;
            if guard.credential.status == CredentialStatus::Expired
                && guard.credential.access_token.is_some()
            {
                guard.credential.status = CredentialStatus::Valid;
            }
        }
    }

    /// Manually revoke an account (operator action).
    pub async fn invalidate(&self, key: &CredentialKey) {
        if let Some(slot) = self.slot(key) {
            let mut guard = slot.lock().await;
            guard.credential.status = CredentialStatus::Revoked;
            guard.credential.access_token = None;
            tracing::warn!(account = %key, "credentials revoked");
        }
    }
}

fn revoked(key: &CredentialKey) -> SyncError {
    SyncError::auth(
        AuthFailure::InvalidCredentials,
        "credentials revoked after repeated auth failures",
    )
    .with_marketplace(key.marketplace)
    .with_entity(key.account_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::IssuedToken;
    use crate::error::CallError;
    use async_trait::async_trait;
    use mps_schemas::{ErrorKind, InventoryUpdate, RemoteOrder, RemoteProduct};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Token-issuing adapter scripted by a status code (0 = success).
    struct TokenAdapter {
        issued: AtomicU32,
        fail_status: u16,
    }

    impl TokenAdapter {
        fn new(fail_status: u16) -> Self {
            Self {
                issued: AtomicU32::new(0),
                fail_status,
            }
        }
    }

    #[async_trait]
    impl MarketplaceAdapter for TokenAdapter {
        fn marketplace(&self) -> MarketplaceId {
            MarketplaceId::Amazon
        }

        fn uses_session_token(&self) -> bool {
            true
        }

        async fn issue_token(&self, _c: &Credential) -> Result<IssuedToken, CallError> {
            if self.fail_status != 0 {
                return Err(CallError::status(self.fail_status, "nope"));
            }
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(IssuedToken {
                access_token: format!("tok-{n}"),
                expires_at: Some(Utc::now() + ChronoDuration::hours(1)),
            })
        }

        async fn list_products(&self, _: &AuthContext) -> Result<Vec<RemoteProduct>, CallError> {
            Ok(vec![])
        }

        async fn push_inventory(&self, _: &AuthContext, _: &InventoryUpdate) -> Result<(), CallError> {
            Ok(())
        }

        async fn list_orders(
            &self,
            _: &AuthContext,
            _: DateTime<Utc>,
        ) -> Result<Vec<RemoteOrder>, CallError> {
            Ok(vec![])
        }

        async fn acknowledge_order(&self, _: &AuthContext, _: &str) -> Result<(), CallError> {
            Ok(())
        }
    }

    fn seeded() -> (CredentialStore, CredentialKey) {
        let store = CredentialStore::new(2);
        let c = Credential::new(MarketplaceId::Amazon, "A1SELLER", "client-id", "client-secret")
            .with_refresh_token("refresh");
        let key = CredentialKey::of(&c);
        store.insert(c);
        (store, key)
    }

    #[tokio::test]
    async fn session_issues_token_once_and_caches() {
        let (store, key) = seeded();
        let adapter = TokenAdapter::new(0);
        let a = store.session(&key, &adapter, Utc::now()).await.unwrap();
        let b = store.session(&key, &adapter, Utc::now()).await.unwrap();
        assert_eq!(a.access_token.as_deref(), Some("tok-1"));
        assert_eq!(b.access_token.as_deref(), Some("tok-1"));
        assert_eq!(adapter.issued.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_skips_exchange_when_token_already_replaced() {
        let (store, key) = seeded();
        let adapter = TokenAdapter::new(0);
        store.session(&key, &adapter, Utc::now()).await.unwrap();
        let first = store
            .refresh(&key, &adapter, Some("tok-1"), Utc::now())
            .await
            .unwrap();
        assert_eq!(first.access_token.as_deref(), Some("tok-2"));
        // A second caller that also saw tok-1 rejected reuses tok-2.
        let second = store
            .refresh(&key, &adapter, Some("tok-1"), Utc::now())
            .await
            .unwrap();
        assert_eq!(second.access_token.as_deref(), Some("tok-2"));
        assert_eq!(adapter.issued.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_rejection_revokes() {
        let (store, key) = seeded();
        let adapter = TokenAdapter::new(401);
        for _ in 0..2 {
            let err = store.session(&key, &adapter, Utc::now()).await.unwrap_err();
            assert_eq!(err.kind, ErrorKind::Auth(AuthFailure::InvalidCredentials));
        }
        assert_eq!(store.status(&key).await, Some(CredentialStatus::Revoked));
        let err = store.session(&key, &TokenAdapter::new(0), Utc::now()).await.unwrap_err();
        assert!(err.message.contains("revoked"));
    }

    #[tokio::test]
    async fn unavailable_token_endpoint_is_retryable() {
        let (store, key) = seeded();
        let err = store
            .session(&key, &TokenAdapter::new(503), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth(AuthFailure::TemporarilyUnavailable));
        assert!(err.is_retryable());
        assert_eq!(store.status(&key).await, Some(CredentialStatus::Valid));
    }

    #[tokio::test]
    async fn missing_account_is_invalid_credentials() {
        let store = CredentialStore::default();
        let key = CredentialKey::new(MarketplaceId::N11, "nobody");
        let err = store
            .session(&key, &TokenAdapter::new(0), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth(AuthFailure::InvalidCredentials));
    }

    #[tokio::test]
    async fn reinsert_clears_revocation() {
        let (store, key) = seeded();
        store.invalidate(&key).await;
        assert_eq!(store.status(&key).await, Some(CredentialStatus::Revoked));
        store.insert(Credential::new(MarketplaceId::Amazon, "A1SELLER", "k2", "s2"));
        assert_eq!(store.status(&key).await, Some(CredentialStatus::Valid));
    }
}
