//! Credential issuance and rotation
//!
//! Access and refresh credentials are opaque random tokens. Only their
//! SHA-256 digests are kept, so a memory dump does not yield usable
//! cookies. Each refresh grant remembers the access token issued with it:
//! rotation consumes the refresh grant and revokes that access token, and a
//! consumed refresh token can never be presented again.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use rand::RngExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::users::UserId;

type TokenDigest = [u8; 32];

/// Generate a 256-bit random token, URL-safe base64 without padding.
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn digest(token: &str) -> TokenDigest {
    Sha256::digest(token.as_bytes()).into()
}

/// Freshly issued credential pair, handed to the cookie layer once.
#[derive(Debug)]
pub struct IssuedCredentials {
    pub user_id: UserId,
    pub access: Secret<String>,
    pub refresh: Secret<String>,
}

struct AccessGrant {
    user_id: UserId,
    expires_at: Instant,
}

struct RefreshGrant {
    user_id: UserId,
    access: TokenDigest,
    expires_at: Instant,
}

#[derive(Default)]
struct Grants {
    access: HashMap<TokenDigest, AccessGrant>,
    refresh: HashMap<TokenDigest, RefreshGrant>,
}

pub struct SessionStore {
    access_ttl: Duration,
    refresh_ttl: Duration,
    grants: RwLock<Grants>,
}

impl SessionStore {
    pub fn new(access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            access_ttl,
            refresh_ttl,
            grants: RwLock::new(Grants::default()),
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Issue a new credential pair for `user_id` (login, registration).
    pub async fn issue(&self, user_id: UserId) -> IssuedCredentials {
        let mut grants = self.grants.write().await;
        let issued = self.insert_pair(&mut grants, user_id);
        debug!(user_id, "issued credential pair");
        issued
    }

    /// Resolve an access token to its user, if the grant is live.
    pub async fn authenticate(&self, access: &str) -> Option<UserId> {
        let grants = self.grants.read().await;
        grants
            .access
            .get(&digest(access))
            .filter(|grant| grant.expires_at > Instant::now())
            .map(|grant| grant.user_id)
    }

    /// Exchange a refresh token for a new pair. The presented token and the
    /// access token issued alongside it are revoked whether or not the
    /// grant turned out to be expired.
    pub async fn rotate(&self, refresh: &str) -> Option<IssuedCredentials> {
        let mut grants = self.grants.write().await;
        let grant = grants.refresh.remove(&digest(refresh))?;
        grants.access.remove(&grant.access);

        if grant.expires_at <= Instant::now() {
            debug!(user_id = grant.user_id, "refresh grant expired");
            return None;
        }
        let issued = self.insert_pair(&mut grants, grant.user_id);
        debug!(user_id = grant.user_id, "rotated credential pair");
        Some(issued)
    }

    /// Revoke whatever pair either token belongs to (logout).
    pub async fn revoke(&self, access: Option<&str>, refresh: Option<&str>) {
        let mut grants = self.grants.write().await;
        if let Some(refresh) = refresh
            && let Some(grant) = grants.refresh.remove(&digest(refresh))
        {
            grants.access.remove(&grant.access);
        }
        if let Some(access) = access {
            let access = digest(access);
            grants.access.remove(&access);
            grants.refresh.retain(|_, grant| grant.access != access);
        }
    }

    /// Drop expired grants; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut grants = self.grants.write().await;
        let before = grants.access.len() + grants.refresh.len();
        grants.access.retain(|_, grant| grant.expires_at > now);
        grants.refresh.retain(|_, grant| grant.expires_at > now);
        before - grants.access.len() - grants.refresh.len()
    }

    /// Number of live refresh grants, i.e. sessions that can still rotate.
    pub async fn active_sessions(&self) -> usize {
        let now = Instant::now();
        self.grants
            .read()
            .await
            .refresh
            .values()
            .filter(|grant| grant.expires_at > now)
            .count()
    }

    fn insert_pair(&self, grants: &mut Grants, user_id: UserId) -> IssuedCredentials {
        let now = Instant::now();
        let access = random_token();
        let refresh = random_token();
        let access_digest = digest(&access);

        grants.access.insert(
            access_digest,
            AccessGrant {
                user_id,
                expires_at: now + self.access_ttl,
            },
        );
        grants.refresh.insert(
            digest(&refresh),
            RefreshGrant {
                user_id,
                access: access_digest,
                expires_at: now + self.refresh_ttl,
            },
        );

        IssuedCredentials {
            user_id,
            access: Secret::new(access),
            refresh: Secret::new(refresh),
        }
    }
}

/// Spawn a background task that sweeps expired grants every `interval`.
pub fn spawn_purge_task(
    store: Arc<SessionStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick, nothing has expired yet
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let purged = store.purge_expired().await;
            if purged > 0 {
                info!(purged, "purged expired credential grants");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(Duration::from_secs(60), Duration::from_secs(600))
    }

    #[test]
    fn random_tokens_are_distinct_and_url_safe() {
        let a = random_token();
        let b = random_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn issued_access_token_authenticates() {
        let store = store();
        let issued = store.issue(7).await;
        assert_eq!(store.authenticate(issued.access.expose()).await, Some(7));
        assert_eq!(store.authenticate("forged").await, None);
        // The refresh token is not an access credential
        assert_eq!(store.authenticate(issued.refresh.expose()).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn access_token_expires_after_ttl() {
        let store = store();
        let issued = store.issue(1).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(store.authenticate(issued.access.expose()).await, Some(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.authenticate(issued.access.expose()).await, None);
    }

    #[tokio::test]
    async fn rotation_consumes_the_refresh_token() {
        let store = store();
        let first = store.issue(3).await;

        let second = store.rotate(first.refresh.expose()).await.unwrap();
        assert_eq!(second.user_id, 3);
        assert_ne!(second.access.expose(), first.access.expose());

        assert!(
            store.rotate(first.refresh.expose()).await.is_none(),
            "a consumed refresh token must not be replayable"
        );
        assert_eq!(store.authenticate(first.access.expose()).await, None);
        assert_eq!(store.authenticate(second.access.expose()).await, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_refresh_token_is_rejected() {
        let store = store();
        let issued = store.issue(1).await;

        tokio::time::advance(Duration::from_secs(601)).await;
        assert!(store.rotate(issued.refresh.expose()).await.is_none());
    }

    #[tokio::test]
    async fn revoke_by_refresh_token_drops_the_pair() {
        let store = store();
        let issued = store.issue(1).await;

        store.revoke(None, Some(issued.refresh.expose())).await;
        assert_eq!(store.authenticate(issued.access.expose()).await, None);
        assert!(store.rotate(issued.refresh.expose()).await.is_none());
    }

    #[tokio::test]
    async fn revoke_by_access_token_drops_the_pair() {
        let store = store();
        let issued = store.issue(1).await;
        let other = store.issue(2).await;

        store.revoke(Some(issued.access.expose()), None).await;
        assert!(store.rotate(issued.refresh.expose()).await.is_none());
        assert_eq!(store.authenticate(other.access.expose()).await, Some(2));
        assert_eq!(store.active_sessions().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_expired_grants() {
        let store = store();
        store.issue(1).await;
        tokio::time::advance(Duration::from_secs(61)).await;
        store.issue(2).await;

        // user 1's access grant is gone, both refresh grants remain
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.active_sessions().await, 2);

        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(store.purge_expired().await, 3);
        assert_eq!(store.active_sessions().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_task_sweeps_periodically() {
        let store = Arc::new(SessionStore::new(
            Duration::from_secs(1),
            Duration::from_secs(2),
        ));
        store.issue(1).await;
        let handle = spawn_purge_task(store.clone(), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.purge_expired().await, 0, "task already swept");
        assert_eq!(store.active_sessions().await, 0);
        handle.abort();
    }
}
