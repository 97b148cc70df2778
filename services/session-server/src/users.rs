//! In-memory account directory
//!
//! Stores argon2 password hashes and the legal-document versions each
//! account last accepted. Hashing and verification run on the blocking
//! pool.

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use common::wire::LegalFlags;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::ApiError;

pub type UserId = u64;

const MIN_PASSWORD_CHARS: usize = 8;

/// Documents a user can be asked to re-accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Document {
    Terms,
    PrivacyPolicy,
}

/// Public view of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub terms_version: String,
    pub privacy_policy_version: String,
}

struct Account {
    profile: UserProfile,
    password_hash: String,
}

#[derive(Default)]
struct Accounts {
    by_id: HashMap<UserId, Account>,
    by_email: HashMap<String, UserId>,
    next_id: UserId,
}

pub struct UserDirectory {
    terms_version: String,
    privacy_policy_version: String,
    accounts: RwLock<Accounts>,
}

impl UserDirectory {
    /// `terms_version` and `privacy_policy_version` are the versions
    /// currently in force; accounts behind either are flagged at refresh.
    pub fn new(terms_version: impl Into<String>, privacy_policy_version: impl Into<String>) -> Self {
        Self {
            terms_version: terms_version.into(),
            privacy_policy_version: privacy_policy_version.into(),
            accounts: RwLock::new(Accounts {
                next_id: 1,
                ..Accounts::default()
            }),
        }
    }

    /// Create an account. Registration accepts the documents in force.
    pub async fn register(&self, email: &str, password: &str) -> Result<UserProfile, ApiError> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(ApiError::InvalidRequest(format!(
                "password must be at least {MIN_PASSWORD_CHARS} characters"
            )));
        }
        if self.accounts.read().await.by_email.contains_key(&email) {
            return Err(ApiError::EmailTaken);
        }

        let password_hash = hash_password(password.to_string()).await?;

        let mut accounts = self.accounts.write().await;
        // Re-check under the write lock; hashing happened unlocked
        if accounts.by_email.contains_key(&email) {
            return Err(ApiError::EmailTaken);
        }
        let id = accounts.next_id;
        accounts.next_id += 1;
        let profile = UserProfile {
            id,
            email: email.clone(),
            terms_version: self.terms_version.clone(),
            privacy_policy_version: self.privacy_policy_version.clone(),
        };
        accounts.by_email.insert(email, id);
        accounts.by_id.insert(
            id,
            Account {
                profile: profile.clone(),
                password_hash,
            },
        );
        info!(user_id = id, "account registered");
        Ok(profile)
    }

    /// Check a login attempt. Unknown email and wrong password are
    /// indistinguishable to the caller.
    pub async fn verify(&self, email: &str, password: &str) -> Result<UserProfile, ApiError> {
        let email = normalize_email(email).map_err(|_| ApiError::InvalidCredentials)?;
        let (profile, password_hash) = {
            let accounts = self.accounts.read().await;
            let account = accounts
                .by_email
                .get(&email)
                .and_then(|id| accounts.by_id.get(id))
                .ok_or(ApiError::InvalidCredentials)?;
            (account.profile.clone(), account.password_hash.clone())
        };

        if verify_password(password.to_string(), password_hash).await? {
            Ok(profile)
        } else {
            debug!(user_id = profile.id, "password mismatch");
            Err(ApiError::InvalidCredentials)
        }
    }

    pub async fn profile(&self, id: UserId) -> Option<UserProfile> {
        self.accounts
            .read()
            .await
            .by_id
            .get(&id)
            .map(|account| account.profile.clone())
    }

    /// Which documents `id` has not accepted in their current version.
    pub async fn legal_status(&self, id: UserId) -> LegalFlags {
        match self.profile(id).await {
            Some(profile) => LegalFlags {
                terms_outdated: profile.terms_version != self.terms_version,
                privacy_policy_outdated: profile.privacy_policy_version
                    != self.privacy_policy_version,
            },
            None => LegalFlags::default(),
        }
    }

    /// Record that `id` accepted `version` of `document`.
    pub async fn record_acceptance(
        &self,
        id: UserId,
        document: Document,
        version: &str,
    ) -> Option<UserProfile> {
        let mut accounts = self.accounts.write().await;
        let account = accounts.by_id.get_mut(&id)?;
        match document {
            Document::Terms => account.profile.terms_version = version.to_string(),
            Document::PrivacyPolicy => {
                account.profile.privacy_policy_version = version.to_string()
            }
        }
        info!(user_id = id, ?document, version, "legal acceptance recorded");
        Some(account.profile.clone())
    }

    /// Accept the version of `document` currently in force.
    pub async fn accept_current(&self, id: UserId, document: Document) -> Option<UserProfile> {
        let version = match document {
            Document::Terms => &self.terms_version,
            Document::PrivacyPolicy => &self.privacy_policy_version,
        };
        self.record_acceptance(id, document, version).await
    }
}

fn normalize_email(email: &str) -> Result<String, ApiError> {
    let email = email.trim().to_ascii_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(ApiError::InvalidRequest("email address is not valid".into())),
    }
}

async fn hash_password(password: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || {
        let mut salt_bytes = [0u8; 16];
        rand::rng().fill(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| ApiError::Internal(format!("encoding salt: {e}")))?;
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ApiError::Internal(format!("hashing password: {e}")))
    })
    .await
    .map_err(|e| ApiError::Internal(format!("hashing task failed: {e}")))?
}

async fn verify_password(password: String, password_hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&password_hash)
            .map_err(|e| ApiError::Internal(format!("invalid stored hash: {e}")))?;
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(ApiError::Internal(format!("verifying password: {e}"))),
        }
    })
    .await
    .map_err(|e| ApiError::Internal(format!("verification task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> UserDirectory {
        UserDirectory::new("2026-01", "2025-06")
    }

    #[tokio::test]
    async fn register_then_verify() {
        let users = directory();
        let profile = users
            .register(" Ada@Example.com ", "correct horse")
            .await
            .unwrap();
        assert_eq!(profile.id, 1);
        assert_eq!(profile.email, "ada@example.com");
        assert_eq!(profile.terms_version, "2026-01");

        let verified = users.verify("ada@example.com", "correct horse").await.unwrap();
        assert_eq!(verified.id, profile.id);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_look_the_same() {
        let users = directory();
        users.register("ada@example.com", "correct horse").await.unwrap();

        let wrong = users.verify("ada@example.com", "battery staple").await;
        let unknown = users.verify("bob@example.com", "correct horse").await;
        assert!(matches!(wrong, Err(ApiError::InvalidCredentials)));
        assert!(matches!(unknown, Err(ApiError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let users = directory();
        users.register("ada@example.com", "correct horse").await.unwrap();
        let err = users.register("ADA@example.com", "another pass").await.unwrap_err();
        assert!(matches!(err, ApiError::EmailTaken));
    }

    #[tokio::test]
    async fn weak_input_is_rejected() {
        let users = directory();
        assert!(matches!(
            users.register("not-an-email", "correct horse").await,
            Err(ApiError::InvalidRequest(_))
        ));
        assert!(matches!(
            users.register("ada@example.com", "short").await,
            Err(ApiError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn stored_hash_is_not_the_password() {
        let users = directory();
        users.register("ada@example.com", "correct horse").await.unwrap();
        let accounts = users.accounts.read().await;
        let hash = &accounts.by_id[&1].password_hash;
        assert!(hash.starts_with("$argon2"), "got: {hash}");
        assert!(!hash.contains("correct horse"));
    }

    #[tokio::test]
    async fn legal_status_tracks_document_versions() {
        let users = directory();
        let profile = users.register("ada@example.com", "correct horse").await.unwrap();
        assert!(!users.legal_status(profile.id).await.any());

        users
            .record_acceptance(profile.id, Document::PrivacyPolicy, "2024-01")
            .await
            .unwrap();
        let flags = users.legal_status(profile.id).await;
        assert!(!flags.terms_outdated);
        assert!(flags.privacy_policy_outdated);

        users
            .accept_current(profile.id, Document::PrivacyPolicy)
            .await
            .unwrap();
        assert!(!users.legal_status(profile.id).await.any());
    }

    #[tokio::test]
    async fn unknown_user_has_no_flags() {
        assert!(!directory().legal_status(99).await.any());
        assert!(directory().accept_current(99, Document::Terms).await.is_none());
    }

    #[test]
    fn document_names_are_snake_case() {
        let doc: Document = serde_json::from_str("\"privacy_policy\"").unwrap();
        assert_eq!(doc, Document::PrivacyPolicy);
    }
}
