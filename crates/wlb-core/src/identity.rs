//! Who the current user is, and notifications when that changes.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{TrackerError, TrackerResult};
use crate::fsutil::write_atomic;
use crate::store::RemoteConfig;

const SESSION_FILE: &str = "session.json";
const LOCAL_USER_ID: &str = "local";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl Identity {
    /// The single built-in user of a device-local store.
    pub fn local() -> Self {
        Self {
            user_id: LOCAL_USER_ID.to_string(),
            email: None,
            access_token: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.user_id)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// How a user proves who they are. OAuth redirects happen outside this
/// process; their resulting access token is accepted as-is.
#[derive(Clone)]
pub enum SignIn {
    Password { email: String, password: String },
    AccessToken(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The signed-in identity, or `None`. Provider failures read as `None`.
    async fn current_identity(&self) -> Option<Identity>;

    /// Fires on every sign-in/sign-out transition.
    fn subscribe(&self) -> watch::Receiver<Option<Identity>>;

    async fn sign_in(&self, request: SignIn) -> TrackerResult<Identity>;

    async fn sign_out(&self) -> TrackerResult<()>;
}

/// Identity for the single-user local store; always signed in.
#[derive(Debug)]
pub struct LocalIdentity {
    tx: watch::Sender<Option<Identity>>,
}

impl Default for LocalIdentity {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(Some(Identity::local()));
        Self { tx }
    }
}

impl LocalIdentity {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    async fn current_identity(&self) -> Option<Identity> {
        Some(Identity::local())
    }

    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.tx.subscribe()
    }

    async fn sign_in(&self, _request: SignIn) -> TrackerResult<Identity> {
        Err(TrackerError::Auth(
            "the local store has one built-in user; sign-in applies to store.backend = remote".to_string(),
        ))
    }

    async fn sign_out(&self) -> TrackerResult<()> {
        Err(TrackerError::Auth("the local store has no session to end".to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSession {
    identity: Identity,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl StoredSession {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    user: AuthUser,
}

/// Session against the remote auth endpoint, persisted in the data dir.
#[derive(Debug)]
pub struct SessionIdentity {
    client: Client,
    config: RemoteConfig,
    path: PathBuf,
    tx: watch::Sender<Option<Identity>>,
    expires_at: parking_lot::Mutex<Option<DateTime<Utc>>>,
}

impl SessionIdentity {
    #[tracing::instrument(skip(data_dir, config))]
    pub fn open(data_dir: &Path, config: RemoteConfig) -> TrackerResult<Self> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(SESSION_FILE);
        let stored = read_session(&path);
        let expires_at = stored.as_ref().and_then(|s| s.expires_at);
        let identity = stored.map(|s| s.identity);
        debug!(
            file = %path.display(),
            signed_in = identity.is_some(),
            "opened session"
        );
        let (tx, _rx) = watch::channel(identity);
        Ok(Self {
            client: RemoteConfig::http_client()?,
            config,
            path,
            tx,
            expires_at: parking_lot::Mutex::new(expires_at),
        })
    }

    fn store_session(&self, session: &StoredSession) -> TrackerResult<()> {
        let payload = serde_json::to_vec_pretty(session)
            .map_err(|err| TrackerError::Auth(format!("failed encoding session: {err}")))?;
        write_atomic(&self.path, &payload)
            .map_err(|err| TrackerError::Auth(format!("failed saving session: {err:#}")))?;
        *self.expires_at.lock() = session.expires_at;
        self.tx.send_replace(Some(session.identity.clone()));
        Ok(())
    }

    fn clear_session(&self) -> TrackerResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        *self.expires_at.lock() = None;
        self.tx.send_replace(None);
        Ok(())
    }

    async fn password_grant(&self, email: &str, password: &str) -> TrackerResult<StoredSession> {
        let response = self
            .client
            .post(self.config.auth_url("token"))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.config.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|err| TrackerError::Auth(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::Auth(format!("{status}: {}", body.trim())));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| TrackerError::Auth(err.to_string()))?;
        let expires_at = token.expires_in.map(|secs| Utc::now() + Duration::seconds(secs));
        Ok(StoredSession {
            identity: Identity {
                user_id: token.user.id,
                email: token.user.email,
                access_token: Some(token.access_token),
            },
            expires_at,
        })
    }

    async fn resolve_token(&self, access_token: &str) -> TrackerResult<StoredSession> {
        let response = self
            .client
            .get(self.config.auth_url("user"))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| TrackerError::Auth(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::Auth(format!("{status}: {}", body.trim())));
        }
        let user: AuthUser = response
            .json()
            .await
            .map_err(|err| TrackerError::Auth(err.to_string()))?;
        Ok(StoredSession {
            identity: Identity {
                user_id: user.id,
                email: user.email,
                access_token: Some(access_token.to_string()),
            },
            expires_at: None,
        })
    }
}

fn read_session(path: &Path) -> Option<StoredSession> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(file = %path.display(), error = %err, "failed reading session; treating as signed out");
            return None;
        }
    };
    match serde_json::from_str::<StoredSession>(&raw) {
        Ok(session) if session.is_expired(Utc::now()) => {
            info!("stored session has expired; treating as signed out");
            None
        }
        Ok(session) => Some(session),
        Err(err) => {
            warn!(file = %path.display(), error = %err, "session file is corrupt; treating as signed out");
            None
        }
    }
}

#[async_trait]
impl IdentityProvider for SessionIdentity {
    async fn current_identity(&self) -> Option<Identity> {
        let expired = self.expires_at.lock().is_some_and(|at| at <= Utc::now());
        if expired {
            info!("session expired");
            self.tx.send_replace(None);
            return None;
        }
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.tx.subscribe()
    }

    #[tracing::instrument(skip(self, request))]
    async fn sign_in(&self, request: SignIn) -> TrackerResult<Identity> {
        let session = match request {
            SignIn::Password { email, password } => self.password_grant(&email, &password).await?,
            SignIn::AccessToken(token) => self.resolve_token(token.trim()).await?,
        };
        self.store_session(&session)?;
        info!(user = %session.identity.display_name(), "signed in");
        Ok(session.identity)
    }

    #[tracing::instrument(skip(self))]
    async fn sign_out(&self) -> TrackerResult<()> {
        let current = self.tx.borrow().clone();
        if let Some(token) = current.and_then(|identity| identity.access_token) {
            let revoke = self
                .client
                .post(self.config.auth_url("logout"))
                .header("apikey", &self.config.anon_key)
                .bearer_auth(&token)
                .send()
                .await;
            match revoke {
                Ok(response) if response.status().is_success() => debug!("revoked remote session"),
                Ok(response) => warn!(status = %response.status(), "remote logout was rejected; clearing local session anyway"),
                Err(err) => warn!(error = %err, "remote logout failed; clearing local session anyway"),
            }
        }
        self.clear_session()?;
        info!("signed out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn remote() -> RemoteConfig {
        RemoteConfig::new("https://demo.example.co", "anon").expect("config")
    }

    #[test]
    fn debug_output_redacts_token() {
        let identity = Identity {
            user_id: "u-1".to_string(),
            email: Some("a@b.c".to_string()),
            access_token: Some("secret".to_string()),
        };
        let debug = format!("{identity:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("u-1"));
    }

    #[tokio::test]
    async fn stored_session_is_restored_and_expired_one_is_ignored() {
        let temp = tempdir().expect("tempdir");
        let session = StoredSession {
            identity: Identity {
                user_id: "u-1".to_string(),
                email: Some("me@example.com".to_string()),
                access_token: Some("tok".to_string()),
            },
            expires_at: Some(Utc::now() + Duration::hours(1)),
        };
        fs::write(
            temp.path().join(SESSION_FILE),
            serde_json::to_vec(&session).expect("json"),
        )
        .expect("write");

        let provider = SessionIdentity::open(temp.path(), remote()).expect("open");
        let current = provider.current_identity().await.expect("signed in");
        assert_eq!(current.user_id, "u-1");

        let expired = StoredSession {
            expires_at: Some(Utc::now() - Duration::minutes(1)),
            ..session
        };
        fs::write(
            temp.path().join(SESSION_FILE),
            serde_json::to_vec(&expired).expect("json"),
        )
        .expect("write");
        let provider = SessionIdentity::open(temp.path(), remote()).expect("open");
        assert!(provider.current_identity().await.is_none());
    }

    #[tokio::test]
    async fn corrupt_session_reads_as_signed_out() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join(SESSION_FILE), "][").expect("write");
        let provider = SessionIdentity::open(temp.path(), remote()).expect("open");
        assert!(provider.current_identity().await.is_none());
    }

    #[tokio::test]
    async fn clearing_session_notifies_subscribers() {
        let temp = tempdir().expect("tempdir");
        let provider = SessionIdentity::open(temp.path(), remote()).expect("open");
        provider
            .store_session(&StoredSession {
                identity: Identity::local(),
                expires_at: None,
            })
            .expect("store");

        let mut rx = provider.subscribe();
        assert!(rx.borrow_and_update().is_some());

        provider.clear_session().expect("clear");
        assert!(rx.has_changed().expect("sender alive"));
        assert!(rx.borrow_and_update().is_none());
        assert!(!temp.path().join(SESSION_FILE).exists());
    }

    #[tokio::test]
    async fn local_identity_is_always_present() {
        let provider = LocalIdentity::new();
        assert_eq!(provider.current_identity().await, Some(Identity::local()));
        assert!(provider.sign_out().await.is_err());
    }
}
