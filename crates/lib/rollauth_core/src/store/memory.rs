//! In-process auth store.
//!
//! Same semantics as the PostgreSQL store: uniqueness, bootstrap admin and
//! atomic user+link creation are enforced under the users lock.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    ActivityStore, OAuthAccountStore, SessionStore, UserStore, activity_id, normalize_email,
};
use crate::auth::AuthError;
use crate::models::auth::{
    ActivityEntry, ActivityKind, ClientMeta, NewUser, OAuthAccount, Session, User,
};

/// In-memory implementation of every store trait.
#[derive(Default)]
pub struct MemoryAuthStore {
    users: Mutex<HashMap<String, User>>,
    oauth_accounts: Mutex<Vec<OAuthAccount>>,
    sessions: DashMap<String, Session>,
    activity: Mutex<Vec<ActivityEntry>>,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of OAuth links (all users).
    pub async fn oauth_account_count(&self) -> usize {
        self.oauth_accounts.lock().await.len()
    }

    /// Number of session rows, expired ones included.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Insert into an already-locked user map.
fn insert_locked(users: &mut HashMap<String, User>, new: NewUser) -> Result<User, AuthError> {
    let email = normalize_email(&new.email);
    if users.values().any(|u| u.email == email) {
        return Err(AuthError::Conflict { field: "email" });
    }
    if let Some(username) = new.username.as_deref()
        && users
            .values()
            .any(|u| u.username.as_deref() == Some(username))
    {
        return Err(AuthError::Conflict { field: "username" });
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        email,
        username: new.username,
        first_name: new.first_name,
        last_name: new.last_name,
        password_hash: new.password_hash,
        is_admin: new.is_admin || users.is_empty(),
        email_verified: new.email_verified,
        is_active: true,
        avatar_url: new.avatar_url,
        created_at: now,
        updated_at: now,
    };
    users.insert(user.id.clone(), user.clone());
    Ok(user)
}

fn new_link(user_id: &str, provider_id: &str, provider_account_id: &str) -> OAuthAccount {
    OAuthAccount {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        provider_id: provider_id.to_string(),
        provider_account_id: provider_account_id.to_string(),
        created_at: Utc::now(),
    }
}

#[async_trait]
impl UserStore for MemoryAuthStore {
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, AuthError> {
        Ok(self.users.lock().await.get(user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let email = normalize_email(email);
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AuthError> {
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|u| u.username.as_deref() == Some(username))
            .cloned())
    }

    async fn find_user_by_login(
        &self,
        email_or_username: &str,
    ) -> Result<Option<User>, AuthError> {
        let email = normalize_email(email_or_username);
        let users = self.users.lock().await;
        let by_email = users.values().find(|u| u.email == email);
        Ok(by_email
            .or_else(|| {
                users
                    .values()
                    .find(|u| u.username.as_deref() == Some(email_or_username))
            })
            .cloned())
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, AuthError> {
        let mut users = self.users.lock().await;
        insert_locked(&mut users, user)
    }

    async fn update_password_hash(
        &self,
        user_id: &str,
        password_hash: &str,
    ) -> Result<bool, AuthError> {
        let mut users = self.users.lock().await;
        let Some(user) = users.get_mut(user_id) else {
            return Ok(false);
        };
        user.password_hash = Some(password_hash.to_string());
        user.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_user_active(&self, user_id: &str, active: bool) -> Result<bool, AuthError> {
        let mut users = self.users.lock().await;
        let Some(user) = users.get_mut(user_id) else {
            return Ok(false);
        };
        user.is_active = active;
        user.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_users(&self) -> Result<Vec<User>, AuthError> {
        let mut users: Vec<User> = self.users.lock().await.values().cloned().collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn user_count(&self) -> Result<i64, AuthError> {
        Ok(self.users.lock().await.len() as i64)
    }
}

#[async_trait]
impl SessionStore for MemoryAuthStore {
    async fn create_session(
        &self,
        user_id: &str,
        meta: &ClientMeta,
        ttl: Duration,
    ) -> Result<Session, AuthError> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            expires_at: now + ttl,
            created_at: now,
            last_used_at: now,
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
        };
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>, AuthError> {
        Ok(self.sessions.get(session_id).map(|s| s.value().clone()))
    }

    async fn touch_session(&self, session_id: &str) -> Result<(), AuthError> {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.last_used_at = Utc::now();
        }
        Ok(())
    }

    async fn revoke_session(&self, session_id: &str) -> Result<bool, AuthError> {
        Ok(self.sessions.remove(session_id).is_some())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, AuthError> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.value().clone())
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn revoke_user_sessions(&self, user_id: &str) -> Result<u64, AuthError> {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - self.sessions.len()) as u64)
    }

    async fn purge_expired_sessions(&self) -> Result<u64, AuthError> {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.is_active_at(now));
        Ok((before - self.sessions.len()) as u64)
    }
}

#[async_trait]
impl OAuthAccountStore for MemoryAuthStore {
    async fn find_oauth_account(
        &self,
        provider_id: &str,
        provider_account_id: &str,
    ) -> Result<Option<OAuthAccount>, AuthError> {
        Ok(self
            .oauth_accounts
            .lock()
            .await
            .iter()
            .find(|a| a.provider_id == provider_id && a.provider_account_id == provider_account_id)
            .cloned())
    }

    async fn insert_oauth_account(
        &self,
        user_id: &str,
        provider_id: &str,
        provider_account_id: &str,
    ) -> Result<OAuthAccount, AuthError> {
        let mut accounts = self.oauth_accounts.lock().await;
        if accounts
            .iter()
            .any(|a| a.provider_id == provider_id && a.provider_account_id == provider_account_id)
        {
            return Err(AuthError::Conflict {
                field: "provider_account",
            });
        }
        let account = new_link(user_id, provider_id, provider_account_id);
        accounts.push(account.clone());
        Ok(account)
    }

    async fn insert_oauth_user(
        &self,
        user: NewUser,
        provider_id: &str,
        provider_account_id: &str,
    ) -> Result<(User, OAuthAccount), AuthError> {
        // Lock order: users, then accounts.
        let mut users = self.users.lock().await;
        let mut accounts = self.oauth_accounts.lock().await;
        if accounts
            .iter()
            .any(|a| a.provider_id == provider_id && a.provider_account_id == provider_account_id)
        {
            return Err(AuthError::Conflict {
                field: "provider_account",
            });
        }
        let user = insert_locked(&mut users, user)?;
        let account = new_link(&user.id, provider_id, provider_account_id);
        accounts.push(account.clone());
        Ok((user, account))
    }

    async fn list_oauth_accounts(&self, user_id: &str) -> Result<Vec<OAuthAccount>, AuthError> {
        Ok(self
            .oauth_accounts
            .lock()
            .await
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_oauth_account(
        &self,
        user_id: &str,
        provider_id: &str,
    ) -> Result<bool, AuthError> {
        let mut accounts = self.oauth_accounts.lock().await;
        let before = accounts.len();
        accounts.retain(|a| !(a.user_id == user_id && a.provider_id == provider_id));
        Ok(accounts.len() != before)
    }
}

#[async_trait]
impl ActivityStore for MemoryAuthStore {
    async fn record_activity(
        &self,
        user_id: &str,
        kind: ActivityKind,
        detail: Option<&str>,
    ) -> Result<(), AuthError> {
        self.activity.lock().await.push(ActivityEntry {
            id: activity_id().to_string(),
            user_id: user_id.to_string(),
            kind: kind.as_str().to_string(),
            detail: detail.map(str::to_string),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_activity(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<ActivityEntry>, AuthError> {
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(self
            .activity
            .lock()
            .await
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn new_user(email: &str, username: Option<&str>) -> NewUser {
        NewUser {
            email: email.into(),
            username: username.map(str::to_string),
            first_name: "First".into(),
            last_name: "Last".into(),
            password_hash: Some("$2b$10$hash".into()),
            is_admin: false,
            email_verified: false,
            avatar_url: None,
        }
    }

    #[tokio::test]
    async fn first_user_becomes_admin() {
        let store = MemoryAuthStore::new();
        let first = store.insert_user(new_user("a@x.com", Some("alice"))).await.unwrap();
        let second = store.insert_user(new_user("b@x.com", Some("bob"))).await.unwrap();
        assert!(first.is_admin);
        assert!(!second.is_admin);

        let mut requested = new_user("c@x.com", Some("carol"));
        requested.is_admin = true;
        assert!(store.insert_user(requested).await.unwrap().is_admin);
    }

    #[tokio::test]
    async fn duplicate_email_and_username_conflict() {
        let store = MemoryAuthStore::new();
        store.insert_user(new_user("a@x.com", Some("alice"))).await.unwrap();

        let err = store
            .insert_user(new_user("A@X.com", Some("other")))
            .await
            .unwrap_err();
        assert_matches!(err, AuthError::Conflict { field: "email" });

        let err = store
            .insert_user(new_user("z@x.com", Some("alice")))
            .await
            .unwrap_err();
        assert_matches!(err, AuthError::Conflict { field: "username" });
    }

    #[tokio::test]
    async fn login_lookup_matches_email_or_username() {
        let store = MemoryAuthStore::new();
        let user = store.insert_user(new_user("a@x.com", Some("alice"))).await.unwrap();

        let by_name = store.find_user_by_login("alice").await.unwrap().unwrap();
        let by_email = store.find_user_by_login("A@x.com").await.unwrap().unwrap();
        assert_eq!(by_name.id, user.id);
        assert_eq!(by_email.id, user.id);
        assert!(store.find_user_by_login("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn email_match_wins_over_lookalike_username() {
        for _ in 0..20 {
            let store = MemoryAuthStore::new();
            let owner = store.insert_user(new_user("a@x.com", Some("alice"))).await.unwrap();
            store.insert_user(new_user("m@x.com", Some("a@x.com"))).await.unwrap();

            let found = store.find_user_by_login("a@x.com").await.unwrap().unwrap();
            assert_eq!(found.id, owner.id);
        }
    }

    #[tokio::test]
    async fn password_and_active_flag_updates() {
        let store = MemoryAuthStore::new();
        let user = store.insert_user(new_user("a@x.com", Some("alice"))).await.unwrap();
        assert!(user.is_active);

        assert!(store.update_password_hash(&user.id, "$2b$10$new").await.unwrap());
        assert!(store.set_user_active(&user.id, false).await.unwrap());
        let reloaded = store.find_user_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.password_hash.as_deref(), Some("$2b$10$new"));
        assert!(!reloaded.is_active);
        assert!(reloaded.updated_at >= user.updated_at);

        assert!(!store.update_password_hash("missing", "h").await.unwrap());
        assert!(!store.set_user_active("missing", true).await.unwrap());
    }

    #[tokio::test]
    async fn sessions_revoke_and_purge() {
        let store = MemoryAuthStore::new();
        let meta = ClientMeta::default();
        let live = store.create_session("u1", &meta, Duration::days(7)).await.unwrap();
        let dead = store
            .create_session("u1", &meta, Duration::seconds(-1))
            .await
            .unwrap();
        store.create_session("u2", &meta, Duration::days(7)).await.unwrap();

        assert_eq!(store.purge_expired_sessions().await.unwrap(), 1);
        assert!(store.find_session(&dead.id).await.unwrap().is_none());

        assert!(store.revoke_session(&live.id).await.unwrap());
        assert!(!store.revoke_session(&live.id).await.unwrap());
        assert_eq!(store.revoke_user_sessions("u2").await.unwrap(), 1);
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn oauth_user_creation_is_all_or_nothing() {
        let store = MemoryAuthStore::new();
        store.insert_user(new_user("a@x.com", Some("alice"))).await.unwrap();

        // Username collision: neither the user nor the link is written.
        let err = store
            .insert_oauth_user(new_user("b@x.com", Some("alice")), "github", "42")
            .await
            .unwrap_err();
        assert_matches!(err, AuthError::Conflict { field: "username" });
        assert_eq!(store.oauth_account_count().await, 0);
        assert_eq!(store.user_count().await.unwrap(), 1);

        let (user, link) = store
            .insert_oauth_user(new_user("b@x.com", None), "github", "42")
            .await
            .unwrap();
        assert_eq!(link.user_id, user.id);

        let err = store
            .insert_oauth_account(&user.id, "github", "42")
            .await
            .unwrap_err();
        assert_matches!(err, AuthError::Conflict { field: "provider_account" });
    }

    #[tokio::test]
    async fn activity_is_listed_newest_first() {
        let store = MemoryAuthStore::new();
        store.record_activity("u1", ActivityKind::Register, None).await.unwrap();
        store
            .record_activity("u1", ActivityKind::Login, Some("from test"))
            .await
            .unwrap();
        store.record_activity("u2", ActivityKind::Login, None).await.unwrap();

        let entries = store.list_activity("u1", 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, "login");
        assert_eq!(entries[1].kind, "register");
        assert_eq!(store.list_activity("u1", 1).await.unwrap().len(), 1);
    }
}
