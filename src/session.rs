//! Signed-in identity, shared with resources through an injected context.

use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{tables, Profile, UserRole};
use crate::store::{decode_row, Query, Store};

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user_id: Uuid,
    pub profile: Profile,
}

impl Session {
    pub fn new(profile: Profile) -> Self {
        Self {
            user_id: profile.id,
            profile,
        }
    }

    pub fn role(&self) -> UserRole {
        self.profile.role
    }

    pub fn school_id(&self) -> Option<Uuid> {
        self.profile.school_id
    }
}

/// Holds the current session and broadcasts changes to it.
#[derive(Debug, Clone)]
pub struct SessionContext {
    sender: Arc<watch::Sender<Option<Session>>>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn sign_in(&self, session: Session) {
        self.sender.send_replace(Some(session));
    }

    pub fn sign_out(&self) {
        self.sender.send_replace(None);
    }

    pub fn current(&self) -> Option<Session> {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.sender.subscribe()
    }
}

pub async fn load_profile(store: &dyn Store, user_id: Uuid) -> Result<Profile, StoreError> {
    let row = store
        .select(&Query::table(tables::PROFILES).eq("id", user_id).limit(1))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::not_found("profile", user_id))?;
    decode_row("profile", row)
}

/// Loads a profile and rejects it unless it holds `role`.
pub async fn load_profile_as(
    store: &dyn Store,
    user_id: Uuid,
    role: UserRole,
) -> Result<Profile, StoreError> {
    let profile = load_profile(store, user_id).await?;
    if profile.role != role {
        return Err(StoreError::Rejected(format!(
            "{user_id} is a {}, not a {role}",
            profile.role
        )));
    }
    Ok(profile)
}

pub async fn sign_in(
    store: &dyn Store,
    context: &SessionContext,
    user_id: Uuid,
) -> Result<Session, StoreError> {
    let session = Session::new(load_profile(store, user_id).await?);
    context.sign_in(session.clone());
    Ok(session)
}
