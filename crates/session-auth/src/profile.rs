//! Cached user profile
//!
//! The profile is kept in local storage under a fixed key so a reload can show
//! the signed-in user before the server answers. Once cached, the email is
//! fixed for the session: switching identity takes a logout first.

use tracing::{debug, warn};

use crate::api::UserProfile;
use crate::constants::PROFILE_STORAGE_KEY;
use crate::error::{Error, Result};
use crate::local_store::LocalStore;

pub struct ProfileCache {
    storage: LocalStore,
}

impl ProfileCache {
    pub fn new(storage: LocalStore) -> Self {
        Self { storage }
    }

    /// The cached profile. An unreadable entry is dropped and treated as absent.
    pub async fn load(&self) -> Option<UserProfile> {
        let raw = self.storage.get(PROFILE_STORAGE_KEY).await?;
        match serde_json::from_str(&raw) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!(error = %e, "discarding unreadable cached profile");
                if let Err(e) = self.storage.remove(PROFILE_STORAGE_KEY).await {
                    warn!(error = %e, "failed to remove unreadable cached profile");
                }
                None
            }
        }
    }

    /// Cache `profile`, refusing to replace a profile for another email.
    pub async fn store(&self, profile: &UserProfile) -> Result<()> {
        if let Some(cached) = self.load().await {
            if cached.email != profile.email {
                return Err(Error::IdentityChanged {
                    cached: cached.email,
                    incoming: profile.email.clone(),
                });
            }
        }
        let json = serde_json::to_string(profile)
            .map_err(|e| Error::Storage(format!("serializing profile: {e}")))?;
        self.storage.set(PROFILE_STORAGE_KEY, json).await?;
        debug!(email = %profile.email, "cached user profile");
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        self.storage.remove(PROFILE_STORAGE_KEY).await?;
        Ok(())
    }
}
