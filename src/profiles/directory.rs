use std::{collections::BTreeMap, sync::Arc};

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    connections::{resolve_status, ConnectionRequest, ConnectionStatus},
    AppResult,
};

use super::{store, Profile, ProfileSummary, Role};

/// In-memory copy of every profile, loaded on first use and dropped whenever a
/// profile or a connection counter changes.
#[derive(Clone, Default)]
pub struct ProfileDirectory {
    cache: Arc<RwLock<Option<Arc<Vec<Profile>>>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectoryEntry {
    #[serde(flatten)]
    pub profile: ProfileSummary,
    pub bio: Option<String>,
    pub connections_count: i64,
    pub status: ConnectionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoleGroup {
    /// Profiles sharing the viewer's institution.
    pub same_institution: Vec<DirectoryEntry>,
    pub elsewhere: Vec<DirectoryEntry>,
}

pub type Directory = BTreeMap<Role, RoleGroup>;

impl ProfileDirectory {
    pub async fn profiles(&self, db_pool: &SqlitePool) -> AppResult<Arc<Vec<Profile>>> {
        if let Some(profiles) = self.cache.read().await.as_ref() {
            return Ok(profiles.clone());
        }

        let mut cache = self.cache.write().await;
        if let Some(profiles) = cache.as_ref() {
            return Ok(profiles.clone());
        }

        let profiles = Arc::new(store::all(db_pool).await?);
        debug!("directory loaded {} profiles", profiles.len());
        *cache = Some(profiles.clone());
        Ok(profiles)
    }

    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    pub async fn discover(&self, db_pool: &SqlitePool, viewer: &Profile, requests: &[ConnectionRequest]) -> AppResult<Directory> {
        let profiles = self.profiles(db_pool).await?;
        Ok(partition(&profiles, viewer, requests))
    }
}

/// Groups `profiles` by role and by institution affinity with `viewer`, leaving
/// the viewer out. Profiles without an institution never share one.
pub fn partition(profiles: &[Profile], viewer: &Profile, requests: &[ConnectionRequest]) -> Directory {
    let mut directory: Directory = Role::ALL
        .into_iter()
        .map(|role| (role, RoleGroup::default()))
        .collect();

    for profile in profiles.iter().filter(|p| p.user_id != viewer.user_id) {
        let entry = DirectoryEntry {
            profile: profile.into(),
            bio: profile.bio.clone(),
            connections_count: profile.connections_count,
            status: resolve_status(requests, &viewer.user_id, &profile.user_id),
        };

        let same_institution = viewer.institution_id.is_some() && profile.institution_id == viewer.institution_id;
        let group = directory.entry(profile.role).or_default();
        if same_institution {
            group.same_institution.push(entry);
        } else {
            group.elsewhere.push(entry);
        }
    }

    directory
}
