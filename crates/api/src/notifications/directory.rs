//! Local user directory
//!
//! Maps ticketing-backend user ids to portal accounts. One backend user may
//! map to several portal accounts, or to none.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use supportdesk_shared::{BackendUserId, DeskError, UserId};
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve_external(&self, backend_user: BackendUserId) -> Result<Vec<UserId>, DeskError>;

    async fn admins(&self) -> Result<Vec<UserId>, DeskError>;
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage(err: sqlx::Error) -> DeskError {
    DeskError::Storage(err.to_string())
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn resolve_external(&self, backend_user: BackendUserId) -> Result<Vec<UserId>, DeskError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT user_id
            FROM external_user_links
            WHERE backend_user_id = $1
            ORDER BY user_id
            "#,
        )
        .bind(backend_user.0)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(ids.into_iter().map(UserId).collect())
    }

    async fn admins(&self) -> Result<Vec<UserId>, DeskError> {
        let ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE platform_role = 'admin' ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        Ok(ids.into_iter().map(UserId).collect())
    }
}

#[derive(Default)]
pub struct MemoryUserDirectory {
    links: RwLock<HashMap<BackendUserId, Vec<UserId>>>,
    admins: RwLock<Vec<UserId>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn link(&self, backend_user: BackendUserId, user_id: UserId) {
        let mut links = self.links.write().await;
        let linked = links.entry(backend_user).or_default();
        if !linked.contains(&user_id) {
            linked.push(user_id);
        }
    }

    pub async fn add_admin(&self, user_id: UserId) {
        let mut admins = self.admins.write().await;
        if !admins.contains(&user_id) {
            admins.push(user_id);
        }
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn resolve_external(&self, backend_user: BackendUserId) -> Result<Vec<UserId>, DeskError> {
        Ok(self.links.read().await.get(&backend_user).cloned().unwrap_or_default())
    }

    async fn admins(&self) -> Result<Vec<UserId>, DeskError> {
        Ok(self.admins.read().await.clone())
    }
}
