//! Hot-reloadable runtime flags backed by the `warmup_settings` table
use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::flag;

pub const ENGAGE_ALL_KEY: &str = "engage_all";
pub const ADOPT_UNTRACKED_KEY: &str = "adopt_untracked";

/// Shared by the scanner and whoever flips settings at runtime. Config values
/// seed it; persisted values override on every `refresh`.
#[derive(Debug, Default)]
pub struct RuntimeSettings {
    engage_all: AtomicBool,
    adopt_untracked: AtomicBool,
}

impl RuntimeSettings {
    pub fn new(engage_all: bool, adopt_untracked: bool) -> Self {
        Self {
            engage_all: AtomicBool::new(engage_all),
            adopt_untracked: AtomicBool::new(adopt_untracked),
        }
    }

    pub fn engage_all(&self) -> bool {
        self.engage_all.load(Ordering::Acquire)
    }

    pub fn set_engage_all(&self, value: bool) {
        self.engage_all.store(value, Ordering::Release);
    }

    pub fn adopt_untracked(&self) -> bool {
        self.adopt_untracked.load(Ordering::Acquire)
    }

    pub fn set_adopt_untracked(&self, value: bool) {
        self.adopt_untracked.store(value, Ordering::Release);
    }

    /// Pull persisted overrides. Keys that were never persisted keep their
    /// current value.
    pub async fn refresh(&self, pool: &SqlitePool) -> Result<()> {
        if let Some(v) = load_flag(pool, ENGAGE_ALL_KEY).await? {
            let old = self.engage_all.swap(v, Ordering::AcqRel);
            if old != v {
                tracing::info!(engage_all = v, "engage-all setting changed");
            }
        }
        if let Some(v) = load_flag(pool, ADOPT_UNTRACKED_KEY).await? {
            let old = self.adopt_untracked.swap(v, Ordering::AcqRel);
            if old != v {
                tracing::info!(adopt_untracked = v, "adopt-untracked setting changed");
            }
        }
        Ok(())
    }
}

pub async fn load_flag(pool: &SqlitePool, key: &str) -> Result<Option<bool>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM warmup_settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value.map(|v| flag(Some(v.trim()))))
}

pub async fn store_flag(pool: &SqlitePool, key: &str, value: bool) -> Result<()> {
    sqlx::query(
        "INSERT INTO warmup_settings (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(if value { "true" } else { "false" })
    .execute(pool)
    .await?;
    Ok(())
}

/// Persist and apply in one step.
pub async fn set_engage_all(pool: &SqlitePool, settings: &RuntimeSettings, value: bool) -> Result<()> {
    store_flag(pool, ENGAGE_ALL_KEY, value).await?;
    settings.set_engage_all(value);
    Ok(())
}

pub async fn set_adopt_untracked(pool: &SqlitePool, settings: &RuntimeSettings, value: bool) -> Result<()> {
    store_flag(pool, ADOPT_UNTRACKED_KEY, value).await?;
    settings.set_adopt_untracked(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn refresh_picks_up_persisted_values() {
        let pool = db::connect_memory().await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let settings = RuntimeSettings::new(false, true);

        settings.refresh(&pool).await.unwrap();
        assert!(!settings.engage_all());
        assert!(settings.adopt_untracked());

        store_flag(&pool, ENGAGE_ALL_KEY, true).await.unwrap();
        store_flag(&pool, ADOPT_UNTRACKED_KEY, false).await.unwrap();
        settings.refresh(&pool).await.unwrap();
        assert!(settings.engage_all());
        assert!(!settings.adopt_untracked());

        set_engage_all(&pool, &settings, false).await.unwrap();
        assert!(!settings.engage_all());
        assert_eq!(load_flag(&pool, ENGAGE_ALL_KEY).await.unwrap(), Some(false));
    }
}
