//! Opaque key storage with deferred expiry.
//!
//! Credential-issuance code stores its root secrets as opaque rows. A key
//! created with a TTL gets a `DeleteOpaqueKey` task scheduled at the
//! expiry instant, in the same transaction as the insert: either the key
//! exists with its cleanup pending, or neither does.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use rusqlite::Connection;
use tracing::info;

use streamctl_scheduler::store::{push_task, TaskOptions};
use streamctl_scheduler::TaskSpec;

use crate::error::{ClusterError, Result};
use crate::store;

/// Expiry cleanup retries on this cadence until the key is gone.
const EXPIRY_RETRY_INTERVAL: &str = "30m";

pub struct KeyStore {
    conn: Arc<Mutex<Connection>>,
}

impl KeyStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Store a secret. A zero TTL means the key never expires.
    pub fn create(&self, secret: &[u8], ttl: StdDuration) -> Result<i64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let key_id = store::create_opaque_key(&tx, secret)?;
        if !ttl.is_zero() {
            let expires_at = Utc::now() + Duration::seconds(ttl.as_secs() as i64);
            let task_id = push_task(
                &tx,
                &TaskSpec::DeleteOpaqueKey { key_id },
                TaskOptions::new()
                    .always_retry_on_failure(EXPIRY_RETRY_INTERVAL)
                    .started_at(expires_at),
            )?;
            info!(key_id, task_id, expires_at = %expires_at, "key expiry scheduled");
        }

        tx.commit()?;
        Ok(key_id)
    }

    pub fn get(&self, key_id: i64) -> Result<Vec<u8>> {
        let conn = self.conn.lock().unwrap();
        store::get_opaque_key(&conn, key_id)
    }

    pub fn delete(&self, key_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        if !store::delete_opaque_key(&conn, key_id)? {
            return Err(ClusterError::KeyNotFound { id: key_id });
        }
        Ok(())
    }
}
