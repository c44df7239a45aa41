//! Typed CRUD over the embedded relational store. Every mutation rewrites
//! the full document; there is no partial update. Schema version
//! compatibility is checked on read, never on write.

use crate::error::{ApiError, PersistenceErrorKind};
use daw_core::patch::Patch;
use daw_core::pattern::Performance;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

const CURRENT_SCHEMA_VERSION: u32 = 1;
const APP_STATE_DEBOUNCE: Duration = Duration::from_millis(400);

pub struct PersistenceGateway {
    conn: std::sync::Mutex<Connection>,
    pending_app_state: Arc<AsyncMutex<Option<Value>>>,
    debounce_scheduled: Arc<AtomicBool>,
}

fn not_found(what: &str, id: Uuid) -> ApiError {
    ApiError::Persistence(PersistenceErrorKind::NotFound, format!("{what} {id} not found"))
}

impl PersistenceGateway {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let conn = Connection::open(path).map_err(|e| ApiError::Persistence(PersistenceErrorKind::ConflictingWrite, e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS patches (id TEXT PRIMARY KEY, body TEXT NOT NULL, updated_at INTEGER NOT NULL);
             CREATE TABLE IF NOT EXISTS performances (id TEXT PRIMARY KEY, body TEXT NOT NULL, updated_at INTEGER NOT NULL);
             CREATE TABLE IF NOT EXISTS app_state (id TEXT PRIMARY KEY, body TEXT NOT NULL, updated_at INTEGER NOT NULL);",
        )
        .map_err(|e| ApiError::Persistence(PersistenceErrorKind::ConflictingWrite, e.to_string()))?;
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
            pending_app_state: Arc::new(AsyncMutex::new(None)),
            debounce_scheduled: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn open_in_memory() -> Result<Self, ApiError> {
        Self::open(":memory:")
    }

    fn now_millis() -> i64 {
        std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
    }

    fn check_schema_version(raw: &Value, what: &str) -> Result<(), ApiError> {
        let version = raw.get("schema_version").and_then(Value::as_u64).unwrap_or(1) as u32;
        if version > CURRENT_SCHEMA_VERSION {
            return Err(ApiError::Persistence(
                PersistenceErrorKind::SchemaUnsupported,
                format!("{what} schema version {version} is newer than supported version {CURRENT_SCHEMA_VERSION}"),
            ));
        }
        Ok(())
    }

    fn put(&self, table: &str, id: Uuid, body: &Value) -> Result<(), ApiError> {
        let conn = self.conn.lock().expect("persistence mutex poisoned");
        let serialized = serde_json::to_string(body).map_err(|e| ApiError::Validation(e.to_string()))?;
        conn.execute(
            &format!("INSERT INTO {table} (id, body, updated_at) VALUES (?1, ?2, ?3) ON CONFLICT(id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at"),
            params![id.to_string(), serialized, Self::now_millis()],
        )
        .map_err(|e| ApiError::Persistence(PersistenceErrorKind::ConflictingWrite, e.to_string()))?;
        Ok(())
    }

    fn get(&self, table: &str, id: Uuid) -> Result<Option<Value>, ApiError> {
        let conn = self.conn.lock().expect("persistence mutex poisoned");
        let body: Option<String> = conn
            .query_row(&format!("SELECT body FROM {table} WHERE id = ?1"), params![id.to_string()], |row| row.get(0))
            .optional()
            .map_err(|e| ApiError::Persistence(PersistenceErrorKind::ConflictingWrite, e.to_string()))?;
        body.map(|b| serde_json::from_str(&b).map_err(|e| ApiError::Validation(e.to_string()))).transpose()
    }

    fn list(&self, table: &str) -> Result<Vec<Value>, ApiError> {
        let conn = self.conn.lock().expect("persistence mutex poisoned");
        let mut stmt = conn
            .prepare(&format!("SELECT body FROM {table} ORDER BY updated_at DESC"))
            .map_err(|e| ApiError::Persistence(PersistenceErrorKind::ConflictingWrite, e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| ApiError::Persistence(PersistenceErrorKind::ConflictingWrite, e.to_string()))?;
        rows.map(|r| {
            let raw = r.map_err(|e| ApiError::Persistence(PersistenceErrorKind::ConflictingWrite, e.to_string()))?;
            serde_json::from_str(&raw).map_err(|e| ApiError::Validation(e.to_string()))
        })
        .collect()
    }

    fn delete(&self, table: &str, id: Uuid) -> Result<(), ApiError> {
        let conn = self.conn.lock().expect("persistence mutex poisoned");
        let affected = conn
            .execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id.to_string()])
            .map_err(|e| ApiError::Persistence(PersistenceErrorKind::ConflictingWrite, e.to_string()))?;
        if affected == 0 {
            return Err(not_found(table, id));
        }
        Ok(())
    }

    pub fn list_patches(&self) -> Result<Vec<Patch>, ApiError> {
        self.list("patches")?.into_iter().map(|v| serde_json::from_value(v).map_err(|e| ApiError::Validation(e.to_string()))).collect()
    }

    pub fn get_patch(&self, id: Uuid) -> Result<Patch, ApiError> {
        let raw = self.get("patches", id)?.ok_or_else(|| not_found("patch", id))?;
        Self::check_schema_version(&raw, "patch")?;
        serde_json::from_value(raw).map_err(|e| ApiError::Validation(e.to_string()))
    }

    pub fn put_patch(&self, patch: &Patch) -> Result<(), ApiError> {
        let body = serde_json::to_value(patch).map_err(|e| ApiError::Validation(e.to_string()))?;
        self.put("patches", patch.id, &body)
    }

    pub fn delete_patch(&self, id: Uuid) -> Result<(), ApiError> {
        self.delete("patches", id)
    }

    pub fn list_performances(&self) -> Result<Vec<Performance>, ApiError> {
        self.list("performances")?.into_iter().map(|v| serde_json::from_value(v).map_err(|e| ApiError::Validation(e.to_string()))).collect()
    }

    pub fn get_performance(&self, id: Uuid) -> Result<Performance, ApiError> {
        let raw = self.get("performances", id)?.ok_or_else(|| not_found("performance", id))?;
        Self::check_schema_version(&raw, "performance")?;
        serde_json::from_value(raw).map_err(|e| ApiError::Validation(e.to_string()))
    }

    pub fn put_performance(&self, performance: &Performance) -> Result<(), ApiError> {
        let body = serde_json::to_value(performance).map_err(|e| ApiError::Validation(e.to_string()))?;
        self.put("performances", performance.id, &body)
    }

    pub fn delete_performance(&self, id: Uuid) -> Result<(), ApiError> {
        self.delete("performances", id)
    }

    const APP_STATE_ID: Uuid = Uuid::nil();

    pub fn get_app_state(&self) -> Result<Option<Value>, ApiError> {
        self.get("app_state", Self::APP_STATE_ID)
    }

    /// Queues `body` for a coalesced write 400ms from now. Any prior pending
    /// snapshot is replaced, never queued alongside it.
    pub async fn put_app_state_debounced(self: &Arc<Self>, body: Value) {
        {
            let mut pending = self.pending_app_state.lock().await;
            *pending = Some(body);
        }
        if self.debounce_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let gateway = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(APP_STATE_DEBOUNCE).await;
            let snapshot = gateway.pending_app_state.lock().await.take();
            gateway.debounce_scheduled.store(false, Ordering::SeqCst);
            if let Some(body) = snapshot {
                if let Err(error) = gateway.put("app_state", Self::APP_STATE_ID, &body) {
                    tracing::error!(%error, "debounced app-state write failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daw_core::patch::EngineConfig;

    fn sample_patch() -> Patch {
        Patch::new("test-patch")
    }

    #[test]
    fn put_then_get_round_trips() {
        let gateway = PersistenceGateway::open_in_memory().unwrap();
        let patch = sample_patch();
        gateway.put_patch(&patch).unwrap();
        let loaded = gateway.get_patch(patch.id).unwrap();
        assert_eq!(loaded.id, patch.id);
        assert_eq!(loaded.name, patch.name);
    }

    #[test]
    fn get_missing_patch_is_not_found() {
        let gateway = PersistenceGateway::open_in_memory().unwrap();
        let result = gateway.get_patch(Uuid::new_v4());
        assert!(matches!(result, Err(ApiError::Persistence(PersistenceErrorKind::NotFound, _))));
    }

    #[test]
    fn unsupported_schema_version_is_rejected_on_read() {
        let gateway = PersistenceGateway::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        let mut body = serde_json::to_value(sample_patch()).unwrap();
        body["id"] = serde_json::json!(id);
        body["schema_version"] = serde_json::json!(99);
        gateway.put("patches", id, &body).unwrap();
        let result = gateway.get_patch(id);
        assert!(matches!(result, Err(ApiError::Persistence(PersistenceErrorKind::SchemaUnsupported, _))));
    }

    #[test]
    fn rewriting_a_patch_replaces_the_full_document() {
        let gateway = PersistenceGateway::open_in_memory().unwrap();
        let mut patch = sample_patch();
        gateway.put_patch(&patch).unwrap();
        patch.engine_config = EngineConfig { sr: 48_000, ..EngineConfig::default() };
        gateway.put_patch(&patch).unwrap();
        let loaded = gateway.get_patch(patch.id).unwrap();
        assert_eq!(loaded.engine_config.sr, 48_000);
    }

    #[tokio::test]
    async fn debounced_app_state_coalesces_rapid_writes() {
        let gateway = Arc::new(PersistenceGateway::open_in_memory().unwrap());
        gateway.put_app_state_debounced(serde_json::json!({"v": 1})).await;
        gateway.put_app_state_debounced(serde_json::json!({"v": 2})).await;
        tokio::time::sleep(Duration::from_millis(450)).await;
        let stored = gateway.get_app_state().unwrap().unwrap();
        assert_eq!(stored["v"], 2);
    }
}
