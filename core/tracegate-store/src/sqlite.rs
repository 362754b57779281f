//! SQLite-backed store.
//!
//! Records are kept as JSON blobs next to the handful of columns that
//! lookups and sweeps filter on. Every read-modify-write runs inside an
//! `IMMEDIATE` transaction so instances sharing one database file see
//! single-use markers, token consumption and tracepath advancement as
//! atomic.

use crate::error::{StoreError, StoreResult};
use crate::store::{GateStore, SweepReport, try_advance};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Params, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracegate_types::{
    BlacklistEntry, CachedLayer, ConnectionStatus, DeliverySession, KeyId, LicenseKeyRecord,
    RateWindow, RequestLogEntry, RotatingTokenRecord, ScriptId, ScriptRecord, SecurityEvent,
    TracepathSessionRecord,
};

/// Persistent [`GateStore`] backed by SQLite.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a store at `path`. `busy_timeout` bounds how long
    /// a call waits on a lock held by another instance.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        info!(path = %path.display(), "opened sqlite gate store");
        Self::with_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS scripts (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS license_keys (
                id TEXT PRIMARY KEY,
                value TEXT NOT NULL UNIQUE,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS blacklist (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ip TEXT,
                hwid_hash TEXT,
                expires_at INTEGER,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_blacklist_ip ON blacklist(ip);
            CREATE INDEX IF NOT EXISTS idx_blacklist_hwid ON blacklist(hwid_hash);

            CREATE TABLE IF NOT EXISTS rate_windows (
                key TEXT PRIMARY KEY,
                window_start INTEGER NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS markers (
                namespace TEXT NOT NULL,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (namespace, value)
            );

            CREATE TABLE IF NOT EXISTS tracepath_sessions (
                id TEXT PRIMARY KEY,
                expires_at INTEGER NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tokens (
                token TEXT PRIMARY KEY,
                valid INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS delivery_sessions (
                token TEXT PRIMARY KEY,
                key_id TEXT NOT NULL,
                active INTEGER NOT NULL,
                last_heartbeat INTEGER NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS layers (
                script_id TEXT NOT NULL,
                layer INTEGER NOT NULL,
                version TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (script_id, layer, version)
            );

            CREATE TABLE IF NOT EXISTS warnings (
                key_id TEXT PRIMARY KEY,
                count INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS request_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key_id TEXT,
                ip TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_request_log_key ON request_log(key_id, at);

            CREATE TABLE IF NOT EXISTS security_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                at INTEGER NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_security_events_at ON security_events(at);
            ",
        )?;
        Ok(())
    }
}

fn ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn to_json<T: Serialize>(value: &T) -> StoreResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn load<T: DeserializeOwned, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> StoreResult<Option<T>> {
    let data: Option<String> = conn.query_row(sql, params, |row| row.get(0)).optional()?;
    data.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
        .transpose()
}

fn put_delivery(conn: &Connection, session: &DeliverySession) -> StoreResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO delivery_sessions (token, key_id, active, last_heartbeat, data)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            session.token,
            session.key_id.to_string(),
            !session.status.is_terminal(),
            ms(session.last_heartbeat),
            to_json(session)?
        ],
    )?;
    Ok(())
}

impl GateStore for SqliteStore {
    // ── Scripts ──────────────────────────────────────────────────

    fn get_script(&self, id: &ScriptId) -> StoreResult<Option<ScriptRecord>> {
        let conn = self.conn.lock();
        load(
            &conn,
            "SELECT data FROM scripts WHERE id = ?1",
            params![id.to_string()],
        )
    }

    fn put_script(&self, script: &ScriptRecord) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO scripts (id, data) VALUES (?1, ?2)",
            params![script.id.to_string(), to_json(script)?],
        )?;
        Ok(())
    }

    // ── License keys ─────────────────────────────────────────────

    fn get_key(&self, value: &str) -> StoreResult<Option<LicenseKeyRecord>> {
        let conn = self.conn.lock();
        load(
            &conn,
            "SELECT data FROM license_keys WHERE value = ?1",
            params![value],
        )
    }

    fn get_key_by_id(&self, id: &KeyId) -> StoreResult<Option<LicenseKeyRecord>> {
        let conn = self.conn.lock();
        load(
            &conn,
            "SELECT data FROM license_keys WHERE id = ?1",
            params![id.to_string()],
        )
    }

    fn put_key(&self, key: &LicenseKeyRecord) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO license_keys (id, value, data) VALUES (?1, ?2, ?3)",
            params![key.id.to_string(), key.value, to_json(key)?],
        )?;
        Ok(())
    }

    fn update_key(
        &self,
        id: &KeyId,
        update: &mut dyn FnMut(&mut LicenseKeyRecord) -> bool,
    ) -> StoreResult<Option<LicenseKeyRecord>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(stored) = load::<LicenseKeyRecord, _>(
            &tx,
            "SELECT data FROM license_keys WHERE id = ?1",
            params![id.to_string()],
        )?
        else {
            return Ok(None);
        };
        let mut key = stored.clone();
        if !update(&mut key) {
            return Ok(Some(stored));
        }
        tx.execute(
            "UPDATE license_keys SET data = ?2 WHERE id = ?1",
            params![id.to_string(), to_json(&key)?],
        )?;
        tx.commit()?;
        Ok(Some(key))
    }

    // ── Blacklist ────────────────────────────────────────────────

    fn find_blacklist(
        &self,
        ip: Option<&str>,
        hwid_hash: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<BlacklistEntry>> {
        if ip.is_none() && hwid_hash.is_none() {
            return Ok(None);
        }
        let conn = self.conn.lock();
        load(
            &conn,
            "SELECT data FROM blacklist
             WHERE (ip = ?1 OR hwid_hash = ?2)
               AND (expires_at IS NULL OR expires_at > ?3)
             ORDER BY id DESC LIMIT 1",
            params![ip, hwid_hash, ms(now)],
        )
    }

    fn add_blacklist(&self, entry: &BlacklistEntry) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO blacklist (ip, hwid_hash, expires_at, data) VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.ip,
                entry.hwid_hash,
                entry.expires_at.map(ms),
                to_json(entry)?
            ],
        )?;
        Ok(())
    }

    fn remove_blacklist(&self, ip: Option<&str>, hwid_hash: Option<&str>) -> StoreResult<usize> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "DELETE FROM blacklist WHERE ip = ?1 OR hwid_hash = ?2",
            params![ip, hwid_hash],
        )?)
    }

    // ── Rate windows ─────────────────────────────────────────────

    fn get_rate_window(&self, key: &str) -> StoreResult<Option<RateWindow>> {
        let conn = self.conn.lock();
        load(
            &conn,
            "SELECT data FROM rate_windows WHERE key = ?1",
            params![key],
        )
    }

    fn update_rate_window(
        &self,
        key: &str,
        update: &mut dyn FnMut(Option<RateWindow>) -> RateWindow,
    ) -> StoreResult<RateWindow> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = load(
            &tx,
            "SELECT data FROM rate_windows WHERE key = ?1",
            params![key],
        )?;
        let next = update(current);
        tx.execute(
            "INSERT OR REPLACE INTO rate_windows (key, window_start, data) VALUES (?1, ?2, ?3)",
            params![key, ms(next.window_start), to_json(&next)?],
        )?;
        tx.commit()?;
        Ok(next)
    }

    // ── Single-use markers ───────────────────────────────────────

    fn mark_once(
        &self,
        namespace: &str,
        value: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM markers WHERE namespace = ?1 AND value = ?2 AND expires_at <= ?3",
            params![namespace, value, ms(now)],
        )?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO markers (namespace, value, expires_at) VALUES (?1, ?2, ?3)",
            params![namespace, value, ms(expires_at)],
        )?;
        tx.commit()?;
        Ok(inserted == 1)
    }

    fn is_marked(&self, namespace: &str, value: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let conn = self.conn.lock();
        Ok(conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM markers
                           WHERE namespace = ?1 AND value = ?2 AND expires_at > ?3)",
            params![namespace, value, ms(now)],
            |row| row.get(0),
        )?)
    }

    // ── Tracepath sessions ───────────────────────────────────────

    fn put_tracepath(&self, session: &TracepathSessionRecord) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO tracepath_sessions (id, expires_at, data) VALUES (?1, ?2, ?3)",
            params![session.id, ms(session.expires_at), to_json(session)?],
        )?;
        Ok(())
    }

    fn get_tracepath(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<TracepathSessionRecord>> {
        let conn = self.conn.lock();
        load(
            &conn,
            "SELECT data FROM tracepath_sessions WHERE id = ?1 AND expires_at > ?2",
            params![id, ms(now)],
        )
    }

    fn advance_tracepath(
        &self,
        id: &str,
        from: u8,
        to: u8,
        at: DateTime<Utc>,
        consume: bool,
    ) -> StoreResult<Option<TracepathSessionRecord>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(mut session) = load::<TracepathSessionRecord, _>(
            &tx,
            "SELECT data FROM tracepath_sessions WHERE id = ?1",
            params![id],
        )?
        else {
            return Ok(None);
        };
        if !try_advance(&mut session, from, to, at, consume) {
            return Ok(None);
        }
        tx.execute(
            "UPDATE tracepath_sessions SET data = ?2 WHERE id = ?1",
            params![id, to_json(&session)?],
        )?;
        tx.commit()?;
        Ok(Some(session))
    }

    fn invalidate_tracepath(&self, id: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Some(mut session) = load::<TracepathSessionRecord, _>(
            &tx,
            "SELECT data FROM tracepath_sessions WHERE id = ?1",
            params![id],
        )? {
            session.valid = false;
            tx.execute(
                "UPDATE tracepath_sessions SET data = ?2 WHERE id = ?1",
                params![id, to_json(&session)?],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // ── Tokens ───────────────────────────────────────────────────

    fn put_token(&self, token: &RotatingTokenRecord) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO tokens (token, valid, expires_at, data) VALUES (?1, ?2, ?3, ?4)",
            params![token.token, token.valid, ms(token.expires_at), to_json(token)?],
        )?;
        Ok(())
    }

    fn get_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RotatingTokenRecord>> {
        let conn = self.conn.lock();
        load(
            &conn,
            "SELECT data FROM tokens WHERE token = ?1 AND expires_at > ?2",
            params![token, ms(now)],
        )
    }

    fn consume_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RotatingTokenRecord>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(mut record) = load::<RotatingTokenRecord, _>(
            &tx,
            "SELECT data FROM tokens WHERE token = ?1 AND valid = 1 AND expires_at > ?2",
            params![token, ms(now)],
        )?
        else {
            return Ok(None);
        };
        record.valid = false;
        tx.execute(
            "UPDATE tokens SET valid = 0, data = ?2 WHERE token = ?1",
            params![token, to_json(&record)?],
        )?;
        tx.commit()?;
        Ok(Some(record))
    }

    // ── Delivery sessions ────────────────────────────────────────

    fn put_delivery_session(&self, session: &DeliverySession) -> StoreResult<()> {
        let conn = self.conn.lock();
        put_delivery(&conn, session)
    }

    fn get_delivery_session(&self, token: &str) -> StoreResult<Option<DeliverySession>> {
        let conn = self.conn.lock();
        load(
            &conn,
            "SELECT data FROM delivery_sessions WHERE token = ?1",
            params![token],
        )
    }

    fn update_delivery_status(
        &self,
        token: &str,
        status: ConnectionStatus,
        reason: Option<&str>,
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut session: DeliverySession = load(
            &tx,
            "SELECT data FROM delivery_sessions WHERE token = ?1",
            params![token],
        )?
        .ok_or_else(|| StoreError::NotFound(format!("delivery session {token}")))?;
        session.status = status;
        session.status_reason = reason.map(str::to_string);
        put_delivery(&tx, &session)?;
        tx.commit()?;
        Ok(())
    }

    fn touch_delivery_session(&self, token: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut session: DeliverySession = load(
            &tx,
            "SELECT data FROM delivery_sessions WHERE token = ?1",
            params![token],
        )?
        .ok_or_else(|| StoreError::NotFound(format!("delivery session {token}")))?;
        session.last_heartbeat = at;
        put_delivery(&tx, &session)?;
        tx.commit()?;
        Ok(())
    }

    fn prune_delivery_sessions(
        &self,
        ended_before: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "DELETE FROM delivery_sessions
             WHERE (active = 0 AND last_heartbeat < ?1) OR last_heartbeat < ?2",
            params![ms(ended_before), ms(stale_before)],
        )?)
    }

    // ── Pipeline layers ──────────────────────────────────────────

    fn get_layer(
        &self,
        script_id: &ScriptId,
        layer: u8,
        version: &str,
    ) -> StoreResult<Option<CachedLayer>> {
        let conn = self.conn.lock();
        load(
            &conn,
            "SELECT data FROM layers WHERE script_id = ?1 AND layer = ?2 AND version = ?3",
            params![script_id.to_string(), layer, version],
        )
    }

    fn put_layer(&self, layer: &CachedLayer) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO layers (script_id, layer, version, data) VALUES (?1, ?2, ?3, ?4)",
            params![
                layer.script_id.to_string(),
                layer.layer,
                layer.version,
                to_json(layer)?
            ],
        )?;
        Ok(())
    }

    // ── Warning counters ─────────────────────────────────────────

    fn increment_warnings(&self, key_id: &KeyId) -> StoreResult<u32> {
        let conn = self.conn.lock();
        let count: u32 = conn.query_row(
            "INSERT INTO warnings (key_id, count) VALUES (?1, 1)
             ON CONFLICT(key_id) DO UPDATE SET count = count + 1
             RETURNING count",
            params![key_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn warnings(&self, key_id: &KeyId) -> StoreResult<u32> {
        let conn = self.conn.lock();
        let count: Option<u32> = conn
            .query_row(
                "SELECT count FROM warnings WHERE key_id = ?1",
                params![key_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    fn reset_warnings(&self, key_id: &KeyId) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM warnings WHERE key_id = ?1",
            params![key_id.to_string()],
        )?;
        Ok(())
    }

    // ── Request log ──────────────────────────────────────────────

    fn log_request(&self, entry: &RequestLogEntry) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO request_log (key_id, ip, endpoint, at) VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.key_id.as_ref().map(ToString::to_string),
                entry.ip,
                entry.endpoint,
                ms(entry.at)
            ],
        )?;
        Ok(())
    }

    fn count_requests_since(&self, key_id: &KeyId, since: DateTime<Utc>) -> StoreResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM request_log WHERE key_id = ?1 AND at >= ?2",
            params![key_id.to_string(), ms(since)],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn distinct_ips_since(&self, key_id: &KeyId, since: DateTime<Utc>) -> StoreResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT ip) FROM request_log WHERE key_id = ?1 AND at >= ?2",
            params![key_id.to_string(), ms(since)],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn prune_request_log(&self, before: DateTime<Utc>) -> StoreResult<usize> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "DELETE FROM request_log WHERE at < ?1",
            params![ms(before)],
        )?)
    }

    // ── Security events ──────────────────────────────────────────

    fn append_event(&self, event: &SecurityEvent) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO security_events (at, data) VALUES (?1, ?2)",
            params![ms(event.at), to_json(event)?],
        )?;
        Ok(())
    }

    fn recent_events(&self, limit: usize) -> StoreResult<Vec<SecurityEvent>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT data FROM security_events ORDER BY id DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;

        let mut events = Vec::new();
        for row in rows {
            events.push(serde_json::from_str(&row?)?);
        }
        Ok(events)
    }

    fn prune_events(&self, before: DateTime<Utc>) -> StoreResult<usize> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "DELETE FROM security_events WHERE at < ?1",
            params![ms(before)],
        )?)
    }

    // ── Maintenance ──────────────────────────────────────────────

    fn sweep_expired(&self, now: DateTime<Utc>) -> StoreResult<SweepReport> {
        let now = ms(now);
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let report = SweepReport {
            markers: tx.execute("DELETE FROM markers WHERE expires_at <= ?1", params![now])?,
            tokens: tx.execute("DELETE FROM tokens WHERE expires_at <= ?1", params![now])?,
            sessions: tx.execute(
                "DELETE FROM tracepath_sessions WHERE expires_at <= ?1",
                params![now],
            )?,
            blacklist: tx.execute(
                "DELETE FROM blacklist WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![now],
            )?,
        };
        tx.commit()?;
        if report.total() > 0 {
            debug!(?report, "swept expired rows");
        }
        Ok(report)
    }
}
