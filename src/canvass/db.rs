use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use super::models::*;
use super::policy::Deltas;
use crate::errors::{TrackerError, is_unique_violation};

/// Async-safe handle to the tracker database.
///
/// Wraps `TrackerDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads. The mutex also serializes every
/// workflow operation, so a read-decide-write sequence on one door can
/// never interleave with another writer.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<TrackerDb>>,
}

impl DbHandle {
    pub fn new(db: TrackerDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, TrackerError>
    where
        F: FnOnce(&TrackerDb) -> Result<R, TrackerError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| TrackerError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|_| TrackerError::TaskPanicked)?
    }

    /// Acquire the database mutex synchronously. For startup
    /// initialization and tests only — never from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, TrackerDb>, TrackerError> {
        self.inner.lock().map_err(|_| TrackerError::LockPoisoned)
    }
}

/// RFC 3339 UTC with microsecond precision; lexicographic order matches
/// chronological order, which `list_door_events` relies on.
fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_event(s: &str) -> Result<DoorEvent, TrackerError> {
    DoorEvent::from_str(s).map_err(|e| {
        TrackerError::Database(rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            e.into(),
        ))
    })
}

pub struct TrackerDb {
    conn: Connection,
}

impl TrackerDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self, TrackerError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self, TrackerError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<(), TrackerError> {
        // busy_timeout bounds cross-process lock waits; anything still
        // busy after it surfaces as the retryable Contention error.
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        self.run_migrations()?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<(), TrackerError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS locations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL,
                address TEXT NOT NULL UNIQUE,
                door_count INTEGER NOT NULL DEFAULT 0,
                doors_opened INTEGER NOT NULL DEFAULT 0,
                leads INTEGER NOT NULL DEFAULT 0,
                rejections INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS door_status (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                location_id INTEGER NOT NULL REFERENCES locations(id),
                stiege TEXT NOT NULL,
                stockwerk TEXT NOT NULL,
                tuere TEXT NOT NULL,
                event TEXT NOT NULL DEFAULT 'not_opened',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(location_id, stiege, stockwerk, tuere)
            );

            CREATE TABLE IF NOT EXISTS leads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                lead_uuid TEXT NOT NULL,
                location_id INTEGER NOT NULL REFERENCES locations(id),
                stiege TEXT NOT NULL,
                stockwerk TEXT NOT NULL,
                tuere TEXT NOT NULL,
                first_name TEXT NOT NULL,
                last_name TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(location_id, stiege, stockwerk, tuere)
            );

            CREATE INDEX IF NOT EXISTS idx_door_status_location ON door_status(location_id);
            CREATE INDEX IF NOT EXISTS idx_door_status_updated ON door_status(updated_at);
            CREATE INDEX IF NOT EXISTS idx_leads_location ON leads(location_id);
            ",
        )?;
        Ok(())
    }

    /// Begin a transaction on the exclusive connection.
    /// Safety: DbHandle's Mutex already guarantees single-threaded access.
    pub fn begin(&self) -> Result<rusqlite::Transaction<'_>, TrackerError> {
        Ok(self.conn.unchecked_transaction()?)
    }

    // ── Location registry ─────────────────────────────────────────────

    pub fn create_location(&self, address: &str) -> Result<Location, TrackerError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(TrackerError::Validation("address must be non-empty".into()));
        }
        let uuid = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO locations (uuid, address, created_at) VALUES (?1, ?2, ?3)",
                params![uuid, address, now()],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    TrackerError::AddressExists {
                        address: address.to_string(),
                    }
                } else {
                    e.into()
                }
            })?;
        let id = self.conn.last_insert_rowid();
        self.get_location(id)
    }

    pub fn get_location(&self, id: i64) -> Result<Location, TrackerError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, address, door_count, doors_opened, leads, rejections, created_at
             FROM locations WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], Self::map_location)?;
        match rows.next() {
            Some(row) => Ok(row?),
            None => Err(TrackerError::LocationNotFound { id }),
        }
    }

    pub fn list_locations(&self) -> Result<Vec<Location>, TrackerError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, address, door_count, doors_opened, leads, rejections, created_at
             FROM locations ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], Self::map_location)?;
        let mut locations = Vec::new();
        for row in rows {
            locations.push(row?);
        }
        Ok(locations)
    }

    fn map_location(row: &rusqlite::Row<'_>) -> rusqlite::Result<Location> {
        Ok(Location {
            id: row.get(0)?,
            uuid: row.get(1)?,
            address: row.get(2)?,
            door_count: row.get(3)?,
            doors_opened: row.get(4)?,
            leads: row.get(5)?,
            rejections: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    // ── Status ledger ─────────────────────────────────────────────────

    /// Current status of a door, creating the `not_opened` row if the door
    /// has never been touched. The insert races through the unique index,
    /// so two concurrent first-touches can never produce divergent rows.
    /// Returns the status and whether this call created the row.
    pub fn get_or_init_status(&self, key: &DoorKey) -> Result<(DoorEvent, bool), TrackerError> {
        let inserted = self.conn.execute(
            "INSERT INTO door_status (location_id, stiege, stockwerk, tuere, event, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'not_opened', ?5, ?5)
             ON CONFLICT(location_id, stiege, stockwerk, tuere) DO NOTHING",
            params![key.location_id, key.stiege, key.stockwerk, key.tuere, now()],
        )?;
        if inserted > 0 {
            return Ok((DoorEvent::NotOpened, true));
        }
        let event: String = self.conn.query_row(
            "SELECT event FROM door_status
             WHERE location_id = ?1 AND stiege = ?2 AND stockwerk = ?3 AND tuere = ?4",
            params![key.location_id, key.stiege, key.stockwerk, key.tuere],
            |row| row.get(0),
        )?;
        Ok((parse_event(&event)?, false))
    }

    /// Refresh `updated_at` without changing the status. Used when a door
    /// is knocked again but the status is not advancing.
    pub fn touch_status(&self, key: &DoorKey) -> Result<(), TrackerError> {
        self.conn.execute(
            "UPDATE door_status SET updated_at = ?1
             WHERE location_id = ?2 AND stiege = ?3 AND stockwerk = ?4 AND tuere = ?5",
            params![now(), key.location_id, key.stiege, key.stockwerk, key.tuere],
        )?;
        Ok(())
    }

    /// Unconditional status write. Legality is the policy's decision; by
    /// the time this runs the workflow has already ruled out downgrades.
    pub fn set_status(&self, key: &DoorKey, event: DoorEvent) -> Result<(), TrackerError> {
        self.conn.execute(
            "UPDATE door_status SET event = ?1, updated_at = ?2
             WHERE location_id = ?3 AND stiege = ?4 AND stockwerk = ?5 AND tuere = ?6",
            params![
                event.as_str(),
                now(),
                key.location_id,
                key.stiege,
                key.stockwerk,
                key.tuere
            ],
        )?;
        Ok(())
    }

    /// Door status rows for the monitoring view, most recently updated
    /// first, joined with the location address. Bounded to 300 rows, no
    /// cursor.
    pub fn list_door_events(
        &self,
        location_id: Option<i64>,
    ) -> Result<Vec<DoorEventView>, TrackerError> {
        let base = "SELECT d.id, d.location_id, l.address, d.stiege, d.stockwerk, d.tuere,
                           d.event, d.created_at, d.updated_at
                    FROM door_status d JOIN locations l ON l.id = d.location_id";
        let order = "ORDER BY d.updated_at DESC, d.id DESC LIMIT 300";
        let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<DoorEventView> {
            let event: String = row.get(6)?;
            let event = DoorEvent::from_str(&event).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, e.into())
            })?;
            Ok(DoorEventView {
                id: row.get(0)?,
                location_id: row.get(1)?,
                address: row.get(2)?,
                stiege: row.get(3)?,
                stockwerk: row.get(4)?,
                tuere: row.get(5)?,
                event,
                created_at: row.get(7)?,
                updated_at: row.get(8)?,
            })
        };
        let mut events = Vec::new();
        match location_id {
            Some(id) => {
                let sql = format!("{base} WHERE d.location_id = ?1 {order}");
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map(params![id], map)?;
                for row in rows {
                    events.push(row?);
                }
            }
            None => {
                let sql = format!("{base} {order}");
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map([], map)?;
                for row in rows {
                    events.push(row?);
                }
            }
        }
        Ok(events)
    }

    // ── Aggregate store ───────────────────────────────────────────────

    /// Apply transition deltas to a location's counters as one atomic
    /// UPDATE. Each field is clamped at zero inside the SQL expression;
    /// there is no separate read-then-write step.
    pub fn apply_delta(&self, location_id: i64, deltas: &Deltas) -> Result<(), TrackerError> {
        if deltas.is_zero() {
            return Ok(());
        }
        let changed = self.conn.execute(
            "UPDATE locations SET
                doors_opened = MAX(0, doors_opened + ?1),
                leads        = MAX(0, leads + ?2),
                rejections   = MAX(0, rejections + ?3)
             WHERE id = ?4",
            params![deltas.doors_opened, deltas.leads, deltas.rejections, location_id],
        )?;
        if changed == 0 {
            return Err(TrackerError::LocationNotFound { id: location_id });
        }
        Ok(())
    }

    /// Every physical knock counts, including repeats on a door that is
    /// already at `lead` or `rejection`.
    pub fn increment_knock_count(&self, location_id: i64) -> Result<(), TrackerError> {
        let changed = self.conn.execute(
            "UPDATE locations SET door_count = door_count + 1 WHERE id = ?1",
            params![location_id],
        )?;
        if changed == 0 {
            return Err(TrackerError::LocationNotFound { id: location_id });
        }
        Ok(())
    }

    /// Operator adjustment: explicit `{field, delta}` ops, same clamped
    /// atomic expressions as transition deltas.
    pub fn adjust_counters(&self, location_id: i64, ops: &[CounterOp]) -> Result<(), TrackerError> {
        if ops.is_empty() {
            return Err(TrackerError::Validation("ops must be non-empty".into()));
        }
        for op in ops {
            // op.field.column() comes from a fixed enum, never user input.
            let sql = format!(
                "UPDATE locations SET {col} = MAX(0, {col} + ?1) WHERE id = ?2",
                col = op.field.column()
            );
            let changed = self.conn.execute(&sql, params![op.delta, location_id])?;
            if changed == 0 {
                return Err(TrackerError::LocationNotFound { id: location_id });
            }
        }
        Ok(())
    }

    // ── Lead register ─────────────────────────────────────────────────

    /// Append-only insert; at most one lead per door, enforced by the
    /// unique index and surfaced as the dedicated DuplicateLead error.
    pub fn insert_lead(
        &self,
        key: &DoorKey,
        first_name: &str,
        last_name: Option<&str>,
    ) -> Result<LeadRecord, TrackerError> {
        let lead_uuid = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO leads (lead_uuid, location_id, stiege, stockwerk, tuere, first_name, last_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    lead_uuid,
                    key.location_id,
                    key.stiege,
                    key.stockwerk,
                    key.tuere,
                    first_name,
                    last_name,
                    now()
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    TrackerError::DuplicateLead {
                        location_id: key.location_id,
                        stiege: key.stiege.clone(),
                        stockwerk: key.stockwerk.clone(),
                        tuere: key.tuere.clone(),
                    }
                } else {
                    e.into()
                }
            })?;
        let id = self.conn.last_insert_rowid();
        let lead = self.conn.query_row(
            "SELECT id, lead_uuid, location_id, stiege, stockwerk, tuere, first_name, last_name, created_at
             FROM leads WHERE id = ?1",
            params![id],
            |row| {
                Ok(LeadRecord {
                    id: row.get(0)?,
                    lead_uuid: row.get(1)?,
                    location_id: row.get(2)?,
                    stiege: row.get(3)?,
                    stockwerk: row.get(4)?,
                    tuere: row.get(5)?,
                    first_name: row.get(6)?,
                    last_name: row.get(7)?,
                    created_at: row.get(8)?,
                })
            },
        )?;
        Ok(lead)
    }

    /// Leads for the desktop view, newest first, joined with the location
    /// address. Bounded to 200 rows.
    pub fn list_leads(&self, location_id: Option<i64>) -> Result<Vec<LeadView>, TrackerError> {
        let base = "SELECT t.id, t.lead_uuid, t.location_id, l.address, t.first_name,
                           t.last_name, t.stiege, t.stockwerk, t.tuere, t.created_at
                    FROM leads t JOIN locations l ON l.id = t.location_id";
        let order = "ORDER BY t.created_at DESC, t.id DESC LIMIT 200";
        let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<LeadView> {
            Ok(LeadView {
                id: row.get(0)?,
                lead_uuid: row.get(1)?,
                location_id: row.get(2)?,
                address: row.get(3)?,
                first_name: row.get(4)?,
                last_name: row.get(5)?,
                stiege: row.get(6)?,
                stockwerk: row.get(7)?,
                tuere: row.get(8)?,
                created_at: row.get(9)?,
            })
        };
        let mut leads = Vec::new();
        match location_id {
            Some(id) => {
                let sql = format!("{base} WHERE t.location_id = ?1 {order}");
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map(params![id], map)?;
                for row in rows {
                    leads.push(row?);
                }
            }
            None => {
                let sql = format!("{base} {order}");
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map([], map)?;
                for row in rows {
                    leads.push(row?);
                }
            }
        }
        Ok(leads)
    }
}
