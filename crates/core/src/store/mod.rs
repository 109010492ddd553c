//! Durable store over SQLite.
//!
//! One [`Store`] per process; request handlers borrow short-lived
//! [`Session`]s. The session is a scoped guard: whatever the exit path, the
//! underlying connection is released when it drops. Long-running operations
//! thread a deadline through the session and abort with `Timeout` on expiry.

pub mod schema;

mod assignments;
mod audits;
mod events;
mod experiments;
mod guardrails;
mod snapshots;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::error::{CoreError, CoreResult};

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (and initialize) a database file.
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Store> {
        Store::from_connection(Connection::open(path)?)
    }

    /// Fresh in-memory database; used throughout the test suite.
    pub fn open_in_memory() -> CoreResult<Store> {
        Store::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> CoreResult<Store> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::init_schema(&conn)?;
        Ok(Store { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Borrow a session without a deadline.
    pub fn session(&self) -> Session<'_> {
        Session {
            conn: self.conn.lock().unwrap_or_else(PoisonError::into_inner),
            deadline: None,
        }
    }

    /// Borrow a session that refuses to keep working past `deadline`.
    pub fn session_with_deadline(&self, deadline: Instant) -> Session<'_> {
        Session {
            conn: self.conn.lock().unwrap_or_else(PoisonError::into_inner),
            deadline: Some(deadline),
        }
    }
}

/// Scoped store session. Dropping it releases the connection.
pub struct Session<'a> {
    conn: MutexGuard<'a, Connection>,
    deadline: Option<Instant>,
}

impl Session<'_> {
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Surface `Timeout` once the deadline has passed.
    pub fn check_deadline(&self) -> CoreResult<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(CoreError::Timeout),
            _ => Ok(()),
        }
    }
}

pub(crate) fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub(crate) fn opt_ts_to_sql(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(ts_to_sql)
}

pub(crate) fn ts_from_sql(index: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })
}

pub(crate) fn opt_ts_from_sql(
    index: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|raw| ts_from_sql(index, raw)).transpose()
}

/// JSON column decode; unreadable payloads degrade to the given default.
pub(crate) fn json_from_sql(raw: &str, default: serde_json::Value) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or(default)
}
