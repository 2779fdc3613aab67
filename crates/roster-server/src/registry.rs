//! Connection registry
//!
//! The registry is the only shared mutable state in the server: a
//! concurrency-safe directory of identified connections. Each record pairs
//! presence data (addresses, status line, last activity) with a live write
//! handle that foreign sessions use for liveness probes and relay delivery.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, info};

use roster_common::error::{Result, RosterError};

/// Reported address stored when the client does not supply one.
pub const UNSPECIFIED_ADDR: &str = "0.0.0.0:0";

/// Boxed socket write half, shared between the owning session and the
/// registry.
pub type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Write handle to a live connection plus its close signal.
///
/// The owning session reads from the socket; foreign sessions clone this
/// handle out of the registry to write probes and relay frames. Single
/// logical writes (a response or probe line) go through [`write_line`];
/// multi-write frames hold [`lock`] for their whole duration.
///
/// [`write_line`]: ConnectionHandle::write_line
/// [`lock`]: ConnectionHandle::lock
#[derive(Clone)]
pub struct ConnectionHandle {
    writer: SharedWriter,
    closed: Arc<watch::Sender<bool>>,
}

impl ConnectionHandle {
    /// Wrap a socket write half. Returns the handle and the receiver the
    /// owning session selects on to learn it has been displaced or evicted.
    pub fn new(writer: Box<dyn AsyncWrite + Send + Unpin>) -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        let handle = Self {
            writer: Arc::new(Mutex::new(writer)),
            closed: Arc::new(tx),
        };
        (handle, rx)
    }

    /// Whether two handles wrap the same socket.
    pub fn same_socket(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.writer, &other.writer)
    }

    /// Lock the underlying writer for a multi-write frame.
    pub async fn lock(&self) -> MutexGuard<'_, Box<dyn AsyncWrite + Send + Unpin>> {
        self.writer.lock().await
    }

    /// Write one line under the given deadline.
    pub async fn write_line(&self, line: &str, deadline: Duration) -> Result<()> {
        let mut writer = self.writer.lock().await;
        tokio::time::timeout(deadline, async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        })
        .await
        .map_err(|_| RosterError::WriteTimeout)??;
        Ok(())
    }

    /// Signal the owning session to stop and shut the socket down.
    ///
    /// The shutdown runs on a background task so registry operations never
    /// wait on a writer that may be held by an in-flight relay.
    pub fn close(&self) {
        let _ = self.closed.send(true);
        let writer = Arc::clone(&self.writer);
        tokio::spawn(async move {
            let mut writer = writer.lock().await;
            let _ = writer.shutdown().await;
        });
    }
}

/// One registered connection.
#[derive(Clone)]
pub struct ConnectionRecord {
    pub id: String,
    /// TCP peer address as seen by the server.
    pub observed_addr: String,
    /// Address the client reported in `CONNECT`, or [`UNSPECIFIED_ADDR`].
    pub reported_addr: String,
    /// Time of the last command received on the connection.
    pub updated: DateTime<Utc>,
    /// Free-form status line, empty until the client sets one.
    pub status: String,
    pub handle: ConnectionHandle,
}

impl ConnectionRecord {
    /// Whether the record has seen a command within the idle window.
    pub fn is_fresh(&self, idle_timeout: Duration) -> bool {
        let idle = chrono::Duration::from_std(idle_timeout).unwrap_or(chrono::TimeDelta::MAX);
        Utc::now().signed_duration_since(self.updated) < idle
    }

    /// RFC 3339 rendering of the last-activity timestamp.
    pub fn updated_rfc3339(&self) -> String {
        self.updated.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// Registry of all identified connections
#[derive(Default)]
pub struct Registry {
    connections: DashMap<String, ConnectionRecord>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a connection, displacing any current holder of the id.
    ///
    /// Last writer wins: the displaced record's socket is closed only after
    /// the new record is installed, so concurrent lookups always observe a
    /// valid record for the id.
    pub fn add(&self, id: &str, observed_addr: &str, reported_addr: &str, handle: ConnectionHandle) {
        let reported_addr = if reported_addr.is_empty() {
            UNSPECIFIED_ADDR
        } else {
            reported_addr
        };
        let record = ConnectionRecord {
            id: id.to_string(),
            observed_addr: observed_addr.to_string(),
            reported_addr: reported_addr.to_string(),
            updated: Utc::now(),
            status: String::new(),
            handle,
        };
        if let Some(displaced) = self.connections.insert(id.to_string(), record) {
            info!("client {} displaced by a new connection", id);
            displaced.handle.close();
        } else {
            info!("client {} registered from {}", id, observed_addr);
        }
    }

    /// Remove a record and close its socket.
    pub fn remove(&self, id: &str) {
        if let Some((_, record)) = self.connections.remove(id) {
            info!("client {} removed", id);
            record.handle.close();
        }
    }

    /// Remove a record only if it still belongs to the given socket.
    ///
    /// Session teardown uses this: a successor may have reclaimed the id,
    /// and its record must survive its predecessor's exit.
    pub fn remove_if_handle(&self, id: &str, handle: &ConnectionHandle) {
        let removed = self
            .connections
            .remove_if(id, |_, record| record.handle.same_socket(handle));
        if removed.is_some() {
            debug!("client {} unregistered", id);
        }
    }

    /// Refresh a record's last-activity timestamp.
    pub fn touch(&self, id: &str) {
        if let Some(mut record) = self.connections.get_mut(id) {
            record.updated = Utc::now();
        }
    }

    /// Replace a record's status wholesale.
    pub fn set_status(&self, id: &str, status: &str) {
        if let Some(mut record) = self.connections.get_mut(id) {
            record.status = status.to_string();
            record.updated = Utc::now();
        }
    }

    /// Point-in-time snapshot of a record. The handle is cloned under the
    /// map lock; all I/O on it happens outside.
    pub fn lookup(&self, id: &str) -> Option<ConnectionRecord> {
        self.connections.get(id).map(|record| record.value().clone())
    }

    /// Identifiers of all registered connections.
    pub fn ids(&self) -> Vec<String> {
        self.connections
            .iter()
            .map(|record| record.key().clone())
            .collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
