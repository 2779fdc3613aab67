//! Per-connection protocol engine.
//!
//! Each accepted socket gets one session task. The session owns the read
//! side: it arms the idle deadline, reads command lines through the framer,
//! dispatches them, and writes responses. Foreign sessions reach this
//! connection only through its registry handle, for `INFO` probes and relay
//! frames.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info};

use roster_common::protocol::command::{self, Request, Response};
use roster_common::protocol::framing::{self, Line};
use roster_common::protocol::WRITE_TIMEOUT;
use roster_common::Result;

use crate::registry::{ConnectionHandle, Registry};
use crate::relay;

/// Tunables a session inherits from the server shell.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Read-inactivity bound; expiry closes the connection.
    pub idle_timeout: Duration,
}

/// What the loop does after a command.
enum Flow {
    Continue,
    Quit,
}

/// Drive one client connection to completion.
pub async fn run<S>(
    stream: S,
    peer_addr: String,
    registry: Arc<Registry>,
    settings: SessionSettings,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (handle, closed) = ConnectionHandle::new(Box::new(write_half));

    info!("{} <- connected", peer_addr);
    let mut session = Session {
        reader: BufReader::new(read_half),
        handle,
        closed,
        peer_addr: peer_addr.clone(),
        id: None,
        registry,
        settings,
    };
    session.run().await;
    info!("{} -> disconnected", peer_addr);
}

struct Session<R> {
    reader: BufReader<R>,
    handle: ConnectionHandle,
    closed: watch::Receiver<bool>,
    peer_addr: String,
    /// Set by the first successful `CONNECT`.
    id: Option<String>,
    registry: Arc<Registry>,
    settings: SessionSettings,
}

impl<R> Session<R>
where
    R: AsyncRead + Unpin,
{
    async fn run(&mut self) {
        loop {
            let line = tokio::select! {
                // Displaced by a newer CONNECT, or evicted after a failed
                // foreign write.
                _ = self.closed.changed() => break,
                read = time::timeout(
                    self.settings.idle_timeout,
                    framing::read_line(&mut self.reader),
                ) => match read {
                    Err(_) => {
                        debug!("{} idle timeout", self.peer_addr);
                        break;
                    }
                    Ok(Err(e)) => {
                        debug!("{} read error: {}", self.peer_addr, e);
                        break;
                    }
                    Ok(Ok(line)) => line,
                },
            };

            let Line::Command(text) = line else {
                // Oversized: dropped without reply or state change.
                continue;
            };

            if let Some(id) = &self.id {
                self.registry.touch(id);
            }

            let request = Request::parse(&text);
            debug!("{} {} {}", self.peer_addr, request.verb, request.param);
            match self.dispatch(&request).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => break,
                Err(e) => {
                    // A failed write to our own socket ends the session.
                    debug!("{} write error: {}", self.peer_addr, e);
                    break;
                }
            }
        }
        self.teardown();
    }

    async fn dispatch(&mut self, request: &Request) -> Result<Flow> {
        match request.verb.as_str() {
            command::CONNECT => self.handle_connect(&request.param).await,
            command::STATUS => self.handle_status(&request.param).await,
            command::INFO => self.handle_info(&request.param).await,
            command::PING => {
                self.send(Response::ok(command::PING).with_arg(&request.param))
                    .await?;
                Ok(Flow::Continue)
            }
            command::DISCONNECT => {
                self.send(Response::ok(command::DISCONNECT)).await?;
                Ok(Flow::Quit)
            }
            command::TO => self.handle_to(&request.param).await,
            // Unknown verbs, PONG included, are dropped without a reply.
            _ => Ok(Flow::Continue),
        }
    }

    async fn handle_connect(&mut self, param: &str) -> Result<Flow> {
        if self.id.is_some() {
            self.send(Response::error(command::CONNECT).with_arg("already connected"))
                .await?;
            return Ok(Flow::Continue);
        }
        if param.is_empty() {
            self.send(Response::error(command::CONNECT).with_arg("empty id"))
                .await?;
            return Ok(Flow::Continue);
        }

        let (id, reported_addr) = command::split_connect_param(param);
        self.registry
            .add(id, &self.peer_addr, reported_addr, self.handle.clone());
        self.id = Some(id.to_string());
        self.send(
            Response::ok(command::CONNECT)
                .with_arg(id)
                .with_arg(&self.peer_addr),
        )
        .await?;
        Ok(Flow::Continue)
    }

    async fn handle_status(&mut self, param: &str) -> Result<Flow> {
        match &self.id {
            Some(id) => {
                self.registry.set_status(id, param);
                self.send(Response::ok(command::STATUS).with_arg(param))
                    .await?;
            }
            None => {
                self.send(Response::error(command::STATUS).with_arg("not connected"))
                    .await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn handle_info(&mut self, target: &str) -> Result<Flow> {
        let record = match self.registry.lookup(target) {
            Some(record) if record.is_fresh(self.settings.idle_timeout) => record,
            Some(_) => {
                // Expired while still registered: its owner has not torn
                // down yet, but the record is no longer advertisable.
                self.registry.remove(target);
                self.send(
                    Response::error(command::INFO)
                        .with_arg(target)
                        .with_arg("not found"),
                )
                .await?;
                return Ok(Flow::Continue);
            }
            None => {
                self.send(
                    Response::error(command::INFO)
                        .with_arg(target)
                        .with_arg("not found"),
                )
                .await?;
                return Ok(Flow::Continue);
            }
        };

        // Liveness probe: the record is only returned if the target's socket
        // still accepts a write. The target sees an unsolicited PING line
        // carrying the requester's id and will answer OK PING, which lands
        // back here as an unknown verb and is ignored.
        let sender = self.id.as_deref().unwrap_or("");
        let probe = format!("{} {}\n", command::PING, sender);
        if record.handle.write_line(&probe, WRITE_TIMEOUT).await.is_err() {
            debug!("{} probe of {} failed", self.peer_addr, target);
            self.registry.remove(target);
            self.send(
                Response::error(command::INFO)
                    .with_arg(target)
                    .with_arg("not found"),
            )
            .await?;
            return Ok(Flow::Continue);
        }

        self.send(
            Response::ok(command::INFO)
                .with_arg(target)
                .with_arg(&record.observed_addr)
                .with_arg(&record.reported_addr)
                .with_arg(record.updated_rfc3339())
                .with_arg(&record.status),
        )
        .await?;
        Ok(Flow::Continue)
    }

    async fn handle_to(&mut self, target: &str) -> Result<Flow> {
        let sender = self.id.clone().unwrap_or_default();
        let response = relay::relay(
            &mut self.reader,
            &sender,
            target,
            &self.registry,
            self.settings.idle_timeout,
        )
        .await;
        self.send(response).await?;
        Ok(Flow::Continue)
    }

    async fn send(&self, response: Response) -> Result<()> {
        self.handle.write_line(&response.to_line(), WRITE_TIMEOUT).await
    }

    fn teardown(&self) {
        if let Some(id) = &self.id {
            self.registry.remove_if_handle(id, &self.handle);
        }
        self.handle.close();
    }
}
