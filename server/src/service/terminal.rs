//! Terminal session multiplexer
//!
//! One interactive shell per container, shared by every client attached to
//! it. Output is kept in a bounded scrollback so a reattaching client sees
//! recent history. When the last client leaves, the shell survives a grace
//! period before it is torn down.
//!
//! Keystrokes go through a queue drained by a writer task per shell, so a
//! shell that stops reading stdin never holds the session lock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::types::ServerMessage;
use crate::error::{Error, Result};
use crate::infra::runtime::{ContainerRuntime, ShellOpts};
use crate::service::hub::SessionHub;
use crate::Config;

/// Queued input chunks per shell
const INPUT_QUEUE: usize = 256;

/// How long a closing shell gets to take its interrupt before the writer is dropped
const WRITER_DRAIN: Duration = Duration::from_secs(5);

/// Live shell of one container
struct PtySession {
    generation: u64,
    exec_id: String,
    attached: HashSet<String>,
    scrollback: VecDeque<String>,
    input: mpsc::Sender<Bytes>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    teardown: Option<JoinHandle<()>>,
}

impl PtySession {
    fn send_attached(&self, hub: &SessionHub, msg: &ServerMessage) {
        for client_id in &self.attached {
            hub.send_to(client_id, msg.clone());
        }
    }

    /// Interrupt the foreground process and close the shell
    fn close(self) {
        let PtySession {
            exec_id,
            input,
            mut writer,
            reader,
            teardown,
            ..
        } = self;

        if let Some(timer) = teardown {
            timer.abort();
        }
        if let Err(e) = input.try_send(Bytes::from_static(b"\x03")) {
            debug!("Failed to interrupt shell {}: {}", exec_id, e);
        }
        // the writer shuts stdin down once the queue is closed and drained
        drop(input);
        reader.abort();

        tokio::spawn(async move {
            if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
                warn!("Shell {} did not take its input, dropping it", exec_id);
                writer.abort();
            }
        });
    }
}

type SessionSlot = Arc<Mutex<Option<PtySession>>>;
type SessionMap = Arc<DashMap<String, SessionSlot>>;

/// Drop the registry entry of an emptied slot. Call with the slot's lock held.
fn release(sessions: &SessionMap, container_id: &str, slot: &SessionSlot) {
    sessions.remove_if(container_id, |_, current| Arc::ptr_eq(current, slot));
}

/// Terminal session multiplexer
pub struct TerminalService {
    runtime: Arc<dyn ContainerRuntime>,
    hub: Arc<SessionHub>,
    config: Arc<Config>,
    sessions: SessionMap,
    generations: AtomicU64,
}

impl TerminalService {
    /// Create a new terminal service
    pub fn new(runtime: Arc<dyn ContainerRuntime>, hub: Arc<SessionHub>, config: Arc<Config>) -> Self {
        Self {
            runtime,
            hub,
            config,
            sessions: Arc::new(DashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    fn slot(&self, container_id: &str) -> SessionSlot {
        self.sessions
            .entry(container_id.to_string())
            .or_default()
            .clone()
    }

    fn existing_slot(&self, container_id: &str) -> Option<SessionSlot> {
        self.sessions.get(container_id).map(|s| s.clone())
    }

    /// Whether `slot` is still the registered slot of the container
    fn is_current(&self, container_id: &str, slot: &SessionSlot) -> bool {
        self.sessions
            .get(container_id)
            .map(|s| Arc::ptr_eq(&s, slot))
            .unwrap_or(false)
    }

    fn join(&self, session: &mut PtySession, container_id: &str, client_id: &str) {
        if let Some(timer) = session.teardown.take() {
            timer.abort();
            debug!("Cancelled terminal teardown for {}", container_id);
        }
        session.attached.insert(client_id.to_string());

        if !session.scrollback.is_empty() {
            let replay: String = session.scrollback.iter().map(String::as_str).collect();
            self.hub
                .send_to(client_id, ServerMessage::TerminalOutput { data: replay });
        }
        self.hub.send_to(
            client_id,
            ServerMessage::TerminalReady {
                container_id: container_id.to_string(),
            },
        );
        info!(
            "Client {} joined terminal of {} ({} attached)",
            client_id,
            container_id,
            session.attached.len()
        );
    }

    /// Attach a client to the container's shell, starting one if none is live.
    ///
    /// A client joining an existing shell gets the scrollback replayed to it
    /// alone before `terminal-ready`.
    pub async fn attach(&self, container_id: &str, client_id: &str) -> Result<()> {
        if let Some(slot) = self.existing_slot(container_id) {
            if let Some(session) = slot.lock().await.as_mut() {
                self.join(session, container_id, client_id);
                return Ok(());
            }
        }

        let running = self
            .runtime
            .inspect_container(container_id)
            .await?
            .map(|info| info.is_running())
            .unwrap_or(false);
        if !running {
            return Err(Error::InvalidContainerState {
                expected: "RUNNING".to_string(),
                actual: "not running".to_string(),
            });
        }

        loop {
            let slot = self.slot(container_id);
            let mut guard = slot.lock().await;
            // released while we waited for it
            if !self.is_current(container_id, &slot) {
                continue;
            }

            if let Some(session) = guard.as_mut() {
                self.join(session, container_id, client_id);
                return Ok(());
            }

            let session = match self.open(&slot, container_id, client_id).await {
                Ok(session) => session,
                Err(e) => {
                    release(&self.sessions, container_id, &slot);
                    return Err(e);
                }
            };
            *guard = Some(session);

            self.hub.send_to(
                client_id,
                ServerMessage::TerminalReady {
                    container_id: container_id.to_string(),
                },
            );
            info!("Started terminal for {} (client {})", container_id, client_id);
            return Ok(());
        }
    }

    /// Open a shell and start its reader and writer tasks
    async fn open(&self, slot: &SessionSlot, container_id: &str, client_id: &str) -> Result<PtySession> {
        let mut env = HashMap::new();
        env.insert("TERM".to_string(), "xterm-256color".to_string());
        let shell = self
            .runtime
            .open_shell(
                container_id,
                ShellOpts {
                    shell: self.config.shell.clone(),
                    user: self.config.shell_user.clone(),
                    working_dir: self.config.workspace_dir.clone(),
                    env,
                },
            )
            .await?;

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let reader = tokio::spawn(read_output(
            self.sessions.clone(),
            slot.clone(),
            generation,
            shell.output,
            self.hub.clone(),
            self.config.scrollback_limit,
            container_id.to_string(),
        ));

        let (input, queue) = mpsc::channel(INPUT_QUEUE);
        let writer = tokio::spawn(write_input(shell.input, queue, shell.exec_id.clone()));

        Ok(PtySession {
            generation,
            exec_id: shell.exec_id,
            attached: HashSet::from([client_id.to_string()]),
            scrollback: VecDeque::new(),
            input,
            writer,
            reader,
            teardown: None,
        })
    }

    /// Queue client keystrokes for the shell. Input without a live shell is dropped.
    pub async fn input(&self, container_id: &str, data: &str) -> Result<()> {
        let Some(slot) = self.existing_slot(container_id) else {
            warn!("Dropping terminal input for {}: no session", container_id);
            return Ok(());
        };
        let input = match slot.lock().await.as_ref() {
            Some(session) => session.input.clone(),
            None => {
                warn!("Dropping terminal input for {}: no session", container_id);
                return Ok(());
            }
        };

        input
            .send(Bytes::copy_from_slice(data.as_bytes()))
            .await
            .map_err(|_| Error::Terminal(format!("input of {} is closed", container_id)))
    }

    /// Resize the shell's pseudo-terminal if one is live
    pub async fn resize(&self, container_id: &str, rows: u16, cols: u16) -> Result<()> {
        let Some(slot) = self.existing_slot(container_id) else {
            return Ok(());
        };
        let exec_id = match slot.lock().await.as_ref() {
            Some(session) => session.exec_id.clone(),
            None => return Ok(()),
        };
        self.runtime.resize_shell(&exec_id, rows, cols).await
    }

    /// Detach a client. The last one out starts the teardown grace period.
    pub async fn detach(&self, container_id: &str, client_id: &str) {
        let Some(slot) = self.existing_slot(container_id) else {
            return;
        };
        let mut guard = slot.lock().await;
        let Some(session) = guard.as_mut() else {
            return;
        };

        if !session.attached.remove(client_id) {
            return;
        }
        debug!(
            "Client {} left terminal of {} ({} attached)",
            client_id,
            container_id,
            session.attached.len()
        );

        if session.attached.is_empty() && session.teardown.is_none() {
            let grace = self.config.terminal_grace();
            info!(
                "No clients on terminal of {}, closing in {:?} unless one returns",
                container_id, grace
            );
            session.teardown = Some(tokio::spawn(expire(
                self.sessions.clone(),
                slot.clone(),
                session.generation,
                grace,
                container_id.to_string(),
            )));
        }
    }

    /// Close the container's shell immediately
    pub async fn teardown(&self, container_id: &str) {
        let Some((_, slot)) = self.sessions.remove(container_id) else {
            return;
        };
        let session = slot.lock().await.take();
        if let Some(session) = session {
            session.close();
            info!("Closed terminal of {}", container_id);
        }
    }

    #[cfg(test)]
    async fn has_session(&self, container_id: &str) -> bool {
        match self.existing_slot(container_id) {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        }
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Grace period timer: close the shell if still nobody is attached
async fn expire(
    sessions: SessionMap,
    slot: SessionSlot,
    generation: u64,
    grace: Duration,
    container_id: String,
) {
    tokio::time::sleep(grace).await;

    let mut guard = slot.lock().await;
    let expired = matches!(
        guard.as_ref(),
        Some(s) if s.generation == generation && s.attached.is_empty()
    );
    if !expired {
        return;
    }

    if let Some(mut session) = guard.take() {
        release(&sessions, &container_id, &slot);
        drop(guard);
        // this task is the timer; closing must not abort it
        session.teardown = None;
        session.close();
        info!("Closed idle terminal of {}", container_id);
    }
}

/// Drain queued input into the shell's stdin, then close it
async fn write_input(
    mut stdin: Pin<Box<dyn AsyncWrite + Send>>,
    mut queue: mpsc::Receiver<Bytes>,
    exec_id: String,
) {
    while let Some(data) = queue.recv().await {
        if let Err(e) = stdin.write_all(&data).await {
            warn!("Write to shell {} failed: {}", exec_id, e);
            return;
        }
        if let Err(e) = stdin.flush().await {
            warn!("Flush to shell {} failed: {}", exec_id, e);
            return;
        }
    }
    let _ = stdin.shutdown().await;
}

/// Pump shell output into the scrollback and out to attached clients
async fn read_output(
    sessions: SessionMap,
    slot: SessionSlot,
    generation: u64,
    mut output: BoxStream<'static, Result<Bytes>>,
    hub: Arc<SessionHub>,
    scrollback_limit: usize,
    container_id: String,
) {
    let mut carry = Vec::new();

    let reason = loop {
        match output.next().await {
            Some(Ok(chunk)) => {
                let data = decode_chunk(&mut carry, &chunk);
                if data.is_empty() {
                    continue;
                }

                let mut guard = slot.lock().await;
                let Some(session) = guard.as_mut().filter(|s| s.generation == generation) else {
                    return;
                };
                session.scrollback.push_back(data.clone());
                while session.scrollback.len() > scrollback_limit {
                    session.scrollback.pop_front();
                }
                session.send_attached(&hub, &ServerMessage::TerminalOutput { data });
            }
            Some(Err(e)) => break format!("Terminal stream error: {}", e),
            None => break "Terminal session ended".to_string(),
        }
    };

    let mut guard = slot.lock().await;
    if !matches!(guard.as_ref(), Some(s) if s.generation == generation) {
        return;
    }
    if let Some(session) = guard.take() {
        release(&sessions, &container_id, &slot);
        warn!("Terminal of {} closed: {}", container_id, reason);
        session.send_attached(&hub, &ServerMessage::TerminalError { message: reason });
        if let Some(timer) = session.teardown {
            timer.abort();
        }
    }
}

/// Decode a chunk of terminal output, holding back a trailing partial UTF-8
/// sequence until the next chunk completes it
fn decode_chunk(carry: &mut Vec<u8>, chunk: &[u8]) -> String {
    carry.extend_from_slice(chunk);

    let split = match std::str::from_utf8(carry) {
        Ok(_) => carry.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => carry.len(),
    };

    let rest = carry.split_off(split);
    let text = String::from_utf8_lossy(carry).into_owned();
    *carry = rest;
    text
}
