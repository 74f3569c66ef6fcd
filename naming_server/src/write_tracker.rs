//! Lifecycle of asynchronous writes reported by storage servers.
//!
//! Acks arrive on a dedicated listener, one frame per connection, and are
//! forwarded to a single tracker task that owns every record. The same task
//! sweeps for writes stuck in STARTED and warns their clients once.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use protocol::ack::{AckStatus, WriteAck, abandoned_notice, completed_notice, started_notice};
use tokio::{
    net::TcpListener,
    sync::mpsc,
    time::{Instant, MissedTickBehavior, interval},
};
use utilities::{
    frame::{read_text, write_text},
    logger::{Instrument, Level, Span, debug, error, info, span, trace, warn},
    result::Result,
    tcp_pool::TcpPool,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Started,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEvent {
    pub file: String,
    pub client_id: u64,
    pub client_ip: String,
    pub client_port: u16,
    pub status: WriteStatus,
}

impl From<WriteAck> for WriteEvent {
    fn from(ack: WriteAck) -> Self {
        Self {
            file: ack.file,
            client_id: ack.client_id,
            client_ip: ack.client_ip,
            client_port: ack.client_port,
            status: match ack.status {
                AckStatus::Start => WriteStatus::Started,
                AckStatus::End => WriteStatus::Completed,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct AsyncWriteState {
    pub file: String,
    pub client_id: u64,
    pub client_ip: String,
    pub client_port: u16,
    pub status: WriteStatus,
    pub updated_at: Instant,
    abandon_notified: bool,
}

/// At most one record per (file, client id).
#[derive(Debug, Default)]
pub struct WriteStateTable {
    records: HashMap<(String, u64), AsyncWriteState>,
}

impl WriteStateTable {
    pub fn record(&mut self, event: WriteEvent, now: Instant) {
        let key = (event.file.clone(), event.client_id);
        self.records.insert(
            key,
            AsyncWriteState {
                file: event.file,
                client_id: event.client_id,
                client_ip: event.client_ip,
                client_port: event.client_port,
                status: event.status,
                updated_at: now,
                abandon_notified: false,
            },
        );
    }

    pub fn get(&self, file: &str, client_id: u64) -> Option<&AsyncWriteState> {
        self.records.get(&(file.to_owned(), client_id))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records newly found stuck in STARTED for longer than `timeout`. Each
    /// record is reported once until a later event refreshes it.
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> Vec<AsyncWriteState> {
        let mut abandoned = Vec::new();
        for state in self.records.values_mut() {
            if state.status == WriteStatus::Started
                && !state.abandon_notified
                && now.saturating_duration_since(state.updated_at) > timeout
            {
                state.abandon_notified = true;
                abandoned.push(state.clone());
            }
        }
        abandoned
    }
}

/// Delivers a one-line notice to a client's ack port.
#[async_trait]
pub trait ClientNotifier: Send + Sync {
    async fn notify(&self, ip: &str, port: u16, message: &str) -> Result<()>;
}

pub struct TcpClientNotifier {
    pool: TcpPool,
}

impl TcpClientNotifier {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            pool: TcpPool::with_connect_timeout(connect_timeout),
        }
    }
}

#[async_trait]
impl ClientNotifier for TcpClientNotifier {
    async fn notify(&self, ip: &str, port: u16, message: &str) -> Result<()> {
        let mut stream = self.pool.get_connection(&format!("{ip}:{port}")).await?;
        write_text(&mut stream, message).await?;
        Ok(())
    }
}

fn deliver(notifier: &Arc<dyn ClientNotifier>, ip: String, port: u16, message: String) {
    let notifier = notifier.clone();
    tokio::spawn(
        async move {
            if let Err(e) = notifier.notify(&ip, port, &message).await {
                warn!(%ip, port, error = %e, "Could not notify client");
            }
        }
        .instrument(Span::current()),
    );
}

#[derive(Clone)]
pub struct WriteTracker {
    events: mpsc::Sender<WriteEvent>,
}

impl WriteTracker {
    pub fn start(notifier: Arc<dyn ClientNotifier>, check_interval: Duration, abandon_after: Duration) -> Self {
        let (events, mut event_rx) = mpsc::channel::<WriteEvent>(256);
        let span = span!(Level::INFO, "write_tracker");
        tokio::spawn(
            async move {
                let mut table = WriteStateTable::default();
                let mut ticker = interval(check_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        event = event_rx.recv() => {
                            let Some(event) = event else {
                                break;
                            };
                            let message = match event.status {
                                WriteStatus::Started => started_notice(&event.file),
                                WriteStatus::Completed => completed_notice(&event.file),
                            };
                            deliver(&notifier, event.client_ip.clone(), event.client_port, message);
                            table.record(event, Instant::now());
                        }
                        _ = ticker.tick() => {
                            for state in table.sweep(Instant::now(), abandon_after) {
                                warn!(file = %state.file, client = state.client_id, "Asynchronous write abandoned");
                                deliver(&notifier, state.client_ip, state.client_port, abandoned_notice(&state.file));
                            }
                        }
                    }
                }
                debug!("Write tracker stopped");
            }
            .instrument(span),
        );
        Self { events }
    }

    pub async fn submit(&self, event: WriteEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| "write tracker has stopped".into())
    }
}

/// Accepts one-shot ack connections, each carrying a single ack frame.
pub async fn serve_acks(listener: TcpListener, tracker: WriteTracker) -> Result<()> {
    loop {
        let (mut stream, peer) = listener.accept().await?;
        let tracker = tracker.clone();
        let span = span!(Level::INFO, "write_ack", %peer);
        tokio::spawn(
            async move {
                let ack = match read_text(&mut stream).await {
                    Ok(text) => text,
                    Err(e) => {
                        error!(error = %e, "Failed to read write ack");
                        return;
                    }
                };
                trace!(%ack, "Received write ack");
                match ack.parse::<WriteAck>() {
                    Ok(ack) => {
                        info!(file = %ack.file, client = ack.client_id, status = ?ack.status, "Write ack");
                        if let Err(e) = tracker.submit(ack.into()).await {
                            error!(error = %e, "Dropping write ack");
                        }
                    }
                    Err(e) => warn!(error = %e, "Malformed write ack"),
                }
            }
            .instrument(span),
        );
    }
}
