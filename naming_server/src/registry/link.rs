use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use fstree::FsError;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite},
    sync::{Notify, mpsc, oneshot},
};
use utilities::{
    frame::{read_text, write_text},
    logger::{Instrument, Span, info, trace, warn},
};

struct Exchange {
    request: String,
    reply: oneshot::Sender<Result<String, FsError>>,
}

/// Command channel to one registered storage server.
///
/// A single task owns the socket. Callers open a [`LinkSession`], and the
/// task serves that session's request/reply pairs back to back until it is
/// dropped, so a multi step exchange such as COPY is never interleaved with
/// another caller's command. While idle the task watches the socket, and a
/// close or an unsolicited byte marks the link inactive.
#[derive(Debug, Clone)]
pub struct ServerLink {
    sessions: mpsc::Sender<mpsc::Receiver<Exchange>>,
    active: Arc<AtomicBool>,
    closed: Arc<Notify>,
}

pub struct LinkSession {
    exchanges: mpsc::Sender<Exchange>,
}

enum Step {
    Continue,
    Stop,
}

impl ServerLink {
    /// Spawns the task owning `stream`. `membership` is notified once the
    /// link goes inactive.
    pub fn spawn<S>(stream: S, label: String, membership: Arc<Notify>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sessions, session_rx) = mpsc::channel(16);
        let link = ServerLink {
            sessions,
            active: Arc::new(AtomicBool::new(true)),
            closed: Arc::new(Notify::new()),
        };
        let active = link.active.clone();
        let closed = link.closed.clone();
        tokio::spawn(
            async move {
                Self::run(stream, session_rx, closed).await;
                active.store(false, Ordering::SeqCst);
                info!(server = %label, "Storage server link is inactive");
                membership.notify_one();
            }
            .instrument(Span::current()),
        );
        link
    }

    async fn run<S>(mut stream: S, mut sessions: mpsc::Receiver<mpsc::Receiver<Exchange>>, closed: Arc<Notify>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut probe = [0u8; 1];
        loop {
            let step = tokio::select! {
                session = sessions.recv() => match session {
                    Some(session) => Self::serve_session(&mut stream, session).await,
                    None => Step::Stop,
                },
                read = stream.read(&mut probe) => {
                    match read {
                        Ok(0) => info!("Storage server closed its command channel"),
                        Ok(_) => warn!("Unsolicited data on the command channel"),
                        Err(e) => warn!(error = %e, "Command channel failed"),
                    }
                    Step::Stop
                }
                _ = closed.notified() => Step::Stop,
            };
            if let Step::Stop = step {
                break;
            }
        }
    }

    async fn serve_session<S>(stream: &mut S, mut session: mpsc::Receiver<Exchange>) -> Step
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some(exchange) = session.recv().await {
            trace!(request = %exchange.request, "Forwarding to storage server");
            let result = Self::round_trip(stream, &exchange.request).await;
            let failed = result.is_err();
            let _ = exchange.reply.send(result);
            if failed {
                return Step::Stop;
            }
        }
        Step::Continue
    }

    async fn round_trip<S>(stream: &mut S, request: &str) -> Result<String, FsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        write_text(stream, request)
            .await
            .map_err(|e| FsError::PeerUnreachable(e.to_string()))?;
        read_text(stream)
            .await
            .map_err(|e| FsError::PeerUnreachable(e.to_string()))
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stops the owning task and drops the socket.
    pub fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.closed.notify_one();
    }

    pub async fn session(&self) -> Result<LinkSession, FsError> {
        if !self.is_active() {
            return Err(FsError::ServerInactive);
        }
        let (exchanges, exchange_rx) = mpsc::channel(1);
        self.sessions
            .send(exchange_rx)
            .await
            .map_err(|_| FsError::ServerInactive)?;
        Ok(LinkSession { exchanges })
    }

    /// One command, one reply.
    pub async fn exchange(&self, request: &str) -> Result<String, FsError> {
        self.session().await?.exchange(request).await
    }
}

impl LinkSession {
    pub async fn exchange(&self, request: &str) -> Result<String, FsError> {
        let (reply, reply_rx) = oneshot::channel();
        self.exchanges
            .send(Exchange {
                request: request.to_owned(),
                reply,
            })
            .await
            .map_err(|_| FsError::ServerInactive)?;
        reply_rx.await.map_err(|_| FsError::ServerInactive)?
    }
}
