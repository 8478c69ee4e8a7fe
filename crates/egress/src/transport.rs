//! Unix socket serving surface
//!
//! `SocketServer` listens on a Unix socket and runs one subscription per
//! client connection. A client sends a single length-prefixed `Subscribe`
//! frame and then reads `Envelope` frames until the subscription ends;
//! terminal failures arrive as an `Error` frame carrying the error class.
//!
//! The socket is only the outermost skin: the subscription lifecycle lives
//! entirely in [`crate::EgressServer`], which sees the connection through
//! the [`EgressStream`] trait.

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use relay_protocol::{
    EgressMessage, Envelope, ErrorCode, ErrorFrame, MAX_FRAME_LEN, read_length_prefix,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::EgressConfig;
use crate::receiver::Receiver;
use crate::server::{EgressServer, EgressStream};

/// Unix socket front end for the egress server
pub struct SocketServer<R> {
    config: EgressConfig,
    server: Arc<EgressServer<R>>,
}

impl<R: Receiver + 'static> SocketServer<R> {
    /// Create a new socket server
    pub fn new(server: Arc<EgressServer<R>>, config: EgressConfig) -> Self {
        Self { config, server }
    }

    /// Get the socket path
    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Run the accept loop until the server-wide token is cancelled
    pub async fn run(&self) -> io::Result<()> {
        // Remove existing socket file
        if self.config.socket_path.exists() {
            std::fs::remove_file(&self.config.socket_path)?;
        }

        let listener = UnixListener::bind(&self.config.socket_path)?;

        info!(path = %self.config.socket_path.display(), "egress server listening");

        loop {
            tokio::select! {
                _ = self.server.shutdown_token().cancelled() => {
                    info!("egress server shutting down");
                    return Ok(());
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let server = Arc::clone(&self.server);

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, server).await {
                                    debug!(error = %e, "client connection ended");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }
    }

    /// Start the server in a background task
    pub fn spawn(self) -> tokio::task::JoinHandle<io::Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

/// Handle a single client connection
async fn handle_connection<R: Receiver + 'static>(
    stream: UnixStream,
    server: Arc<EgressServer<R>>,
) -> io::Result<()> {
    debug!("new egress client connected");

    let (mut read_half, mut write_half) = stream.into_split();

    let request = match read_message(&mut read_half).await? {
        EgressMessage::Subscribe(request) => request,
        _ => {
            let frame = ErrorFrame {
                code: ErrorCode::InvalidArgument,
                message: "expected subscribe message".into(),
            };
            write_half
                .write_all(&EgressMessage::Error(frame).encode())
                .await?;
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "expected subscribe message",
            ));
        }
    };

    let token = CancellationToken::new();
    let _teardown = token.clone().drop_guard();

    // The client sends nothing after its subscribe frame, so any completion
    // of a read means the peer hung up: cancel the stream scope.
    {
        let token = token.clone();
        tokio::spawn(async move {
            let mut scratch = [0u8; 1];
            tokio::select! {
                _ = token.cancelled() => {}
                _ = read_half.read(&mut scratch) => token.cancel(),
            }
        });
    }

    let mut stream = SocketStream { write_half, token };
    if let Err(e) = server.subscribe(request, &mut stream).await {
        let frame = ErrorFrame {
            code: e.code(),
            message: e.to_string(),
        };
        // Best effort: the peer may already be gone
        let _ = stream
            .write_half
            .write_all(&EgressMessage::Error(frame).encode())
            .await;
    }

    debug!("egress client disconnected");

    Ok(())
}

/// Read one length-prefixed message
async fn read_message(read_half: &mut OwnedReadHalf) -> io::Result<EgressMessage> {
    let mut len_buf = [0u8; 4];
    read_half.read_exact(&mut len_buf).await?;

    let msg_len = read_length_prefix(&len_buf)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "invalid length prefix"))?
        as usize;

    if msg_len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame too large",
        ));
    }

    let mut buf = BytesMut::zeroed(msg_len);
    read_half.read_exact(&mut buf).await?;

    EgressMessage::decode(Bytes::from(buf))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// One client's outbound stream: envelope frames over the socket
struct SocketStream {
    write_half: OwnedWriteHalf,
    token: CancellationToken,
}

#[async_trait]
impl EgressStream for SocketStream {
    async fn send(&mut self, envelope: Envelope) -> io::Result<()> {
        let frame = EgressMessage::Envelope(envelope).encode();
        self.write_half.write_all(&frame).await
    }

    fn context(&self) -> &CancellationToken {
        &self.token
    }
}
