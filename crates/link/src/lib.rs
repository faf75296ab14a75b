//! Courier Link
//!
//! The single long-lived connection to the controller. One task owns the
//! socket: the write half drains a bounded send queue, the read half posts
//! every received frame onto the inbound channel consumed by the agent
//! dispatcher.
//!
//! # Guarantees
//!
//! - Outbound frames hit the wire in send-queue arrival order.
//! - Inbound frames reach the dispatcher in connection order; nothing is
//!   promised across reconnects.
//! - While disconnected, [`LinkHandle::send`] fails fast and frames already
//!   queued are failed (dropped with a warning), not silently retried.
//! - On disconnect the link re-dials under exponential backoff (base 1s,
//!   cap 60s, ±20% jitter) and re-sends the registration frame before
//!   resuming traffic.

mod backoff;
mod error;

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use courier_protocol::{decode_frame, encode_frame, frame_len, Envelope};

pub use backoff::Backoff;
pub use error::LinkError;

/// Controller link configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Controller host.
    pub host: String,

    /// Controller port.
    pub port: u16,

    /// Dial timeout per attempt.
    pub connect_timeout: Duration,

    /// Capacity of the outbound send queue.
    pub send_queue_size: usize,

    /// Capacity of the inbound channel to the dispatcher.
    pub inbound_queue_size: usize,
}

impl LinkConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(10),
            send_queue_size: 1024,
            inbound_queue_size: 1024,
        }
    }
}

/// Handle for sending frames to the controller from any worker.
#[derive(Clone)]
pub struct LinkHandle {
    outbound: mpsc::Sender<Envelope>,
    connected: watch::Receiver<bool>,
}

impl LinkHandle {
    /// Build a handle from raw channel parts.
    ///
    /// For embedders and tests that stand in for the link task; `spawn`
    /// constructs the real one.
    pub fn from_parts(outbound: mpsc::Sender<Envelope>, connected: watch::Receiver<bool>) -> Self {
        Self { outbound, connected }
    }

    /// Queue a frame for the controller.
    ///
    /// Fails fast with [`LinkError::Disconnected`] while no connection is
    /// up; ordering on the wire is arrival order at this queue.
    pub async fn send(&self, envelope: Envelope) -> Result<(), LinkError> {
        if !*self.connected.borrow() {
            return Err(LinkError::Disconnected);
        }
        self.outbound
            .send(envelope)
            .await
            .map_err(|_| LinkError::Closed)
    }

    /// Whether a connection is currently up.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait until the link reports connected.
    pub async fn wait_connected(&mut self) -> Result<(), LinkError> {
        while !*self.connected.borrow() {
            self.connected
                .changed()
                .await
                .map_err(|_| LinkError::Closed)?;
        }
        Ok(())
    }
}

/// Spawn the link task.
///
/// Returns the send handle, the inbound channel for the dispatcher, and the
/// task handle. `register` is sent first on every (re)connection; it
/// carries the agent's authentication.
pub fn spawn(
    config: LinkConfig,
    register: Envelope,
    cancel: CancellationToken,
) -> (LinkHandle, mpsc::Receiver<Envelope>, JoinHandle<Result<(), LinkError>>) {
    let (outbound_tx, outbound_rx) = mpsc::channel(config.send_queue_size);
    let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue_size);
    let (connected_tx, connected_rx) = watch::channel(false);

    let handle = LinkHandle {
        outbound: outbound_tx,
        connected: connected_rx,
    };

    let task = tokio::spawn(run(
        config,
        register,
        cancel,
        outbound_rx,
        inbound_tx,
        connected_tx,
    ));

    (handle, inbound_rx, task)
}

/// Why the current connection ended.
enum ConnectionEnd {
    Cancelled,
    DispatcherGone,
    Failed,
}

async fn run(
    config: LinkConfig,
    register: Envelope,
    cancel: CancellationToken,
    mut outbound: mpsc::Receiver<Envelope>,
    inbound: mpsc::Sender<Envelope>,
    connected: watch::Sender<bool>,
) -> Result<(), LinkError> {
    if config.host.is_empty() {
        return Err(LinkError::InvalidEndpoint {
            endpoint: format!("{}:{}", config.host, config.port),
        });
    }
    let endpoint = format!("{}:{}", config.host, config.port);

    let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        match dial(&endpoint, config.connect_timeout).await {
            Ok(mut stream) => match write_frame(&mut stream, &register).await {
                Ok(()) => {
                    backoff.reset();
                    connected.send_replace(true);
                    tracing::info!(endpoint = %endpoint, "connected to controller");

                    let end =
                        run_connection(stream, &mut outbound, &inbound, &cancel).await;

                    connected.send_replace(false);
                    fail_pending(&mut outbound);

                    match end {
                        ConnectionEnd::Cancelled => return Ok(()),
                        ConnectionEnd::DispatcherGone => {
                            tracing::debug!("inbound consumer gone, link exiting");
                            return Ok(());
                        }
                        ConnectionEnd::Failed => {
                            tracing::warn!(endpoint = %endpoint, "connection lost");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint, error = %e, "registration failed");
                }
            },
            Err(e) => {
                tracing::warn!(endpoint = %endpoint, error = %e, "connect failed");
            }
        }

        let delay = backoff.next_delay();
        tracing::info!(delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}

async fn dial(endpoint: &str, timeout: Duration) -> Result<TcpStream, LinkError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(endpoint))
        .await
        .map_err(|_| {
            LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connect timed out",
            ))
        })??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Drive one established connection until it ends.
async fn run_connection(
    stream: TcpStream,
    outbound: &mut mpsc::Receiver<Envelope>,
    inbound: &mpsc::Sender<Envelope>,
    cancel: &CancellationToken,
) -> ConnectionEnd {
    let (reader, mut writer) = stream.into_split();

    // reads run in their own task: a frame read spans multiple awaits and
    // must not be dropped halfway by a select race
    let inbound = inbound.clone();
    let mut read_task = tokio::spawn(read_loop(reader, inbound));

    let end = loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(envelope) => {
                    if let Err(e) = write_frame(&mut writer, &envelope).await {
                        tracing::warn!(error = %e, "frame write failed");
                        break ConnectionEnd::Failed;
                    }
                }
                None => break ConnectionEnd::DispatcherGone,
            },
            end = &mut read_task => {
                break end.unwrap_or(ConnectionEnd::Failed);
            }
            _ = cancel.cancelled() => break ConnectionEnd::Cancelled,
        }
    };

    read_task.abort();
    end
}

async fn read_loop(mut reader: OwnedReadHalf, inbound: mpsc::Sender<Envelope>) -> ConnectionEnd {
    loop {
        match read_frame(&mut reader).await {
            Ok(envelope) => {
                if inbound.send(envelope).await.is_err() {
                    return ConnectionEnd::DispatcherGone;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "frame read ended");
                return ConnectionEnd::Failed;
            }
        }
    }
}

/// Fail frames that were queued while the connection dropped.
fn fail_pending(outbound: &mut mpsc::Receiver<Envelope>) {
    let mut dropped = 0usize;
    while outbound.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        tracing::warn!(dropped, "failed pending outbound frames on disconnect");
    }
}

/// Write one length-prefixed frame.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> Result<(), LinkError> {
    let frame = encode_frame(envelope)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Envelope, LinkError> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await?;
    let len = frame_len(prefix)?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(decode_frame(&body)?)
}
