//! TCP pub/sub transport for `tcp://host:port` addresses.
//!
//! The publisher listens on the endpoint and streams every published
//! frame, newline terminated, to each connected subscriber. Subscribers
//! dial the endpoint and keep redialing after a failure, so joining a
//! peer that has not bound yet simply starts delivering once it has.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use gossamer_protocol::Address;

use crate::{BindFuture, NetworkError, Publisher, Subscription, Transport};

/// Tunables for [`TcpTransport`].
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Frames buffered per connected subscriber before it lags.
    pub frame_buffer: usize,
    /// Pause between redial attempts.
    pub reconnect_delay: Duration,
    /// Frames longer than this are skipped by subscribers without being
    /// buffered in full.
    pub max_frame_len: usize,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            frame_buffer: 1024,
            reconnect_delay: Duration::from_millis(250),
            max_frame_len: 1 << 20,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    config: TcpTransportConfig,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Self {
        Self { config }
    }
}

/// Resolve `tcp://host:port` into the `host:port` socket string.
pub fn tcp_endpoint(address: &Address) -> Result<String, NetworkError> {
    match address.scheme() {
        Some("tcp") => {}
        Some(other) => {
            return Err(NetworkError::InvalidEndpoint(format!(
                "unsupported scheme '{other}' in {address}"
            )))
        }
        None => {
            return Err(NetworkError::InvalidEndpoint(format!(
                "missing tcp:// scheme in {address}"
            )))
        }
    }
    let endpoint = address.endpoint();
    match endpoint.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(endpoint.to_string())
        }
        _ => Err(NetworkError::InvalidEndpoint(format!(
            "expected host:port in {address}"
        ))),
    }
}

struct TcpPublisher {
    frames: broadcast::Sender<String>,
    accept_task: JoinHandle<()>,
}

impl Publisher for TcpPublisher {
    fn publish(&self, frame: &str) -> Result<usize, NetworkError> {
        if frame.contains('\n') {
            return Err(NetworkError::Publish("frame contains a newline".into()));
        }
        Ok(self.frames.send(frame.to_string()).unwrap_or(0))
    }
}

impl Drop for TcpPublisher {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_subscriber(
    mut stream: TcpStream,
    mut frames: broadcast::Receiver<String>,
    remote: std::net::SocketAddr,
) {
    loop {
        let frame = match frames.recv().await {
            Ok(frame) => frame,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(remote = %remote, skipped, "Subscriber connection lagged, frames dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let mut line = frame.into_bytes();
        line.push(b'\n');
        if let Err(e) = stream.write_all(&line).await {
            tracing::debug!(remote = %remote, error = %e, "Subscriber connection closed");
            break;
        }
    }
}

async fn accept_loop(listener: TcpListener, frames: broadcast::Sender<String>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                tracing::trace!(remote = %remote, "Subscriber connected");
                let _ = stream.set_nodelay(true);
                // Writer tasks end on their own once the sender is dropped.
                tokio::spawn(serve_subscriber(stream, frames.subscribe(), remote));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

/// One newline-delimited read from a subscription stream.
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Line(String),
    /// Longer than the cap. The rest of that line was read and thrown away.
    Oversized,
    NotUtf8,
    Closed,
}

/// Read the next line, never holding more than `max_len + 1` bytes of it.
async fn read_frame<R>(reader: &mut R, max_len: usize, buf: &mut Vec<u8>) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    let cap = max_len as u64 + 1;
    buf.clear();
    if (&mut *reader).take(cap).read_until(b'\n', buf).await? == 0 {
        return Ok(Frame::Closed);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() as u64 >= cap {
        loop {
            buf.clear();
            if (&mut *reader).take(cap).read_until(b'\n', buf).await? == 0 {
                return Ok(Frame::Closed);
            }
            if buf.last() == Some(&b'\n') {
                buf.clear();
                return Ok(Frame::Oversized);
            }
        }
    }
    Ok(match String::from_utf8(std::mem::take(buf)) {
        Ok(line) => Frame::Line(line),
        Err(_) => Frame::NotUtf8,
    })
}

async fn subscribe_loop(
    endpoint: String,
    inbound: mpsc::Sender<String>,
    config: TcpTransportConfig,
) {
    let mut buf = Vec::new();
    loop {
        match TcpStream::connect(&endpoint).await {
            Ok(stream) => {
                tracing::trace!(endpoint = %endpoint, "Subscribed");
                let mut reader = BufReader::new(stream);
                loop {
                    match read_frame(&mut reader, config.max_frame_len, &mut buf).await {
                        Ok(Frame::Line(line)) => {
                            if inbound.send(line).await.is_err() {
                                return;
                            }
                        }
                        Ok(Frame::Oversized) => {
                            tracing::warn!(endpoint = %endpoint, max = config.max_frame_len, "Oversized frame dropped");
                        }
                        Ok(Frame::NotUtf8) => {
                            tracing::warn!(endpoint = %endpoint, "Non UTF-8 frame dropped");
                        }
                        Ok(Frame::Closed) => break,
                        Err(e) => {
                            tracing::debug!(endpoint = %endpoint, error = %e, "Subscription read failed");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::trace!(endpoint = %endpoint, error = %e, "Dial failed, retrying");
            }
        }
        if inbound.is_closed() {
            return;
        }
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

impl Transport for TcpTransport {
    fn bind<'a>(&'a self, address: &'a Address) -> BindFuture<'a> {
        Box::pin(async move {
            let endpoint = tcp_endpoint(address)?;
            let listener = TcpListener::bind(&endpoint)
                .await
                .map_err(|e| NetworkError::Bind {
                    address: address.to_string(),
                    reason: e.to_string(),
                })?;
            let (frames, _) = broadcast::channel(self.config.frame_buffer.max(1));
            let accept_task = tokio::spawn(accept_loop(listener, frames.clone()));
            tracing::debug!(address = %address, "Publisher bound");
            Ok(Box::new(TcpPublisher {
                frames,
                accept_task,
            }) as Box<dyn Publisher>)
        })
    }

    fn subscribe(
        &self,
        address: &Address,
        inbound: mpsc::Sender<String>,
    ) -> Result<Subscription, NetworkError> {
        let endpoint = tcp_endpoint(address).map_err(|e| NetworkError::Subscribe {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        let task = tokio::spawn(subscribe_loop(endpoint, inbound, self.config.clone()));
        Ok(Subscription::new(address.clone(), task))
    }
}
