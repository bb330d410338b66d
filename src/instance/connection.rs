use std::path::PathBuf;

use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::{self, Instant};

use crate::error::ConnectionError;
use crate::events::{Bus, Event, EventKind};
use crate::instance::protocol::{Request, Response, read_message, write_message};
use crate::policies::BackoffPolicy;

/// Progress of the secondary→primary channel.
///
/// `retry_count` only grows until the channel is established or the attempt
/// ceiling is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub established: bool,
    pub retry_count: u32,
    pub last_attempt: Option<Instant>,
}

/// Connects a secondary to the primary, tolerating a primary that is still
/// binding its socket.
pub struct Connector {
    socket_path: PathBuf,
    backoff: BackoffPolicy,
    attempts: u32,
    bus: Bus,
    state: ConnectionState,
}

impl Connector {
    pub fn new(socket_path: PathBuf, backoff: BackoffPolicy, attempts: u32, bus: Bus) -> Self {
        Self {
            socket_path,
            backoff,
            attempts: attempts.max(1),
            bus,
            state: ConnectionState::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Probes the primary up to `attempts` times with backoff between probes.
    pub async fn connect_to_primary(&mut self) -> Result<Connection, ConnectionError> {
        loop {
            self.state.last_attempt = Some(Instant::now());
            let err = match UnixStream::connect(&self.socket_path).await {
                Ok(stream) => {
                    self.state.established = true;
                    self.bus.publish(
                        Event::new(EventKind::ConnectedToPrimary)
                            .with_attempt(self.state.retry_count + 1),
                    );
                    return Ok(Connection::new(stream));
                }
                Err(e) => e,
            };

            self.state.retry_count += 1;
            if self.state.retry_count >= self.attempts {
                return Err(ConnectionError::Exhausted {
                    attempts: self.state.retry_count,
                    last: err.to_string(),
                });
            }

            let delay = self.backoff.next(self.state.retry_count - 1);
            tracing::debug!(
                attempt = self.state.retry_count,
                ?delay,
                error = %err,
                "primary not reachable yet"
            );
            self.bus.publish(
                Event::new(EventKind::ConnectAttemptFailed)
                    .with_attempt(self.state.retry_count)
                    .with_delay(delay)
                    .with_reason(err.to_string()),
            );
            time::sleep(delay).await;
        }
    }
}

/// An established request/response channel to the primary.
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    fn new(stream: UnixStream) -> Self {
        let (r, w) = stream.into_split();
        Self {
            reader: BufReader::new(r),
            writer: w,
        }
    }

    /// Sends `request` and waits for the primary's reply.
    pub async fn forward(&mut self, request: &Request) -> Result<Response, ConnectionError> {
        write_message(&mut self.writer, request).await?;
        read_message(&mut self.reader).await?.ok_or_else(|| {
            ConnectionError::Protocol("primary closed the connection without replying".into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixListener;

    fn fast() -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(20),
            max: Duration::from_millis(100),
            factor: 2.0,
            jitter: crate::policies::JitterPolicy::None,
        }
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Bus::new(32);
        let mut rx = bus.subscribe();
        let mut c = Connector::new(dir.path().join("none.sock"), fast(), 3, bus);

        match c.connect_to_primary().await {
            Err(ConnectionError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected: {:?}", other.err()),
        }
        let state = c.state();
        assert!(!state.established);
        assert_eq!(state.retry_count, 3);

        let failures: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| e.kind == EventKind::ConnectAttemptFailed)
            .map(|e| e.attempt.unwrap())
            .collect();
        assert_eq!(failures, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_late_primary_is_reached_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.sock");
        let bind_path = path.clone();

        let primary = tokio::spawn(async move {
            time::sleep(Duration::from_millis(50)).await;
            let listener = UnixListener::bind(&bind_path).unwrap();
            let (stream, _) = listener.accept().await.unwrap();
            let (r, mut w) = stream.into_split();
            let mut r = BufReader::new(r);
            let req: Request = read_message(&mut r).await.unwrap().unwrap();
            assert_eq!(req, Request::Activate);
            write_message(&mut w, &Response::Ack).await.unwrap();
        });

        let mut c = Connector::new(path, fast(), 10, Bus::new(32));
        let mut conn = c.connect_to_primary().await.unwrap();
        assert!(c.state().established);
        assert!(c.state().retry_count >= 1);
        assert_eq!(conn.forward(&Request::Activate).await.unwrap(), Response::Ack);
        primary.await.unwrap();
    }

    #[tokio::test]
    async fn test_primary_hanging_up_is_a_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rude.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.shutdown().await.unwrap();
        });

        let mut conn = Connector::new(path, fast(), 1, Bus::new(4))
            .connect_to_primary()
            .await
            .unwrap();
        assert!(matches!(
            conn.forward(&Request::Status).await,
            Err(ConnectionError::Protocol(_) | ConnectionError::Io(_))
        ));
    }
}
