//! Primary side of the channel: accepts secondaries and hands every request to
//! the coordination context, which answers through a oneshot.

use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::instance::protocol::{Request, Response, read_message, write_message};

/// Delivers a request to the coordination context. Returns `false` once it is gone.
pub type RequestSink = Arc<dyn Fn(Request, oneshot::Sender<Response>) -> bool + Send + Sync>;

/// Runs the accept loop until `token` is cancelled.
///
/// Must be called inside a tokio runtime.
pub fn serve(
    listener: std::os::unix::net::UnixListener,
    sink: RequestSink,
    token: CancellationToken,
) -> std::io::Result<JoinHandle<()>> {
    let listener = UnixListener::from_std(listener)?;
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        tokio::spawn(handle(stream, Arc::clone(&sink), token.child_token()));
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
            }
        }
        tracing::debug!("request listener stopped");
    }))
}

async fn handle(stream: UnixStream, sink: RequestSink, token: CancellationToken) {
    let (r, mut w) = stream.into_split();
    let mut r = BufReader::new(r);
    loop {
        let request: Request = tokio::select! {
            _ = token.cancelled() => return,
            read = read_message(&mut r) => match read {
                Ok(Some(req)) => req,
                Ok(None) => return,
                Err(e) => {
                    tracing::debug!(error = %e, "bad request from secondary");
                    let _ = write_message(&mut w, &Response::error(e.to_string())).await;
                    return;
                }
            },
        };

        let (tx, rx) = oneshot::channel();
        let response = if sink(request, tx) {
            rx.await
                .unwrap_or_else(|_| Response::error("primary is shutting down"))
        } else {
            Response::error("primary is shutting down")
        };
        if let Err(e) = write_message(&mut w, &response).await {
            tracing::debug!(error = %e, "secondary went away before the reply");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Bus;
    use crate::instance::connection::Connector;
    use crate::policies::BackoffPolicy;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_requests_are_forwarded_and_answered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sock");
        let std_listener = std::os::unix::net::UnixListener::bind(&path).unwrap();
        std_listener.set_nonblocking(true).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel::<(Request, oneshot::Sender<Response>)>();
        let sink: RequestSink = Arc::new(move |req, reply| tx.send((req, reply)).is_ok());
        let token = CancellationToken::new();
        let server = serve(std_listener, sink, token.clone()).unwrap();

        tokio::spawn(async move {
            while let Some((req, reply)) = rx.recv().await {
                let resp = match req {
                    Request::Status => Response::Status {
                        running: true,
                        pid: Some(7),
                    },
                    _ => Response::Ack,
                };
                let _ = reply.send(resp);
            }
        });

        let mut conn = Connector::new(path, BackoffPolicy::connect(), 1, Bus::new(4))
            .connect_to_primary()
            .await
            .unwrap();
        assert_eq!(
            conn.forward(&Request::Status).await.unwrap(),
            Response::Status {
                running: true,
                pid: Some(7)
            }
        );
        assert_eq!(
            conn.forward(&Request::Open {
                paths: vec!["a".into()]
            })
            .await
            .unwrap(),
            Response::Ack
        );

        token.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_session_yields_error_reply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sock");
        let std_listener = std::os::unix::net::UnixListener::bind(&path).unwrap();
        std_listener.set_nonblocking(true).unwrap();
        let sink: RequestSink = Arc::new(|_, _| false);
        let token = CancellationToken::new();
        let _server = serve(std_listener, sink, token.clone()).unwrap();

        let mut conn = Connector::new(path, BackoffPolicy::connect(), 1, Bus::new(4))
            .connect_to_primary()
            .await
            .unwrap();
        assert!(matches!(
            conn.forward(&Request::Launch).await.unwrap(),
            Response::Error { .. }
        ));
        token.cancel();
    }
}
