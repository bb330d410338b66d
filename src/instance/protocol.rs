//! Wire format between secondary and primary: one JSON object per line.
//!
//! ```text
//! → {"type":"open","paths":["/tmp/a.html"]}
//! ← {"type":"ack"}
//! → {"type":"status"}
//! ← {"type":"status","running":true,"pid":4242}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ConnectionError;

/// Request forwarded from a secondary invocation to the primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Launch the child, or bring it forward if it already runs.
    Launch,
    /// Open resources in the child (launching it if needed).
    Open { paths: Vec<String> },
    /// Raise the child's windows (launching it if needed).
    Activate,
    /// Report whether a child is running.
    Status,
    /// Stop the child and tear the primary down.
    Terminate,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Launch => "launch",
            Request::Open { .. } => "open",
            Request::Activate => "activate",
            Request::Status => "status",
            Request::Terminate => "terminate",
        }
    }
}

/// Reply of the primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ack,
    Status { running: bool, pid: Option<u32> },
    Error { message: String },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }
}

/// Writes `msg` followed by a newline.
pub(crate) async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line =
        serde_json::to_vec(msg).map_err(|e| ConnectionError::Protocol(e.to_string()))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one line and decodes it. `Ok(None)` on a clean end of stream.
pub(crate) async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, ConnectionError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    serde_json::from_str(line.trim_end())
        .map(Some)
        .map_err(|e| ConnectionError::Protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_wire_shape_is_tagged() {
        let json = serde_json::to_string(&Request::Open {
            paths: vec!["/tmp/a.html".into()],
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"open","paths":["/tmp/a.html"]}"#);

        let resp: Response =
            serde_json::from_str(r#"{"type":"status","running":true,"pid":42}"#).unwrap();
        assert_eq!(
            resp,
            Response::Status {
                running: true,
                pid: Some(42)
            }
        );
    }

    #[tokio::test]
    async fn test_line_framing_over_a_pipe() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut sr = BufReader::new(server);

        write_message(&mut client, &Request::Status).await.unwrap();
        write_message(&mut client, &Request::Terminate).await.unwrap();
        drop(client);

        let a: Option<Request> = read_message(&mut sr).await.unwrap();
        let b: Option<Request> = read_message(&mut sr).await.unwrap();
        let c: Option<Request> = read_message(&mut sr).await.unwrap();
        assert_eq!(a, Some(Request::Status));
        assert_eq!(b, Some(Request::Terminate));
        assert_eq!(c, None);
    }

    #[tokio::test]
    async fn test_garbage_is_a_protocol_error() {
        let mut input: &[u8] = b"hello\n";
        let res: Result<Option<Request>, _> = read_message(&mut input).await;
        assert!(matches!(res, Err(ConnectionError::Protocol(_))));
    }
}
