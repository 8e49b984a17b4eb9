//! Replies Flowing Back to Clients
//!
//! A [`Response`] is anything the event loop can enqueue on a client's
//! reply channel. Variants are a small tagged set rather than a trait
//! hierarchy; each carries exactly the data its wire encoding needs:
//!
//! - `Raw`: one of the three constant status lines (`+OK`, `+PONG`, `+BYE`)
//! - `Error`: `-ERR <message>\r\n`, optionally closing the connection
//! - `Str`: a protocol string, used for GET values and JSON payloads
//! - `Sync`: the initial replica download, an array header followed by one
//!   SET per item, flushed in chunks as the sink fills
//! - `Broadcast`: one mirrored write command in array form
//!
//! A final response tells the write task to close the connection after
//! flushing; only `+BYE` and fatal errors are final.

use crate::command::Command;
use crate::keyspace::Item;
use crate::protocol::Sink;
use crate::stats::IoData;
use bytes::Bytes;
use serde::Serialize;
use tokio::io::AsyncWrite;

/// One reply, ready to be written to a sink.
#[derive(Debug, Clone)]
pub enum Response {
    Raw {
        data: &'static [u8],
        is_final: bool,
    },
    Error {
        message: String,
        is_final: bool,
    },
    Str(Bytes),
    Sync(Vec<Item>),
    Broadcast(Command),
}

impl Response {
    pub fn ok() -> Self {
        Response::Raw {
            data: b"+OK\r\n",
            is_final: false,
        }
    }

    pub fn pong() -> Self {
        Response::Raw {
            data: b"+PONG\r\n",
            is_final: false,
        }
    }

    /// The goodbye line; final, so the connection closes after the flush.
    pub fn bye() -> Self {
        Response::Raw {
            data: b"+BYE\r\n",
            is_final: true,
        }
    }

    pub fn error(message: impl Into<String>, is_final: bool) -> Self {
        Response::Error {
            message: message.into(),
            is_final,
        }
    }

    pub fn string(data: impl Into<Bytes>) -> Self {
        Response::Str(data.into())
    }

    /// Serializes any value as JSON carried in a protocol string.
    pub fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(payload) => Response::Str(Bytes::from(payload)),
            Err(e) => Response::error(format!("internal serialization error: {e}"), false),
        }
    }

    /// True when the write task must close the connection after sending.
    pub fn is_final(&self) -> bool {
        match self {
            Response::Raw { is_final, .. } => *is_final,
            Response::Error { is_final, .. } => *is_final,
            Response::Str(_) | Response::Sync(_) | Response::Broadcast(_) => false,
        }
    }

    /// Writes this response through the sink, returning the I/O accounting
    /// for everything flushed.
    pub async fn write<W: AsyncWrite + Unpin>(
        &self,
        sink: &mut Sink<W>,
    ) -> std::io::Result<IoData> {
        match self {
            Response::Raw { data, .. } => sink.flush_raw(data).await,
            Response::Error { message, .. } => {
                sink.flush_raw(format!("-ERR {message}\r\n").as_bytes()).await
            }
            Response::Str(data) => sink.flush_protocol_string(data).await,
            Response::Sync(items) => Self::write_sync(items, sink).await,
            Response::Broadcast(command) => {
                sink.flush_array_of_protocol_strings(&command.to_pieces())
                    .await
            }
        }
    }

    /// Streams the initial replica dataset: `*<count>\r\n` then one
    /// array-form SET per item, flushing whenever the sink fills so a big
    /// keyspace never materializes in one buffer.
    async fn write_sync<W: AsyncWrite + Unpin>(
        items: &[Item],
        sink: &mut Sink<W>,
    ) -> std::io::Result<IoData> {
        let mut total = IoData::new();
        sink.write(format!("*{}\r\n", items.len()).as_bytes());

        for item in items {
            sink.write_array_of_protocol_strings(&item.set_command_pieces());
            if sink.full() {
                total.merge(sink.flush().await?);
            }
        }

        total.merge(sink.flush().await?);
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::Keyspace;
    use crate::protocol::NETWORK_SINK_THRESHOLD;

    async fn render(response: Response) -> Vec<u8> {
        let mut out = Vec::new();
        let mut sink = Sink::new(&mut out, NETWORK_SINK_THRESHOLD);
        response.write(&mut sink).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_constant_status_lines() {
        assert_eq!(render(Response::ok()).await, b"+OK\r\n");
        assert_eq!(render(Response::pong()).await, b"+PONG\r\n");
        assert_eq!(render(Response::bye()).await, b"+BYE\r\n");
    }

    #[test]
    fn test_finality() {
        assert!(!Response::ok().is_final());
        assert!(!Response::pong().is_final());
        assert!(Response::bye().is_final());
        assert!(Response::error("nope", true).is_final());
        assert!(!Response::error("nope", false).is_final());
    }

    #[tokio::test]
    async fn test_error_format() {
        let rendered = render(Response::error("Key \"k\" not found", false)).await;
        assert_eq!(rendered, b"-ERR Key \"k\" not found\r\n");
    }

    #[tokio::test]
    async fn test_string_response_is_length_prefixed() {
        let rendered = render(Response::string(&b"F398BC5672A51D8D"[..])).await;
        assert_eq!(rendered, b"$16\r\nF398BC5672A51D8D\r\n");
    }

    #[tokio::test]
    async fn test_json_response() {
        let keys = vec!["a".to_string(), "b".to_string()];
        let rendered = render(Response::json(&keys)).await;
        assert_eq!(rendered, b"$9\r\n[\"a\",\"b\"]\r\n");
    }

    #[tokio::test]
    async fn test_broadcast_renders_array_form() {
        let cmd = Command::set("k".to_string(), Bytes::from_static(b"v"), 0);
        let rendered = render(Response::Broadcast(cmd)).await;
        assert_eq!(&rendered[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n" as &[u8]);
    }

    #[tokio::test]
    async fn test_sync_streams_header_then_one_set_per_item() {
        let mut ks = Keyspace::new();
        ks.set("k".to_string(), Bytes::from_static(b"v"), 0);

        let rendered = render(Response::Sync(ks.items())).await;
        assert_eq!(
            &rendered[..],
            b"*1\r\n*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n" as &[u8]
        );
    }

    #[tokio::test]
    async fn test_sync_of_empty_keyspace() {
        let rendered = render(Response::Sync(Vec::new())).await;
        assert_eq!(rendered, b"*0\r\n");
    }

    #[tokio::test]
    async fn test_sync_reports_merged_io() {
        let mut ks = Keyspace::new();
        for i in 0..100 {
            ks.set(format!("key{i}"), Bytes::from_static(&[b'x'; 64]), 0);
        }

        let mut out = Vec::new();
        let mut sink = Sink::new(&mut out, 256);
        let data = Response::Sync(ks.items()).write(&mut sink).await.unwrap();

        // Multiple threshold flushes happened and every byte is accounted.
        assert!(data.calls > 1);
        assert_eq!(data.bytes, out.len());
    }
}
