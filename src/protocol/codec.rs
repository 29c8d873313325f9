//! Framed message codecs over bidirectional byte streams.
//!
//! A codec owns its stream and frames one [`Message`] per record. The JSON
//! codec is newline-delimited: one compact record, one `\n`. The msgpack
//! codec is declared for forward compatibility but not implemented.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};

use crate::config::ProtocolConfig;
use crate::error::{ReplError, Result};
use crate::protocol::message::Message;

/// Marker trait for the byte streams a codec can wrap.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

/// A type-erased bidirectional byte stream.
pub type BoxedStream = Box<dyn ByteStream>;

/// Bidirectional framed encoder/decoder for protocol messages.
///
/// Implementations own the underlying stream; `close` releases it.
#[async_trait]
pub trait Codec: Send {
    /// Write exactly one framed record.
    async fn encode(&mut self, msg: &Message) -> Result<()>;

    /// Read exactly one framed record.
    ///
    /// Returns `Ok(None)` on clean end-of-stream (peer closed).
    async fn decode(&mut self) -> Result<Option<Message>>;

    /// Release the underlying stream.
    async fn close(&mut self) -> Result<()>;
}

impl std::fmt::Debug for dyn Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Codec")
    }
}

/// Create a codec for the given format name over the given stream.
///
/// Supported formats: `"json"`, `"msgpack"`.
pub fn new_codec(format: &str, stream: BoxedStream) -> Result<Box<dyn Codec>> {
    match format {
        "json" => Ok(Box::new(JsonCodec::new(stream))),
        "msgpack" => Ok(Box::new(MsgpackCodec::new(stream))),
        other => Err(ReplError::UnsupportedCodec(other.to_string())),
    }
}

/// Newline-delimited JSON codec.
///
/// The decoder consumes one record per line, skipping blank lines between
/// records. A malformed record is an error, not a partial decode.
pub struct JsonCodec {
    reader: BufReader<ReadHalf<BoxedStream>>,
    writer: WriteHalf<BoxedStream>,
}

impl JsonCodec {
    pub fn new(stream: BoxedStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }
}

#[async_trait]
impl Codec for JsonCodec {
    async fn encode(&mut self, msg: &Message) -> Result<()> {
        let mut record = serde_json::to_vec(msg)?;
        record.push(b'\n');
        self.writer.write_all(&record).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn decode(&mut self) -> Result<Option<Message>> {
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Ok(None);
            }
            if n > ProtocolConfig::MAX_RECORD_BYTES {
                return Err(ReplError::RecordTooLarge {
                    max: ProtocolConfig::MAX_RECORD_BYTES,
                });
            }
            let record = line.trim();
            if record.is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_str(record)?));
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// MessagePack codec placeholder.
///
/// Declared in the capability set but not implemented in this revision.
/// Construction succeeds so that format selection stays uniform; any
/// encode or decode call aborts rather than silently falling back.
pub struct MsgpackCodec {
    stream: BoxedStream,
}

impl MsgpackCodec {
    pub fn new(stream: BoxedStream) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl Codec for MsgpackCodec {
    async fn encode(&mut self, _msg: &Message) -> Result<()> {
        panic!("msgpack codec not yet implemented");
    }

    async fn decode(&mut self) -> Result<Option<Message>> {
        panic!("msgpack codec not yet implemented");
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
