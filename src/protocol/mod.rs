//! Wire protocol: the message schema and the framed codecs that carry it.
//!
//! A [`Message`] is the single record type exchanged in both directions.
//! A [`Codec`] frames messages over a bidirectional byte stream; the codec
//! is chosen by format name when a connection is set up.

pub mod codec;
pub mod message;

pub use codec::{new_codec, BoxedStream, Codec, JsonCodec, MsgpackCodec};
pub use message::Message;
