use super::{BoxTransport, Codec, Header, ReadCodec, WriteCodec};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use tokio::io::{ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

// type aliases
type FrameRead = FramedRead<ReadHalf<BoxTransport>, LengthDelimitedCodec>;
type FrameWrite = FramedWrite<WriteHalf<BoxTransport>, LengthDelimitedCodec>;

/// A serialization format carried in length delimited frames: one frame
/// for the header, one for the body.
pub trait Serialization: Send + Sync + 'static {
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>>;
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T>;
}

pub fn new_codec<S: Serialization>(transport: BoxTransport) -> Codec {
    let (read, write) = tokio::io::split(transport);
    let reader = FramedReader::<S> {
        frames: FrameRead::new(read, LengthDelimitedCodec::new()),
        format: PhantomData,
    };
    let writer = FramedWriter::<S> {
        frames: FrameWrite::new(write, LengthDelimitedCodec::new()),
        format: PhantomData,
    };
    Codec::new(Box::new(reader), Box::new(writer))
}

pub struct FramedReader<S> {
    frames: FrameRead,
    format: PhantomData<fn() -> S>,
}

impl<S> FramedReader<S> {
    async fn next_frame(&mut self) -> Result<BytesMut> {
        match self.frames.next().await {
            Some(frame) => Ok(frame?),
            None => Err(Error::ConnectionClosed),
        }
    }
}

#[async_trait]
impl<S: Serialization> ReadCodec for FramedReader<S> {
    async fn read_header(&mut self) -> Result<Header> {
        let bytes = self.next_frame().await?;
        S::decode(bytes.as_ref())
    }

    async fn read_body(&mut self, body: Option<&mut Value>) -> Result<()> {
        let bytes = self.next_frame().await?;
        if let Some(body) = body {
            *body = S::decode(bytes.as_ref())?;
        }
        Ok(())
    }
}

pub struct FramedWriter<S> {
    frames: FrameWrite,
    format: PhantomData<fn() -> S>,
}

#[async_trait]
impl<S: Serialization> WriteCodec for FramedWriter<S> {
    async fn write(&mut self, header: &Header, body: &Value) -> Result<()> {
        // encode and size-check both frames before touching the stream so a
        // bad body never leaves a lone header frame behind
        let header = Bytes::from(S::encode(header)?);
        let body = Bytes::from(S::encode(body)?);

        let max = self.frames.encoder().max_frame_length();
        if header.len() > max || body.len() > max {
            return Err(Error::Encode(format!(
                "frame of {} bytes exceeds the {} byte limit",
                header.len().max(body.len()),
                max
            )));
        }

        self.frames.feed(header).await?;
        self.frames.feed(body).await?;
        SinkExt::<Bytes>::flush(&mut self.frames).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        SinkExt::<Bytes>::close(&mut self.frames).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{json, msgpack};
    use serde_json::json;

    async fn exchange(new_codec: fn(BoxTransport) -> Codec) {
        let (a, b) = tokio::io::duplex(1024);
        let (_, mut writer) = new_codec(Box::new(a)).into_split();
        let (mut reader, _) = new_codec(Box::new(b)).into_split();

        writer
            .write(&Header::request("Foo.Sum", 1), &json!({"a": 1, "b": 2}))
            .await
            .unwrap();
        writer
            .write(&Header::request("Foo.Diff", 2), &json!([3, 4]))
            .await
            .unwrap();

        // skip the first body without decoding it
        let header = reader.read_header().await.unwrap();
        assert_eq!(header.service_method, "Foo.Sum");
        reader.read_body(None).await.unwrap();

        let header = reader.read_header().await.unwrap();
        assert_eq!(header, Header::request("Foo.Diff", 2));
        let mut body = Value::Null;
        reader.read_body(Some(&mut body)).await.unwrap();
        assert_eq!(body, json!([3, 4]));
    }

    #[tokio::test]
    async fn msgpack_frames_stay_aligned_when_a_body_is_discarded() {
        exchange(msgpack::new_codec).await;
    }

    #[tokio::test]
    async fn json_frames_stay_aligned_when_a_body_is_discarded() {
        exchange(json::new_codec).await;
    }

    #[tokio::test]
    async fn closed_stream_reads_as_connection_closed() {
        let (a, b) = tokio::io::duplex(64);
        let (_, mut writer) = msgpack::new_codec(Box::new(a)).into_split();
        let (mut reader, _) = msgpack::new_codec(Box::new(b)).into_split();

        writer.close().await.unwrap();
        match reader.read_header().await {
            Err(Error::ConnectionClosed) => {}
            other => panic!("unexpected read result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn oversized_body_writes_nothing() {
        let (a, b) = tokio::io::duplex(1024);
        let (_, mut writer) = msgpack::new_codec(Box::new(a)).into_split();
        let (mut reader, _) = msgpack::new_codec(Box::new(b)).into_split();

        let big = Value::String("x".repeat(9 * 1024 * 1024));
        let result = writer.write(&Header::request("Foo.Echo", 1), &big).await;
        assert!(matches!(result, Err(Error::Encode(_))));

        // the stream stays aligned for the next request
        writer
            .write(&Header::request("Foo.Echo", 2), &json!(7))
            .await
            .unwrap();
        assert_eq!(reader.read_header().await.unwrap().seq, 2);
        let mut body = Value::Null;
        reader.read_body(Some(&mut body)).await.unwrap();
        assert_eq!(body, json!(7));
    }

    #[tokio::test]
    async fn garbage_header_is_a_decode_error() {
        let (a, b) = tokio::io::duplex(64);
        let mut raw = FramedWrite::new(a, LengthDelimitedCodec::new());
        raw.send(Bytes::from_static(b"not a header")).await.unwrap();

        let (mut reader, _) = json::new_codec(Box::new(b)).into_split();
        assert!(matches!(reader.read_header().await, Err(Error::Decode(_))));
    }
}
