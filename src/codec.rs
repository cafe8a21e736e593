pub mod framed;
pub mod json;
pub mod msgpack;

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite};

pub const MSGPACK_TYPE: &str = "application/msgpack";
pub const JSON_TYPE: &str = "application/json";

/// Frames every request and reply.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// format "Service.Method"
    pub service_method: String,
    /// chosen by the client
    pub seq: u64,
    /// non-empty if the peer failed the call
    pub error: String,
}

impl Header {
    pub fn request(service_method: impl Into<String>, seq: u64) -> Header {
        Header {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }
}

/// Any bidirectional byte stream a connection can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

pub type BoxTransport = Box<dyn Transport>;

/// Read half of a codec. Only the receive loop reads.
#[async_trait]
pub trait ReadCodec: Send {
    async fn read_header(&mut self) -> Result<Header>;

    /// Reads the body that follows the last header. `None` consumes the
    /// frame without decoding it.
    async fn read_body(&mut self, body: Option<&mut Value>) -> Result<()>;
}

/// Write half of a codec. Writers are serialized by the caller.
#[async_trait]
pub trait WriteCodec: Send {
    async fn write(&mut self, header: &Header, body: &Value) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

pub struct Codec {
    pub reader: Box<dyn ReadCodec>,
    pub writer: Box<dyn WriteCodec>,
}

impl Codec {
    pub fn new(reader: Box<dyn ReadCodec>, writer: Box<dyn WriteCodec>) -> Codec {
        Codec { reader, writer }
    }

    pub fn into_split(self) -> (Box<dyn ReadCodec>, Box<dyn WriteCodec>) {
        (self.reader, self.writer)
    }
}

pub type NewCodecFn = fn(BoxTransport) -> Codec;

/// Maps a codec type tag to the constructor for that codec.
#[derive(Clone)]
pub struct CodecRegistry {
    constructors: HashMap<String, NewCodecFn>,
}

impl CodecRegistry {
    pub fn empty() -> CodecRegistry {
        CodecRegistry {
            constructors: HashMap::new(),
        }
    }

    pub fn register(&mut self, codec_type: impl Into<String>, new_codec: NewCodecFn) {
        self.constructors.insert(codec_type.into(), new_codec);
    }

    pub fn get(&self, codec_type: &str) -> Option<NewCodecFn> {
        self.constructors.get(codec_type).copied()
    }

    pub fn contains(&self, codec_type: &str) -> bool {
        self.constructors.contains_key(codec_type)
    }

    pub fn new_codec(&self, codec_type: &str, transport: BoxTransport) -> Result<Codec> {
        let new_codec = self
            .get(codec_type)
            .ok_or_else(|| Error::InvalidCodec(codec_type.to_string()))?;
        Ok(new_codec(transport))
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = CodecRegistry::empty();
        registry.register(MSGPACK_TYPE, msgpack::new_codec);
        registry.register(JSON_TYPE, json::new_codec);
        registry
    }
}
