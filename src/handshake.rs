//! The options frame sent once, ahead of any codec frame.
//!
//! The frame is a 4-byte big-endian length followed by the options as JSON,
//! so either side can read it before a codec has been negotiated.

use crate::{
    codec::{BoxTransport, Codec, CodecRegistry, MSGPACK_TYPE},
    error::{Error, Result},
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Largest options frame a peer will accept.
const MAX_OPTIONS_LEN: usize = 64 * 1024;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Options {
    #[serde(rename = "MagicNumber")]
    pub magic_number: u32,
    #[serde(rename = "CodecType")]
    pub codec_type: String,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            magic_number: MAGIC_NUMBER,
            codec_type: MSGPACK_TYPE.to_string(),
        }
    }
}

impl Options {
    pub fn with_codec(codec_type: impl Into<String>) -> Options {
        Options {
            magic_number: MAGIC_NUMBER,
            codec_type: codec_type.into(),
        }
    }
}

/// Merges caller supplied options over the defaults. At most one set of
/// options may be given; the magic number is always the protocol's own.
pub fn parse_options(options: &[Options]) -> Result<Options> {
    let opt = match options {
        [] => return Ok(Options::default()),
        [opt] => opt,
        _ => return Err(Error::TooManyOptions),
    };

    let mut opt = opt.clone();
    opt.magic_number = MAGIC_NUMBER;
    if opt.codec_type.is_empty() {
        opt.codec_type = Options::default().codec_type;
    }
    Ok(opt)
}

pub async fn write_options(transport: &mut BoxTransport, options: &Options) -> Result<()> {
    let bytes = serde_json::to_vec(options)?;
    let len = u32::try_from(bytes.len()).map_err(|e| Error::Encode(e.to_string()))?;
    transport.write_u32(len).await?;
    transport.write_all(&bytes).await?;
    transport.flush().await?;
    Ok(())
}

pub async fn read_options(transport: &mut BoxTransport) -> Result<Options> {
    let len = transport.read_u32().await? as usize;
    if len > MAX_OPTIONS_LEN {
        return Err(Error::Decode(format!("options frame of {} bytes", len)));
    }
    let mut bytes = vec![0u8; len];
    transport.read_exact(&mut bytes).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Client half: sends the options and builds the negotiated codec. On
/// failure the transport is shut down and dropped.
pub async fn connect(
    registry: &CodecRegistry,
    mut transport: BoxTransport,
    options: &Options,
) -> Result<Codec> {
    let new_codec = match registry.get(&options.codec_type) {
        Some(f) => f,
        None => {
            warn!("rpc client: invalid codec type {}", options.codec_type);
            let _unused_result = transport.shutdown().await;
            return Err(Error::InvalidCodec(options.codec_type.clone()));
        }
    };

    if let Err(e) = write_options(&mut transport, options).await {
        warn!("rpc client: options error: {}", e);
        let _unused_result = transport.shutdown().await;
        return Err(e);
    }

    debug!("rpc client: negotiated {}", options.codec_type);
    Ok(new_codec(transport))
}

/// Peer half: reads the client's options and builds the matching codec.
pub async fn accept(
    registry: &CodecRegistry,
    mut transport: BoxTransport,
) -> Result<(Options, Codec)> {
    let options = read_options(&mut transport).await?;
    if options.magic_number != MAGIC_NUMBER {
        return Err(Error::InvalidMagicNumber(options.magic_number));
    }
    let codec = registry.new_codec(&options.codec_type, transport)?;
    Ok((options, codec))
}
