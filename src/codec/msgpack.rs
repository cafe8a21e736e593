//! MessagePack bodies and headers, the default codec.

use super::{framed, BoxTransport, Codec};
use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};

pub struct MsgPack;

impl framed::Serialization for MsgPack {
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        // named fields keep the frames self-describing
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

pub fn new_codec(transport: BoxTransport) -> Codec {
    framed::new_codec::<MsgPack>(transport)
}
