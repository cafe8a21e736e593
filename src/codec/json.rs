use super::{framed, BoxTransport, Codec};
use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};

pub struct Json;

impl framed::Serialization for Json {
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

pub fn new_codec(transport: BoxTransport) -> Codec {
    framed::new_codec::<Json>(transport)
}
