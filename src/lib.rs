//! Client side of a multiplexed RPC transport.
//!
//! Many concurrent calls share one connection. Each request is tagged with
//! a sequence number; a single background task reads replies and hands each
//! one back to the call that is waiting for it.
//!
//! ```no_run
//! # async fn run() -> coalescent_rpc::Result<()> {
//! let client = coalescent_rpc::dial("tcp", "127.0.0.1:27800", &[]).await?;
//! let sum: Vec<i64> = client.call("Echo.Sum", &vec![1, 2]).await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod echo;
pub mod error;
pub mod handshake;

pub use client::{dial, dial_with, Call, Client};
pub use codec::{Codec, CodecRegistry, Header};
pub use error::{Error, Result};
pub use handshake::{parse_options, Options, MAGIC_NUMBER};
