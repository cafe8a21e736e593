//! A peer that answers every request with its own arguments.
//!
//! Methods named `*.Fail` are answered with an error in the header instead.

use crate::{
    codec::{BoxTransport, CodecRegistry},
    error::{Error, Result},
    handshake,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub async fn serve(listener: TcpListener, registry: CodecRegistry) {
    let registry = Arc::new(registry);
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("accepted connection from {}", addr);
                let registry = registry.clone();
                tokio::spawn(async move {
                    match serve_connection(&registry, Box::new(stream)).await {
                        Ok(()) => info!("closing connection from {}", addr),
                        Err(e) => warn!("connection from {} failed: {}", addr, e),
                    }
                });
            }
            Err(e) => warn!("couldn't accept client: {:?}", e),
        }
    }
}

/// Runs one connection until the client goes away.
pub async fn serve_connection(registry: &CodecRegistry, transport: BoxTransport) -> Result<()> {
    let (options, codec) = handshake::accept(registry, transport).await?;
    debug!("rpc echo: negotiated {}", options.codec_type);
    let (mut reader, mut writer) = codec.into_split();

    loop {
        let mut header = match reader.read_header().await {
            Ok(h) => h,
            Err(Error::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };
        let mut body = Value::Null;
        if let Err(e) = reader.read_body(Some(&mut body)).await {
            header.error = format!("rpc echo: reading body {}", e);
            body = Value::Null;
        } else if header.service_method.ends_with(".Fail") {
            header.error = format!("rpc echo: {} failed on request", header.service_method);
            body = Value::Null;
        }

        debug!(seq = header.seq, "rpc echo: answering {}", header.service_method);
        writer.write(&header, &body).await?;
    }
}
