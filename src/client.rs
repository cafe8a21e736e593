use crate::{
    codec::{BoxTransport, Codec, CodecRegistry, Header, ReadCodec, WriteCodec},
    error::{Error, Result},
    handshake::{self, parse_options, Options},
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::{
    net::TcpStream,
    sync::{
        mpsc::{self, Receiver, Sender},
        Mutex as AsyncMutex,
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capacity of the done channel `Client::go` allocates.
const GO_CHANNEL_CAPACITY: usize = 10;

/// One in-flight request. It travels back to the caller through its done
/// channel exactly once.
#[derive(Debug)]
pub struct Call {
    pub seq: u64,
    pub service_method: String,
    pub args: Arc<Value>,
    pub reply: Value,
    pub error: Option<Error>,
    done: Sender<Call>,
}

impl Call {
    fn new(service_method: String, args: Value, done: Sender<Call>) -> Call {
        Call {
            seq: 0,
            service_method,
            args: Arc::new(args),
            reply: Value::Null,
            error: None,
            done,
        }
    }

    async fn done(self) {
        let done = self.done.clone();
        if done.send(self).await.is_err() {
            debug!("rpc client: caller stopped waiting for its call");
        }
    }

    /// The reply, or the error the call resolved with.
    pub fn into_reply(self) -> Result<Value> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.reply),
        }
    }

    /// Decodes the reply into `R`.
    pub fn reply_as<R: DeserializeOwned>(self) -> Result<R> {
        let reply = self.into_reply()?;
        serde_json::from_value(reply).map_err(|e| Error::ReadBody(e.to_string()))
    }
}

#[derive(Default)]
struct State {
    seq: u64,
    pending: HashMap<u64, Call>,
    closing: bool,  // set by Client::close
    shutdown: bool, // set when the receive loop ends
}

struct Shared {
    // send-serialization lock; also owns the write half
    sending: AsyncMutex<Box<dyn WriteCodec>>,
    state: Mutex<State>,
    closed: CancellationToken,
}

impl Shared {
    fn new(writer: Box<dyn WriteCodec>) -> Shared {
        Shared {
            sending: AsyncMutex::new(writer),
            state: Mutex::new(State {
                seq: 1,
                ..State::default()
            }),
            closed: CancellationToken::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assigns the next sequence number and parks the call in the pending
    /// table. Hands the call back once the client is closing or shut down.
    fn register_call(&self, mut call: Call) -> std::result::Result<u64, Call> {
        let mut state = self.state();
        if state.closing || state.shutdown {
            return Err(call);
        }
        let seq = state.seq;
        call.seq = seq;
        state.pending.insert(seq, call);
        state.seq += 1;
        Ok(seq)
    }

    fn remove_call(&self, seq: u64) -> Option<Call> {
        self.state().pending.remove(&seq)
    }

    /// Fails every pending call with `err`. Nothing can be registered
    /// afterwards.
    async fn terminate_calls(&self, err: Error) {
        let _sending = self.sending.lock().await;
        let pending = {
            let mut state = self.state();
            state.shutdown = true;
            std::mem::take(&mut state.pending)
        };
        debug!("rpc client: terminating {} pending calls: {}", pending.len(), err);
        for (_, mut call) in pending {
            call.error = Some(err.clone());
            call.done().await;
        }
    }
}

/// Owns the read half for the lifetime of the connection.
struct ReceiveLoop {
    shared: Arc<Shared>,
    codec: Box<dyn ReadCodec>,
}

impl ReceiveLoop {
    async fn run(mut self) {
        let err = loop {
            let header = match self.read_header().await {
                Ok(h) => h,
                Err(e) => break e,
            };
            debug!(seq = header.seq, "rpc client: reply for {}", header.service_method);

            match self.shared.remove_call(header.seq) {
                None => {
                    // keep the stream framed even when nobody is waiting
                    warn!(seq = header.seq, "rpc client: reply for unknown call");
                    if let Err(e) = self.read_body(None).await {
                        debug!("rpc client: discarding body: {}", e);
                    }
                }
                Some(mut call) if !header.error.is_empty() => {
                    call.error = Some(Error::Remote(header.error));
                    if let Err(e) = self.read_body(None).await {
                        debug!("rpc client: discarding body: {}", e);
                    }
                    call.done().await;
                }
                Some(mut call) => {
                    if let Err(e) = self.read_body(Some(&mut call.reply)).await {
                        call.error = Some(Error::ReadBody(e.to_string()));
                    }
                    call.done().await;
                }
            }
        };

        if err.is_shutdown() {
            debug!("rpc client: receive loop stopped by close");
        } else {
            warn!("rpc client: receive loop stopped: {}", err);
        }
        self.shared.terminate_calls(err).await;
    }

    async fn read_header(&mut self) -> Result<Header> {
        tokio::select! {
            biased;
            _ = self.shared.closed.cancelled() => Err(Error::Shutdown),
            header = self.codec.read_header() => header,
        }
    }

    async fn read_body(&mut self, body: Option<&mut Value>) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.shared.closed.cancelled() => Err(Error::Shutdown),
            result = self.codec.read_body(body) => result,
        }
    }
}

/// Multiplexes calls over a single connection.
pub struct Client {
    shared: Arc<Shared>,
    options: Options,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Performs the handshake over `transport` and starts the receive loop.
    pub async fn new(
        registry: &CodecRegistry,
        transport: BoxTransport,
        options: Options,
    ) -> Result<Client> {
        let codec = handshake::connect(registry, transport, &options).await?;
        Ok(Client::with_codec(codec, options))
    }

    /// Wraps an already negotiated codec. Must be called inside a tokio
    /// runtime.
    pub fn with_codec(codec: Codec, options: Options) -> Client {
        let (reader, writer) = codec.into_split();
        let shared = Arc::new(Shared::new(writer));
        let receiver = ReceiveLoop {
            shared: shared.clone(),
            codec: reader,
        };
        let handle = tokio::spawn(receiver.run());

        Client {
            shared,
            options,
            receiver: Mutex::new(Some(handle)),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Marks the client closing, closes the codec and waits for the receive
    /// loop to fail what is still pending.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.shared.state();
            if state.closing {
                return Err(Error::Shutdown);
            }
            state.closing = true;
        }

        self.shared.closed.cancel();
        let result = self.shared.sending.lock().await.close().await;

        let handle = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("rpc client: receive loop panicked: {}", e);
            }
        }
        result
    }

    /// Advisory only; submissions can still fail with `Error::Shutdown`.
    pub fn is_available(&self) -> bool {
        let state = self.shared.state();
        !state.shutdown && !state.closing
    }

    /// Registers and writes `call`, returning its sequence number, or 0 when
    /// the client was already shut down.
    async fn send(&self, call: Call) -> u64 {
        let mut codec = self.shared.sending.lock().await;

        let service_method = call.service_method.clone();
        let args = call.args.clone();
        let seq = match self.shared.register_call(call) {
            Ok(seq) => seq,
            Err(mut call) => {
                call.error = Some(Error::Shutdown);
                call.done().await;
                return 0;
            }
        };

        debug!(seq, "rpc client: sending {}", service_method);
        let header = Header::request(service_method, seq);
        let result = tokio::select! {
            biased;
            _ = self.shared.closed.cancelled() => Err(Error::Shutdown),
            result = codec.write(&header, args.as_ref()) => result,
        };

        if let Err(e) = result {
            // the receive loop may have resolved it already
            if let Some(mut call) = self.shared.remove_call(seq) {
                call.error = Some(e);
                call.done().await;
            }
        }
        seq
    }

    /// Submits a call without waiting for it. Returns the call's sequence
    /// number (0 if the client is shut down) and the channel that yields the
    /// call once it is resolved.
    pub async fn go(
        &self,
        service_method: impl Into<String>,
        args: Value,
    ) -> (u64, Receiver<Call>) {
        let (done, rx) = mpsc::channel(GO_CHANNEL_CAPACITY);
        let seq = self.go_with(service_method, args, done).await;
        (seq, rx)
    }

    /// Like `go`, but resolves into a caller supplied channel, which may be
    /// shared between calls. tokio refuses to build a zero capacity channel,
    /// so every `done` can hold at least one resolved call.
    ///
    /// Resolution waits for room in `done`. A channel shared by more calls
    /// than its capacity must be drained, or the receive loop (and with it
    /// every other call on this client) stalls until it is.
    pub async fn go_with(
        &self,
        service_method: impl Into<String>,
        args: Value,
        done: Sender<Call>,
    ) -> u64 {
        let call = Call::new(service_method.into(), args, done);
        self.send(call).await
    }

    /// Calls `service_method` and waits for the reply.
    pub async fn call<A, R>(&self, service_method: impl Into<String>, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let args = serde_json::to_value(args).map_err(|e| Error::Encode(e.to_string()))?;
        let (done, mut rx) = mpsc::channel(1);
        self.go_with(service_method, args, done).await;
        match rx.recv().await {
            Some(call) => call.reply_as(),
            None => Err(Error::Shutdown),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // lets the receive loop fail whatever is still pending
        self.shared.closed.cancel();
    }
}

/// Connects to `address` with the default codec registry.
pub async fn dial(network: &str, address: &str, options: &[Options]) -> Result<Client> {
    dial_with(&CodecRegistry::default(), network, address, options).await
}

pub async fn dial_with(
    registry: &CodecRegistry,
    network: &str,
    address: &str,
    options: &[Options],
) -> Result<Client> {
    let options = parse_options(options)?;
    let transport = connect(network, address).await?;
    Client::new(registry, transport, options).await
}

async fn connect(network: &str, address: &str) -> Result<BoxTransport> {
    match network {
        "tcp" | "tcp4" | "tcp6" => Ok(Box::new(TcpStream::connect(address).await?)),
        #[cfg(unix)]
        "unix" => Ok(Box::new(tokio::net::UnixStream::connect(address).await?)),
        _ => Err(Error::UnsupportedNetwork(network.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{msgpack, ReadCodec};
    use serde_json::json;

    fn shared() -> (Shared, Box<dyn ReadCodec>) {
        let (a, _b) = tokio::io::duplex(64);
        let (reader, writer) = msgpack::new_codec(Box::new(a)).into_split();
        (Shared::new(writer), reader)
    }

    fn call(method: &str) -> (Call, Receiver<Call>) {
        let (tx, rx) = mpsc::channel(1);
        (Call::new(method.to_string(), json!(null), tx), rx)
    }

    #[tokio::test]
    async fn sequence_numbers_start_at_one_and_increase() {
        let (shared, _reader) = shared();
        let seqs: Vec<u64> = (0..5)
            .map(|_| shared.register_call(call("Foo.Sum").0).ok().unwrap())
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(shared.state().pending.len(), 5);
    }

    #[tokio::test]
    async fn removing_twice_finds_nothing_the_second_time() {
        let (shared, _reader) = shared();
        let seq = shared.register_call(call("Foo.Sum").0).ok().unwrap();

        assert_eq!(shared.remove_call(seq).map(|c| c.seq), Some(seq));
        assert!(shared.remove_call(seq).is_none());
    }

    #[tokio::test]
    async fn terminate_fails_everything_pending_and_blocks_registration() {
        let (shared, _reader) = shared();
        let mut waiting = Vec::new();
        for _ in 0..3 {
            let (c, rx) = call("Foo.Sum");
            shared.register_call(c).ok().unwrap();
            waiting.push(rx);
        }

        shared.terminate_calls(Error::ConnectionClosed).await;
        assert!(shared.state().pending.is_empty());
        for mut rx in waiting {
            let call = rx.recv().await.unwrap();
            assert!(matches!(call.error, Some(Error::ConnectionClosed)));
        }

        let (c, _rx) = call("Foo.Sum");
        let rejected = shared.register_call(c).err().unwrap();
        assert_eq!(rejected.seq, 0);
    }

    #[test]
    fn reply_as_wraps_decode_failures() {
        let (mut c, _rx) = call("Foo.Sum");
        c.reply = json!("not a number");
        assert!(matches!(c.reply_as::<u64>(), Err(Error::ReadBody(_))));
    }
}
