use std::collections::HashMap;
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle as ThreadHandle;
use std::time::Duration;

use anyhow::{anyhow, Context};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::{delay_for, timeout};

use crate::frame;
use crate::registry::{CallbackFn, CallbackRegistry, Delivery};
use crate::xml::{self, Call, Fault, Incoming, Value};

/// The server API version requested after authenticating.
///
/// Methods' and callbacks' signatures may differ across different versions.
///
/// Version history until 2013-04-16 is available in posts in the Dedicated
/// Server forum at https://forum.maniaplanet.com/viewforum.php?f=261
pub const SERVER_API_VERSION: &str = "2013-04-16";

/// Protocol headers we accept during the handshake.
pub const ACCEPTED_HEADERS: &[&str] = &["GBXRemote 2"];

/// If the bit-and of a handle and this value equals 0, the received
/// data is a callback; otherwise it is a method response.
///
/// Handles of our own requests always have this bit set.
pub const REQUEST_MASK: u32 = 0x8000_0000;

/// Gap between connection attempts.
const RETRY_GAP: Duration = Duration::from_secs(1);

/// Read timeout while waiting for the protocol header.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Read timeout of the receive loop; bounds how long a `stop` signal
/// can go unnoticed.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection options for a game server's XML-RPC interface.
#[derive(Clone, Debug)]
pub struct RemoteConfig {
    /// DNS name or literal address.
    pub host: String,

    /// The XML-RPC port; a dedicated server listens on 5000 by default.
    pub port: u16,

    /// The login defined in the `<authorization_levels>` server config.
    pub username: String,

    /// The password defined in the `<authorization_levels>` server config.
    pub password: String,

    /// Passed to `SetApiVersion` after authenticating.
    pub api_version: String,

    /// How many reconnection attempts a failed call may spend before
    /// giving up.
    pub conn_retries: u32,

    /// How long to await the result of each call.
    pub result_timeout: Duration,
}

impl RemoteConfig {
    pub fn new(host: &str, port: u16, username: &str, password: &str) -> RemoteConfig {
        RemoteConfig {
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: password.to_string(),
            api_version: SERVER_API_VERSION.to_string(),
            conn_retries: 3,
            result_timeout: Duration::from_secs(5),
        }
    }
}

/// Why a call produced no usable result.
#[derive(Debug, Error)]
pub enum CallError {
    /// The server answered with an XML-RPC fault.
    #[error("server {0}")]
    Fault(Fault),

    /// No response arrived within the configured result timeout.
    #[error("no response within the result timeout")]
    Timeout,

    /// There is no connection to the server.
    #[error("not connected to the server")]
    NotConnected,

    /// The connection went away while the result was pending.
    #[error("connection lost while awaiting the response")]
    ConnectionLost,

    /// Writing the request to the socket failed.
    #[error("failed to send the request")]
    Transport(#[source] std::io::Error),

    /// The response could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl CallError {
    /// True for errors that a reconnect might fix.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            CallError::NotConnected | CallError::ConnectionLost | CallError::Transport(_)
        )
    }

    /// The fault behind this error, if it is one.
    pub fn as_fault(&self) -> Option<&Fault> {
        match self {
            CallError::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

/// A dispatched request that has not been resolved yet.
///
/// The completion slot is a one-shot sender; dropping it without sending
/// tells the waiting caller that the connection is gone.
struct PendingCall {
    slot: oneshot::Sender<Result<Value, CallError>>,

    /// Monotonic dispatch sequence, for tracing the order in which
    /// requests went out.
    seq: u64,
}

struct RemoteState {
    config: RemoteConfig,

    /// Write half of the socket. The receive loop owns a separate clone
    /// for reads; writers from any task serialize through this lock.
    writer: Mutex<Option<TcpStream>>,

    /// Cleared by `stop` and by the receive loop when the connection
    /// breaks.
    alive: AtomicBool,

    /// Requests awaiting their response, keyed by handle.
    pending: Mutex<HashMap<u32, PendingCall>>,

    /// Feeds the handle allocator; reset when a connection is opened.
    call_counter: AtomicU32,

    seq_counter: AtomicU64,

    registry: CallbackRegistry,

    recv_thread: Mutex<Option<ThreadHandle<()>>>,

    /// Serializes connection attempts, so that an explicit `connect`,
    /// the in-call retry and the auto-reconnector cannot interleave.
    connect_gate: tokio::sync::Mutex<()>,

    /// Used to run the auto-reconnector from the receive thread.
    runtime: tokio::runtime::Handle,
}

/// A client to the game server's XML-RPC interface.
///
/// Cheap to clone; all clones share one connection. Construct it inside
/// a Tokio runtime: the receive loop uses the runtime to spawn the
/// auto-reconnector when the connection breaks.
#[derive(Clone)]
pub struct Remote {
    state: Arc<RemoteState>,
}

impl Remote {
    pub fn new(config: RemoteConfig) -> Remote {
        Remote {
            state: Arc::new(RemoteState {
                config,
                writer: Mutex::new(None),
                alive: AtomicBool::new(false),
                pending: Mutex::new(HashMap::new()),
                call_counter: AtomicU32::new(0),
                seq_counter: AtomicU64::new(0),
                registry: CallbackRegistry::default(),
                recv_thread: Mutex::new(None),
                connect_gate: tokio::sync::Mutex::new(()),
                runtime: tokio::runtime::Handle::current(),
            }),
        }
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.state.config
    }

    /// Whether there is a live connection to the server.
    pub fn is_connected(&self) -> bool {
        self.state.alive.load(Ordering::SeqCst)
    }

    /// Number of dispatched requests still awaiting their response.
    pub fn nb_pending_calls(&self) -> usize {
        self.state.pending.lock().unwrap().len()
    }

    /// Establish the connection: TCP connect, protocol handshake,
    /// `Authenticate`, `SetApiVersion`, `EnableCallbacks`.
    ///
    /// Failed attempts are repeated with a one second gap, up to
    /// `max_retries` times; a negative `max_retries` keeps trying
    /// forever. `attempt_cb` is invoked with `(attempt, max_retries)`
    /// before every attempt.
    ///
    /// Returns `false` once the attempts are exhausted, and immediately
    /// if the server rejects our credentials.
    pub async fn connect(
        &self,
        max_retries: i32,
        attempt_cb: Option<&(dyn Fn(u32, i32) + Send + Sync)>,
    ) -> bool {
        let _gate = self.state.connect_gate.lock().await;
        self.connect_locked(max_retries, attempt_cb).await
    }

    async fn connect_locked(
        &self,
        max_retries: i32,
        attempt_cb: Option<&(dyn Fn(u32, i32) + Send + Sync)>,
    ) -> bool {
        self.teardown();

        let mut attempt: u32 = 1;
        loop {
            if let Some(cb) = attempt_cb {
                cb(attempt, max_retries);
            }

            match self.try_open() {
                Ok(()) => {
                    log::debug!(
                        "connected to {}:{}",
                        self.state.config.host,
                        self.state.config.port
                    );
                    return match self.open_session().await {
                        Ok(true) => true,
                        Ok(false) => {
                            self.teardown();
                            false
                        }
                        Err(err) => {
                            log::error!("session setup failed: {}", err);
                            self.teardown();
                            false
                        }
                    };
                }
                Err(err) => log::error!("connection attempt failed: {:#}", err),
            }

            if max_retries >= 0 && attempt >= max_retries as u32 {
                return false;
            }
            attempt += 1;
            delay_for(RETRY_GAP).await;
        }
    }

    /// Open the TCP connection, verify the protocol header, and start
    /// the receive loop.
    fn try_open(&self) -> anyhow::Result<()> {
        let config = &self.state.config;
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .with_context(|| format!("failed to resolve host {}", config.host))?
            .next()
            .ok_or_else(|| anyhow!("no address for host {}", config.host))?;

        let mut stream = TcpStream::connect(addr)
            .with_context(|| format!("failed to connect to {}:{}", config.host, config.port))?;

        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        let header = frame::read_handshake(&mut stream).context("failed to read header")?;
        if !ACCEPTED_HEADERS.contains(&header.as_str()) {
            return Err(anyhow!("server sent an invalid header: {:?}", header));
        }

        stream.set_read_timeout(Some(POLL_TIMEOUT))?;
        let reader = stream
            .try_clone()
            .context("failed to clone handle on TCP stream")?;

        *self.state.writer.lock().unwrap() = Some(stream);
        self.state.alive.store(true, Ordering::SeqCst);

        let thread = self.spawn_recv_loop(reader);
        *self.state.recv_thread.lock().unwrap() = Some(thread);

        Ok(())
    }

    /// Authenticate and switch on callbacks. `Authenticate` has to be
    /// the first call on the fresh socket.
    async fn open_session(&self) -> Result<bool, CallError> {
        let config = &self.state.config;

        let auth = self
            .call_once(
                "Authenticate",
                vec![
                    config.username.as_str().into(),
                    config.password.as_str().into(),
                ],
            )
            .await;
        match auth {
            Ok(value) if value.as_bool() == Some(true) => {}
            Ok(_) => {
                log::error!("authentication was not accepted");
                return Ok(false);
            }
            Err(CallError::Fault(fault)) => {
                log::error!("authentication failed: {}", fault.msg);
                return Ok(false);
            }
            Err(err) => return Err(err),
        }

        if let Err(err) = self
            .call_once("SetApiVersion", vec![config.api_version.as_str().into()])
            .await
        {
            log::warn!("SetApiVersion failed: {}", err);
        }

        if let Err(err) = self.call_once("EnableCallbacks", vec![true.into()]).await {
            log::warn!("EnableCallbacks failed: {}", err);
        }

        Ok(true)
    }

    /// Kill the connection and quit the receive loop.
    ///
    /// Requests that are still pending fail with a connection-lost error.
    pub fn stop(&self) {
        log::debug!("stopping the connection");
        self.teardown();
    }

    fn teardown(&self) {
        self.state.alive.store(false, Ordering::SeqCst);

        let thread = self.state.recv_thread.lock().unwrap().take();
        if let Some(thread) = thread {
            // An inline subscriber may tear down the connection from the
            // receive loop itself; it cannot join its own thread.
            if thread.thread().id() != std::thread::current().id() {
                let _ = thread.join();
            }
        }

        *self.state.writer.lock().unwrap() = None;
        self.state.call_counter.store(0, Ordering::SeqCst);
        self.fail_pending();
    }

    /// Resolve every pending request with a connection-lost error, by
    /// dropping their completion slots.
    fn fail_pending(&self) {
        let abandoned: Vec<u64> = self
            .state
            .pending
            .lock()
            .unwrap()
            .drain()
            .map(|(_, call)| call.seq)
            .collect();
        if !abandoned.is_empty() {
            log::debug!("abandoning {} pending calls", abandoned.len());
        }
    }

    /// Make a call, and reconnect once if the connection turns out to
    /// be gone, resubmitting the request on success.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, CallError> {
        match self.call_once(method, args.clone()).await {
            Err(err) if err.is_connection_error() => {
                log::warn!("connection error during {}: {}; reconnecting", method, err);
                if self.ensure_connected(self.state.config.conn_retries as i32).await {
                    self.call_once(method, args).await
                } else {
                    log::error!("reconnection failed");
                    Err(err)
                }
            }
            other => other,
        }
    }

    /// Make a call without any reconnection attempt.
    pub async fn call_once(&self, method: &str, args: Vec<Value>) -> Result<Value, CallError> {
        self.begin_call(method, args)?.response().await
    }

    /// Dispatch a request and return a token that resolves to its
    /// result, so that the response can be awaited later, or not at all.
    pub fn begin_call(&self, method: &str, args: Vec<Value>) -> Result<PendingResponse, CallError> {
        if !self.is_connected() {
            return Err(CallError::NotConnected);
        }

        let call = Call {
            name: method.to_string(),
            args,
        };
        let payload =
            xml::write_method_call(&call).map_err(|err| CallError::Protocol(err.to_string()))?;

        let handle = self.next_handle();
        let seq = self.state.seq_counter.fetch_add(1, Ordering::Relaxed);
        let (slot, response) = oneshot::channel();
        self.state
            .pending
            .lock()
            .unwrap()
            .insert(handle, PendingCall { slot, seq });

        log::debug!("call {:08x} (seq {}): {:?}", handle, seq, &call);

        let written = {
            let mut writer = self.state.writer.lock().unwrap();
            match writer.as_mut() {
                Some(stream) => stream
                    .write_all(&frame::encode_frame(handle, &payload))
                    .map_err(CallError::Transport),
                None => Err(CallError::NotConnected),
            }
        };
        if let Err(err) = written {
            self.state.pending.lock().unwrap().remove(&handle);
            return Err(err);
        }

        Ok(PendingResponse {
            remote: self.clone(),
            handle,
            slot: response,
            wait_for: self.state.config.result_timeout,
        })
    }

    /// Send multiple calls at once via `system.multicall`.
    ///
    /// Returns one result per call, in the order they were given: each
    /// is the single-value array the protocol wraps results in, or a
    /// fault struct for calls that failed.
    pub async fn multicall(
        &self,
        calls: Vec<(String, Vec<Value>)>,
    ) -> Result<Vec<Value>, CallError> {
        let batch: Vec<Value> = calls
            .into_iter()
            .map(|(name, params)| {
                let mut entry = indexmap::IndexMap::new();
                entry.insert("methodName".to_string(), Value::String(name));
                entry.insert("params".to_string(), Value::Array(params));
                Value::Struct(entry)
            })
            .collect();

        match self.call("system.multicall", vec![Value::Array(batch)]).await? {
            Value::Array(results) => Ok(results),
            other => Err(CallError::Protocol(format!(
                "expected an array from system.multicall, got {:?}",
                other
            ))),
        }
    }

    /// Subscribe to server callbacks with the given method name, or to
    /// all of them with [`crate::ANY_CALLBACK`].
    pub fn register_callback<F>(&self, pattern: &str, delivery: Delivery, callback: F)
    where
        F: Fn(&str, &[Value]) + Send + Sync + 'static,
    {
        let callback: Arc<CallbackFn> = Arc::new(callback);
        self.state.registry.subscribe(pattern, delivery, callback);
    }

    fn next_handle(&self) -> u32 {
        let count = self.state.call_counter.fetch_add(1, Ordering::Relaxed);
        request_handle(count)
    }

    fn spawn_recv_loop(&self, reader: TcpStream) -> ThreadHandle<()> {
        let remote = self.clone();
        std::thread::spawn(move || {
            let connection_lost = remote.recv_loop(reader);
            if connection_lost {
                remote.state.alive.store(false, Ordering::SeqCst);
                remote.fail_pending();

                let reconnect = remote.clone();
                remote.state.runtime.spawn(async move {
                    reconnect.reconnect_loop().await;
                });
            }
            log::debug!("receive loop ended");
        })
    }

    /// Consume frames until stopped. Returns `true` if the loop ended
    /// because the connection was lost.
    fn recv_loop(&self, mut reader: TcpStream) -> bool {
        let keep_waiting = || self.state.alive.load(Ordering::SeqCst);

        loop {
            let (handle, payload) = match frame::read_frame(&mut reader, &keep_waiting) {
                Ok(frame) => frame,
                Err(frame::RecvError::Stopped) => return false,
                Err(err) => {
                    log::error!("connection to the server was lost: {}", err);
                    return true;
                }
            };

            // The server occasionally sends empty keep-alive frames.
            if payload.is_empty() {
                continue;
            }

            let message = match std::str::from_utf8(&payload) {
                Ok(message) => message,
                Err(_) => {
                    self.frame_failure(handle, "payload was not UTF-8".to_string());
                    continue;
                }
            };

            match xml::read_message(message) {
                Ok(Incoming::Response(response)) => {
                    self.resolve(handle, response.map_err(CallError::Fault));
                }
                Ok(Incoming::Call(call)) => {
                    log::debug!("callback: {:?}", &call);
                    self.state.registry.dispatch(&call);
                }
                Err(err) => self.frame_failure(handle, format!("{:#}", err)),
            }
        }
    }

    /// A frame that could not be decoded fails the request it belongs
    /// to, and nothing else.
    fn frame_failure(&self, handle: u32, reason: String) {
        log::error!("discarding frame {:08x}: {}", handle, reason);
        if handle & REQUEST_MASK != 0 {
            self.resolve(handle, Err(CallError::Protocol(reason)));
        }
    }

    fn resolve(&self, handle: u32, outcome: Result<Value, CallError>) {
        let pending = self.state.pending.lock().unwrap().remove(&handle);
        match pending {
            Some(call) => {
                log::debug!("call {:08x} (seq {}) resolved: {:?}", handle, call.seq, &outcome);
                // The caller may have timed out and stopped listening.
                let _ = call.slot.send(outcome);
            }
            None => log::warn!("no caller is waiting for response {:08x}", handle),
        }
    }

    async fn reconnect_loop(&self) {
        log::info!("attempting to reconnect");
        loop {
            if self.ensure_connected(-1).await {
                log::info!("reconnected");
                return;
            }
            delay_for(RETRY_GAP).await;
        }
    }

    /// Reconnect unless another task got there first.
    async fn ensure_connected(&self, max_retries: i32) -> bool {
        let _gate = self.state.connect_gate.lock().await;
        if self.is_connected() {
            return true;
        }
        self.connect_locked(max_retries, None).await
    }
}

/// Handles are made from a free-running counter; masking keeps them in
/// `0x8000_0000..=0xffff_ffff`, so they can never collide with the
/// callback range, and wrap back to `0x8000_0000`.
fn request_handle(count: u32) -> u32 {
    REQUEST_MASK | (count & !REQUEST_MASK)
}

/// Completion token of a dispatched call.
///
/// Await [`PendingResponse::response`] to obtain the result; dropping
/// the token instead leaves the response to be discarded by the
/// receive loop.
pub struct PendingResponse {
    remote: Remote,
    handle: u32,
    slot: oneshot::Receiver<Result<Value, CallError>>,
    wait_for: Duration,
}

impl PendingResponse {
    /// The correlation handle the request was sent with.
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Wait for the response, up to the configured result timeout.
    pub async fn response(self) -> Result<Value, CallError> {
        match timeout(self.wait_for, self.slot).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_slot_dropped)) => Err(CallError::ConnectionLost),
            Err(_elapsed) => {
                self.remote
                    .state
                    .pending
                    .lock()
                    .unwrap()
                    .remove(&self.handle);
                Err(CallError::Timeout)
            }
        }
    }
}
