//! Per-socket packet dispatch and request correlation
//!
//! A [`Connection`] owns the outbound half of one transport plus a registry of
//! packet handlers. Every inbound frame is demultiplexed on its leading code
//! byte and handed to each matching handler, in registration order, on a
//! cursor positioned just past the code. Handlers are independent: several
//! may listen for the same code and all of them fire.
//!
//! Correlated requests are a one-shot handler raced against a timer; see
//! [`Connection::await_packet`].

use crate::bytes::ByteCursor;
use crate::codec::Wire;
use crate::error::{Error, Result};
use crate::packets::{self, PacketDescriptor};
use log::{debug, warn};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Token identifying one handler registration within a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// What a handler wants after it has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    Keep,
    /// Remove this handler; later frames with the same code skip it.
    Stop,
}

type HandlerFn = dyn Fn(&mut ByteCursor) -> Result<Subscription> + Send + Sync + 'static;
type ErrorHook = dyn Fn(&Connection, &Error) + Send + Sync + 'static;
type CloseHook = Box<dyn FnOnce() + Send + 'static>;

struct Registration {
    id: HandlerId,
    code: u8,
    handler: Arc<HandlerFn>,
}

#[derive(Default)]
struct HandlerRegistry {
    handlers: Vec<Registration>,
}

impl HandlerRegistry {
    fn add(&mut self, id: HandlerId, code: u8, handler: Arc<HandlerFn>) {
        self.handlers.push(Registration { id, code, handler });
    }

    fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|registration| registration.id != id);
        self.handlers.len() != before
    }

    fn contains(&self, id: HandlerId) -> bool {
        self.handlers.iter().any(|registration| registration.id == id)
    }

    fn matching(&self, code: u8) -> Vec<(HandlerId, Arc<HandlerFn>)> {
        self.handlers
            .iter()
            .filter(|registration| registration.code == code)
            .map(|registration| (registration.id, Arc::clone(&registration.handler)))
            .collect()
    }
}

struct Inner {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    next_handler_id: AtomicU64,
    registry: Mutex<HandlerRegistry>,
    error_hook: Mutex<Option<Arc<ErrorHook>>>,
    close_hooks: Mutex<Vec<CloseHook>>,
    closed: AtomicBool,
    shutdown: Notify,
}

/// Handle to one transport connection. Clones share the same socket and
/// handler registry.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Connection {
    /// Creates a connection whose outbound frames go to `outbound`.
    pub fn new(outbound: mpsc::UnboundedSender<Vec<u8>>, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
                remote_addr,
                outbound,
                next_handler_id: AtomicU64::new(1),
                registry: Mutex::new(HandlerRegistry::default()),
                error_hook: Mutex::new(None),
                close_hooks: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                shutdown: Notify::new(),
            }),
        }
    }

    /// Creates a connection with no transport attached; outbound frames are
    /// readable from the returned receiver.
    pub fn detached(remote_addr: Option<SocketAddr>) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx, remote_addr), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn handler_count(&self) -> usize {
        lock(&self.inner.registry).handlers.len()
    }

    /// Serializes `fields` with `descriptor` and queues the frame.
    pub fn send<F: Wire>(&self, descriptor: &PacketDescriptor<F>, fields: &F) -> Result<()> {
        let frame = descriptor.serialize(fields)?;
        self.send_frame(frame)
    }

    /// Queues an already serialized frame.
    pub fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        self.inner
            .outbound
            .send(frame)
            .map_err(|_| Error::ConnectionClosed)
    }

    fn next_handler_id(&self) -> HandlerId {
        HandlerId(self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed))
    }

    fn insert(&self, id: HandlerId, code: u8, handler: Arc<HandlerFn>) {
        let mut registry = lock(&self.inner.registry);
        // Checked under the registry lock so a racing close cannot miss it.
        if !self.is_closed() {
            registry.add(id, code, handler);
        }
    }

    /// Registers a persistent handler. Returning [`Subscription::Stop`] from
    /// `callback` removes it after that invocation.
    pub fn on_packet<F, C>(&self, descriptor: &PacketDescriptor<F>, callback: C) -> HandlerId
    where
        F: Wire + 'static,
        C: Fn(F) -> Result<Subscription> + Send + Sync + 'static,
    {
        let descriptor = *descriptor;
        let id = self.next_handler_id();
        self.insert(
            id,
            descriptor.code,
            Arc::new(move |cursor: &mut ByteCursor| callback(descriptor.deserialize(cursor)?)),
        );
        id
    }

    /// Like [`on_packet`](Self::on_packet), for callbacks that suspend. The
    /// frame is decoded during dispatch; the returned future runs on the
    /// current tokio runtime and its eventual `Stop` removes the handler.
    pub fn on_packet_async<F, C, Fut>(&self, descriptor: &PacketDescriptor<F>, callback: C) -> HandlerId
    where
        F: Wire + 'static,
        C: Fn(F) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Subscription>> + Send + 'static,
    {
        let descriptor = *descriptor;
        let id = self.next_handler_id();
        let weak = Arc::downgrade(&self.inner);
        self.insert(
            id,
            descriptor.code,
            Arc::new(move |cursor: &mut ByteCursor| {
                let future = callback(descriptor.deserialize(cursor)?);
                let weak = weak.clone();
                tokio::spawn(async move {
                    let outcome = future.await;
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    let connection = Connection { inner };
                    match outcome {
                        Ok(Subscription::Keep) => {}
                        Ok(Subscription::Stop) => {
                            connection.remove_handler(id);
                        }
                        Err(e) => connection.report(&e),
                    }
                });
                Ok(Subscription::Keep)
            }),
        );
        id
    }

    /// Waits for the next frame carrying `descriptor`'s code and returns its
    /// decoded fields, or fails with [`Error::Timeout`] once `timeout`
    /// elapses.
    ///
    /// The one-shot handler is registered before this returns, so a request
    /// sent after calling it cannot outrun its response. The handler is
    /// removed however the wait ends, including when the future is dropped.
    pub fn await_packet<F>(
        &self,
        descriptor: &PacketDescriptor<F>,
        timeout: Duration,
    ) -> impl Future<Output = Result<F>> + Send + 'static
    where
        F: Wire + Send + 'static,
    {
        let descriptor = *descriptor;
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let id = self.next_handler_id();
        self.insert(
            id,
            descriptor.code,
            Arc::new(move |cursor: &mut ByteCursor| {
                let fields = descriptor.deserialize(cursor)?;
                if let Some(tx) = lock(&slot).take() {
                    let _ = tx.send(fields);
                }
                Ok(Subscription::Stop)
            }),
        );
        let guard = HandlerGuard {
            connection: self.clone(),
            id,
        };

        async move {
            let _guard = guard;
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(fields)) => Ok(fields),
                // Sender dropped: the registry was cleared by close.
                Ok(Err(_)) => Err(Error::ConnectionClosed),
                Err(_) => Err(Error::Timeout {
                    packet: descriptor.name,
                }),
            }
        }
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        lock(&self.inner.registry).remove(id)
    }

    pub fn has_handler(&self, id: HandlerId) -> bool {
        lock(&self.inner.registry).contains(id)
    }

    /// Installs the hook that receives failures raised while handling frames.
    /// Without one they are logged.
    pub fn on_error<H>(&self, hook: H)
    where
        H: Fn(&Connection, &Error) + Send + Sync + 'static,
    {
        *lock(&self.inner.error_hook) = Some(Arc::new(hook));
    }

    /// Runs `hook` once when the connection closes, or immediately if it
    /// already has.
    pub fn on_close<H>(&self, hook: H)
    where
        H: FnOnce() + Send + 'static,
    {
        {
            let mut hooks = lock(&self.inner.close_hooks);
            if !self.is_closed() {
                hooks.push(Box::new(hook));
                return;
            }
        }
        hook();
    }

    /// Routes one inbound frame to every handler registered for its code.
    ///
    /// All matching handlers run even if one fails; the first failure is
    /// returned. A frame with no handler is dropped.
    pub fn dispatch(&self, frame: Vec<u8>) -> Result<()> {
        let mut cursor = ByteCursor::new(frame);
        let code = cursor.read_u8()?;

        let matching = lock(&self.inner.registry).matching(code);
        if matching.is_empty() {
            debug!(
                "<{}> No handler for 0x{:02x} ({})",
                self,
                code,
                packets::name_of(code).unwrap_or("unknown")
            );
            return Ok(());
        }

        let mut first_error = None;
        for (id, handler) in matching {
            // An earlier handler in this round may have removed it.
            if !self.has_handler(id) {
                continue;
            }
            let mut handler_cursor = cursor.clone();
            match handler(&mut handler_cursor) {
                Ok(Subscription::Keep) => {}
                Ok(Subscription::Stop) => {
                    self.remove_handler(id);
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Dispatches a frame and hands any failure to the error hook. The
    /// connection stays open.
    pub fn handle_frame(&self, frame: Vec<u8>) {
        if let Err(e) = self.dispatch(frame) {
            self.report(&e);
        }
    }

    fn report(&self, error: &Error) {
        let hook = lock(&self.inner.error_hook).clone();
        match hook {
            Some(hook) => hook(self, error),
            None => warn!("<{}> Failed to handle packet: {}", self, error),
        }
    }

    /// Asks the transport to close the socket.
    pub fn disconnect(&self) {
        self.inner.shutdown.notify_one();
    }

    pub(crate) async fn shutdown_requested(&self) {
        self.inner.shutdown.notified().await;
    }

    /// Marks the connection closed and releases its handlers and hooks.
    /// Pending `await_packet` calls fail with [`Error::ConnectionClosed`].
    /// Idempotent.
    pub fn close(&self) {
        let released = {
            let mut registry = lock(&self.inner.registry);
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut registry.handlers)
        };
        drop(released);
        lock(&self.inner.error_hook).take();

        let hooks = std::mem::take(&mut *lock(&self.inner.close_hooks));
        for hook in hooks {
            hook();
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.remote_addr {
            Some(addr) => write!(f, "{}", addr),
            None => write!(f, "{}", self.inner.id),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.remote_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct HandlerGuard {
    connection: Connection,
    id: HandlerId,
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        self.connection.remove_handler(self.id);
    }
}
