//! Session threads.
//!
//! ## Architecture
//!
//! A session runs three threads around one [`ProtocolEngine`]:
//!
//! - `rfcomm-reader` blocks on the link and posts every chunk it reads.
//! - `rfcomm-writer` writes requests and posts one confirmation per write.
//! - `rfcomm-session` owns the engine and the handler. It is the only thread
//!   that touches engine state, so nothing is locked.
//!
//! All three talk to the consumer through a single inbox, and so do callers
//! (via [`SessionHandle`]). Events are therefore applied in the order they
//! were posted.

use std::cell::Cell;
use std::io::{self, Read, Write};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use bytes::Bytes;
use crossbeam_channel::{select, Receiver, Sender};
use rfcomm_metrics::{metric_defs, LinkLabels};
use rfcomm_protocol::{
    hex_dump, AbortReport, EngineIo, Exchange, PendingQueue, ProtocolEngine,
    ResponseHandler, TimerToken,
};
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::transport::{LinkCloser, Transport};

// ============================================================================
// Events
// ============================================================================

/// Messages processed by the consumer thread.
#[derive(Debug)]
enum SessionEvent {
    /// Queue an exchange.
    Enqueue(Exchange),
    /// Drop every exchange not yet dispatched.
    ClearPending,
    /// Bytes read from the link.
    Data(Vec<u8>),
    /// The writer finished a request.
    WriteConfirmed,
    /// The writer failed a request.
    WriteFailed(String),
    /// The reader hit end of stream or an error.
    Disconnected(Option<String>),
    /// Shut the session down.
    Close,
}

/// Link-level notifications that do not belong to a single exchange.
pub trait SessionObserver {
    /// The link went away. `reason` is `None` on a clean end of stream.
    fn on_disconnected(&mut self, reason: Option<&str>) {
        let _ = reason;
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable sender into a session, usable from any thread.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inbox: Sender<SessionEvent>,
}

impl SessionHandle {
    fn post(&self, event: SessionEvent) -> Result<(), SessionError> {
        self.inbox.send(event).map_err(|_| SessionError::Closed)
    }

    /// Queue an exchange for dispatch.
    pub fn enqueue(&self, exchange: Exchange) -> Result<(), SessionError> {
        self.post(SessionEvent::Enqueue(exchange))
    }

    /// Drop every exchange that has not been dispatched yet.
    pub fn clear_pending(&self) -> Result<(), SessionError> {
        self.post(SessionEvent::ClearPending)
    }

    /// Ask the session to shut down without waiting for it.
    pub fn request_close(&self) -> Result<(), SessionError> {
        self.post(SessionEvent::Close)
    }
}

// ============================================================================
// Session
// ============================================================================

/// A running session.
///
/// Created with [`Session::start`]; the handler moves onto the consumer
/// thread and comes back from [`Session::close`]. Dropping a session closes
/// the link without waiting for the threads.
pub struct Session<H> {
    handle: SessionHandle,
    peer: String,
    consumer: Option<JoinHandle<H>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl<H> std::fmt::Debug for Session<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("peer", &self.peer).finish_non_exhaustive()
    }
}

impl<H> Session<H>
where
    H: ResponseHandler + SessionObserver + Send + 'static,
{
    /// Connect the transport and start the session threads.
    pub fn start<T>(transport: &mut T, handler: H, config: SessionConfig) -> Result<Self, SessionError>
    where
        T: Transport + ?Sized,
    {
        config.validate()?;
        let link = transport.connect()?;
        let peer = link.peer.clone();
        let labels = LinkLabels::new(peer.clone());
        info!("session connected to {}", peer);

        let (inbox_tx, inbox_rx) = crossbeam_channel::unbounded();
        let (writer_tx, writer_rx) = crossbeam_channel::unbounded();

        let reader = {
            let inbox = inbox_tx.clone();
            let labels = labels.clone();
            let buffer_size = config.read_buffer_size;
            let source = link.reader;
            thread::Builder::new()
                .name("rfcomm-reader".into())
                .spawn(move || reader_main(source, inbox, buffer_size, labels))?
        };

        let writer = {
            let inbox = inbox_tx.clone();
            let labels = labels.clone();
            let sink = link.writer;
            thread::Builder::new()
                .name("rfcomm-writer".into())
                .spawn(move || writer_main(sink, writer_rx, inbox, labels))?
        };

        let consumer = {
            let state = Consumer {
                engine: ProtocolEngine::new(config.response_timeout()),
                handler,
                labels,
                writer_tx,
                inbox_tx: inbox_tx.clone(),
                deadline: None,
                dispatched_at: Cell::new(None),
                closer: link.closer,
            };
            thread::Builder::new()
                .name("rfcomm-session".into())
                .spawn(move || state.run(inbox_rx))?
        };

        Ok(Session {
            handle: SessionHandle { inbox: inbox_tx },
            peer,
            consumer: Some(consumer),
            reader: Some(reader),
            writer: Some(writer),
        })
    }

    /// A handle for enqueueing from other threads.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Peer identity reported by the transport.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Queue an exchange for dispatch.
    pub fn enqueue(&self, exchange: Exchange) -> Result<(), SessionError> {
        self.handle.enqueue(exchange)
    }

    /// Drop every exchange that has not been dispatched yet.
    pub fn clear_pending(&self) -> Result<(), SessionError> {
        self.handle.clear_pending()
    }

    /// Close the link, wait for all threads and return the handler.
    pub fn close(mut self) -> Result<H, SessionError> {
        // The consumer may already be gone if a handle requested close.
        let _ = self.handle.post(SessionEvent::Close);

        let consumer = self.consumer.take().ok_or(SessionError::Closed)?;
        let handler = consumer
            .join()
            .map_err(|_| SessionError::Io(io::Error::other("session thread panicked")))?;
        for thread in [self.writer.take(), self.reader.take()].into_iter().flatten() {
            let _ = thread.join();
        }
        debug!("session to {} closed", self.peer);
        Ok(handler)
    }
}

impl<H> Drop for Session<H> {
    fn drop(&mut self) {
        if self.consumer.is_some() {
            let _ = self.handle.inbox.send(SessionEvent::Close);
        }
    }
}

// ============================================================================
// Reader / Writer
// ============================================================================

fn reader_main(
    mut source: Box<dyn Read + Send>,
    inbox: Sender<SessionEvent>,
    buffer_size: usize,
    labels: LinkLabels,
) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        match source.read(&mut buf) {
            Ok(0) => {
                let _ = inbox.send(SessionEvent::Disconnected(None));
                break;
            }
            Ok(n) => {
                metrics::counter!(metric_defs::RX_BYTES.name, &labels.to_labels()).increment(n as u64);
                if inbox.send(SessionEvent::Data(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = inbox.send(SessionEvent::Disconnected(Some(e.to_string())));
                break;
            }
        }
    }
    trace!("reader for {} stopped", labels.peer);
}

fn writer_main(
    mut sink: Box<dyn Write + Send>,
    requests: Receiver<Bytes>,
    inbox: Sender<SessionEvent>,
    labels: LinkLabels,
) {
    for request in requests.iter() {
        let event = match sink.write_all(&request).and_then(|_| sink.flush()) {
            Ok(()) => {
                metrics::counter!(metric_defs::TX_BYTES.name, &labels.to_labels())
                    .increment(request.len() as u64);
                SessionEvent::WriteConfirmed
            }
            Err(e) => SessionEvent::WriteFailed(e.to_string()),
        };
        if inbox.send(event).is_err() {
            break;
        }
    }
    trace!("writer for {} stopped", labels.peer);
}

// ============================================================================
// Consumer
// ============================================================================

struct Consumer<H> {
    engine: ProtocolEngine,
    handler: H,
    labels: LinkLabels,
    writer_tx: Sender<Bytes>,
    inbox_tx: Sender<SessionEvent>,
    deadline: Option<(TimerToken, Instant)>,
    dispatched_at: Cell<Option<Instant>>,
    closer: Box<dyn LinkCloser>,
}

impl<H> Consumer<H>
where
    H: ResponseHandler + SessionObserver,
{
    fn run(mut self, inbox: Receiver<SessionEvent>) -> H {
        loop {
            let timer = match self.deadline {
                Some((_, at)) => crossbeam_channel::at(at),
                None => crossbeam_channel::never(),
            };
            let running = select! {
                recv(inbox) -> event => match event {
                    Ok(SessionEvent::Close) | Err(_) => false,
                    Ok(event) => {
                        self.handle(event);
                        true
                    }
                },
                recv(timer) -> _ => {
                    self.timeout();
                    true
                }
            };
            if !running {
                break;
            }
        }

        let Consumer { handler, closer, labels, .. } = self;
        closer.close();
        info!("session to {} closing", labels.peer);
        handler
    }

    fn timeout(&mut self) {
        if let Some((token, _)) = self.deadline.take() {
            self.handle_with(|engine, io, handler| engine.on_timeout(token, io, handler));
        }
    }

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Enqueue(exchange) => {
                self.handle_with(|engine, io, _| engine.enqueue(exchange, io));
            }
            SessionEvent::ClearPending => {
                let dropped = self.engine.clear_pending();
                debug!("dropped {} pending exchanges", dropped);
            }
            SessionEvent::Data(chunk) => {
                if self.engine.discards_data() {
                    metrics::counter!(metric_defs::RX_STRAY_BYTES.name, &self.labels.to_labels())
                        .increment(chunk.len() as u64);
                }
                self.handle_with(|engine, io, handler| engine.on_data(&chunk, io, handler));
            }
            SessionEvent::WriteConfirmed => {
                self.handle_with(|engine, io, handler| engine.on_write_confirmed(io, handler));
            }
            SessionEvent::WriteFailed(reason) => {
                self.handle_with(|engine, io, handler| engine.on_write_failed(&reason, io, handler));
            }
            SessionEvent::Disconnected(reason) => {
                match &reason {
                    Some(reason) => warn!("link to {} lost: {}", self.labels.peer, reason),
                    None => info!("link to {} closed by peer", self.labels.peer),
                }
                self.handler.on_disconnected(reason.as_deref());
            }
            SessionEvent::Close => {}
        }
    }

    /// Run one engine call with the session's I/O and an instrumented handler.
    fn handle_with<F>(&mut self, f: F)
    where
        F: FnOnce(&mut ProtocolEngine, &mut ChannelIo<'_>, &mut Instrumented<'_, H>),
    {
        let Consumer {
            engine,
            handler,
            labels,
            writer_tx,
            inbox_tx,
            deadline,
            dispatched_at,
            ..
        } = self;
        let labels = &*labels;
        let dispatched_at = &*dispatched_at;
        let mut io = ChannelIo {
            writer_tx,
            inbox_tx,
            deadline,
            dispatched_at,
            labels,
        };
        let mut handler = Instrumented {
            inner: handler,
            dispatched_at,
            labels,
        };
        f(&mut *engine, &mut io, &mut handler);

        metrics::gauge!(metric_defs::QUEUE_DEPTH.name, &labels.to_labels())
            .set(engine.pending().len() as f64);
    }
}

/// [`EngineIo`] backed by the writer thread and a select-driven deadline.
struct ChannelIo<'a> {
    writer_tx: &'a Sender<Bytes>,
    inbox_tx: &'a Sender<SessionEvent>,
    deadline: &'a mut Option<(TimerToken, Instant)>,
    dispatched_at: &'a Cell<Option<Instant>>,
    labels: &'a LinkLabels,
}

impl EngineIo for ChannelIo<'_> {
    fn write(&mut self, request: Bytes) {
        trace!("tx {}", hex_dump(&request));
        metrics::counter!(metric_defs::EXCHANGE_DISPATCHED.name, &self.labels.to_labels()).increment(1);
        self.dispatched_at.set(Some(Instant::now()));
        if self.writer_tx.send(request).is_err() {
            // Reported back through the inbox so the engine sees it as an event.
            let _ = self
                .inbox_tx
                .send(SessionEvent::WriteFailed("writer thread stopped".into()));
        }
    }

    fn arm_timer(&mut self, token: TimerToken, after: std::time::Duration) {
        *self.deadline = Some((token, Instant::now() + after));
    }

    fn disarm_timer(&mut self) {
        *self.deadline = None;
    }
}

/// Wraps the caller's handler with per-command metrics.
struct Instrumented<'a, H> {
    inner: &'a mut H,
    dispatched_at: &'a Cell<Option<Instant>>,
    labels: &'a LinkLabels,
}

impl<H: ResponseHandler> ResponseHandler for Instrumented<'_, H> {
    fn on_exchange_complete(&mut self, exchange: &mut Exchange, pending: &mut PendingQueue) {
        let labels = self.labels.command(exchange.name());
        metrics::counter!(metric_defs::EXCHANGE_COMPLETED.name, &labels).increment(1);
        if let Some(started) = self.dispatched_at.take() {
            metrics::histogram!(metric_defs::EXCHANGE_LATENCY.name, &labels)
                .record(started.elapsed().as_secs_f64() * 1000.0);
        }
        self.inner.on_exchange_complete(exchange, pending);
    }

    fn on_exchange_aborted(&mut self, exchange: &Exchange, report: AbortReport, pending: &mut PendingQueue) {
        let labels = self.labels.command(exchange.name());
        metrics::counter!(metric_defs::EXCHANGE_ABORTED.name, &labels).increment(1);
        self.dispatched_at.set(None);
        self.inner.on_exchange_aborted(exchange, report, pending);
    }

    fn on_write_failed(&mut self, exchange: &Exchange, reason: &str, pending: &mut PendingQueue) {
        let labels = self.labels.command(exchange.name());
        metrics::counter!(metric_defs::EXCHANGE_WRITE_FAILED.name, &labels).increment(1);
        self.dispatched_at.set(None);
        self.inner.on_write_failed(exchange, reason, pending);
    }
}
