//! Single-flight command engine.
//!
//! The engine owns the queue of pending exchanges and the one exchange that is
//! currently on the wire. It never performs I/O itself: writes and timers go
//! out through [`EngineIo`], results come back through [`ResponseHandler`].
//! Whoever drives the engine feeds it the three kinds of link events
//! (data, write confirmation, timeout) in the order they happened.
//!
//! ```text
//!            enqueue                write confirmed (response required)
//!   Idle ─────────────▶ Dispatching ────────────────────────▶ AwaitingResponse
//!    ▲                     │   write confirmed (no response)      │        │
//!    │                     ▼                                      │        │
//!    └──────────── next exchange / Idle ◀── complete ─────────────┘        │
//!                          ▲                                               │
//!                          └────────────── abort (timeout) ◀───────────────┘
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, trace, warn};

use crate::constants::RESPONSE_TIMEOUT;
use crate::exchange::Exchange;
use crate::hex::hex_dump;

// ============================================================================
// Seams
// ============================================================================

/// Identifies one arming of the response timer. A timeout carrying any other
/// token is stale and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(pub u64);

/// Side effects requested by the engine.
pub trait EngineIo {
    /// Hand a request to the transport. Exactly one write confirmation or
    /// failure is expected back for each call.
    fn write(&mut self, request: Bytes);

    /// Arm the response timer. Replaces any timer that is still armed.
    fn arm_timer(&mut self, token: TimerToken, after: Duration);

    /// Disarm the response timer.
    fn disarm_timer(&mut self);
}

/// What was known about an exchange when it was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortReport {
    /// Response bytes received before the timeout.
    pub received: usize,
    /// Bytes the command expected, `None` for variable-length responses.
    pub expected: Option<usize>,
}

/// Receives the outcome of every exchange.
///
/// Callbacks run on the thread that drives the engine. They get the pending
/// queue so that policy code can drop queued commands or push recovery
/// commands; the engine dispatches the next exchange after the callback
/// returns.
pub trait ResponseHandler {
    /// The exchange completed. For commands with a response the accumulated
    /// bytes are ready to be read from `exchange`.
    fn on_exchange_complete(&mut self, exchange: &mut Exchange, pending: &mut PendingQueue);

    /// The response did not complete within the timeout.
    fn on_exchange_aborted(
        &mut self,
        exchange: &Exchange,
        report: AbortReport,
        pending: &mut PendingQueue,
    );

    /// The transport failed to write the request.
    fn on_write_failed(&mut self, exchange: &Exchange, reason: &str, pending: &mut PendingQueue) {
        let _ = (exchange, reason, pending);
    }
}

// ============================================================================
// Pending Queue
// ============================================================================

/// FIFO of exchanges waiting for the link.
#[derive(Debug, Default)]
pub struct PendingQueue {
    exchanges: VecDeque<Exchange>,
}

impl PendingQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        PendingQueue::default()
    }

    /// Append an exchange.
    pub fn push(&mut self, exchange: Exchange) {
        self.exchanges.push_back(exchange);
    }

    /// Drop every queued exchange and return how many there were.
    pub fn clear(&mut self) -> usize {
        let dropped = self.exchanges.len();
        self.exchanges.clear();
        dropped
    }

    /// Number of queued exchanges.
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    /// Names of the queued commands, head first.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.exchanges.iter().map(|e| e.name())
    }

    fn pop(&mut self) -> Option<Exchange> {
        self.exchanges.pop_front()
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Where the active exchange is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing on the wire; the active slot holds the idle sentinel.
    Idle,
    /// Request handed to the transport, write not yet confirmed.
    Dispatching,
    /// Write confirmed, response timer armed.
    AwaitingResponse,
}

/// The single-flight protocol state machine.
#[derive(Debug)]
pub struct ProtocolEngine {
    active: Exchange,
    state: EngineState,
    pending: PendingQueue,
    response_timeout: Duration,
    next_token: u64,
    armed: Option<TimerToken>,
}

impl Default for ProtocolEngine {
    fn default() -> Self {
        Self::new(RESPONSE_TIMEOUT)
    }
}

impl ProtocolEngine {
    /// Create an idle engine with the given response timeout.
    pub fn new(response_timeout: Duration) -> Self {
        ProtocolEngine {
            active: Exchange::idle(),
            state: EngineState::Idle,
            pending: PendingQueue::new(),
            response_timeout,
            next_token: 0,
            armed: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The active exchange (the idle sentinel when idle).
    pub fn active(&self) -> &Exchange {
        &self.active
    }

    /// The queue of exchanges not yet dispatched.
    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    /// Response timeout applied to every command.
    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Token of the armed response timer, if any.
    pub fn armed_timer(&self) -> Option<TimerToken> {
        self.armed
    }

    /// Whether bytes arriving now would be thrown away: nothing is active,
    /// or the request in flight expects no response.
    pub fn discards_data(&self) -> bool {
        match self.state {
            EngineState::Idle => true,
            EngineState::Dispatching => !self.active.requires_response(),
            EngineState::AwaitingResponse => false,
        }
    }

    /// Queue an exchange; dispatch it right away if the link is idle.
    pub fn enqueue(&mut self, exchange: Exchange, io: &mut impl EngineIo) {
        debug!("enqueue({})", exchange.name());
        self.pending.push(exchange);
        if self.state == EngineState::Idle {
            self.dispatch_next(io);
        }
    }

    /// Drop every exchange that has not been dispatched yet. The active
    /// exchange is not affected.
    pub fn clear_pending(&mut self) -> usize {
        let dropped = self.pending.clear();
        if dropped > 0 {
            debug!("cleared {} pending exchanges", dropped);
        }
        dropped
    }

    /// The transport finished writing the active request.
    pub fn on_write_confirmed(
        &mut self,
        io: &mut impl EngineIo,
        handler: &mut impl ResponseHandler,
    ) {
        if self.state != EngineState::Dispatching {
            warn!(
                "write confirmation while {:?} ({}), ignoring",
                self.state,
                self.active.name()
            );
            return;
        }

        if !self.active.requires_response() || self.active.is_response_complete() {
            self.complete(io, handler);
            return;
        }

        self.next_token += 1;
        let token = TimerToken(self.next_token);
        self.armed = Some(token);
        self.state = EngineState::AwaitingResponse;
        trace!(
            "{} awaiting response, timer {:?} in {:?}",
            self.active.name(),
            token,
            self.response_timeout
        );
        io.arm_timer(token, self.response_timeout);
    }

    /// The transport failed to write the active request.
    pub fn on_write_failed(
        &mut self,
        reason: &str,
        io: &mut impl EngineIo,
        handler: &mut impl ResponseHandler,
    ) {
        if self.state != EngineState::Dispatching {
            warn!("write failure while {:?}: {}", self.state, reason);
            return;
        }
        let exchange = std::mem::replace(&mut self.active, Exchange::idle());
        warn!("write of {} failed: {}", exchange.name(), reason);
        handler.on_write_failed(&exchange, reason, &mut self.pending);
        self.dispatch_next(io);
    }

    /// A chunk of bytes arrived from the transport.
    pub fn on_data(
        &mut self,
        chunk: &[u8],
        io: &mut impl EngineIo,
        handler: &mut impl ResponseHandler,
    ) {
        debug!(
            "received ({}): {} {}",
            self.active.name(),
            chunk.len(),
            hex_dump(chunk)
        );

        match self.state {
            EngineState::Idle => {
                self.active.accept_chunk(chunk);
                debug!("got {} bytes but no command is active", chunk.len());
            }
            EngineState::Dispatching => {
                if self.active.requires_response() {
                    self.active.accept_chunk(chunk);
                } else {
                    debug!(
                        "discarding {} bytes, {} expects no response",
                        chunk.len(),
                        self.active.name()
                    );
                }
            }
            EngineState::AwaitingResponse => {
                if self.active.accept_chunk(chunk) {
                    self.armed = None;
                    io.disarm_timer();
                    self.complete(io, handler);
                }
            }
        }
    }

    /// The response timer fired.
    pub fn on_timeout(
        &mut self,
        token: TimerToken,
        io: &mut impl EngineIo,
        handler: &mut impl ResponseHandler,
    ) {
        if self.state != EngineState::AwaitingResponse || self.armed != Some(token) {
            trace!("stale timer {:?} ignored", token);
            return;
        }
        self.armed = None;

        let mut exchange = std::mem::replace(&mut self.active, Exchange::idle());
        let report = AbortReport {
            received: exchange.received_len(),
            expected: exchange.descriptor().policy.expected_len(),
        };
        handler.on_exchange_aborted(&exchange, report, &mut self.pending);
        exchange.clear_response();
        self.dispatch_next(io);
    }

    fn complete(&mut self, io: &mut impl EngineIo, handler: &mut impl ResponseHandler) {
        let mut exchange = std::mem::replace(&mut self.active, Exchange::idle());
        trace!("{} complete", exchange.name());
        handler.on_exchange_complete(&mut exchange, &mut self.pending);
        exchange.clear_response();
        self.dispatch_next(io);
    }

    fn dispatch_next(&mut self, io: &mut impl EngineIo) {
        match self.pending.pop() {
            Some(next) => {
                debug!("dispatching {}", next.name());
                self.active = next;
                self.state = EngineState::Dispatching;
                io.write(self.active.request());
            }
            None => {
                self.active = Exchange::idle();
                self.state = EngineState::Idle;
            }
        }
    }
}
