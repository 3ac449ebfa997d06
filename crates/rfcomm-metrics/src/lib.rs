//! Metrics for the RFCOMM command link.
//!
//! Every metric the session emits is declared once in [`metric_defs`] as a
//! [`Metric`]: its name, what it measures, the unit, and whether it is
//! recorded per link or per command. The `metrics` crate is re-exported so
//! callers record through the same facade. Nothing is recorded unless the
//! application installs a recorder.
//!
//! # Example
//!
//! ```rust,ignore
//! use rfcomm_metrics::{describe_metrics, metric_defs, LinkLabels};
//!
//! describe_metrics();
//!
//! let labels = LinkLabels::new("127.0.0.1:7070");
//! metrics::counter!(metric_defs::EXCHANGE_COMPLETED.name, &labels.command("PING")).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

// ============================================================================
// Declarations
// ============================================================================

/// How a metric is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Only ever increases.
    Counter,
    /// Set to the latest value.
    Gauge,
    /// One observation per event.
    Histogram,
}

/// The label set a metric is recorded with.
///
/// Link metrics carry the peer only. Command metrics add the command name,
/// which comes from the exchange's descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Labelled with `peer`.
    Link,
    /// Labelled with `peer` and `command`.
    Command,
}

impl Scope {
    /// Label keys for this scope, in recording order.
    pub const fn keys(self) -> &'static [&'static str] {
        match self {
            Scope::Link => &["peer"],
            Scope::Command => &["peer", "command"],
        }
    }
}

/// A metric declaration.
///
/// ```rust
/// use rfcomm_metrics::{Metric, MetricKind, Scope};
/// use metrics::Unit;
///
/// const RETRIES: Metric = Metric::counter(
///     "rfcomm.retries",
///     Scope::Command,
///     Unit::Count,
///     "Requests sent more than once",
/// );
///
/// assert_eq!(RETRIES.kind, MetricKind::Counter);
/// assert_eq!(RETRIES.scope.keys(), &["peer", "command"]);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// Name as recorded.
    pub name: &'static str,
    pub kind: MetricKind,
    pub scope: Scope,
    pub unit: Unit,
    /// One-line description for exporters.
    pub description: &'static str,
}

impl Metric {
    /// Declare a counter.
    pub const fn counter(name: &'static str, scope: Scope, unit: Unit, description: &'static str) -> Self {
        Metric { name, kind: MetricKind::Counter, scope, unit, description }
    }

    /// Declare a gauge.
    pub const fn gauge(name: &'static str, scope: Scope, unit: Unit, description: &'static str) -> Self {
        Metric { name, kind: MetricKind::Gauge, scope, unit, description }
    }

    /// Declare a histogram.
    pub const fn histogram(name: &'static str, scope: Scope, unit: Unit, description: &'static str) -> Self {
        Metric { name, kind: MetricKind::Histogram, scope, unit, description }
    }

    /// Register unit and description with the installed recorder.
    pub fn describe(&self) {
        match self.kind {
            MetricKind::Counter => describe_counter!(self.name, self.unit, self.description),
            MetricKind::Gauge => describe_gauge!(self.name, self.unit, self.description),
            MetricKind::Histogram => describe_histogram!(self.name, self.unit, self.description),
        }
    }
}

/// All metrics emitted by the link.
pub mod metric_defs {
    use super::{Metric, Scope, Unit};

    // ========================================================================
    // Exchanges
    // ========================================================================

    /// Requests handed to the writer thread.
    pub const EXCHANGE_DISPATCHED: Metric = Metric::counter(
        "rfcomm.exchange.dispatched",
        Scope::Link,
        Unit::Count,
        "Requests handed to the transport",
    );

    /// Exchanges that completed, with or without a response.
    pub const EXCHANGE_COMPLETED: Metric = Metric::counter(
        "rfcomm.exchange.completed",
        Scope::Command,
        Unit::Count,
        "Exchanges that completed",
    );

    pub const EXCHANGE_ABORTED: Metric = Metric::counter(
        "rfcomm.exchange.aborted",
        Scope::Command,
        Unit::Count,
        "Exchanges aborted by the response timeout",
    );

    pub const EXCHANGE_WRITE_FAILED: Metric = Metric::counter(
        "rfcomm.exchange.write_failed",
        Scope::Command,
        Unit::Count,
        "Exchanges whose request could not be written",
    );

    /// Time from dispatch, when the request is handed to the writer
    /// thread, to completion. Aborted and failed exchanges are not recorded.
    pub const EXCHANGE_LATENCY: Metric = Metric::histogram(
        "rfcomm.exchange.latency_ms",
        Scope::Command,
        Unit::Milliseconds,
        "Time from dispatch to completion",
    );

    /// Exchanges waiting behind the active one, sampled after every event.
    pub const QUEUE_DEPTH: Metric = Metric::gauge(
        "rfcomm.queue.depth",
        Scope::Link,
        Unit::Count,
        "Exchanges waiting for the link",
    );

    // ========================================================================
    // Bytes
    // ========================================================================

    pub const RX_BYTES: Metric = Metric::counter(
        "rfcomm.rx.bytes",
        Scope::Link,
        Unit::Bytes,
        "Bytes received from the peer",
    );

    pub const TX_BYTES: Metric = Metric::counter(
        "rfcomm.tx.bytes",
        Scope::Link,
        Unit::Bytes,
        "Bytes written to the peer",
    );

    /// Bytes the engine discarded: anything received while idle, or while
    /// dispatching a command that expects no response.
    pub const RX_STRAY_BYTES: Metric = Metric::counter(
        "rfcomm.rx.stray_bytes",
        Scope::Link,
        Unit::Bytes,
        "Bytes received while no command was waiting for them",
    );

    /// Every metric, for registration at startup.
    pub const ALL: &[&Metric] = &[
        &EXCHANGE_DISPATCHED,
        &EXCHANGE_COMPLETED,
        &EXCHANGE_ABORTED,
        &EXCHANGE_WRITE_FAILED,
        &EXCHANGE_LATENCY,
        &QUEUE_DEPTH,
        &RX_BYTES,
        &TX_BYTES,
        &RX_STRAY_BYTES,
    ];
}

// ============================================================================
// Labels
// ============================================================================

/// Label values identifying one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkLabels {
    /// Peer address or name.
    pub peer: String,
}

impl LinkLabels {
    pub fn new(peer: impl Into<String>) -> Self {
        Self { peer: peer.into() }
    }

    /// Label pairs for [`Scope::Link`] metrics.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("peer", self.peer.clone())]
    }

    /// Label pairs for [`Scope::Command`] metrics.
    pub fn command(&self, command: &str) -> Vec<(&'static str, String)> {
        vec![("peer", self.peer.clone()), ("command", command.to_string())]
    }
}

/// Register descriptions of every metric in [`metric_defs::ALL`].
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

/// Install a Prometheus recorder serving `/metrics` on `addr` and describe
/// all metrics.
#[cfg(feature = "prometheus")]
pub fn install_prometheus(
    addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}
