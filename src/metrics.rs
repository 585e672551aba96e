#![forbid(unsafe_code)]

// Server metrics - lock-free AtomicU64 counters and a Prometheus-compatible histogram.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;

/// Histogram bucket upper bounds in microseconds, paired with their `le` label.
/// Coordinator work never touches I/O, so the buckets sit well below a millisecond.
const BUCKETS: [(u64, &str); 8] = [
    (50, "0.00005"),
    (100, "0.0001"),
    (250, "0.00025"),
    (500, "0.0005"),
    (1_000, "0.001"),
    (5_000, "0.005"),
    (25_000, "0.025"),
    (100_000, "0.1"),
];

/// Prometheus-compatible cumulative histogram with fixed buckets.
pub struct Histogram {
    buckets: [AtomicU64; BUCKETS.len()],
    count: AtomicU64,
    sum_us: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, duration: Duration) {
        let us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.sum_us.fetch_add(us, Relaxed);
        self.count.fetch_add(1, Relaxed);
        for (slot, (bound, _)) in self.buckets.iter().zip(BUCKETS.iter()) {
            if us <= *bound {
                slot.fetch_add(1, Relaxed);
            }
        }
    }

    fn render(&self, name: &str, help: &str, out: &mut String) {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} histogram");
        for (slot, (_, label)) in self.buckets.iter().zip(BUCKETS.iter()) {
            let _ = writeln!(out, "{name}_bucket{{le=\"{label}\"}} {}", slot.load(Relaxed));
        }
        let count = self.count.load(Relaxed);
        let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {count}");
        let sum_us = self.sum_us.load(Relaxed);
        let _ = writeln!(out, "{name}_sum {}.{:06}", sum_us / 1_000_000, sum_us % 1_000_000);
        let _ = writeln!(out, "{name}_count {count}");
    }
}

/// Server-wide metrics. Cloning shares the same counters.
#[derive(Clone)]
pub struct ServerMetrics {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Counters {
    connections_total: AtomicU64,
    messages_received_total: AtomicU64,
    messages_sent_total: AtomicU64,
    errors_total: AtomicU64,
    rooms_created_total: AtomicU64,
    joins_total: AtomicU64,
    join_rejections_total: AtomicU64,
    refreshes_total: AtomicU64,
    leaves_total: AtomicU64,
    departures_finalized_total: AtomicU64,
    host_failovers_total: AtomicU64,
    relays_forwarded_total: AtomicU64,
    relays_dropped_total: AtomicU64,
    control_denied_total: AtomicU64,
}

struct Inner {
    counters: Counters,
    connections_active: AtomicU64,
    message_handling: Histogram,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                counters: Counters::default(),
                connections_active: AtomicU64::new(0),
                message_handling: Histogram::new(),
            }),
        }
    }

    // --- Counter increments ---

    pub fn inc_connections_total(&self) {
        self.inner.counters.connections_total.fetch_add(1, Relaxed);
    }

    pub fn inc_messages_received(&self) {
        self.inner.counters.messages_received_total.fetch_add(1, Relaxed);
    }

    pub fn inc_messages_sent(&self) {
        self.inner.counters.messages_sent_total.fetch_add(1, Relaxed);
    }

    pub fn inc_errors(&self) {
        self.inner.counters.errors_total.fetch_add(1, Relaxed);
    }

    pub fn inc_rooms_created(&self) {
        self.inner.counters.rooms_created_total.fetch_add(1, Relaxed);
    }

    pub fn inc_joins(&self) {
        self.inner.counters.joins_total.fetch_add(1, Relaxed);
    }

    pub fn inc_join_rejections(&self) {
        self.inner.counters.join_rejections_total.fetch_add(1, Relaxed);
    }

    pub fn inc_refreshes(&self) {
        self.inner.counters.refreshes_total.fetch_add(1, Relaxed);
    }

    pub fn inc_leaves(&self) {
        self.inner.counters.leaves_total.fetch_add(1, Relaxed);
    }

    pub fn inc_departures_finalized(&self) {
        self.inner.counters.departures_finalized_total.fetch_add(1, Relaxed);
    }

    pub fn inc_host_failovers(&self) {
        self.inner.counters.host_failovers_total.fetch_add(1, Relaxed);
    }

    pub fn inc_relays_forwarded(&self) {
        self.inner.counters.relays_forwarded_total.fetch_add(1, Relaxed);
    }

    pub fn inc_relays_dropped(&self) {
        self.inner.counters.relays_dropped_total.fetch_add(1, Relaxed);
    }

    pub fn inc_control_denied(&self) {
        self.inner.counters.control_denied_total.fetch_add(1, Relaxed);
    }

    pub fn host_failovers(&self) -> u64 {
        self.inner.counters.host_failovers_total.load(Relaxed)
    }

    pub fn control_denied(&self) -> u64 {
        self.inner.counters.control_denied_total.load(Relaxed)
    }

    pub fn relays_dropped(&self) -> u64 {
        self.inner.counters.relays_dropped_total.load(Relaxed)
    }

    // --- Gauge ---

    /// Increments connections_active and returns a guard that decrements it on drop.
    pub fn connection_active_guard(&self) -> ConnectionGuard {
        self.inner.connections_active.fetch_add(1, Relaxed);
        ConnectionGuard { inner: self.inner.clone() }
    }

    pub fn connections_active(&self) -> u64 {
        self.inner.connections_active.load(Relaxed)
    }

    // --- Histogram ---

    pub fn observe_message_handling(&self, duration: Duration) {
        self.inner.message_handling.observe(duration);
    }

    // --- Prometheus rendering ---

    /// Render all metrics in Prometheus text exposition format.
    /// `rooms_active` and `participants_active` are sampled from the registry by the caller.
    pub fn render_prometheus(&self, rooms_active: usize, participants_active: usize) -> String {
        let mut out = String::with_capacity(4096);
        let c = &self.inner.counters;

        let counters: [(&str, &str, &AtomicU64); 14] = [
            ("meetrelay_connections_total", "Total WebSocket connections", &c.connections_total),
            ("meetrelay_messages_received_total", "Total messages received from clients", &c.messages_received_total),
            ("meetrelay_messages_sent_total", "Total messages sent to clients", &c.messages_sent_total),
            ("meetrelay_errors_total", "Total rejected or failed client messages", &c.errors_total),
            ("meetrelay_rooms_created_total", "Total rooms created", &c.rooms_created_total),
            ("meetrelay_joins_total", "Total accepted room joins", &c.joins_total),
            ("meetrelay_join_rejections_total", "Total joins rejected by a room lock", &c.join_rejections_total),
            ("meetrelay_refreshes_total", "Total joins recognised as a refresh of an existing identity", &c.refreshes_total),
            ("meetrelay_leaves_total", "Total explicit leaves", &c.leaves_total),
            ("meetrelay_departures_finalized_total", "Total finalized departures", &c.departures_finalized_total),
            ("meetrelay_host_failovers_total", "Total host failovers", &c.host_failovers_total),
            ("meetrelay_relays_forwarded_total", "Total negotiation messages forwarded", &c.relays_forwarded_total),
            ("meetrelay_relays_dropped_total", "Total negotiation messages dropped for an absent target", &c.relays_dropped_total),
            ("meetrelay_control_denied_total", "Total host-only commands ignored from non-hosts", &c.control_denied_total),
        ];
        for (name, help, value) in counters {
            render_metric(&mut out, name, help, "counter", value.load(Relaxed));
        }

        render_metric(&mut out, "meetrelay_connections_active", "Currently active WebSocket connections", "gauge", self.connections_active());
        render_metric(&mut out, "meetrelay_rooms_active", "Currently active rooms", "gauge", rooms_active as u64);
        render_metric(&mut out, "meetrelay_participants_active", "Currently active participants", "gauge", participants_active as u64);

        self.inner.message_handling.render(
            "meetrelay_message_handling_seconds",
            "Message handling latency in seconds",
            &mut out,
        );

        out
    }
}

/// Decrements `connections_active` on drop.
pub struct ConnectionGuard {
    inner: Arc<Inner>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.inner.connections_active.fetch_sub(1, Relaxed);
    }
}

fn render_metric(out: &mut String, name: &str, help: &str, kind: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
    let _ = writeln!(out, "{name} {value}");
}
