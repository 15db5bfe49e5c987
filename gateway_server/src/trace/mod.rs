//! C8 — trace context registry. Holds one entry per in-flight request,
//! keyed by an opaque 16-byte trace id, and reaps it once every
//! expected span has reported in (or after a fixed inactivity
//! timeout), shipping it through a pluggable exporter first.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Sweep cadence for the reaper task.
pub const REAP_INTERVAL: Duration = Duration::from_millis(100);
/// Unconditional eviction age regardless of `final`.
pub const TRACE_TIME_OUT: Duration = Duration::from_secs(180);

pub type TraceId = [u8; 16];

pub fn trace_id_to_hex(id: &TraceId) -> String {
    hex::encode(id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStatus {
    Ok,
    Error(i32),
}

#[derive(Debug, Clone)]
pub enum AttrValue {
    Int(i64),
    Double(f64),
    String(String),
    Bool(bool),
}

#[derive(Debug, Clone)]
pub struct Span {
    pub span_id: u64,
    pub parent_span_id: Option<u64>,
    pub kind: SpanKind,
    pub attributes: Vec<(String, AttrValue)>,
    pub start_ns: u64,
    pub end_ns: Option<u64>,
    pub status: SpanStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Server,
}

/// Per-request trace state. `final_` marks that no more spans will be
/// appended; the reaper still waits for `span_num >= expected_span_num`
/// before shipping — a `final` context with fewer spans
/// than expected just waits out `TRACE_TIME_OUT` instead.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub flags: u8,
    pub spans: Vec<Span>,
    pub expected_span_num: i32,
    pub span_num: u32,
    pub final_: bool,
    pub created_at: std::time::Instant,
}

impl TraceContext {
    pub fn new(trace_id: TraceId, flags: u8, expected_span_num: i32) -> Self {
        TraceContext {
            trace_id,
            flags,
            spans: Vec::new(),
            expected_span_num,
            span_num: 0,
            final_: false,
            created_at: std::time::Instant::now(),
        }
    }

    pub fn push_span(&mut self, span: Span) {
        self.spans.push(span);
        self.span_num += 1;
    }

    pub fn mark_final(&mut self) {
        self.final_ = true;
    }

    /// Whether the reaper considers this context ready to ship:
    /// `final && span_num >= expected && expected_span_num > 0`. An
    /// `expected_span_num` of `0` means the caller never declared a
    /// span budget and the context only reaps on timeout.
    fn ready_to_ship(&self) -> bool {
        self.final_ && self.expected_span_num > 0 && self.span_num as i32 >= self.expected_span_num
    }

    fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= TRACE_TIME_OUT
    }
}

/// Result of shipping a trace context to the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    Shipped,
    Rejected,
    Retry,
}

/// Core never encodes the wire format itself — it calls into this.
#[async_trait::async_trait]
pub trait SpanExporter: Send + Sync {
    async fn export(&self, ctx: &TraceContext) -> ExportOutcome;
}

/// An exporter that ships nowhere, for tests and for gateways run
/// without a collector configured.
pub struct NullExporter;

#[async_trait::async_trait]
impl SpanExporter for NullExporter {
    async fn export(&self, _ctx: &TraceContext) -> ExportOutcome {
        ExportOutcome::Shipped
    }
}

pub struct TraceRegistry {
    entries: DashMap<TraceId, Arc<Mutex<TraceContext>>>,
    exporter: Arc<dyn SpanExporter>,
    stop_signal: Arc<Notify>,
}

impl TraceRegistry {
    pub fn new(exporter: Arc<dyn SpanExporter>) -> Arc<Self> {
        Arc::new(TraceRegistry {
            entries: DashMap::new(),
            exporter,
            stop_signal: Arc::new(Notify::new()),
        })
    }

    pub fn begin(&self, trace_id: TraceId, flags: u8, expected_span_num: i32) -> Arc<Mutex<TraceContext>> {
        let ctx = Arc::new(Mutex::new(TraceContext::new(trace_id, flags, expected_span_num)));
        self.entries.insert(trace_id, ctx.clone());
        ctx
    }

    pub fn get(&self, trace_id: &TraceId) -> Option<Arc<Mutex<TraceContext>>> {
        self.entries.get(trace_id).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One reaper pass: ships everything ready, drops everything
    /// expired. Returns the trace ids removed this pass (for tests).
    pub async fn reap_once(&self) -> Vec<TraceId> {
        let mut to_remove = VecDeque::new();
        for entry in self.entries.iter() {
            let trace_id = *entry.key();
            let ctx = entry.value().clone();
            let guard = ctx.lock().await;
            if guard.ready_to_ship() {
                let outcome = self.exporter.export(&guard).await;
                drop(guard);
                match outcome {
                    ExportOutcome::Shipped | ExportOutcome::Rejected => {
                        to_remove.push_back(trace_id);
                    }
                    ExportOutcome::Retry => {}
                }
            } else if guard.is_expired() {
                warn!(trace_id = %trace_id_to_hex(&trace_id), "trace context timed out unreaped");
                drop(guard);
                to_remove.push_back(trace_id);
            }
        }
        for id in &to_remove {
            self.entries.remove(id);
        }
        to_remove.into_iter().collect()
    }

    pub fn spawn_reaper(self: Arc<Self>) -> JoinHandle<()> {
        let stop = self.stop_signal.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REAP_INTERVAL);
            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    _ = ticker.tick() => {
                        let reaped = self.reap_once().await;
                        if !reaped.is_empty() {
                            debug!(count = reaped.len(), "trace reaper swept entries");
                        }
                    }
                }
            }
        })
    }

    pub fn stop_reaper(&self) {
        self.stop_signal.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(b: u8) -> TraceId {
        [b; 16]
    }

    #[tokio::test]
    async fn ready_context_ships_and_is_removed() {
        let registry = TraceRegistry::new(Arc::new(NullExporter));
        let ctx = registry.begin(tid(1), 1, 2);
        {
            let mut guard = ctx.lock().await;
            guard.push_span(Span {
                span_id: 1,
                parent_span_id: None,
                kind: SpanKind::Server,
                attributes: vec![],
                start_ns: 0,
                end_ns: Some(1),
                status: SpanStatus::Ok,
            });
            guard.push_span(Span {
                span_id: 2,
                parent_span_id: Some(1),
                kind: SpanKind::Server,
                attributes: vec![],
                start_ns: 1,
                end_ns: Some(2),
                status: SpanStatus::Ok,
            });
            guard.mark_final();
        }

        let reaped = registry.reap_once().await;
        assert_eq!(reaped, vec![tid(1)]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn non_final_context_with_zero_expected_survives_a_pass() {
        let registry = TraceRegistry::new(Arc::new(NullExporter));
        registry.begin(tid(2), 0, 0);
        let reaped = registry.reap_once().await;
        assert!(reaped.is_empty());
        assert_eq!(registry.len(), 1);
    }
}
