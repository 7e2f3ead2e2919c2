//! Prometheus metrics for the agent loop, tool dispatch and sandbox
//!
//! All collectors live in a crate-private [`Registry`] so that embedding
//! applications can expose them next to their own metrics without name
//! clashes on the default registry.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Finished agent turns by outcome (completed, budget_exhausted, failed, protocol_violation)
    pub static ref AGENT_TURNS: IntCounterVec = register(IntCounterVec::new(
        Opts::new("nexus_agent_turns_total", "Agent turns by outcome"),
        &["outcome"],
    ));

    /// LLM calls made per agent turn
    pub static ref AGENT_LLM_CALLS: Histogram = register(Histogram::with_opts(
        HistogramOpts::new("nexus_agent_llm_calls", "LLM calls per agent turn")
            .buckets(vec![1.0, 2.0, 3.0, 4.0, 5.0, 8.0, 13.0]),
    ));

    pub static ref LLM_CALL_TIME: HistogramVec = register(HistogramVec::new(
        HistogramOpts::new("nexus_llm_call_duration_seconds", "Completion call latency"),
        &["model"],
    ));

    pub static ref TOOL_CALLS: IntCounterVec = register(IntCounterVec::new(
        Opts::new("nexus_tool_calls_total", "Tool calls dispatched by tool name"),
        &["tool"],
    ));

    /// Sandbox executions by status (success, error, timeout, spawn_error)
    pub static ref CODE_EXECUTIONS: IntCounterVec = register(IntCounterVec::new(
        Opts::new("nexus_code_executions_total", "Sandboxed code executions by status"),
        &["status"],
    ));

    pub static ref CODE_EXECUTION_DURATION: Histogram = register(Histogram::with_opts(
        HistogramOpts::new(
            "nexus_code_execution_duration_seconds",
            "Wall-clock duration of sandboxed executions",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
    ));
}

/// Register a collector, falling back to an unregistered instance if the
/// registry rejects it (e.g. a duplicate name)
fn register<C>(collector: Result<C, prometheus::Error>) -> C
where
    C: prometheus::core::Collector + Clone + 'static,
{
    let collector = match collector {
        Ok(c) => c,
        // Opts above are static and valid; construction cannot fail
        Err(e) => panic!("invalid metric definition: {e}"),
    };
    if let Err(e) = REGISTRY.register(Box::new(collector.clone())) {
        tracing::warn!(error = %e, "Failed to register metric");
    }
    collector
}

/// Render all metrics in the Prometheus text exposition format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
