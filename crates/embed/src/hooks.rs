//! Structured lifecycle events for embedding calls.
//!
//! The service and the terminal pipeline stage report what they do through an
//! injected [`EventSink`]. Emission is fire-and-forget: sinks cannot return
//! errors, and a sink that panics is contained so it never changes the
//! outcome of the call that emitted the event.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{info, warn};

/// Something that happened while embedding.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedEvent {
    EmbedStarted {
        request_id: String,
        provider: String,
        input_count: usize,
    },
    EmbedCompleted {
        request_id: String,
        provider: String,
        model: String,
        dimensions: usize,
        duration: Duration,
        prompt_tokens: usize,
        total_tokens: usize,
    },
    EmbedFailed {
        request_id: String,
        provider: String,
        duration: Duration,
        error: String,
    },
    ProviderCallStarted {
        provider: String,
        input_count: usize,
    },
    ProviderCallCompleted {
        provider: String,
        model: String,
        dimensions: usize,
        duration: Duration,
        prompt_tokens: usize,
        total_tokens: usize,
    },
    ProviderCallFailed {
        provider: String,
        duration: Duration,
        error: String,
    },
}

impl EmbedEvent {
    /// Dotted signal name, stable across releases.
    pub fn signal(&self) -> &'static str {
        match self {
            EmbedEvent::EmbedStarted { .. } => "vex.embed.started",
            EmbedEvent::EmbedCompleted { .. } => "vex.embed.completed",
            EmbedEvent::EmbedFailed { .. } => "vex.embed.failed",
            EmbedEvent::ProviderCallStarted { .. } => "vex.provider.call.started",
            EmbedEvent::ProviderCallCompleted { .. } => "vex.provider.call.completed",
            EmbedEvent::ProviderCallFailed { .. } => "vex.provider.call.failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EmbedEvent::EmbedFailed { .. } | EmbedEvent::ProviderCallFailed { .. }
        )
    }
}

/// Receiver of [`EmbedEvent`]s.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &EmbedEvent);
}

/// Deliver `event` to `sink`, swallowing any panic raised by the sink.
pub(crate) fn emit_safely(sink: &dyn EventSink, event: EmbedEvent) {
    let _ = panic::catch_unwind(AssertUnwindSafe(|| sink.emit(&event)));
}

/// Default sink: one `tracing` record per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &EmbedEvent) {
        match event {
            EmbedEvent::EmbedStarted {
                request_id,
                provider,
                input_count,
            } => info!(%request_id, %provider, input_count, "embed_started"),
            EmbedEvent::EmbedCompleted {
                request_id,
                provider,
                model,
                dimensions,
                duration,
                prompt_tokens,
                total_tokens,
            } => info!(
                %request_id,
                %provider,
                %model,
                dimensions,
                elapsed_micros = duration.as_micros(),
                prompt_tokens,
                total_tokens,
                "embed_success"
            ),
            EmbedEvent::EmbedFailed {
                request_id,
                provider,
                duration,
                error,
            } => warn!(
                %request_id,
                %provider,
                elapsed_micros = duration.as_micros(),
                %error,
                "embed_failure"
            ),
            EmbedEvent::ProviderCallStarted {
                provider,
                input_count,
            } => info!(%provider, input_count, "provider_call_started"),
            EmbedEvent::ProviderCallCompleted {
                provider,
                model,
                dimensions,
                duration,
                prompt_tokens,
                total_tokens,
            } => info!(
                %provider,
                %model,
                dimensions,
                elapsed_micros = duration.as_micros(),
                prompt_tokens,
                total_tokens,
                "provider_call_success"
            ),
            EmbedEvent::ProviderCallFailed {
                provider,
                duration,
                error,
            } => warn!(
                %provider,
                elapsed_micros = duration.as_micros(),
                %error,
                "provider_call_failure"
            ),
        }
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &EmbedEvent) {}
}

/// Forwards each event to several sinks in order. A panicking sink does not
/// starve the ones after it.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &EmbedEvent) {
        for sink in &self.sinks {
            let _ = panic::catch_unwind(AssertUnwindSafe(|| sink.emit(event)));
        }
    }
}

/// Keeps every event in memory. Meant for tests and debugging.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EmbedEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<EmbedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Signal names of the recorded events, in order.
    pub fn signals(&self) -> Vec<&'static str> {
        self.events().iter().map(EmbedEvent::signal).collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &EmbedEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
