use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use crate::outbox::{ConsumeRequest, ConsumeResponse};
use tower::{Layer, Service};
use tracing::{error, info, warn, Instrument, Span};

/// Tower layer logging the outcome and duration of each consumed entry
#[derive(Clone, Default)]
pub struct ConsumeLoggingLayer;

impl ConsumeLoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for ConsumeLoggingLayer {
    type Service = ConsumeLoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        ConsumeLoggingService { inner: service }
    }
}

#[derive(Clone)]
pub struct ConsumeLoggingService<S> {
    inner: S,
}

impl<S> Service<ConsumeRequest> for ConsumeLoggingService<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let entry_id = req.entry_id;
        let payload_bytes = req.payload.as_ref().map(|p| p.len()).unwrap_or(0);
        let start = Instant::now();

        // Take the service that was driven to readiness, leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let span = Span::current();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let duration_ms = start.elapsed().as_millis();

                match &result {
                    Ok(ConsumeResponse::Retain(reason)) => {
                        warn!(
                            entry_id = %entry_id,
                            payload_bytes,
                            outcome = "retain",
                            duration_ms = %duration_ms,
                            reason = %reason,
                            "consumed entry {entry_id} in {duration_ms}ms [retain]"
                        );
                    }
                    Ok(response) => {
                        let outcome = response.outcome();
                        info!(
                            entry_id = %entry_id,
                            payload_bytes,
                            outcome = %outcome,
                            duration_ms = %duration_ms,
                            "consumed entry {entry_id} in {duration_ms}ms [{outcome}]"
                        );
                    }
                    Err(e) => {
                        error!(
                            entry_id = %entry_id,
                            payload_bytes,
                            duration_ms = %duration_ms,
                            error = %e,
                            "failed to consume entry {entry_id} in {duration_ms}ms: {e}"
                        );
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}
