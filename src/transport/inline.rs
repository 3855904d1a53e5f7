use super::{evaluate_request, EvaluationConfig, FilterTransport, ProgressSink, TransportFuture};
use crate::models::TransportKind;
use crate::protocol::FilterRequestMessage;

/// Same-thread evaluation behind the async transport contract. Has no
/// suspension point; the future resolves on first poll.
#[derive(Debug, Clone, Default)]
pub struct InlineTransport {
    config: EvaluationConfig,
}

impl InlineTransport {
    pub fn new(config: EvaluationConfig) -> Self {
        Self { config }
    }
}

impl FilterTransport for InlineTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Inline
    }

    fn dispatch(&self, request: FilterRequestMessage, progress: ProgressSink) -> TransportFuture<'_> {
        Box::pin(async move {
            tracing::debug!(
                request_id = request.request_id,
                entries = request.entries.len(),
                "evaluating filter request inline"
            );
            Ok(evaluate_request(&request, &self.config, &mut |update| progress(update)))
        })
    }
}
