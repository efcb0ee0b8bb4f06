use thiserror::Error;

use crate::evaluator::EvaluatorError;
use crate::notifier::NotifierError;
use crate::scheduler::SchedulerError;
use crate::services::reader::ReaderError;
use crate::subscriptions::SubscriptionError;

/// Unifies the five component error types for call sites that span components (the demo
/// binary, integration tests). Individual components return their own narrower error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error(transparent)]
    Evaluator(#[from] EvaluatorError),

    #[error(transparent)]
    Notifier(#[from] NotifierError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error("encountered a technical failure: {source}")]
    Unexpected {
        #[source]
        source: anyhow::Error,
    },
}
