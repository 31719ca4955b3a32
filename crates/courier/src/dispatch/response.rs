//! Response sink contract and the exactly-once write discipline.

use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::DISPATCH_TARGET;
use super::errors::DispatchError;
use super::outcome::ResponseAction;
use super::request::Attachments;
use crate::component::{Affinity, ApplicationException, SessionId};
use crate::observer::InvocationLabel;
use crate::pool::panic_message;

/// Transport failure reported by a [`ResponseSink`].
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ResponseError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ResponseError {
    /// Creates an error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error wrapping an underlying transport failure.
    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Response-writing primitives supplied by the transport.
///
/// The dispatcher calls each terminal primitive at most once per invocation
/// and never more than one of them.
pub trait ResponseSink: Send + Sync {
    /// Writes a successful result.
    fn write_success(&self, value: &Value, attachments: &Attachments) -> Result<(), ResponseError>;

    /// Writes a business exception.
    fn write_exception(&self, exception: &ApplicationException) -> Result<(), ResponseError>;

    /// Writes the "no such target" failure.
    fn write_no_such_target(&self) -> Result<(), ResponseError>;

    /// Writes the "wrong view" failure.
    fn write_wrong_view(&self) -> Result<(), ResponseError>;

    /// Writes the "no such method" failure.
    fn write_no_such_method(&self) -> Result<(), ResponseError>;

    /// Writes the "not stateful" failure.
    fn write_not_stateful(&self) -> Result<(), ResponseError>;

    /// Writes the cancellation response.
    fn write_cancelled(&self) -> Result<(), ResponseError>;

    /// Releases a caller waiting on an asynchronous method.
    fn write_proceed_async(&self) -> Result<(), ResponseError>;

    /// Writes the identifier of a newly opened session.
    fn write_session_opened(&self, session: &SessionId) -> Result<(), ResponseError>;

    /// Reports the affinity future calls must follow.
    fn update_strong_affinity(&self, affinity: &Affinity);

    /// Reports the affinity future calls should prefer.
    fn update_weak_affinity(&self, affinity: &Affinity);
}

impl<T> ResponseSink for Arc<T>
where
    T: ResponseSink + ?Sized,
{
    fn write_success(&self, value: &Value, attachments: &Attachments) -> Result<(), ResponseError> {
        (**self).write_success(value, attachments)
    }

    fn write_exception(&self, exception: &ApplicationException) -> Result<(), ResponseError> {
        (**self).write_exception(exception)
    }

    fn write_no_such_target(&self) -> Result<(), ResponseError> {
        (**self).write_no_such_target()
    }

    fn write_wrong_view(&self) -> Result<(), ResponseError> {
        (**self).write_wrong_view()
    }

    fn write_no_such_method(&self) -> Result<(), ResponseError> {
        (**self).write_no_such_method()
    }

    fn write_not_stateful(&self) -> Result<(), ResponseError> {
        (**self).write_not_stateful()
    }

    fn write_cancelled(&self) -> Result<(), ResponseError> {
        (**self).write_cancelled()
    }

    fn write_proceed_async(&self) -> Result<(), ResponseError> {
        (**self).write_proceed_async()
    }

    fn write_session_opened(&self, session: &SessionId) -> Result<(), ResponseError> {
        (**self).write_session_opened(session)
    }

    fn update_strong_affinity(&self, affinity: &Affinity) {
        (**self).update_strong_affinity(affinity);
    }

    fn update_weak_affinity(&self, affinity: &Affinity) {
        (**self).update_weak_affinity(affinity);
    }
}

/// Wraps a sink for one exchange.
///
/// At most one notice and one terminal response go through; failures and
/// panics raised by the sink are logged and swallowed.
pub(crate) struct ResponseChannel {
    sink: Arc<dyn ResponseSink>,
    invocation: InvocationLabel,
    notice_written: bool,
    terminal_written: bool,
}

impl ResponseChannel {
    pub(crate) fn new(sink: Arc<dyn ResponseSink>, invocation: InvocationLabel) -> Self {
        Self {
            sink,
            invocation,
            notice_written: false,
            terminal_written: false,
        }
    }

    /// Writes an action, logging any failure.
    pub(crate) fn deliver(&mut self, action: &ResponseAction, attachments: &Attachments) {
        match self.write(action, attachments) {
            Ok(()) => debug!(
                target: DISPATCH_TARGET,
                invocation = %self.invocation,
                action = action.name(),
                "response written"
            ),
            Err(error) => warn!(
                target: DISPATCH_TARGET,
                invocation = %self.invocation,
                action = action.name(),
                error = %error,
                "failed to write response"
            ),
        }
    }

    fn write(&mut self, action: &ResponseAction, attachments: &Attachments) -> Result<(), DispatchError> {
        let name = action.name();
        let written = if action.is_terminal() {
            &mut self.terminal_written
        } else {
            &mut self.notice_written
        };
        if *written {
            return Err(DispatchError::already_written(name));
        }
        *written = true;

        let sink = &self.sink;
        let result = panic::catch_unwind(AssertUnwindSafe(|| match action {
            ResponseAction::InvocationResult(value) => sink.write_success(value, attachments),
            ResponseAction::Accepted => sink.write_success(&Value::Null, attachments),
            ResponseAction::Exception(exception) => sink.write_exception(exception),
            ResponseAction::NoSuchTarget => sink.write_no_such_target(),
            ResponseAction::WrongView => sink.write_wrong_view(),
            ResponseAction::NoSuchMethod => sink.write_no_such_method(),
            ResponseAction::NotStateful => sink.write_not_stateful(),
            ResponseAction::Cancelled => sink.write_cancelled(),
            ResponseAction::ProceedAsync => sink.write_proceed_async(),
            ResponseAction::SessionOpened(session) => sink.write_session_opened(session),
        }));
        match result {
            Ok(outcome) => outcome.map_err(|source| DispatchError::response_write(name, source)),
            Err(payload) => Err(DispatchError::response_write(
                name,
                ResponseError::new(format!("response sink panicked: {}", panic_message(&*payload))),
            )),
        }
    }

    /// Pushes affinity updates to the sink, skipping node strong affinities
    /// and the "no affinity" sentinel.
    pub(crate) fn update_affinity(&self, strong: Option<&Affinity>, weak: Option<&Affinity>) {
        let sink = &self.sink;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            if let Some(strong) = strong.filter(|affinity| !affinity.is_node()) {
                sink.update_strong_affinity(strong);
            }
            if let Some(weak) = weak.filter(|affinity| !affinity.is_none()) {
                sink.update_weak_affinity(weak);
            }
        }));
        if let Err(payload) = result {
            warn!(
                target: DISPATCH_TARGET,
                invocation = %self.invocation,
                panic = %panic_message(&*payload),
                "response sink panicked while updating affinity"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;
    use serde_json::json;

    use super::*;
    use crate::dispatch::InvocationId;
    use crate::tests::support::MockSink;

    fn channel(sink: MockSink) -> ResponseChannel {
        ResponseChannel::new(Arc::new(sink), InvocationLabel::new(InvocationId::new(1), "app/mod//Bean", "run()"))
    }

    #[test]
    fn second_terminal_response_is_suppressed() {
        let mut sink = MockSink::new();
        sink.expect_write_success()
            .with(eq(json!(1)), eq(Attachments::new()))
            .times(1)
            .returning(|_, _| Ok(()));
        sink.expect_write_cancelled().never();
        let mut channel = channel(sink);

        channel.deliver(&ResponseAction::InvocationResult(json!(1)), &Attachments::new());
        channel.deliver(&ResponseAction::Cancelled, &Attachments::new());
    }

    #[test]
    fn notice_and_terminal_are_independent() {
        let mut sink = MockSink::new();
        sink.expect_write_proceed_async().times(1).returning(|| Ok(()));
        sink.expect_write_no_such_target().times(1).returning(|| Ok(()));
        let mut channel = channel(sink);

        channel.deliver(&ResponseAction::ProceedAsync, &Attachments::new());
        channel.deliver(&ResponseAction::ProceedAsync, &Attachments::new());
        channel.deliver(&ResponseAction::NoSuchTarget, &Attachments::new());
    }

    #[test]
    fn sink_failures_are_swallowed() {
        let mut sink = MockSink::new();
        sink.expect_write_proceed_async()
            .times(1)
            .returning(|| Err(ResponseError::new("connection reset")));
        sink.expect_write_cancelled()
            .times(1)
            .returning(|| Err(ResponseError::new("broken pipe")));
        let mut channel = channel(sink);

        channel.deliver(&ResponseAction::ProceedAsync, &Attachments::new());
        channel.deliver(&ResponseAction::Cancelled, &Attachments::new());
    }

    #[test]
    fn affinity_filters_node_and_none() {
        let mut sink = MockSink::new();
        sink.expect_update_strong_affinity().never();
        sink.expect_update_weak_affinity().never();
        let channel = channel(sink);

        channel.update_affinity(Some(&Affinity::Node("node-a".into())), Some(&Affinity::None));
    }

    #[test]
    fn affinity_updates_are_forwarded() {
        let mut sink = MockSink::new();
        sink.expect_update_strong_affinity()
            .with(eq(Affinity::Cluster("ejb".into())))
            .times(1)
            .return_const(());
        sink.expect_update_weak_affinity()
            .with(eq(Affinity::Node("node-a".into())))
            .times(1)
            .return_const(());
        let channel = channel(sink);

        channel.update_affinity(
            Some(&Affinity::Cluster("ejb".into())),
            Some(&Affinity::Node("node-a".into())),
        );
    }
}
