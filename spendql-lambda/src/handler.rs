use crate::{proxy_response, GraphqlEvent, HandlerError};
use futures::FutureExt;
use serde_json::Value;
use spendql_graphlette::response_body;
use spendql_server::Gateway;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::Instrument;

/// What the handler needs to know about the invocation it serves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub request_id: String,
}

impl Invocation {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
        }
    }
}

impl From<&lambda_runtime::Context> for Invocation {
    fn from(context: &lambda_runtime::Context) -> Self {
        Self::new(context.request_id.clone())
    }
}

/// Decode `event`, execute it through `gateway` and shape the result for the
/// event's form.
pub async fn respond(
    gateway: &Gateway,
    event: Value,
    invocation: &Invocation,
) -> Result<Value, HandlerError> {
    let span = tracing::info_span!("invocation", request_id = %invocation.request_id);
    async move {
        let event = GraphqlEvent::decode(event)?;
        let proxy = event.is_proxy();
        let response = gateway.execute(event.into_payload().into_request()).await?;
        tracing::debug!(errors = response.errors.len(), "executed");

        let body = response_body(&response);
        Ok(if proxy {
            proxy_response(200, &body)
        } else {
            body
        })
    }
    .instrument(span)
    .await
}

/// Handle one invocation, reporting its outcome through `callback`.
///
/// `callback` runs exactly once, with the result or with the error that
/// stopped it, panics included.
pub async fn handle<F>(gateway: &Gateway, event: Value, invocation: &Invocation, callback: F)
where
    F: FnOnce(Result<Value, HandlerError>),
{
    let outcome = AssertUnwindSafe(respond(gateway, event, invocation))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic.as_ref()))));

    if let Err(e) = &outcome {
        tracing::error!(request_id = %invocation.request_id, error = %e, "invocation failed");
    }
    callback(outcome);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_messages_are_recovered() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(boxed.as_ref()), "kaboom");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
