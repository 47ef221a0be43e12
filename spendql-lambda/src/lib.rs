mod error;
mod event;
mod handler;

pub use error::HandlerError;
pub use event::{proxy_response, GraphqlEvent, GraphqlPayload};
pub use handler::{handle, respond, Invocation};

use lambda_runtime::{service_fn, LambdaEvent};
use serde_json::Value;
use spendql_core::Settings;
use spendql_server::Gateway;
use std::sync::Arc;

/// Build the gateway once, then serve invocations until the runtime stops.
pub async fn run_lambda(settings: Settings) -> Result<(), lambda_runtime::Error> {
    let gateway = Arc::new(Gateway::initialize(&settings).await?);

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let gateway = Arc::clone(&gateway);
        async move {
            let invocation = Invocation::from(&event.context);
            let mut outcome = None;
            handle(&gateway, event.payload, &invocation, |result| {
                outcome = Some(result)
            })
            .await;
            outcome
                .unwrap_or_else(|| Err(HandlerError::Panicked("no outcome reported".to_string())))
                .map_err(lambda_runtime::Error::from)
        }
    }))
    .await
}
