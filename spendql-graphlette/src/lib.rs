pub mod inflect;
mod schema_builder;

pub use async_graphql::dynamic::Schema;
pub use schema_builder::{build_schema, SessionHandle};

use spendql_core::{Introspector, Result, Session};
use std::sync::Arc;

/// Introspect the database and derive its schema. Runs once per process.
pub async fn create_schema(introspector: &dyn Introspector, schemas: &[String]) -> Result<Schema> {
    let catalog = introspector.introspect(schemas).await?;
    build_schema(&catalog)
}

/// Execute `request` with every resolver reading through `session`.
pub async fn execute(
    schema: &Schema,
    session: Arc<dyn Session>,
    request: async_graphql::Request,
) -> async_graphql::Response {
    schema.execute(request.data(SessionHandle(session))).await
}

/// The JSON payload clients receive: `data`, plus `errors` when there are any.
pub fn response_body(response: &async_graphql::Response) -> serde_json::Value {
    serde_json::to_value(response).unwrap_or_else(|e| {
        serde_json::json!({
            "data": null,
            "errors": [{"message": e.to_string()}]
        })
    })
}

/// A payload carrying a single error and no data.
pub fn error_body(message: impl std::fmt::Display) -> serde_json::Value {
    serde_json::json!({ "errors": [{ "message": message.to_string() }] })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn successful_responses_omit_errors() {
        let response = async_graphql::Response::new(async_graphql::Value::from_json(
            json!({"allCategories": {"totalCount": 3}}),
        )
        .unwrap());
        assert_eq!(
            response_body(&response),
            json!({"data": {"allCategories": {"totalCount": 3}}})
        );
    }

    #[test]
    fn error_body_has_no_data() {
        assert_eq!(
            error_body("not ready"),
            json!({"errors": [{"message": "not ready"}]})
        );
    }
}
