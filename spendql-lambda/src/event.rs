use crate::HandlerError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};

/// The GraphQL request an event carries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlPayload {
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default)]
    pub operation_name: Option<String>,
}

impl GraphqlPayload {
    pub fn into_request(self) -> async_graphql::Request {
        let mut request = async_graphql::Request::new(self.query);
        if let Some(name) = self.operation_name {
            request = request.operation_name(name);
        }
        if let Some(variables) = self.variables.filter(|v| !v.is_null()) {
            request = request.variables(async_graphql::Variables::from_json(variables));
        }
        request
    }
}

/// An incoming event: either the GraphQL request itself or an API Gateway
/// proxy event whose `body` holds it.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphqlEvent {
    Direct(GraphqlPayload),
    Proxy(GraphqlPayload),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProxyEnvelope {
    body: Option<String>,
    #[serde(default)]
    is_base64_encoded: bool,
}

impl GraphqlEvent {
    pub fn decode(event: Value) -> Result<Self, HandlerError> {
        let Value::Object(fields) = &event else {
            return Err(HandlerError::InvalidEvent(
                "event must be a JSON object".to_string(),
            ));
        };

        if fields.contains_key("body") {
            let envelope: ProxyEnvelope = serde_json::from_value(event)
                .map_err(|e| HandlerError::InvalidEvent(format!("proxy event: {e}")))?;
            let body = envelope
                .body
                .ok_or_else(|| HandlerError::InvalidEvent("proxy event has no body".to_string()))?;
            let body = if envelope.is_base64_encoded {
                let bytes = STANDARD
                    .decode(body.trim())
                    .map_err(|e| HandlerError::InvalidEvent(format!("body is not base64: {e}")))?;
                String::from_utf8(bytes)
                    .map_err(|e| HandlerError::InvalidEvent(format!("body is not UTF-8: {e}")))?
            } else {
                body
            };
            let payload = serde_json::from_str(&body)
                .map_err(|e| HandlerError::InvalidEvent(format!("body: {e}")))?;
            return Ok(GraphqlEvent::Proxy(validated(payload)?));
        }

        let payload = serde_json::from_value(event)
            .map_err(|e| HandlerError::InvalidEvent(e.to_string()))?;
        Ok(GraphqlEvent::Direct(validated(payload)?))
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, GraphqlEvent::Proxy(_))
    }

    pub fn payload(&self) -> &GraphqlPayload {
        match self {
            GraphqlEvent::Direct(p) | GraphqlEvent::Proxy(p) => p,
        }
    }

    pub fn into_payload(self) -> GraphqlPayload {
        match self {
            GraphqlEvent::Direct(p) | GraphqlEvent::Proxy(p) => p,
        }
    }
}

fn validated(payload: GraphqlPayload) -> Result<GraphqlPayload, HandlerError> {
    match &payload.variables {
        None | Some(Value::Null) | Some(Value::Object(_)) => Ok(payload),
        Some(_) => Err(HandlerError::InvalidEvent(
            "variables must be an object".to_string(),
        )),
    }
}

/// Wrap a GraphQL payload the way API Gateway expects a proxy integration to answer.
pub fn proxy_response(status: u16, body: &Value) -> Value {
    json!({
        "statusCode": status,
        "headers": { "content-type": "application/json" },
        "body": body.to_string(),
        "isBase64Encoded": false,
    })
}
