use cucumber::{given, then, when};
use serde_json::{json, Value};

use crate::world::CertWorld;

async fn post_graphql(world: &mut CertWorld, body: Value) {
    let url = format!("{}/graphql", world.server_addr());
    let resp = world.client.post(&url).json(&body).send().await.unwrap();
    world.status = Some(resp.status().as_u16());
    world.response = Some(resp.json().await.unwrap());
}

/// Navigate a JSON value by dot-separated path; numeric segments index arrays
/// (e.g., "data.allExpenses.nodes.0.description").
fn json_at_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for key in path.split('.') {
        current = match key.parse::<usize>() {
            Ok(index) => current.get(index)?,
            Err(_) => current.get(key)?,
        };
    }
    Some(current)
}

#[given("a spendql server is running")]
async fn server_running(world: &mut CertWorld) {
    assert!(
        world.server_addr.is_some(),
        "server_addr must be set before this step"
    );
}

#[given("the server reports ready")]
async fn server_ready(world: &mut CertWorld) {
    let url = format!("{}/health", world.server_addr());
    let resp = world.client.get(&url).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200, "server is not ready");
}

#[when(regex = r"^I query: (.+)$")]
async fn query(world: &mut CertWorld, text: String) {
    post_graphql(world, json!({ "query": text })).await;
}

#[when("I send the GraphQL request:")]
async fn send_request(world: &mut CertWorld, step: &cucumber::gherkin::Step) {
    let raw = step.docstring.as_ref().expect("expected a docstring");
    let body: Value = serde_json::from_str(raw).expect("invalid JSON in docstring");
    post_graphql(world, body).await;
}

#[when(regex = r#"^I send the raw body "([^"]*)"$"#)]
async fn send_raw(world: &mut CertWorld, body: String) {
    let url = format!("{}/graphql", world.server_addr());
    let resp = world.client.post(&url).body(body).send().await.unwrap();
    world.status = Some(resp.status().as_u16());
    world.response = Some(resp.json().await.unwrap());
}

#[when(regex = r"^(\d+) clients each read category (\d+) at the same time$")]
async fn concurrent_reads(world: &mut CertWorld, clients: usize, id: i64) {
    let url = format!("{}/graphql", world.server_addr());
    let body = json!({
        "query": "query One($id: Int!) { categoryById(id: $id) { id name } }",
        "variables": { "id": id },
    });
    let requests = (0..clients).map(|_| {
        let client = world.client.clone();
        let url = url.clone();
        let body = body.clone();
        async move {
            client
                .post(&url)
                .json(&body)
                .send()
                .await
                .unwrap()
                .json::<Value>()
                .await
                .unwrap()
        }
    });
    world.concurrent = futures::future::join_all(requests).await;
}

// ---- Then assertions ----

#[then(regex = r"^the response status should be (\d+)$")]
async fn assert_status(world: &mut CertWorld, status: u16) {
    assert_eq!(world.status, Some(status), "response: {:?}", world.response);
}

#[then("there should be no GraphQL errors")]
async fn assert_no_errors(world: &mut CertWorld) {
    if let Some(errors) = world.response().get("errors") {
        if !errors.is_null() {
            panic!("GraphQL errors: {errors}");
        }
    }
}

#[then(regex = r#"^there should be a GraphQL error mentioning "([^"]+)"$"#)]
async fn assert_error_mentions(world: &mut CertWorld, needle: String) {
    let resp = world.response();
    let errors = resp["errors"]
        .as_array()
        .unwrap_or_else(|| panic!("no errors in response: {resp}"));
    assert!(
        errors
            .iter()
            .any(|e| e["message"].as_str().is_some_and(|m| m.contains(&needle))),
        "no error mentions {needle:?}: {resp}"
    );
}

#[then(regex = r#"^the response at "([^"]+)" should be "([^"]+)"$"#)]
async fn assert_path_string(world: &mut CertWorld, path: String, expected: String) {
    let resp = world.response();
    let value = json_at_path(resp, &path)
        .unwrap_or_else(|| panic!("path '{path}' not found in response: {resp}"));
    let actual = value
        .as_str()
        .unwrap_or_else(|| panic!("value at '{path}' is not a string: {value}"));
    assert_eq!(actual, expected, "mismatch at path '{path}'");
}

#[then(regex = r#"^the response at "([^"]+)" should equal (.+)$"#)]
async fn assert_path_json(world: &mut CertWorld, path: String, expected: String) {
    let expected: Value = serde_json::from_str(&expected).expect("invalid JSON in step");
    let resp = world.response();
    let value = json_at_path(resp, &path)
        .unwrap_or_else(|| panic!("path '{path}' not found in response: {resp}"));
    assert_eq!(value, &expected, "mismatch at path '{path}'");
}

#[then(regex = r#"^the response at "([^"]+)" should have (\d+) items?$"#)]
async fn assert_path_array_count(world: &mut CertWorld, path: String, count: usize) {
    let resp = world.response();
    let value = json_at_path(resp, &path)
        .unwrap_or_else(|| panic!("path '{path}' not found in response: {resp}"));
    let arr = value
        .as_array()
        .unwrap_or_else(|| panic!("value at '{path}' is not an array: {value}"));
    assert_eq!(arr.len(), count, "array count mismatch at path '{path}'");
}

#[then(regex = r#"^every response should name category (\d+) "([^"]+)"$"#)]
async fn assert_every_response(world: &mut CertWorld, id: i64, name: String) {
    assert!(!world.concurrent.is_empty(), "no concurrent responses");
    for resp in &world.concurrent {
        assert_eq!(
            resp,
            &json!({ "data": { "categoryById": { "id": id, "name": name } } }),
            "unexpected concurrent response"
        );
    }
}
