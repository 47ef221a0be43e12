use serde_json::{json, Value};
use spendql_core::testing::{fixture_catalog, MemoryStore};
use spendql_core::{DefaultRole, SessionFactory};
use spendql_graphlette::{build_schema, execute};

async fn respond(request: async_graphql::Request) -> async_graphql::Response {
    let schema = build_schema(&fixture_catalog()).unwrap();
    let store = MemoryStore::with_fixture();
    let session = store.begin(&DefaultRole::new("postgres")).await.unwrap();
    execute(&schema, session, request).await
}

async fn run(query: &str) -> Value {
    let response = respond(async_graphql::Request::new(query)).await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);
    response.data.into_json().unwrap()
}

#[tokio::test]
async fn all_rows_default_to_primary_key_order() {
    let data = run("{ allExpenses { totalCount nodes { id description } } }").await;
    assert_eq!(data["allExpenses"]["totalCount"], json!(4));
    let ids: Vec<i64> = data["allExpenses"]["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn condition_order_and_paging_combine() {
    let data = run(
        "{ allExpenses(condition: { categoryId: 1 }, orderBy: [AMOUNT_DESC], first: 2) {
             totalCount
             nodes { description amount }
         } }",
    )
    .await;
    assert_eq!(data["allExpenses"]["totalCount"], json!(3));
    assert_eq!(
        data["allExpenses"]["nodes"],
        json!([
            {"description": "Supermarket", "amount": "87.15"},
            {"description": "Farmers market", "amount": "42.5"}
        ])
    );
}

#[tokio::test]
async fn lookup_by_primary_key_follows_forward_relation() {
    let data = run(
        "{ expenseById(id: 3) { description spentOn categoryByCategoryId { name budget } } }",
    )
    .await;
    assert_eq!(
        data,
        json!({"expenseById": {
            "description": "March rent",
            "spentOn": "2024-03-01",
            "categoryByCategoryId": {"name": "Rent", "budget": "1200"}
        }})
    );
}

#[tokio::test]
async fn big_float_conditions_accept_strings_and_numbers() {
    for literal in ["\"87.150\"", "87.15"] {
        let data = run(&format!(
            "{{ allExpenses(condition: {{ amount: {literal} }}) {{ nodes {{ id amount }} }} }}"
        ))
        .await;
        assert_eq!(
            data["allExpenses"]["nodes"],
            json!([{"id": 2, "amount": "87.15"}]),
            "{literal}"
        );
    }
}

#[tokio::test]
async fn missing_primary_key_returns_null() {
    let data = run("{ categoryById(id: 42) { name } }").await;
    assert_eq!(data, json!({"categoryById": null}));
}

#[tokio::test]
async fn backward_relation_is_a_connection() {
    let data = run(
        "{ categoryById(id: 1) {
             expensesByCategoryId(orderBy: SPENT_ON_ASC) { totalCount nodes { description } }
         } }",
    )
    .await;
    let related = &data["categoryById"]["expensesByCategoryId"];
    assert_eq!(related["totalCount"], json!(3));
    assert_eq!(
        related["nodes"],
        json!([
            {"description": "Farmers market"},
            {"description": "Supermarket"},
            {"description": "Bakery"}
        ])
    );
}

#[tokio::test]
async fn contradicting_a_relation_yields_nothing() {
    let data = run(
        "{ categoryById(id: 1) {
             expensesByCategoryId(condition: { categoryId: 2 }) { totalCount nodes { id } }
         } }",
    )
    .await;
    assert_eq!(
        data["categoryById"]["expensesByCategoryId"],
        json!({"totalCount": 0, "nodes": []})
    );
}

#[tokio::test]
async fn json_and_nullable_columns_pass_through() {
    let data = run("{ allCategories(orderBy: PRIMARY_KEY_DESC, first: 1) { nodes { name budget } } }").await;
    assert_eq!(
        data["allCategories"]["nodes"],
        json!([{"name": "Travel", "budget": null}])
    );
    let data = run("{ expenseById(id: 4) { tags } }").await;
    assert_eq!(data["expenseById"]["tags"], json!(["local", "treat"]));
}

#[tokio::test]
async fn variables_and_operation_name_select_the_operation() {
    let request = async_graphql::Request::new(
        "query One($id: Int!) { categoryById(id: $id) { name } }
         query Two { allCategories { totalCount } }",
    )
    .operation_name("One")
    .variables(async_graphql::Variables::from_json(json!({"id": 2})));
    let response = respond(request).await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);
    assert_eq!(
        response.data.into_json().unwrap(),
        json!({"categoryById": {"name": "Rent"}})
    );
}

#[tokio::test]
async fn root_query_is_reachable_nested() {
    let data = run("{ query { allCategories { totalCount } } }").await;
    assert_eq!(data["query"]["allCategories"]["totalCount"], json!(3));
}

#[tokio::test]
async fn unknown_fields_fail_validation() {
    let response = respond(async_graphql::Request::new("{ allInvoices { totalCount } }")).await;
    assert!(!response.errors.is_empty());
}

#[tokio::test]
async fn negative_paging_is_a_field_error() {
    let response = respond(async_graphql::Request::new(
        "{ allExpenses(first: -1) { totalCount } }",
    ))
    .await;
    assert_eq!(response.errors.len(), 1);
    assert!(response.errors[0].message.contains("negative"));
}

#[tokio::test]
async fn executing_without_a_session_reports_an_error() {
    let schema = build_schema(&fixture_catalog()).unwrap();
    let response = schema
        .execute(async_graphql::Request::new("{ allCategories { totalCount } }"))
        .await;
    assert!(!response.errors.is_empty());
}
