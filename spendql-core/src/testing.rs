use crate::{
    Catalog, ColumnType, DefaultRole, Result, Searcher, Selection, Session, SessionFactory,
    SpendqlError, Stash, Table,
};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---- Fixture ----

/// DDL and rows for the fixture database, matching [`fixture_catalog`] and
/// [`fixture_rows`].
pub const FIXTURE_SQL: &str = r#"
CREATE TABLE category (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    budget NUMERIC
);
CREATE TABLE expense (
    id INTEGER PRIMARY KEY,
    category_id INTEGER NOT NULL REFERENCES category (id),
    description TEXT NOT NULL,
    amount NUMERIC NOT NULL,
    spent_on DATE NOT NULL,
    tags JSONB
);
INSERT INTO category (id, name, budget) VALUES
    (1, 'Groceries', 400),
    (2, 'Rent', 1200),
    (3, 'Travel', NULL);
INSERT INTO expense (id, category_id, description, amount, spent_on, tags) VALUES
    (1, 1, 'Farmers market', 42.5, '2024-03-02', '["local"]'),
    (2, 1, 'Supermarket', 87.15, '2024-03-09', NULL),
    (3, 2, 'March rent', 1200, '2024-03-01', NULL),
    (4, 1, 'Bakery', 6.4, '2024-03-11', '["local", "treat"]');
"#;

pub fn fixture_catalog() -> Catalog {
    Catalog {
        tables: vec![
            Table::new("public", "category")
                .column("id", ColumnType::Int, false)
                .column("name", ColumnType::Text, false)
                .column("budget", ColumnType::BigFloat, true)
                .primary_key(&["id"]),
            Table::new("public", "expense")
                .column("id", ColumnType::Int, false)
                .column("category_id", ColumnType::Int, false)
                .column("description", ColumnType::Text, false)
                .column("amount", ColumnType::BigFloat, false)
                .column("spent_on", ColumnType::Date, false)
                .column("tags", ColumnType::Json, true)
                .primary_key(&["id"])
                .foreign_key(
                    "expense_category_id_fkey",
                    &["category_id"],
                    "public",
                    "category",
                    &["id"],
                ),
        ],
    }
}

fn row(value: Value) -> Stash {
    match value {
        Value::Object(map) => map,
        _ => Stash::new(),
    }
}

/// Fixture rows as the Postgres session reads them back; `numeric` columns
/// come out as decimal strings.
pub fn fixture_rows() -> HashMap<(String, String), Vec<Stash>> {
    let mut rows = HashMap::new();
    rows.insert(
        ("public".to_string(), "category".to_string()),
        vec![
            row(json!({"id": 1, "name": "Groceries", "budget": "400"})),
            row(json!({"id": 2, "name": "Rent", "budget": "1200"})),
            row(json!({"id": 3, "name": "Travel", "budget": null})),
        ],
    );
    rows.insert(
        ("public".to_string(), "expense".to_string()),
        vec![
            row(json!({"id": 1, "category_id": 1, "description": "Farmers market",
                "amount": "42.5", "spent_on": "2024-03-02", "tags": ["local"]})),
            row(json!({"id": 2, "category_id": 1, "description": "Supermarket",
                "amount": "87.15", "spent_on": "2024-03-09", "tags": null})),
            row(json!({"id": 3, "category_id": 2, "description": "March rent",
                "amount": "1200", "spent_on": "2024-03-01", "tags": null})),
            row(json!({"id": 4, "category_id": 1, "description": "Bakery",
                "amount": "6.4", "spent_on": "2024-03-11", "tags": ["local", "treat"]})),
        ],
    );
    rows
}

fn fixture_table(name: &str) -> Table {
    fixture_catalog()
        .table("public", name)
        .cloned()
        .unwrap_or_else(|| Table::new("public", name))
}

// ---- In-memory store ----

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub begun: usize,
    pub committed: usize,
    pub rolled_back: usize,
    pub open: usize,
}

#[derive(Default)]
struct StoreState {
    stats: StoreStats,
    roles: Vec<String>,
    refusal: Option<String>,
    closed: bool,
}

/// A [`SessionFactory`] over in-memory rows, for exercising everything above
/// the database without one.
#[derive(Clone)]
pub struct MemoryStore {
    rows: Arc<HashMap<(String, String), Vec<Stash>>>,
    state: Arc<Mutex<StoreState>>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new(rows: HashMap<(String, String), Vec<Stash>>) -> Self {
        Self {
            rows: Arc::new(rows),
            state: Arc::new(Mutex::new(StoreState::default())),
            latency: None,
        }
    }

    pub fn with_fixture() -> Self {
        Self::new(fixture_rows())
    }

    /// Make every `begin` wait before handing out a session.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every following `begin` fail with a connection error.
    pub fn refuse_sessions(&self, reason: &str) {
        self.lock().refusal = Some(reason.to_string());
    }

    pub fn stats(&self) -> StoreStats {
        self.lock().stats
    }

    /// Roles requested by every session begun so far, in order.
    pub fn roles(&self) -> Vec<String> {
        self.lock().roles.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl SessionFactory for MemoryStore {
    async fn begin(&self, role: &DefaultRole) -> Result<Arc<dyn Session>> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        {
            let mut state = self.lock();
            if state.closed {
                return Err(SpendqlError::Connection("store is closed".to_string()));
            }
            if let Some(reason) = &state.refusal {
                return Err(SpendqlError::Connection(reason.clone()));
            }
            state.stats.begun += 1;
            state.stats.open += 1;
            state.roles.push(role.as_str().to_string());
        }
        Ok(Arc::new(MemorySession {
            rows: Arc::clone(&self.rows),
            state: Arc::clone(&self.state),
            role: role.clone(),
            finished: Mutex::new(false),
        }))
    }

    async fn close(&self) {
        self.lock().closed = true;
    }
}

struct MemorySession {
    rows: Arc<HashMap<(String, String), Vec<Stash>>>,
    state: Arc<Mutex<StoreState>>,
    role: DefaultRole,
    finished: Mutex<bool>,
}

impl MemorySession {
    fn rows_of(&self, table: &Table) -> Result<&[Stash]> {
        self.rows
            .get(&(table.schema.clone(), table.name.clone()))
            .map(Vec::as_slice)
            .ok_or_else(|| {
                SpendqlError::Storage(format!("relation {} does not exist", table.qualified_name()))
            })
    }

    fn matching(&self, table: &Table, condition: &Stash) -> Result<Vec<Stash>> {
        Ok(self
            .rows_of(table)?
            .iter()
            .filter(|r| {
                condition.iter().all(|(k, v)| {
                    r.get(k)
                        .map_or(false, |found| json_eq(found, v, is_decimal(table, k)))
                })
            })
            .cloned()
            .collect())
    }

    fn finish(&self, committed: bool) -> Result<()> {
        let mut finished = self.finished.lock().unwrap_or_else(|p| p.into_inner());
        if *finished {
            return Err(SpendqlError::Execution("session already finished".to_string()));
        }
        *finished = true;
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.stats.open = state.stats.open.saturating_sub(1);
        if committed {
            state.stats.committed += 1;
        } else {
            state.stats.rolled_back += 1;
        }
        Ok(())
    }
}

fn is_decimal(table: &Table, column: &str) -> bool {
    table
        .get_column(column)
        .map_or(false, |c| matches!(c.ty, ColumnType::BigInt | ColumnType::BigFloat))
}

fn decimal(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_eq(a: &Value, b: &Value, as_decimal: bool) -> bool {
    if as_decimal {
        if let (Some(x), Some(y)) = (decimal(a), decimal(b)) {
            return x == y;
        }
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Postgres ordering for the value kinds the fixture holds; nulls sort last.
fn json_cmp(a: &Value, b: &Value, as_decimal: bool) -> Ordering {
    if as_decimal {
        if let (Some(x), Some(y)) = (decimal(a), decimal(b)) {
            return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
        }
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

#[async_trait::async_trait]
impl Searcher for MemorySession {
    async fn find(&self, table: &Table, condition: &Stash) -> Result<Option<Stash>> {
        Ok(self.matching(table, condition)?.into_iter().next())
    }

    async fn find_all(&self, table: &Table, selection: &Selection) -> Result<Vec<Stash>> {
        let mut rows = self.matching(table, &selection.condition)?;
        if !selection.order_by.is_empty() {
            rows.sort_by(|a, b| {
                selection
                    .order_by
                    .iter()
                    .map(|term| {
                        let left = a.get(&term.column).unwrap_or(&Value::Null);
                        let right = b.get(&term.column).unwrap_or(&Value::Null);
                        let ord = json_cmp(left, right, is_decimal(table, &term.column));
                        if term.descending {
                            ord.reverse()
                        } else {
                            ord
                        }
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }
        let offset = selection.offset.unwrap_or(0).max(0) as usize;
        let first = selection.first.map(|n| n.max(0) as usize).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(first).collect())
    }

    async fn count(&self, table: &Table, condition: &Stash) -> Result<i64> {
        Ok(self.matching(table, condition)?.len() as i64)
    }
}

#[async_trait::async_trait]
impl Session for MemorySession {
    fn role(&self) -> &DefaultRole {
        &self.role
    }

    async fn commit(&self) -> Result<()> {
        self.finish(true)
    }

    async fn rollback(&self) -> Result<()> {
        self.finish(false)
    }
}

// ---- Searcher Certification Tests ----
//
// Each runs against a searcher holding exactly the fixture rows.

fn condition(value: Value) -> Stash {
    row(value)
}

fn ids(rows: &[Stash]) -> Vec<i64> {
    rows.iter()
        .filter_map(|r| r.get("id").and_then(Value::as_i64))
        .collect()
}

pub async fn test_searcher_find_by_primary_key(searcher: &dyn Searcher) {
    let found = searcher
        .find(&fixture_table("category"), &condition(json!({"id": 2})))
        .await
        .unwrap()
        .expect("category 2 should exist");
    assert_eq!(found.get("name").unwrap(), &json!("Rent"));
    assert_eq!(found.get("budget").unwrap(), &json!("1200"));
}

pub async fn test_searcher_find_missing_returns_none(searcher: &dyn Searcher) {
    let found = searcher
        .find(&fixture_table("category"), &condition(json!({"id": 99})))
        .await
        .unwrap();
    assert!(found.is_none());
}

pub async fn test_searcher_find_all_with_condition(searcher: &dyn Searcher) {
    let selection = Selection::matching(condition(json!({"category_id": 1})));
    let mut found = ids(&searcher
        .find_all(&fixture_table("expense"), &selection)
        .await
        .unwrap());
    found.sort();
    assert_eq!(found, vec![1, 2, 4]);
}

pub async fn test_searcher_condition_on_numeric_column(searcher: &dyn Searcher) {
    let selection = Selection::matching(condition(json!({"amount": "42.50"})));
    let found = searcher
        .find_all(&fixture_table("expense"), &selection)
        .await
        .unwrap();
    assert_eq!(ids(&found), vec![1]);
}

pub async fn test_searcher_empty_condition_returns_everything(searcher: &dyn Searcher) {
    let found = searcher
        .find_all(&fixture_table("expense"), &Selection::default())
        .await
        .unwrap();
    assert_eq!(found.len(), 4);
}

pub async fn test_searcher_orders_and_paginates(searcher: &dyn Searcher) {
    let selection = Selection {
        order_by: vec![crate::OrderTerm::desc("amount")],
        first: Some(2),
        offset: Some(1),
        ..Selection::default()
    };
    let found = searcher
        .find_all(&fixture_table("expense"), &selection)
        .await
        .unwrap();
    // 1200 (3), 87.15 (2), 42.5 (1), 6.4 (4)
    assert_eq!(ids(&found), vec![2, 1]);
}

pub async fn test_searcher_nulls_sort_last(searcher: &dyn Searcher) {
    let selection = Selection {
        order_by: vec![crate::OrderTerm::asc("budget")],
        ..Selection::default()
    };
    let found = searcher
        .find_all(&fixture_table("category"), &selection)
        .await
        .unwrap();
    assert_eq!(ids(&found), vec![1, 2, 3]);
}

pub async fn test_searcher_counts(searcher: &dyn Searcher) {
    let table = fixture_table("expense");
    assert_eq!(searcher.count(&table, &Stash::new()).await.unwrap(), 4);
    assert_eq!(
        searcher
            .count(&table, &condition(json!({"category_id": 2})))
            .await
            .unwrap(),
        1
    );
}

pub async fn test_searcher_preserves_json_dates_and_decimals(searcher: &dyn Searcher) {
    let found = searcher
        .find(&fixture_table("expense"), &condition(json!({"id": 4})))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get("tags").unwrap(), &json!(["local", "treat"]));
    assert_eq!(found.get("spent_on").unwrap(), &json!("2024-03-11"));
    assert_eq!(found.get("amount").unwrap(), &json!("6.4"));
}
