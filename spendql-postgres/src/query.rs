use serde_json::Value;
use spendql_core::{Column, ColumnType, Result, Selection, SpendqlError, Stash, Table};

#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Json(Value),
    Int(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<Param>,
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn from_clause(table: &Table) -> String {
    format!(
        "FROM {}.{} AS t",
        quote_ident(&table.schema),
        quote_ident(&table.name)
    )
}

fn known_column<'a>(table: &'a Table, column: &str) -> Result<&'a Column> {
    table.get_column(column).ok_or_else(|| {
        SpendqlError::Parse(format!(
            "column {column:?} does not exist on {}",
            table.qualified_name()
        ))
    })
}

/// The cast a condition value is compared through, for types whose JSON
/// form would lose precision or differ in spelling from the input.
fn sql_cast(ty: ColumnType) -> Option<&'static str> {
    match ty {
        ColumnType::BigInt => Some("int8"),
        ColumnType::BigFloat => Some("numeric"),
        ColumnType::Date => Some("date"),
        ColumnType::Datetime => Some("timestamptz"),
        _ => None,
    }
}

fn literal_text(column: &Column, val: &Value) -> Result<String> {
    match val {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(SpendqlError::Parse(format!(
            "column {:?} cannot be compared with {other}",
            column.name
        ))),
    }
}

/// Build a WHERE clause from column equality filters.
///
/// Big numbers and dates are cast from their text form and compared in
/// SQL; everything else is compared as `jsonb` so it matches what rows
/// serialise to. A null value means `IS NULL`.
pub fn build_where(table: &Table, condition: &Stash, params: &mut Vec<Param>) -> Result<String> {
    let mut clauses = Vec::new();
    for (key, val) in condition {
        let column = known_column(table, key)?;
        let ident = quote_ident(&column.name);
        if val.is_null() {
            clauses.push(format!("t.{ident} IS NULL"));
        } else if let Some(cast) = sql_cast(column.ty) {
            params.push(Param::Text(literal_text(column, val)?));
            clauses.push(format!("t.{ident} = ${}::{cast}", params.len()));
        } else {
            params.push(Param::Json(val.clone()));
            clauses.push(format!("to_jsonb(t.{ident}) = ${}", params.len()));
        }
    }
    if clauses.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!(" WHERE {}", clauses.join(" AND ")))
    }
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Row object with `int8`/`numeric` columns overridden by their text form.
fn row_json(table: &Table) -> String {
    let overrides: Vec<String> = table
        .columns
        .iter()
        .filter(|c| matches!(c.ty, ColumnType::BigInt | ColumnType::BigFloat))
        .map(|c| format!("{}, t.{}::text", quote_literal(&c.name), quote_ident(&c.name)))
        .collect();
    // jsonb_build_object takes at most 100 arguments
    let mut sql = "to_jsonb(t)".to_string();
    for chunk in overrides.chunks(50) {
        sql.push_str(&format!(" || jsonb_build_object({})", chunk.join(", ")));
    }
    sql
}

pub fn select(table: &Table, selection: &Selection) -> Result<SqlQuery> {
    let mut params = Vec::new();
    let mut sql = format!(
        "SELECT {} AS row_json {}",
        row_json(table),
        from_clause(table)
    );
    sql.push_str(&build_where(table, &selection.condition, &mut params)?);

    if !selection.order_by.is_empty() {
        let terms = selection
            .order_by
            .iter()
            .map(|term| {
                let column = quote_ident(&known_column(table, &term.column)?.name);
                let dir = if term.descending { "DESC" } else { "ASC" };
                Ok(format!("t.{column} {dir}"))
            })
            .collect::<Result<Vec<_>>>()?;
        sql.push_str(&format!(" ORDER BY {}", terms.join(", ")));
    }
    if let Some(first) = selection.first {
        params.push(Param::Int(first.max(0)));
        sql.push_str(&format!(" LIMIT ${}", params.len()));
    }
    if let Some(offset) = selection.offset {
        params.push(Param::Int(offset.max(0)));
        sql.push_str(&format!(" OFFSET ${}", params.len()));
    }

    Ok(SqlQuery { sql, params })
}

pub fn count(table: &Table, condition: &Stash) -> Result<SqlQuery> {
    let mut params = Vec::new();
    let mut sql = format!("SELECT count(*) AS total {}", from_clause(table));
    sql.push_str(&build_where(table, condition, &mut params)?);
    Ok(SqlQuery { sql, params })
}
