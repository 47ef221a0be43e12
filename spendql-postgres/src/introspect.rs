use crate::{connection_error, pool::connect_options};
use async_trait::async_trait;
use spendql_core::{
    Catalog, Column, ColumnType, ConnectionEndpoint, ForeignKey, Introspector, Result,
    SpendqlError, Table,
};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection, Row};
use std::collections::HashMap;

const TABLES_SQL: &str = "
SELECT table_schema::text AS table_schema, table_name::text AS table_name
FROM information_schema.tables
WHERE table_schema = ANY($1) AND table_type IN ('BASE TABLE', 'VIEW')
ORDER BY table_schema, table_name";

const COLUMNS_SQL: &str = "
SELECT table_schema::text AS table_schema,
       table_name::text AS table_name,
       column_name::text AS column_name,
       udt_name::text AS udt_name,
       (is_nullable = 'YES') AS nullable
FROM information_schema.columns
WHERE table_schema = ANY($1)
ORDER BY table_schema, table_name, ordinal_position";

const CONSTRAINTS_SQL: &str = "
SELECT c.conname::text AS name,
       c.contype::text AS kind,
       ns.nspname::text AS table_schema,
       cl.relname::text AS table_name,
       fns.nspname::text AS foreign_schema,
       fcl.relname::text AS foreign_table,
       ARRAY(SELECT a.attname::text
             FROM unnest(c.conkey) WITH ORDINALITY AS k(attnum, ord)
             JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum
             ORDER BY k.ord) AS columns,
       ARRAY(SELECT a.attname::text
             FROM unnest(c.confkey) WITH ORDINALITY AS k(attnum, ord)
             JOIN pg_attribute a ON a.attrelid = c.confrelid AND a.attnum = k.attnum
             ORDER BY k.ord) AS foreign_columns
FROM pg_constraint c
JOIN pg_class cl ON cl.oid = c.conrelid
JOIN pg_namespace ns ON ns.oid = cl.relnamespace
LEFT JOIN pg_class fcl ON fcl.oid = c.confrelid
LEFT JOIN pg_namespace fns ON fns.oid = fcl.relnamespace
WHERE c.contype IN ('p', 'f') AND ns.nspname = ANY($1)
ORDER BY ns.nspname, cl.relname, c.conname";

#[derive(Debug, Clone)]
struct ColumnRow {
    schema: String,
    table: String,
    name: String,
    udt: String,
    nullable: bool,
}

#[derive(Debug, Clone)]
struct ConstraintRow {
    name: String,
    kind: String,
    schema: String,
    table: String,
    foreign_schema: Option<String>,
    foreign_table: Option<String>,
    columns: Vec<String>,
    foreign_columns: Vec<String>,
}

/// Reads the catalog over a dedicated connection, outside the pool.
pub struct PostgresIntrospector {
    options: PgConnectOptions,
}

impl PostgresIntrospector {
    pub fn connect(endpoint: &ConnectionEndpoint) -> Result<Self> {
        Ok(Self {
            options: connect_options(endpoint)?,
        })
    }
}

#[async_trait]
impl Introspector for PostgresIntrospector {
    async fn introspect(&self, schemas: &[String]) -> Result<Catalog> {
        let mut conn: PgConnection = self.options.connect().await.map_err(connection_error)?;
        let catalog = read_catalog(&mut conn, schemas).await;
        if let Err(e) = conn.close().await {
            tracing::warn!(error = %e, "closing introspection connection failed");
        }
        let catalog = catalog?;
        tracing::info!(
            schemas = ?schemas,
            tables = catalog.tables.len(),
            "introspected database"
        );
        Ok(catalog)
    }
}

fn introspection_error(e: sqlx::Error) -> SpendqlError {
    SpendqlError::Introspection(e.to_string())
}

async fn read_catalog(conn: &mut PgConnection, schemas: &[String]) -> Result<Catalog> {
    let tables = sqlx::query(TABLES_SQL)
        .bind(schemas)
        .fetch_all(&mut *conn)
        .await
        .map_err(introspection_error)?
        .iter()
        .map(|row| {
            Ok((
                row.try_get::<String, _>("table_schema")?,
                row.try_get::<String, _>("table_name")?,
            ))
        })
        .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
        .map_err(introspection_error)?;

    let columns = sqlx::query(COLUMNS_SQL)
        .bind(schemas)
        .fetch_all(&mut *conn)
        .await
        .map_err(introspection_error)?
        .iter()
        .map(|row| {
            Ok(ColumnRow {
                schema: row.try_get("table_schema")?,
                table: row.try_get("table_name")?,
                name: row.try_get("column_name")?,
                udt: row.try_get("udt_name")?,
                nullable: row.try_get("nullable")?,
            })
        })
        .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
        .map_err(introspection_error)?;

    let constraints = sqlx::query(CONSTRAINTS_SQL)
        .bind(schemas)
        .fetch_all(&mut *conn)
        .await
        .map_err(introspection_error)?
        .iter()
        .map(|row| {
            Ok(ConstraintRow {
                name: row.try_get("name")?,
                kind: row.try_get("kind")?,
                schema: row.try_get("table_schema")?,
                table: row.try_get("table_name")?,
                foreign_schema: row.try_get("foreign_schema")?,
                foreign_table: row.try_get("foreign_table")?,
                columns: row.try_get("columns")?,
                foreign_columns: row.try_get("foreign_columns")?,
            })
        })
        .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
        .map_err(introspection_error)?;

    Ok(assemble(tables, columns, constraints))
}

/// Fold flat catalog rows into tables, keeping the row order of `tables`.
fn assemble(
    tables: Vec<(String, String)>,
    columns: Vec<ColumnRow>,
    constraints: Vec<ConstraintRow>,
) -> Catalog {
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut out: Vec<Table> = Vec::with_capacity(tables.len());
    for (schema, name) in tables {
        index.insert((schema.clone(), name.clone()), out.len());
        out.push(Table::new(schema, name));
    }

    for col in columns {
        if let Some(&i) = index.get(&(col.schema, col.table)) {
            out[i].columns.push(Column {
                name: col.name,
                ty: ColumnType::from_udt(&col.udt),
                nullable: col.nullable,
            });
        }
    }

    for con in constraints {
        let Some(&i) = index.get(&(con.schema, con.table)) else {
            continue;
        };
        match con.kind.as_str() {
            "p" => out[i].primary_key = con.columns,
            "f" => {
                let (Some(foreign_schema), Some(foreign_table)) =
                    (con.foreign_schema, con.foreign_table)
                else {
                    continue;
                };
                out[i].foreign_keys.push(ForeignKey {
                    name: con.name,
                    columns: con.columns,
                    foreign_schema,
                    foreign_table,
                    foreign_columns: con.foreign_columns,
                });
            }
            _ => {}
        }
    }

    Catalog { tables: out }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(table: &str, name: &str, udt: &str, nullable: bool) -> ColumnRow {
        ColumnRow {
            schema: "public".into(),
            table: table.into(),
            name: name.into(),
            udt: udt.into(),
            nullable,
        }
    }

    #[test]
    fn assemble_attaches_columns_and_constraints() {
        let catalog = assemble(
            vec![
                ("public".into(), "category".into()),
                ("public".into(), "expense".into()),
            ],
            vec![
                col("category", "id", "int4", false),
                col("expense", "id", "int4", false),
                col("expense", "category_id", "int4", false),
                col("expense", "amount", "numeric", false),
                col("orphan", "id", "int4", false),
            ],
            vec![
                ConstraintRow {
                    name: "category_pkey".into(),
                    kind: "p".into(),
                    schema: "public".into(),
                    table: "category".into(),
                    foreign_schema: None,
                    foreign_table: None,
                    columns: vec!["id".into()],
                    foreign_columns: vec![],
                },
                ConstraintRow {
                    name: "expense_category_id_fkey".into(),
                    kind: "f".into(),
                    schema: "public".into(),
                    table: "expense".into(),
                    foreign_schema: Some("public".into()),
                    foreign_table: Some("category".into()),
                    columns: vec!["category_id".into()],
                    foreign_columns: vec!["id".into()],
                },
            ],
        );

        assert_eq!(catalog.tables.len(), 2);
        let category = catalog.table("public", "category").unwrap();
        assert_eq!(category.primary_key, vec!["id".to_string()]);
        assert_eq!(category.columns.len(), 1);

        let expense = catalog.table("public", "expense").unwrap();
        assert!(expense.primary_key.is_empty());
        assert_eq!(expense.columns[2].ty, ColumnType::BigFloat);
        assert_eq!(expense.foreign_keys.len(), 1);
        assert_eq!(expense.foreign_keys[0].foreign_table, "category");
    }
}
