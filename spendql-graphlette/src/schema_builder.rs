use crate::inflect;
use async_graphql::dynamic::{
    Enum, EnumItem, Field, FieldFuture, FieldValue, InputObject, InputValue, Object,
    ResolverContext, Scalar, Schema, TypeRef, ValueAccessor,
};
use serde_json::Value;
use spendql_core::{
    Catalog, ColumnType, OrderTerm, Result, Selection, Session, SpendqlError, Stash, Table,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Request data carrying the session every resolver of one request reads through.
pub struct SessionHandle(pub Arc<dyn Session>);

const CUSTOM_SCALARS: [&str; 6] = ["BigInt", "BigFloat", "UUID", "JSON", "Date", "Datetime"];

fn scalar_name(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Int => TypeRef::INT,
        ColumnType::BigInt => "BigInt",
        ColumnType::Float => TypeRef::FLOAT,
        ColumnType::BigFloat => "BigFloat",
        ColumnType::Boolean => TypeRef::BOOLEAN,
        ColumnType::Text => TypeRef::STRING,
        ColumnType::Uuid => "UUID",
        ColumnType::Json => "JSON",
        ColumnType::Date => "Date",
        ColumnType::Datetime => "Datetime",
    }
}

#[derive(Debug, Clone)]
struct TableNames {
    type_name: String,
    plural: String,
    connection: String,
    condition: String,
    order_by: String,
    all_field: String,
}

impl TableNames {
    fn new(base: String) -> Self {
        let plural = inflect::pluralize(&base);
        Self {
            connection: format!("{plural}Connection"),
            condition: format!("{base}Condition"),
            order_by: format!("{plural}OrderBy"),
            all_field: format!("all{plural}"),
            type_name: base,
            plural,
        }
    }
}

#[derive(Debug, Clone)]
struct FieldColumn {
    column: String,
    ty: ColumnType,
}

/// Everything the resolvers of one table need, shared between closures.
#[derive(Clone)]
struct TableShape {
    table: Arc<Table>,
    names: Arc<TableNames>,
    by_field: Arc<HashMap<String, FieldColumn>>,
    orderings: Arc<HashMap<String, Vec<OrderTerm>>>,
    default_order: Arc<Vec<OrderTerm>>,
}

impl TableShape {
    fn new(table: &Table, names: TableNames) -> Self {
        let by_field: HashMap<String, FieldColumn> = table
            .columns
            .iter()
            .map(|c| {
                (
                    inflect::camel(&c.name),
                    FieldColumn {
                        column: c.name.clone(),
                        ty: c.ty,
                    },
                )
            })
            .collect();

        let mut orderings = HashMap::new();
        orderings.insert("NATURAL".to_string(), Vec::new());
        for c in &table.columns {
            let key = inflect::constant(&c.name);
            orderings.insert(format!("{key}_ASC"), vec![OrderTerm::asc(&c.name)]);
            orderings.insert(format!("{key}_DESC"), vec![OrderTerm::desc(&c.name)]);
        }
        let pk_asc: Vec<OrderTerm> = table.primary_key.iter().map(OrderTerm::asc).collect();
        if !pk_asc.is_empty() {
            let pk_desc = table.primary_key.iter().map(OrderTerm::desc).collect();
            orderings.insert("PRIMARY_KEY_ASC".to_string(), pk_asc.clone());
            orderings.insert("PRIMARY_KEY_DESC".to_string(), pk_desc);
        }

        Self {
            table: Arc::new(table.clone()),
            names: Arc::new(names),
            by_field: Arc::new(by_field),
            orderings: Arc::new(orderings),
            default_order: Arc::new(pk_asc),
        }
    }

    fn key(&self) -> (String, String) {
        (self.table.schema.clone(), self.table.name.clone())
    }
}

/// Parent of a connection type's `nodes` and `totalCount` fields.
struct ConnectionValue {
    table: Arc<Table>,
    selection: Selection,
    empty: bool,
}

fn session(ctx: &ResolverContext<'_>) -> async_graphql::Result<Arc<dyn Session>> {
    Ok(Arc::clone(&ctx.data::<SessionHandle>()?.0))
}

/// Filter values arrive as GraphQL literals. `Int`/`Float` columns also
/// accept their string form; `BigInt`/`BigFloat` values are carried as
/// decimal strings so they never pass through `f64`.
fn coerce(ty: ColumnType, value: Value) -> Value {
    match (ty, value) {
        (ColumnType::Int | ColumnType::Float, Value::String(s)) => {
            match s.trim().parse::<serde_json::Number>() {
                Ok(n) => Value::Number(n),
                Err(_) => Value::String(s),
            }
        }
        (ColumnType::BigInt | ColumnType::BigFloat, Value::Number(n)) => {
            Value::String(n.to_string())
        }
        (ColumnType::BigInt | ColumnType::BigFloat, Value::String(s)) => {
            Value::String(s.trim().to_string())
        }
        (_, value) => value,
    }
}

fn arg_json(value: &ValueAccessor<'_>) -> async_graphql::Result<Value> {
    Ok(value.as_value().clone().into_json()?)
}

fn parse_order(
    value: &ValueAccessor<'_>,
    shape: &TableShape,
) -> async_graphql::Result<Vec<OrderTerm>> {
    let names: Vec<String> = match value.list() {
        Ok(list) => list
            .iter()
            .map(|item| item.enum_name().map(str::to_string))
            .collect::<async_graphql::Result<_>>()?,
        Err(_) => vec![value.enum_name()?.to_string()],
    };
    let mut terms = Vec::new();
    for name in names {
        let ordering = shape.orderings.get(&name).ok_or_else(|| {
            async_graphql::Error::new(format!("unknown ordering {name} for {}", shape.names.plural))
        })?;
        terms.extend(ordering.iter().cloned());
    }
    Ok(terms)
}

/// Read `first`, `offset`, `orderBy` and `condition` on top of a fixed `link`
/// condition. Returns `None` when the user condition contradicts the link.
fn read_selection(
    ctx: &ResolverContext<'_>,
    shape: &TableShape,
    link: Stash,
) -> async_graphql::Result<Option<Selection>> {
    let present = |name: &str| ctx.args.get(name).filter(|v| !v.is_null());

    let first = present("first").map(|v| v.i64()).transpose()?;
    let offset = present("offset").map(|v| v.i64()).transpose()?;
    if first.is_some_and(|n| n < 0) || offset.is_some_and(|n| n < 0) {
        return Err(async_graphql::Error::new("first and offset must not be negative"));
    }

    let mut condition = link;
    if let Some(input) = present("condition") {
        for (name, value) in input.object()?.iter() {
            let field = shape.by_field.get(name.as_str()).ok_or_else(|| {
                async_graphql::Error::new(format!("unknown condition field {name}"))
            })?;
            let wanted = coerce(field.ty, arg_json(&value)?);
            match condition.get(&field.column) {
                Some(fixed) if *fixed != wanted => return Ok(None),
                Some(_) => {}
                None => {
                    condition.insert(field.column.clone(), wanted);
                }
            }
        }
    }

    let order_by = match present("orderBy") {
        Some(v) => parse_order(&v, shape)?,
        None => shape.default_order.as_ref().clone(),
    };

    Ok(Some(Selection {
        condition,
        order_by,
        first,
        offset,
    }))
}

fn connection_value(shape: &TableShape, selection: Option<Selection>) -> FieldValue<'static> {
    let empty = selection.is_none();
    FieldValue::owned_any(ConnectionValue {
        table: Arc::clone(&shape.table),
        selection: selection.unwrap_or_default(),
        empty,
    })
}

/// `{ local column → remote column }` pairs resolved against a row.
/// `None` when any local value is missing or null.
fn link_condition(row: &Stash, pairs: &[(String, String)]) -> Option<Stash> {
    let mut condition = Stash::new();
    for (local, remote) in pairs {
        match row.get(local) {
            None | Some(Value::Null) => return None,
            Some(v) => {
                condition.insert(remote.clone(), v.clone());
            }
        }
    }
    Some(condition)
}

fn with_connection_args(field: Field, shape: &TableShape) -> Field {
    field
        .argument(
            InputValue::new("first", TypeRef::named(TypeRef::INT))
                .description("Only read the first `n` values of the set."),
        )
        .argument(
            InputValue::new("offset", TypeRef::named(TypeRef::INT))
                .description("Skip the first `n` values."),
        )
        .argument(
            InputValue::new("orderBy", TypeRef::named_nn_list(&shape.names.order_by))
                .description("The method to use when ordering the set."),
        )
        .argument(
            InputValue::new("condition", TypeRef::named(&shape.names.condition))
                .description("A condition to be used in determining which values should be returned."),
        )
}

/// Column field: read the value out of the parent row.
fn column_field(field_name: String, column: String, type_ref: TypeRef) -> Field {
    Field::new(field_name, type_ref, move |ctx| {
        let column = column.clone();
        FieldFuture::new(async move {
            let row = ctx.parent_value.try_downcast_ref::<Stash>()?;
            match row.get(&column) {
                None | Some(Value::Null) => Ok(FieldValue::NONE),
                Some(v) => Ok(Some(FieldValue::value(async_graphql::Value::from_json(
                    v.clone(),
                )?))),
            }
        })
    })
}

/// Forward relation: the single row this row's foreign key points at.
fn singleton_relation_field(
    field_name: String,
    target: &TableShape,
    pairs: Vec<(String, String)>,
) -> Field {
    let table = Arc::clone(&target.table);
    let pairs = Arc::new(pairs);
    Field::new(
        field_name,
        TypeRef::named(&target.names.type_name),
        move |ctx| {
            let table = Arc::clone(&table);
            let pairs = Arc::clone(&pairs);
            FieldFuture::new(async move {
                let row = ctx.parent_value.try_downcast_ref::<Stash>()?;
                let Some(condition) = link_condition(row, &pairs) else {
                    return Ok(FieldValue::NONE);
                };
                let found = session(&ctx)?.find(&table, &condition).await?;
                Ok(found.map(FieldValue::owned_any))
            })
        },
    )
    .description(format!(
        "Reads a single `{}` that is related to this row.",
        target.names.type_name
    ))
}

/// Backward relation: every row of `source` whose foreign key points at this row.
fn vector_relation_field(
    field_name: String,
    source: &TableShape,
    pairs: Vec<(String, String)>,
) -> Field {
    let shape = source.clone();
    let pairs = Arc::new(pairs);
    let field = Field::new(
        field_name,
        TypeRef::named_nn(&source.names.connection),
        move |ctx| {
            let shape = shape.clone();
            let pairs = Arc::clone(&pairs);
            FieldFuture::new(async move {
                let row = ctx.parent_value.try_downcast_ref::<Stash>()?;
                let selection = match link_condition(row, &pairs) {
                    Some(link) => read_selection(&ctx, &shape, link)?,
                    None => None,
                };
                Ok(Some(connection_value(&shape, selection)))
            })
        },
    )
    .description(format!(
        "Reads and enables pagination through a set of `{}`.",
        source.names.type_name
    ));
    with_connection_args(field, source)
}

fn row_object(
    shape: &TableShape,
    shapes: &HashMap<(String, String), TableShape>,
    all: &[TableShape],
) -> Object {
    let table = &shape.table;
    let mut obj = Object::new(&shape.names.type_name);

    for column in &table.columns {
        let type_ref = if column.nullable {
            TypeRef::named(scalar_name(column.ty))
        } else {
            TypeRef::named_nn(scalar_name(column.ty))
        };
        obj = obj.field(column_field(
            inflect::camel(&column.name),
            column.name.clone(),
            type_ref,
        ));
    }

    for fk in &table.foreign_keys {
        let key = (fk.foreign_schema.clone(), fk.foreign_table.clone());
        let Some(target) = shapes.get(&key) else {
            continue;
        };
        let name = format!(
            "{}{}",
            inflect::camel(&target.names.type_name),
            inflect::by_columns(&fk.columns)
        );
        let pairs = fk
            .columns
            .iter()
            .cloned()
            .zip(fk.foreign_columns.iter().cloned())
            .collect();
        obj = obj.field(singleton_relation_field(name, target, pairs));
    }

    for source in all {
        for fk in &source.table.foreign_keys {
            if (fk.foreign_schema.clone(), fk.foreign_table.clone()) != shape.key() {
                continue;
            }
            let name = format!(
                "{}{}",
                inflect::camel(&source.names.plural),
                inflect::by_columns(&fk.columns)
            );
            let pairs = fk
                .foreign_columns
                .iter()
                .cloned()
                .zip(fk.columns.iter().cloned())
                .collect();
            obj = obj.field(vector_relation_field(name, source, pairs));
        }
    }

    obj.description(format!("A row of `{}`.", table.qualified_name()))
}

fn connection_object(shape: &TableShape) -> Object {
    Object::new(&shape.names.connection)
        .description(format!(
            "A connection to a list of `{}` values.",
            shape.names.type_name
        ))
        .field(Field::new(
            "nodes",
            TypeRef::named_nn_list_nn(&shape.names.type_name),
            |ctx| {
                FieldFuture::new(async move {
                    let conn = ctx.parent_value.try_downcast_ref::<ConnectionValue>()?;
                    if conn.empty {
                        return Ok(Some(FieldValue::list(Vec::<FieldValue>::new())));
                    }
                    let rows = session(&ctx)?
                        .find_all(&conn.table, &conn.selection)
                        .await?;
                    Ok(Some(FieldValue::list(
                        rows.into_iter().map(FieldValue::owned_any),
                    )))
                })
            },
        ))
        .field(Field::new(
            "totalCount",
            TypeRef::named_nn(TypeRef::INT),
            |ctx| {
                FieldFuture::new(async move {
                    let conn = ctx.parent_value.try_downcast_ref::<ConnectionValue>()?;
                    let total = if conn.empty {
                        0
                    } else {
                        session(&ctx)?
                            .count(&conn.table, &conn.selection.condition)
                            .await?
                    };
                    Ok(Some(FieldValue::value(total)))
                })
            },
        ))
}

fn condition_input(shape: &TableShape) -> InputObject {
    let mut input = InputObject::new(&shape.names.condition).description(format!(
        "Equality filters on `{}` columns; a null value matches NULL.",
        shape.names.type_name
    ));
    for column in &shape.table.columns {
        input = input.field(InputValue::new(
            inflect::camel(&column.name),
            TypeRef::named(scalar_name(column.ty)),
        ));
    }
    input
}

fn order_enum(shape: &TableShape) -> Enum {
    let mut names: Vec<&String> = shape.orderings.keys().collect();
    names.sort();
    Enum::new(&shape.names.order_by)
        .description(format!("Methods to use when ordering `{}`.", shape.names.type_name))
        .items(names.into_iter().map(|n| EnumItem::new(n.as_str())))
}

fn all_rows_field(shape: &TableShape) -> Field {
    let s = shape.clone();
    let field = Field::new(
        &shape.names.all_field,
        TypeRef::named(&shape.names.connection),
        move |ctx| {
            let shape = s.clone();
            FieldFuture::new(async move {
                let selection = read_selection(&ctx, &shape, Stash::new())?;
                Ok(Some(connection_value(&shape, selection)))
            })
        },
    )
    .description(format!(
        "Reads and enables pagination through a set of `{}`.",
        shape.names.type_name
    ));
    with_connection_args(field, shape)
}

fn row_by_key_field(shape: &TableShape) -> Option<Field> {
    let table = &shape.table;
    if table.primary_key.is_empty() {
        return None;
    }

    let mut args = Vec::new();
    for pk in &table.primary_key {
        let column = table.get_column(pk)?;
        args.push((inflect::camel(pk), column.name.clone(), column.ty));
    }
    let args = Arc::new(args);
    let field_name = format!(
        "{}{}",
        inflect::camel(&shape.names.type_name),
        inflect::by_columns(&table.primary_key)
    );

    let resolver_args = Arc::clone(&args);
    let resolver_table = Arc::clone(&shape.table);
    let mut field = Field::new(
        field_name,
        TypeRef::named(&shape.names.type_name),
        move |ctx| {
            let args = Arc::clone(&resolver_args);
            let table = Arc::clone(&resolver_table);
            FieldFuture::new(async move {
                let mut condition = Stash::new();
                for (arg, column, ty) in args.iter() {
                    let value = ctx.args.try_get(arg)?;
                    condition.insert(column.clone(), coerce(*ty, arg_json(&value)?));
                }
                let found = session(&ctx)?.find(&table, &condition).await?;
                Ok(found.map(FieldValue::owned_any))
            })
        },
    );
    for (arg, _, ty) in args.iter() {
        field = field.argument(InputValue::new(arg, TypeRef::named_nn(scalar_name(*ty))));
    }
    Some(field)
}

/// Type names the schema registers itself; a table deriving one of these
/// is prefixed like a cross-schema clash.
fn is_reserved(name: &str) -> bool {
    name == "Query"
        || CUSTOM_SCALARS.contains(&name)
        || [
            TypeRef::INT,
            TypeRef::FLOAT,
            TypeRef::STRING,
            TypeRef::BOOLEAN,
            TypeRef::ID,
        ]
        .contains(&name)
}

/// Type names for every table; names that clash across schemas or with a
/// reserved type get the schema name as a prefix.
fn table_names(tables: &[&Table]) -> HashMap<(String, String), TableNames> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for t in tables {
        *seen.entry(inflect::pascal(&t.name)).or_default() += 1;
    }
    tables
        .iter()
        .map(|t| {
            let base = inflect::pascal(&t.name);
            let base = if is_reserved(&base) || seen.get(&base).copied().unwrap_or(0) > 1 {
                format!("{}{}", inflect::pascal(&t.schema), base)
            } else {
                base
            };
            ((t.schema.clone(), t.name.clone()), TableNames::new(base))
        })
        .collect()
}

/// Derive the GraphQL schema for `catalog`.
///
/// The result holds no connection; every request supplies its own
/// [`SessionHandle`] as request data.
pub fn build_schema(catalog: &Catalog) -> Result<Schema> {
    let usable: Vec<&Table> = catalog
        .tables
        .iter()
        .filter(|t| {
            if t.columns.is_empty() {
                tracing::warn!(table = %t.qualified_name(), "skipping table without visible columns");
            }
            !t.columns.is_empty()
        })
        .collect();

    let mut names = table_names(&usable);
    let all: Vec<TableShape> = usable
        .iter()
        .filter_map(|t| {
            let n = names.remove(&(t.schema.clone(), t.name.clone()))?;
            Some(TableShape::new(t, n))
        })
        .collect();
    let shapes: HashMap<(String, String), TableShape> =
        all.iter().map(|s| (s.key(), s.clone())).collect();

    let mut builder = Schema::build("Query", None, None);
    for scalar in CUSTOM_SCALARS {
        builder = builder.register(Scalar::new(scalar));
    }

    let mut query = Object::new("Query")
        .description("The root query type which gives access points into the data universe.")
        .field(
            Field::new("query", TypeRef::named_nn("Query"), |_ctx| {
                FieldFuture::new(async move { Ok(Some(FieldValue::owned_any(()))) })
            })
            .description("Exposes the root query type nested one level down."),
        );

    for shape in &all {
        query = query.field(all_rows_field(shape));
        if let Some(field) = row_by_key_field(shape) {
            query = query.field(field);
        }
        builder = builder
            .register(row_object(shape, &shapes, &all))
            .register(connection_object(shape))
            .register(condition_input(shape))
            .register(order_enum(shape));
    }

    let schema = builder
        .register(query)
        .finish()
        .map_err(|e| SpendqlError::Schema(e.to_string()))?;
    tracing::info!(tables = all.len(), "schema built");
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spendql_core::testing::fixture_catalog;

    #[test]
    fn numeric_strings_are_coerced_for_numeric_columns() {
        assert_eq!(coerce(ColumnType::Int, json!("42")), json!(42));
        assert_eq!(coerce(ColumnType::Float, json!("12.5")), json!(12.5));
        assert_eq!(coerce(ColumnType::Text, json!("42")), json!("42"));
        assert_eq!(coerce(ColumnType::Int, json!("x")), json!("x"));
    }

    #[test]
    fn big_numbers_stay_exact_decimal_strings() {
        assert_eq!(
            coerce(ColumnType::BigFloat, json!("12345678901234567.89")),
            json!("12345678901234567.89")
        );
        assert_eq!(
            coerce(ColumnType::BigFloat, json!(" 0.1000000000000000055511151231257827 ")),
            json!("0.1000000000000000055511151231257827")
        );
        assert_eq!(
            coerce(ColumnType::BigInt, json!(9007199254740993_i64)),
            json!("9007199254740993")
        );
        assert_eq!(coerce(ColumnType::BigFloat, json!(12.5)), json!("12.5"));
    }

    #[test]
    fn link_condition_requires_every_local_value() {
        let row = json!({"category_id": 1, "owner_id": null});
        let row = row.as_object().unwrap();
        let pairs = vec![("category_id".to_string(), "id".to_string())];
        let expected = json!({"id": 1}).as_object().unwrap().clone();
        assert_eq!(link_condition(row, &pairs).unwrap(), expected);
        let with_null = vec![("owner_id".to_string(), "id".to_string())];
        assert!(link_condition(row, &with_null).is_none());
    }

    #[test]
    fn clashing_table_names_get_schema_prefixes() {
        let a = Table::new("public", "category");
        let b = Table::new("budget", "category");
        let c = Table::new("public", "expense");
        let names = table_names(&[&a, &b, &c]);
        let name_of = |schema: &str, table: &str| {
            names[&(schema.to_string(), table.to_string())].type_name.clone()
        };
        assert_eq!(name_of("public", "category"), "PublicCategory");
        assert_eq!(name_of("budget", "category"), "BudgetCategory");
        assert_eq!(name_of("public", "expense"), "Expense");
    }

    #[test]
    fn tables_named_like_builtin_types_are_prefixed() {
        let tables: Vec<Table> = ["date", "query", "big_float", "string", "expense"]
            .iter()
            .map(|name| Table::new("public", *name))
            .collect();
        let refs: Vec<&Table> = tables.iter().collect();
        let names = table_names(&refs);
        let name_of = |table: &str| {
            names[&("public".to_string(), table.to_string())].type_name.clone()
        };
        assert_eq!(name_of("date"), "PublicDate");
        assert_eq!(name_of("query"), "PublicQuery");
        assert_eq!(name_of("big_float"), "PublicBigFloat");
        assert_eq!(name_of("string"), "PublicString");
        assert_eq!(name_of("expense"), "Expense");
    }

    #[test]
    fn reserved_table_names_still_build() {
        let catalog = Catalog {
            tables: vec![
                Table::new("public", "date")
                    .column("id", ColumnType::Int, false)
                    .column("day", ColumnType::Date, false)
                    .primary_key(&["id"]),
                Table::new("public", "query")
                    .column("id", ColumnType::Int, false)
                    .column("text", ColumnType::Text, false)
                    .primary_key(&["id"]),
            ],
        };
        let sdl = build_schema(&catalog).unwrap().sdl();
        for expected in [
            "scalar Date",
            "type PublicDate",
            "input PublicDateCondition",
            "publicDateById(id: Int!): PublicDate",
            "type PublicQuery",
            "publicQueryById(id: Int!): PublicQuery",
            "query: Query!",
        ] {
            assert!(sdl.contains(expected), "missing {expected} in\n{sdl}");
        }
    }

    #[test]
    fn fixture_schema_exposes_tables_and_relations() {
        let sdl = build_schema(&fixture_catalog()).unwrap().sdl();
        for expected in [
            "allExpenses(",
            "allCategories(",
            "expenseById(id: Int!): Expense",
            "categoryByCategoryId: Category",
            "expensesByCategoryId(",
            "type ExpensesConnection",
            "input ExpenseCondition",
            "enum ExpensesOrderBy",
            "PRIMARY_KEY_ASC",
            "SPENT_ON_DESC",
            "scalar BigFloat",
        ] {
            assert!(sdl.contains(expected), "missing {expected} in\n{sdl}");
        }
    }

    #[test]
    fn empty_catalog_still_builds() {
        let schema = build_schema(&Catalog::default()).unwrap();
        assert!(schema.sdl().contains("type Query"));
    }
}
