use serde::{Deserialize, Serialize};

/// The database structure a schema is derived from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub tables: Vec<Table>,
}

impl Catalog {
    pub fn table(&self, schema: &str, name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.schema == schema && t.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn column(mut self, name: impl Into<String>, ty: ColumnType, nullable: bool) -> Self {
        self.columns.push(Column {
            name: name.into(),
            ty,
            nullable,
        });
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn foreign_key(
        mut self,
        name: impl Into<String>,
        columns: &[&str],
        foreign_schema: impl Into<String>,
        foreign_table: impl Into<String>,
        foreign_columns: &[&str],
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            foreign_schema: foreign_schema.into(),
            foreign_table: foreign_table.into(),
            foreign_columns: foreign_columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// `schema.name`, for log lines and error messages.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub foreign_schema: String,
    pub foreign_table: String,
    pub foreign_columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Int,
    BigInt,
    Float,
    BigFloat,
    Boolean,
    Text,
    Uuid,
    Json,
    Date,
    Datetime,
}

impl ColumnType {
    /// Map a Postgres `udt_name` onto the column types the schema knows about.
    /// Anything unrecognised is exposed as text.
    pub fn from_udt(udt: &str) -> Self {
        match udt {
            "int2" | "int4" => ColumnType::Int,
            "int8" => ColumnType::BigInt,
            "float4" | "float8" => ColumnType::Float,
            "numeric" => ColumnType::BigFloat,
            "bool" => ColumnType::Boolean,
            "uuid" => ColumnType::Uuid,
            "json" | "jsonb" => ColumnType::Json,
            "date" => ColumnType::Date,
            "timestamp" | "timestamptz" => ColumnType::Datetime,
            _ => ColumnType::Text,
        }
    }
}
