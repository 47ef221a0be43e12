pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod testing;

pub use catalog::{Catalog, Column, ColumnType, ForeignKey, Table};
pub use config::{ConnectionEndpoint, DefaultRole, PoolSettings, Settings};
pub use context::with_execution_context;
pub use error::{Result, SpendqlError};

use std::sync::Arc;

/// A row as a JSON object keyed by column name.
pub type Stash = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub column: String,
    pub descending: bool,
}

impl OrderTerm {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// Which rows of a table to return and in what order.
///
/// `condition` holds column name → value equality filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub condition: Stash,
    pub order_by: Vec<OrderTerm>,
    pub first: Option<i64>,
    pub offset: Option<i64>,
}

impl Selection {
    pub fn matching(condition: Stash) -> Self {
        Self {
            condition,
            ..Self::default()
        }
    }
}

#[async_trait::async_trait]
pub trait Searcher: Send + Sync {
    async fn find(&self, table: &Table, condition: &Stash) -> Result<Option<Stash>>;
    async fn find_all(&self, table: &Table, selection: &Selection) -> Result<Vec<Stash>>;
    async fn count(&self, table: &Table, condition: &Stash) -> Result<i64>;
}

/// A request-scoped unit of work: one pooled connection, one transaction,
/// one assumed role.
#[async_trait::async_trait]
pub trait Session: Searcher {
    /// The role this session runs as.
    fn role(&self) -> &DefaultRole;
    async fn commit(&self) -> Result<()>;
    async fn rollback(&self) -> Result<()>;
}

#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    async fn begin(&self, role: &DefaultRole) -> Result<Arc<dyn Session>>;

    /// Stop handing out sessions and wait for open ones to finish.
    async fn close(&self) {}
}

#[async_trait::async_trait]
pub trait Introspector: Send + Sync {
    async fn introspect(&self, schemas: &[String]) -> Result<Catalog>;
}
