use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::error::Result;

/// Postgres caps a statement at 65535 bind parameters.
const INSERT_BATCH_ROWS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Date,
}

impl ColumnKind {
    fn sql_type(self) -> &'static str {
        match self {
            ColumnKind::Text => "TEXT",
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Date => "DATE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnKind,
}

impl ColumnDef {
    pub const fn new(name: &'static str, kind: ColumnKind) -> Self {
        Self { name, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(Option<String>),
    Integer(i32),
    Date(Option<NaiveDate>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    Append,
    /// Drop whatever is there and recreate from the column definitions.
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn table_exists(&self, table: &TableRef) -> Result<bool>;

    /// `MAX(column)`, or `None` when the table holds no rows.
    async fn max_date(&self, table: &TableRef, column: &str) -> Result<Option<NaiveDate>>;

    /// Creates the table from `columns` when missing; returns rows written.
    async fn insert(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
        rows: Vec<Vec<Value>>,
        mode: InsertMode,
    ) -> Result<u64>;
}

pub struct PgWarehouse {
    pool: PgPool,
}

impl PgWarehouse {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )
            "#,
        )
        .bind(&table.schema)
        .bind(&table.name)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn max_date(&self, table: &TableRef, column: &str) -> Result<Option<NaiveDate>> {
        let query = format!("SELECT MAX({}) FROM {}", quote_ident(column), table.qualified());
        let latest: Option<NaiveDate> = sqlx::query_scalar(&query).fetch_one(&self.pool).await?;
        Ok(latest)
    }

    async fn insert(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
        rows: Vec<Vec<Value>>,
        mode: InsertMode,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&table.schema)))
            .execute(&mut *tx)
            .await?;
        if mode == InsertMode::Replace {
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", table.qualified()))
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(&create_table_sql(table, columns))
            .execute(&mut *tx)
            .await?;

        let column_list = columns
            .iter()
            .map(|column| quote_ident(column.name))
            .collect::<Vec<_>>()
            .join(", ");

        let mut written = 0u64;
        for chunk in rows.chunks(INSERT_BATCH_ROWS) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {} ({}) ", table.qualified(), column_list));
            builder.push_values(chunk, |mut values, row| {
                for value in row {
                    match value {
                        Value::Text(text) => {
                            values.push_bind(text.clone());
                        }
                        Value::Integer(number) => {
                            values.push_bind(*number);
                        }
                        Value::Date(date) => {
                            values.push_bind(*date);
                        }
                    }
                }
            });
            written += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }
}

fn create_table_sql(table: &TableRef, columns: &[ColumnDef]) -> String {
    let definitions = columns
        .iter()
        .map(|column| format!("{} {}", quote_ident(column.name), column.kind.sql_type()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE IF NOT EXISTS {} ({})", table.qualified(), definitions)
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
