//! Bring a lab database in line with the logical schema.
//! Order: tables, missing columns, indexes, then foreign keys. Every statement is idempotent,
//! so running the plan against an up-to-date database changes nothing.

use super::types::{ColumnDef, LabSchema, RelationDef, TableDef};
use crate::registry::quote_ident as quote;
use sqlx::PgPool;

/// Key for the transaction-scoped advisory lock that serializes concurrent syncs of one database.
const SYNC_LOCK_KEY: &str = "lab_schema_sync";

/// Ordered DDL statements derived from a [`LabSchema`].
#[derive(Clone, Debug)]
pub struct SchemaPlan {
    pub statements: Vec<String>,
}

impl SchemaPlan {
    pub fn for_schema(schema: &LabSchema) -> Self {
        let mut statements = Vec::new();
        for table in schema.tables {
            statements.push(create_table_sql(table));
        }
        for table in schema.tables {
            for column in table.columns.iter().filter(|c| c.name != table.primary_key) {
                statements.push(add_column_sql(table.name, column));
            }
        }
        for table in schema.tables {
            for idx in table.indexes {
                let unique = if idx.unique { "UNIQUE " } else { "" };
                let cols: Vec<String> = idx.columns.iter().map(|c| quote(c)).collect();
                statements.push(format!(
                    "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                    unique,
                    quote(&idx.name(table.name)),
                    quote(table.name),
                    cols.join(", ")
                ));
            }
        }
        for rel in schema.relations {
            statements.push(foreign_key_sql(rel));
        }
        SchemaPlan { statements }
    }
}

fn column_sql(column: &ColumnDef) -> String {
    let mut def = format!("{} {}", quote(column.name), column.pg_type);
    if !column.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(d) = column.default {
        def.push_str(" DEFAULT ");
        def.push_str(d);
    }
    def
}

fn create_table_sql(table: &TableDef) -> String {
    let mut defs: Vec<String> = table.columns.iter().map(column_sql).collect();
    defs.push(format!("PRIMARY KEY ({})", quote(table.primary_key)));
    format!("CREATE TABLE IF NOT EXISTS {} (\n  {}\n)", quote(table.name), defs.join(",\n  "))
}

/// Columns added to an existing table only get NOT NULL when a default can fill existing rows.
fn add_column_sql(table: &str, column: &ColumnDef) -> String {
    let def = if column.nullable || column.default.is_some() {
        column_sql(column)
    } else {
        column_sql(&ColumnDef {
            nullable: true,
            ..*column
        })
    };
    format!("ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}", quote(table), def)
}

fn foreign_key_sql(rel: &RelationDef) -> String {
    let name = rel.constraint_name();
    format!(
        "DO $$ BEGIN IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = '{}') THEN ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}; END IF; END $$",
        name.replace('\'', "''"),
        quote(rel.from_table),
        quote(&name),
        quote(rel.from_column),
        quote(rel.to_table),
        quote(rel.to_column),
        rel.on_delete
    )
}

/// Apply the schema inside one transaction holding an advisory lock, so two processes
/// syncing the same lab database at once run one after the other.
pub async fn synchronize_schema(pool: &PgPool, schema: &LabSchema) -> Result<(), sqlx::Error> {
    let plan = SchemaPlan::for_schema(schema);
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(SYNC_LOCK_KEY)
        .execute(&mut *tx)
        .await?;
    for sql in &plan.statements {
        tracing::debug!(sql = %sql, "schema sync");
        sqlx::query(sql).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    tracing::debug!(statements = plan.statements.len(), "schema sync applied");
    Ok(())
}
