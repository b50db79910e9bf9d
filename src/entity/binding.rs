//! Entity bindings: every lab table attached to one specific connection pool.
//!
//! A binding set is rebuilt for every request from the pool it is handed; it is never cached,
//! so a binding can never outlive or point at a different pool than the one it was built from.

use super::sql::{self, QueryBuf};
use crate::schema::{LabSchema, TableDef};
use serde_json::{Map, Value};
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BindError {
    #[error("connection pool is closed")]
    PoolClosed,
    #[error("schema has no table {0}")]
    MissingTable(&'static str),
    #[error("relationship references unbound table {0}")]
    DanglingRelation(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncludeDirection {
    ToOne,
    ToMany,
}

/// A related entity reachable from a binding (`bills` -> `patient`, `bills` -> `items`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncludeSpec {
    pub name: &'static str,
    pub direction: IncludeDirection,
    pub related_table: &'static str,
    /// Our column in the join: our FK for to-one, our PK for to-many.
    pub our_key: &'static str,
    /// Their column in the join: their PK for to-one, their FK for to-many.
    pub their_key: &'static str,
}

/// One table bound to one pool.
#[derive(Clone, Debug)]
pub struct EntityBinding {
    pool: PgPool,
    table: &'static TableDef,
    includes: Vec<IncludeSpec>,
}

impl EntityBinding {
    const DEFAULT_LIMIT: u32 = 100;
    const MAX_LIMIT: u32 = 1000;

    pub fn name(&self) -> &'static str {
        self.table.name
    }

    pub fn table(&self) -> &'static TableDef {
        self.table
    }

    pub fn includes(&self) -> &[IncludeSpec] {
        &self.includes
    }

    pub fn include(&self, name: &str) -> Option<&IncludeSpec> {
        self.includes.iter().find(|i| i.name == name)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Err names the first filter value its column type cannot take.
    pub fn check_filters(&self, filters: &[(String, Value)]) -> Result<(), String> {
        match sql::invalid_filter(self.table, filters) {
            Some((column, pg_type)) => Err(format!("filter {} must be a valid {}", column, pg_type)),
            None => Ok(()),
        }
    }

    /// List rows with exact-match filters; limit defaults to 100 and is capped at 1000.
    pub async fn list(
        &self,
        filters: &[(String, Value)],
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Value>, sqlx::Error> {
        let limit = limit.unwrap_or(Self::DEFAULT_LIMIT).min(Self::MAX_LIMIT);
        let q = sql::select_list(self.table, filters, limit, offset.unwrap_or(0));
        fetch_all(&self.pool, &q).await
    }

    pub async fn find(&self, id: &Value) -> Result<Option<Value>, sqlx::Error> {
        self.find_with(id, &[]).await
    }

    /// Fetch one row by primary key with the named includes embedded. Unknown include names are ignored.
    pub async fn find_with(&self, id: &Value, include_names: &[&str]) -> Result<Option<Value>, sqlx::Error> {
        let includes: Vec<&IncludeSpec> = include_names.iter().filter_map(|n| self.include(n)).collect();
        let q = sql::select_by_id(self.table, id, &includes);
        fetch_optional(&self.pool, &q).await
    }

    /// First row whose `column` equals `value`.
    pub async fn find_by(&self, column: &str, value: &Value) -> Result<Option<Value>, sqlx::Error> {
        self.require_column(column)?;
        let q = sql::select_list(self.table, &[(column.to_string(), value.clone())], 1, 0);
        fetch_optional(&self.pool, &q).await
    }

    pub async fn count_where(&self, filters: &[(String, Value)]) -> Result<i64, sqlx::Error> {
        for (col, _) in filters {
            self.require_column(col)?;
        }
        let q = sql::count_where(self.table, filters);
        let mut query = sqlx::query_scalar::<_, i64>(&q.sql);
        for p in &q.params {
            query = query.bind(p.clone());
        }
        query.fetch_one(&self.pool).await
    }

    pub async fn create(&self, row: &Map<String, Value>) -> Result<Value, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        self.create_in(&mut conn, row).await
    }

    /// Insert on a caller-held connection (e.g. inside a transaction).
    pub async fn create_in(&self, conn: &mut PgConnection, row: &Map<String, Value>) -> Result<Value, sqlx::Error> {
        let q = sql::insert(self.table, row);
        tracing::debug!(sql = %q.sql, "insert");
        let mut query = sqlx::query_scalar::<_, Value>(&q.sql);
        for p in &q.params {
            query = query.bind(p.clone());
        }
        query.fetch_one(&mut *conn).await
    }

    /// Delete rows matching all filters on a caller-held connection. Refuses an empty filter set.
    pub async fn delete_where_in(&self, conn: &mut PgConnection, filters: &[(String, Value)]) -> Result<u64, sqlx::Error> {
        if filters.is_empty() {
            return Err(sqlx::Error::Protocol("refusing unfiltered delete".into()));
        }
        for (col, _) in filters {
            self.require_column(col)?;
        }
        let q = sql::delete_where(self.table, filters);
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(p.clone());
        }
        Ok(query.execute(&mut *conn).await?.rows_affected())
    }

    fn require_column(&self, column: &str) -> Result<(), sqlx::Error> {
        match self.table.column(column) {
            Some(_) => Ok(()),
            None => Err(sqlx::Error::ColumnNotFound(format!("{}.{}", self.table.name, column))),
        }
    }
}

async fn fetch_all(pool: &PgPool, q: &QueryBuf) -> Result<Vec<Value>, sqlx::Error> {
    tracing::debug!(sql = %q.sql, "query");
    let mut query = sqlx::query_scalar::<_, Value>(&q.sql);
    for p in &q.params {
        query = query.bind(p.clone());
    }
    query.fetch_all(pool).await
}

async fn fetch_optional(pool: &PgPool, q: &QueryBuf) -> Result<Option<Value>, sqlx::Error> {
    tracing::debug!(sql = %q.sql, "query");
    let mut query = sqlx::query_scalar::<_, Value>(&q.sql);
    for p in &q.params {
        query = query.bind(p.clone());
    }
    query.fetch_optional(pool).await
}

/// All lab entities bound to the same pool.
#[derive(Clone, Debug)]
pub struct EntityBindingSet {
    pool: PgPool,
    pub roles: EntityBinding,
    pub permissions: EntityBinding,
    pub role_permissions: EntityBinding,
    pub staff: EntityBinding,
    pub patients: EntityBinding,
    pub doctors: EntityBinding,
    pub bills: EntityBinding,
    pub bill_items: EntityBinding,
    pub reports: EntityBinding,
    pub report_parameters: EntityBinding,
    pub settings: EntityBinding,
}

impl EntityBindingSet {
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn get(&self, name: &str) -> Option<&EntityBinding> {
        Some(match name {
            "roles" => &self.roles,
            "permissions" => &self.permissions,
            "role_permissions" => &self.role_permissions,
            "staff" => &self.staff,
            "patients" => &self.patients,
            "doctors" => &self.doctors,
            "bills" => &self.bills,
            "bill_items" => &self.bill_items,
            "reports" => &self.reports,
            "report_parameters" => &self.report_parameters,
            "settings" => &self.settings,
            _ => return None,
        })
    }
}

/// Bind every table of `schema` to `pool`, then wire relationships between the bound entities.
pub fn bind_entities(pool: &PgPool, schema: &'static LabSchema) -> Result<EntityBindingSet, BindError> {
    if pool.is_closed() {
        return Err(BindError::PoolClosed);
    }

    let mut by_name: HashMap<&'static str, EntityBinding> = schema
        .tables
        .iter()
        .map(|table| {
            (
                table.name,
                EntityBinding {
                    pool: pool.clone(),
                    table,
                    includes: Vec::new(),
                },
            )
        })
        .collect();

    // Relationships need both participants bound first.
    for rel in schema.relations {
        by_name
            .get_mut(rel.from_table)
            .ok_or(BindError::DanglingRelation(rel.from_table))?
            .includes
            .push(IncludeSpec {
                name: rel.to_one,
                direction: IncludeDirection::ToOne,
                related_table: rel.to_table,
                our_key: rel.from_column,
                their_key: rel.to_column,
            });
        let target = by_name
            .get_mut(rel.to_table)
            .ok_or(BindError::DanglingRelation(rel.to_table))?;
        if let Some(many) = rel.to_many {
            target.includes.push(IncludeSpec {
                name: many,
                direction: IncludeDirection::ToMany,
                related_table: rel.from_table,
                our_key: rel.to_column,
                their_key: rel.from_column,
            });
        }
    }

    let mut take = |name: &'static str| by_name.remove(name).ok_or(BindError::MissingTable(name));
    Ok(EntityBindingSet {
        pool: pool.clone(),
        roles: take("roles")?,
        permissions: take("permissions")?,
        role_permissions: take("role_permissions")?,
        staff: take("staff")?,
        patients: take("patients")?,
        doctors: take("doctors")?,
        bills: take("bills")?,
        bill_items: take("bill_items")?,
        reports: take("reports")?,
        report_parameters: take("report_parameters")?,
        settings: take("settings")?,
    })
}
