//! Parameterized SQL for entity bindings: identifiers come from the static schema only,
//! values are always bound. Every value is sent as text and cast to the column type
//! in the placeholder; rows come back as one JSON object per row via `row_to_json`.

use crate::schema::TableDef;
use serde_json::Value;

use super::binding::{IncludeDirection, IncludeSpec};

pub(crate) fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Option<String>>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Push a value and return its `$n::type` placeholder.
    fn placeholder(&mut self, table: &TableDef, column: &str, v: &Value) -> String {
        let pg_type = table.column(column).map(|c| c.pg_type).unwrap_or("TEXT");
        self.params.push(text_param(pg_type, v));
        format!("${}::{}", self.params.len(), pg_type)
    }
}

/// Text form of a JSON value for binding against a column of `pg_type`.
pub(crate) fn text_param(pg_type: &str, v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        _ if pg_type.eq_ignore_ascii_case("JSONB") || pg_type.eq_ignore_ascii_case("JSON") => Some(v.to_string()),
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Whether `v` casts to `pg_type`. Types not checked here are left to the database.
pub(crate) fn accepts_value(pg_type: &str, v: &Value) -> bool {
    let Some(text) = text_param(pg_type, v) else {
        return true;
    };
    let text = text.trim();
    let base = pg_type.split('(').next().unwrap_or(pg_type).trim().to_ascii_uppercase();
    match base.as_str() {
        "UUID" => uuid::Uuid::parse_str(text).is_ok(),
        "SMALLINT" | "INTEGER" | "INT" | "BIGINT" => text.parse::<i64>().is_ok(),
        "NUMERIC" | "DECIMAL" | "REAL" | "DOUBLE PRECISION" => text.parse::<f64>().is_ok(),
        "BOOLEAN" => matches!(
            text.to_ascii_lowercase().as_str(),
            "true" | "false" | "t" | "f" | "yes" | "no" | "y" | "n" | "on" | "off" | "1" | "0"
        ),
        _ => true,
    }
}

/// First known filter column whose value its type cannot take, with that type.
pub(crate) fn invalid_filter<'a>(table: &TableDef, filters: &'a [(String, Value)]) -> Option<(&'a str, &'static str)> {
    filters.iter().find_map(|(col, val)| {
        let column = table.column(col)?;
        (!accepts_value(column.pg_type, val)).then_some((col.as_str(), column.pg_type))
    })
}

fn where_clause(q: &mut QueryBuf, table: &TableDef, filters: &[(String, Value)]) -> String {
    let mut parts = Vec::new();
    for (col, val) in filters {
        if table.column(col).is_none() {
            continue;
        }
        if val.is_null() {
            parts.push(format!("{} IS NULL", quoted(col)));
        } else {
            let ph = q.placeholder(table, col, val);
            parts.push(format!("{} = {}", quoted(col), ph));
        }
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

/// SELECT rows matching exact-match filters (unknown columns ignored), newest first when the table tracks creation.
pub fn select_list(table: &TableDef, filters: &[(String, Value)], limit: u32, offset: u32) -> QueryBuf {
    let mut q = QueryBuf::new();
    let wc = where_clause(&mut q, table, filters);
    let order = if table.column("created_at").is_some() {
        format!("{} DESC, {}", quoted("created_at"), quoted(table.primary_key))
    } else {
        quoted(table.primary_key)
    };
    q.sql = format!(
        "SELECT row_to_json(t) FROM (SELECT * FROM {}{} ORDER BY {} LIMIT {} OFFSET {}) t",
        quoted(table.name),
        wc,
        order,
        limit,
        offset
    );
    q
}

/// SELECT one row by primary key with optional include subqueries (`row_to_json` for to-one, `json_agg` for to-many).
pub fn select_by_id(table: &TableDef, id: &Value, includes: &[&IncludeSpec]) -> QueryBuf {
    const MAIN_ALIAS: &str = "main";
    let mut q = QueryBuf::new();
    let ph = q.placeholder(table, table.primary_key, id);
    let mut select_parts = vec![format!("{}.*", MAIN_ALIAS)];
    for inc in includes {
        let sub_from = format!(
            "{} WHERE {} = {}.{}",
            quoted(inc.related_table),
            quoted(inc.their_key),
            MAIN_ALIAS,
            quoted(inc.our_key)
        );
        let subquery = match inc.direction {
            IncludeDirection::ToOne => format!("(SELECT row_to_json(sub) FROM (SELECT * FROM {}) sub)", sub_from),
            IncludeDirection::ToMany => format!(
                "(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM (SELECT * FROM {}) sub)",
                sub_from
            ),
        };
        select_parts.push(format!("{} AS {}", subquery, quoted(inc.name)));
    }
    q.sql = format!(
        "SELECT row_to_json(t) FROM (SELECT {} FROM {} {} WHERE {}.{} = {}) t",
        select_parts.join(", "),
        quoted(table.name),
        MAIN_ALIAS,
        MAIN_ALIAS,
        quoted(table.primary_key),
        ph
    );
    q
}

pub fn count_where(table: &TableDef, filters: &[(String, Value)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let wc = where_clause(&mut q, table, filters);
    q.sql = format!("SELECT COUNT(*) FROM {}{}", quoted(table.name), wc);
    q
}

/// INSERT the known columns of `row` and return the stored row.
pub fn insert(table: &TableDef, row: &serde_json::Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut values = Vec::new();
    for column in table.columns {
        if let Some(v) = row.get(column.name) {
            cols.push(quoted(column.name));
            values.push(q.placeholder(table, column.name, v));
        }
    }
    q.sql = if cols.is_empty() {
        format!(
            "WITH ins AS (INSERT INTO {} DEFAULT VALUES RETURNING *) SELECT row_to_json(ins) FROM ins",
            quoted(table.name)
        )
    } else {
        format!(
            "WITH ins AS (INSERT INTO {} ({}) VALUES ({}) RETURNING *) SELECT row_to_json(ins) FROM ins",
            quoted(table.name),
            cols.join(", "),
            values.join(", ")
        )
    };
    q
}

pub fn delete_where(table: &TableDef, filters: &[(String, Value)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let wc = where_clause(&mut q, table, filters);
    q.sql = format!("DELETE FROM {}{}", quoted(table.name), wc);
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::lab_schema;
    use serde_json::json;

    fn table(name: &str) -> &'static TableDef {
        lab_schema().table(name).unwrap()
    }

    #[test]
    fn list_binds_known_filters_and_skips_unknown() {
        let filters = vec![
            ("status".to_string(), json!("paid")),
            ("no_such_column".to_string(), json!("x")),
        ];
        let q = select_list(table("bills"), &filters, 50, 10);
        assert_eq!(
            q.sql,
            "SELECT row_to_json(t) FROM (SELECT * FROM \"bills\" WHERE \"status\" = $1::TEXT ORDER BY \"created_at\" DESC, \"id\" LIMIT 50 OFFSET 10) t"
        );
        assert_eq!(q.params, vec![Some("paid".to_string())]);
    }

    #[test]
    fn null_filters_become_is_null() {
        let q = count_where(table("staff"), &[("role_id".to_string(), Value::Null)]);
        assert_eq!(q.sql, "SELECT COUNT(*) FROM \"staff\" WHERE \"role_id\" IS NULL");
        assert!(q.params.is_empty());
    }

    #[test]
    fn insert_casts_each_value_to_column_type() {
        let row = json!({ "key": "lab_code", "value": { "code": "ACME01" }, "bogus": 1 });
        let q = insert(table("settings"), row.as_object().unwrap());
        assert_eq!(
            q.sql,
            "WITH ins AS (INSERT INTO \"settings\" (\"key\", \"value\") VALUES ($1::TEXT, $2::JSONB) RETURNING *) SELECT row_to_json(ins) FROM ins"
        );
        assert_eq!(
            q.params,
            vec![Some("lab_code".to_string()), Some("{\"code\":\"ACME01\"}".to_string())]
        );
    }

    #[test]
    fn text_params_keep_strings_raw_except_for_json_columns() {
        assert_eq!(text_param("TEXT", &json!("a")), Some("a".to_string()));
        assert_eq!(text_param("JSONB", &json!("a")), Some("\"a\"".to_string()));
        assert_eq!(text_param("INTEGER", &json!(3)), Some("3".to_string()));
        assert_eq!(text_param("BOOLEAN", &json!(true)), Some("true".to_string()));
        assert_eq!(text_param("UUID", &Value::Null), None);
    }

    #[test]
    fn filter_values_are_checked_against_column_types() {
        assert!(accepts_value("UUID", &json!("3f1c9a52-8a55-4b8e-9a4b-6f8f1e2d3c4b")));
        assert!(!accepts_value("UUID", &json!("abc")));
        assert!(accepts_value("INTEGER", &json!(" 42 ")));
        assert!(!accepts_value("INTEGER", &json!("4.2")));
        assert!(accepts_value("NUMERIC(12,2)", &json!("19.99")));
        assert!(!accepts_value("NUMERIC(12,2)", &json!("cheap")));
        assert!(accepts_value("BOOLEAN", &json!("TRUE")));
        assert!(accepts_value("BOOLEAN", &json!(false)));
        assert!(!accepts_value("BOOLEAN", &json!("maybe")));
        assert!(accepts_value("TEXT", &json!("anything")));
        assert!(accepts_value("UUID", &Value::Null));
    }

    #[test]
    fn invalid_filter_names_the_first_bad_column() {
        let filters = vec![
            ("status".to_string(), json!("paid")),
            ("no_such_column".to_string(), json!("x")),
            ("patient_id".to_string(), json!("abc")),
        ];
        assert_eq!(invalid_filter(table("bills"), &filters), Some(("patient_id", "UUID")));
        assert_eq!(invalid_filter(table("bills"), &filters[..2]), None);
    }

    #[test]
    fn select_by_id_embeds_include_subqueries() {
        let inc = IncludeSpec {
            name: "items",
            direction: IncludeDirection::ToMany,
            related_table: "bill_items",
            our_key: "id",
            their_key: "bill_id",
        };
        let q = select_by_id(table("bills"), &json!("3f1c"), &[&inc]);
        assert!(q.sql.contains(
            "(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM (SELECT * FROM \"bill_items\" WHERE \"bill_id\" = main.\"id\") sub) AS \"items\""
        ));
        assert!(q.sql.ends_with("WHERE main.\"id\" = $1::UUID) t"));
    }
}
