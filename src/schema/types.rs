//! Static description of tables, columns, indexes and relationships.

/// One column. `pg_type` is the literal PostgreSQL type used in DDL and casts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub pg_type: &'static str,
    pub nullable: bool,
    pub default: Option<&'static str>,
}

impl ColumnDef {
    pub const fn required(name: &'static str, pg_type: &'static str) -> Self {
        ColumnDef {
            name,
            pg_type,
            nullable: false,
            default: None,
        }
    }

    pub const fn optional(name: &'static str, pg_type: &'static str) -> Self {
        ColumnDef {
            name,
            pg_type,
            nullable: true,
            default: None,
        }
    }

    pub const fn with_default(name: &'static str, pg_type: &'static str, default: &'static str) -> Self {
        ColumnDef {
            name,
            pg_type,
            nullable: false,
            default: Some(default),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct IndexDef {
    pub columns: &'static [&'static str],
    pub unique: bool,
}

impl IndexDef {
    /// Deterministic index name: `<table>_<col>_<col>_{idx|key}`.
    pub fn name(&self, table: &str) -> String {
        let suffix = if self.unique { "key" } else { "idx" };
        format!("{}_{}_{}", table, self.columns.join("_"), suffix)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TableDef {
    pub name: &'static str,
    pub primary_key: &'static str,
    pub columns: &'static [ColumnDef],
    pub indexes: &'static [IndexDef],
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Foreign key `from_table.from_column -> to_table.to_column`.
///
/// `to_one` names the include on the referencing side (a bill's `patient`),
/// `to_many` the include on the referenced side (a patient's `bills`).
#[derive(Clone, Copy, Debug)]
pub struct RelationDef {
    pub from_table: &'static str,
    pub from_column: &'static str,
    pub to_table: &'static str,
    pub to_column: &'static str,
    pub on_delete: &'static str,
    pub to_one: &'static str,
    pub to_many: Option<&'static str>,
}

impl RelationDef {
    pub fn constraint_name(&self) -> String {
        format!("{}_{}_fkey", self.from_table, self.from_column)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LabSchema {
    pub tables: &'static [TableDef],
    pub relations: &'static [RelationDef],
}

impl LabSchema {
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }
}
