//! The lab database layout: staff and permissions, patients, doctors, billing and reports.

use super::types::{ColumnDef as C, IndexDef, LabSchema, RelationDef, TableDef};

const ID: C = C::with_default("id", "UUID", "gen_random_uuid()");
const CREATED_AT: C = C::with_default("created_at", "TIMESTAMPTZ", "NOW()");
const UPDATED_AT: C = C::with_default("updated_at", "TIMESTAMPTZ", "NOW()");

const TABLES: &[TableDef] = &[
    TableDef {
        name: "roles",
        primary_key: "id",
        columns: &[ID, C::required("name", "TEXT"), C::optional("description", "TEXT"), CREATED_AT],
        indexes: &[IndexDef { columns: &["name"], unique: true }],
    },
    TableDef {
        name: "permissions",
        primary_key: "id",
        columns: &[ID, C::required("module", "TEXT"), C::required("action", "TEXT")],
        indexes: &[IndexDef { columns: &["module", "action"], unique: true }],
    },
    TableDef {
        name: "role_permissions",
        primary_key: "id",
        columns: &[ID, C::required("role_id", "UUID"), C::required("permission_id", "UUID")],
        indexes: &[IndexDef { columns: &["role_id", "permission_id"], unique: true }],
    },
    TableDef {
        name: "staff",
        primary_key: "id",
        columns: &[
            ID,
            C::required("username", "TEXT"),
            C::required("email", "TEXT"),
            C::required("display_name", "TEXT"),
            C::required("password_hash", "TEXT"),
            C::optional("role_id", "UUID"),
            C::with_default("is_active", "BOOLEAN", "TRUE"),
            CREATED_AT,
            UPDATED_AT,
        ],
        indexes: &[
            IndexDef { columns: &["username"], unique: true },
            IndexDef { columns: &["email"], unique: true },
            IndexDef { columns: &["role_id"], unique: false },
        ],
    },
    TableDef {
        name: "patients",
        primary_key: "id",
        columns: &[
            ID,
            C::required("full_name", "TEXT"),
            C::optional("gender", "TEXT"),
            C::optional("date_of_birth", "DATE"),
            C::optional("phone", "TEXT"),
            C::optional("email", "TEXT"),
            C::optional("address", "TEXT"),
            CREATED_AT,
            UPDATED_AT,
        ],
        indexes: &[IndexDef { columns: &["phone"], unique: false }],
    },
    TableDef {
        name: "doctors",
        primary_key: "id",
        columns: &[
            ID,
            C::required("full_name", "TEXT"),
            C::optional("specialization", "TEXT"),
            C::optional("phone", "TEXT"),
            C::optional("email", "TEXT"),
            C::with_default("commission_percent", "NUMERIC(5,2)", "0"),
            CREATED_AT,
            UPDATED_AT,
        ],
        indexes: &[],
    },
    TableDef {
        name: "bills",
        primary_key: "id",
        columns: &[
            ID,
            C::required("bill_number", "TEXT"),
            C::required("patient_id", "UUID"),
            C::optional("doctor_id", "UUID"),
            C::with_default("total_amount", "NUMERIC(12,2)", "0"),
            C::with_default("discount", "NUMERIC(12,2)", "0"),
            C::with_default("paid_amount", "NUMERIC(12,2)", "0"),
            C::with_default("status", "TEXT", "'pending'"),
            CREATED_AT,
            UPDATED_AT,
        ],
        indexes: &[
            IndexDef { columns: &["bill_number"], unique: true },
            IndexDef { columns: &["patient_id"], unique: false },
        ],
    },
    TableDef {
        name: "bill_items",
        primary_key: "id",
        columns: &[
            ID,
            C::required("bill_id", "UUID"),
            C::required("test_name", "TEXT"),
            C::with_default("price", "NUMERIC(12,2)", "0"),
            C::with_default("quantity", "INTEGER", "1"),
        ],
        indexes: &[IndexDef { columns: &["bill_id"], unique: false }],
    },
    TableDef {
        name: "reports",
        primary_key: "id",
        columns: &[
            ID,
            C::optional("bill_id", "UUID"),
            C::required("patient_id", "UUID"),
            C::required("title", "TEXT"),
            C::with_default("status", "TEXT", "'draft'"),
            C::optional("remarks", "TEXT"),
            C::optional("reported_at", "TIMESTAMPTZ"),
            CREATED_AT,
            UPDATED_AT,
        ],
        indexes: &[IndexDef { columns: &["patient_id"], unique: false }],
    },
    TableDef {
        name: "report_parameters",
        primary_key: "id",
        columns: &[
            ID,
            C::required("report_id", "UUID"),
            C::required("name", "TEXT"),
            C::optional("value", "TEXT"),
            C::optional("unit", "TEXT"),
            C::optional("reference_range", "TEXT"),
            C::optional("formula", "TEXT"),
            C::with_default("sort_order", "INTEGER", "0"),
        ],
        indexes: &[IndexDef { columns: &["report_id"], unique: false }],
    },
    TableDef {
        name: "settings",
        primary_key: "key",
        columns: &[C::required("key", "TEXT"), C::required("value", "JSONB"), UPDATED_AT],
        indexes: &[],
    },
];

const fn relation(
    from_table: &'static str,
    from_column: &'static str,
    to_table: &'static str,
    on_delete: &'static str,
    to_one: &'static str,
    to_many: Option<&'static str>,
) -> RelationDef {
    RelationDef {
        from_table,
        from_column,
        to_table,
        to_column: "id",
        on_delete,
        to_one,
        to_many,
    }
}

const RELATIONS: &[RelationDef] = &[
    relation("role_permissions", "role_id", "roles", "CASCADE", "role", Some("role_permissions")),
    relation("role_permissions", "permission_id", "permissions", "CASCADE", "permission", None),
    relation("staff", "role_id", "roles", "SET NULL", "role", Some("staff")),
    relation("bills", "patient_id", "patients", "RESTRICT", "patient", Some("bills")),
    relation("bills", "doctor_id", "doctors", "SET NULL", "doctor", Some("bills")),
    relation("bill_items", "bill_id", "bills", "CASCADE", "bill", Some("items")),
    relation("reports", "patient_id", "patients", "RESTRICT", "patient", Some("reports")),
    relation("reports", "bill_id", "bills", "SET NULL", "bill", Some("reports")),
    relation("report_parameters", "report_id", "reports", "CASCADE", "report", Some("parameters")),
];

pub const LAB_SCHEMA: LabSchema = LabSchema {
    tables: TABLES,
    relations: RELATIONS,
};

pub fn lab_schema() -> &'static LabSchema {
    &LAB_SCHEMA
}
