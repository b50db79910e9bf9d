//! Default data every lab needs: the admin role with the full permission catalogue,
//! the admin staff account and the lab settings row. Every step checks before it writes,
//! so seeding an already seeded lab changes nothing.

use crate::entity::EntityBindingSet;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde_json::{json, Map, Value};
use sha2::Sha256;
use std::collections::{HashMap, HashSet};

pub const ADMIN_ROLE: &str = "admin";
pub const ADMIN_USERNAME: &str = "admin";

pub const PERMISSION_MODULES: &[&str] = &["patients", "doctors", "bills", "reports", "staff", "settings"];
pub const PERMISSION_ACTIONS: &[&str] = &["view", "create", "edit", "delete"];

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LENGTH: usize = 16;
const HASH_LENGTH: usize = 32;

/// What a seeding pass changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub role_created: bool,
    pub permissions_created: usize,
    pub admin_created: bool,
    pub permissions_reset: bool,
    pub settings_created: bool,
}

impl SeedReport {
    pub fn changed_anything(&self) -> bool {
        self.role_created
            || self.permissions_created > 0
            || self.admin_created
            || self.permissions_reset
            || self.settings_created
    }
}

/// Every (module, action) pair the admin role must hold.
pub fn permission_catalogue() -> Vec<(&'static str, &'static str)> {
    PERMISSION_MODULES
        .iter()
        .flat_map(|m| PERMISSION_ACTIONS.iter().map(move |a| (*m, *a)))
        .collect()
}

/// The admin role is rewritten when its grants differ from the catalogue in any way.
pub fn needs_permission_reset(granted: &HashSet<String>, catalogue: &HashSet<String>) -> bool {
    granted != catalogue
}

pub fn admin_email(lab_code: &str) -> String {
    format!("admin@{}.lab", lab_code.to_lowercase())
}

/// PBKDF2-HMAC-SHA256 with a random salt, encoded as `pbkdf2$<iterations>$<salt>$<hash>`.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    encode_hash(password, &salt, PBKDF2_ITERATIONS)
}

fn encode_hash(password: &str, salt: &[u8], iterations: u32) -> String {
    let mut out = [0u8; HASH_LENGTH];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    let b64 = base64::engine::general_purpose::STANDARD_NO_PAD;
    format!("pbkdf2${}${}${}", iterations, b64.encode(salt), b64.encode(out))
}

#[cfg(test)]
pub(crate) fn verify_password(password: &str, stored: &str) -> bool {
    let parts: Vec<&str> = stored.split('$').collect();
    let [scheme, iterations, salt, _] = parts.as_slice() else {
        return false;
    };
    if *scheme != "pbkdf2" {
        return false;
    }
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let Ok(salt) = base64::engine::general_purpose::STANDARD_NO_PAD.decode(salt) else {
        return false;
    };
    encode_hash(password, &salt, iterations) == stored
}

const SETTINGS_KEY: &str = "lab_code";

fn row_id(row: &Value) -> Option<String> {
    row.get("id").and_then(Value::as_str).map(str::to_string)
}

fn row_str<'a>(row: &'a Value, column: &str) -> &'a str {
    row.get(column).and_then(Value::as_str).unwrap_or_default()
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(m) => m,
        _ => Map::new(),
    }
}

fn missing_id(table: &str) -> sqlx::Error {
    sqlx::Error::Protocol(format!("{} row returned without id", table))
}

/// The seed-relevant rows of one lab.
#[derive(Clone, Debug, Default)]
pub struct SeedSnapshot {
    pub role_id: Option<String>,
    /// Catalogue permissions present, by (module, action).
    pub permissions: HashMap<(String, String), String>,
    /// Permission ids granted to the admin role.
    pub granted: HashSet<String>,
    pub admin_exists: bool,
    pub settings_exists: bool,
}

impl SeedSnapshot {
    /// Build from rows as returned by the bindings. Permissions outside the catalogue are ignored.
    pub fn from_rows(
        role: Option<&Value>,
        permissions: &[Value],
        grants: &[Value],
        admin: Option<&Value>,
        settings: Option<&Value>,
    ) -> Self {
        let mut known = HashMap::new();
        for row in permissions {
            let (module, action) = (row_str(row, "module"), row_str(row, "action"));
            if !PERMISSION_MODULES.contains(&module) || !PERMISSION_ACTIONS.contains(&action) {
                continue;
            }
            if let Some(id) = row_id(row) {
                known.entry((module.to_string(), action.to_string())).or_insert(id);
            }
        }
        SeedSnapshot {
            role_id: role.and_then(row_id),
            permissions: known,
            granted: grants
                .iter()
                .map(|r| row_str(r, "permission_id").to_string())
                .filter(|id| !id.is_empty())
                .collect(),
            admin_exists: admin.is_some(),
            settings_exists: settings.is_some(),
        }
    }
}

/// Writes a seeding pass has to make.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeedPlan {
    pub create_role: bool,
    pub missing_permissions: Vec<(&'static str, &'static str)>,
    pub create_admin: bool,
    pub reset_grants: bool,
    pub create_settings: bool,
}

impl SeedPlan {
    pub fn is_empty(&self) -> bool {
        *self == SeedPlan::default()
    }
}

/// Decide what to write. A fully seeded lab yields an empty plan.
pub fn plan_seed(snapshot: &SeedSnapshot) -> SeedPlan {
    let missing_permissions: Vec<_> = permission_catalogue()
        .into_iter()
        .filter(|(m, a)| !snapshot.permissions.contains_key(&(m.to_string(), a.to_string())))
        .collect();
    let catalogue_ids: HashSet<String> = snapshot.permissions.values().cloned().collect();
    let reset_grants = snapshot.role_id.is_none()
        || !missing_permissions.is_empty()
        || needs_permission_reset(&snapshot.granted, &catalogue_ids);
    SeedPlan {
        create_role: snapshot.role_id.is_none(),
        missing_permissions,
        create_admin: !snapshot.admin_exists,
        reset_grants,
        create_settings: !snapshot.settings_exists,
    }
}

async fn read_snapshot(bindings: &EntityBindingSet) -> Result<SeedSnapshot, sqlx::Error> {
    let role = bindings.roles.find_by("name", &json!(ADMIN_ROLE)).await?;
    let permissions = bindings.permissions.list(&[], Some(1000), None).await?;
    let grants = match role.as_ref().and_then(row_id) {
        Some(role_id) => {
            let filter = [("role_id".to_string(), json!(role_id))];
            bindings.role_permissions.list(&filter, Some(1000), None).await?
        }
        None => Vec::new(),
    };
    let admin = bindings.staff.find_by("username", &json!(ADMIN_USERNAME)).await?;
    let settings = bindings.settings.find_by("key", &json!(SETTINGS_KEY)).await?;
    Ok(SeedSnapshot::from_rows(
        role.as_ref(),
        &permissions,
        &grants,
        admin.as_ref(),
        settings.as_ref(),
    ))
}

/// Seed the lab's defaults through its entity bindings. Runs strictly after schema sync.
pub async fn seed_defaults(
    bindings: &EntityBindingSet,
    lab_code: &str,
    admin_password: &str,
) -> Result<SeedReport, sqlx::Error> {
    let snapshot = read_snapshot(bindings).await?;
    let plan = plan_seed(&snapshot);
    if plan.is_empty() {
        return Ok(SeedReport::default());
    }
    apply_plan(bindings, lab_code, admin_password, snapshot, &plan).await
}

async fn apply_plan(
    bindings: &EntityBindingSet,
    lab_code: &str,
    admin_password: &str,
    snapshot: SeedSnapshot,
    plan: &SeedPlan,
) -> Result<SeedReport, sqlx::Error> {
    let mut report = SeedReport::default();

    let role_id = match snapshot.role_id {
        Some(id) => id,
        None => {
            let row = bindings
                .roles
                .create(&object(json!({ "name": ADMIN_ROLE, "description": "Full access" })))
                .await?;
            report.role_created = true;
            row_id(&row).ok_or_else(|| missing_id("roles"))?
        }
    };

    let mut permission_ids: HashSet<String> = snapshot.permissions.into_values().collect();
    for (module, action) in &plan.missing_permissions {
        let row = bindings
            .permissions
            .create(&object(json!({ "module": module, "action": action })))
            .await?;
        permission_ids.insert(row_id(&row).ok_or_else(|| missing_id("permissions"))?);
        report.permissions_created += 1;
    }

    if plan.create_admin {
        bindings
            .staff
            .create(&object(json!({
                "username": ADMIN_USERNAME,
                "email": admin_email(lab_code),
                "display_name": "Administrator",
                "password_hash": hash_password(admin_password),
                "role_id": role_id,
                "is_active": true,
            })))
            .await?;
        report.admin_created = true;
        tracing::info!(lab_code = %lab_code, "created default admin account");
    }

    if plan.reset_grants {
        let role_filter = [("role_id".to_string(), json!(role_id))];
        let mut tx = bindings.pool().begin().await?;
        bindings.role_permissions.delete_where_in(&mut *tx, &role_filter).await?;
        for permission_id in &permission_ids {
            bindings
                .role_permissions
                .create_in(&mut *tx, &object(json!({ "role_id": role_id, "permission_id": permission_id })))
                .await?;
        }
        tx.commit().await?;
        report.permissions_reset = true;
        tracing::info!(lab_code = %lab_code, grants = permission_ids.len(), "reset admin role permissions");
    }

    if plan.create_settings {
        bindings
            .settings
            .create(&object(json!({ "key": SETTINGS_KEY, "value": { "code": lab_code } })))
            .await?;
        report.settings_created = true;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_covers_every_module_action_pair_once() {
        let catalogue = permission_catalogue();
        assert_eq!(catalogue.len(), PERMISSION_MODULES.len() * PERMISSION_ACTIONS.len());
        let unique: HashSet<_> = catalogue.iter().collect();
        assert_eq!(unique.len(), catalogue.len());
        assert!(catalogue.contains(&("reports", "edit")));
    }

    #[test]
    fn partial_or_extra_grants_trigger_reset() {
        let all: HashSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let partial: HashSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let extra: HashSet<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        assert!(needs_permission_reset(&partial, &all));
        assert!(needs_permission_reset(&extra, &all));
        assert!(!needs_permission_reset(&all.clone(), &all));
    }

    #[test]
    fn password_hash_round_trips_and_is_salted() {
        let a = hash_password("admin123");
        let b = hash_password("admin123");
        assert_ne!(a, b);
        assert!(a.starts_with("pbkdf2$100000$"));
        assert!(verify_password("admin123", &a));
        assert!(!verify_password("admin124", &a));
        assert!(!verify_password("admin123", "plain"));
    }

    /// Rows of one lab, changed the way `apply_plan` changes the database.
    #[derive(Default)]
    struct LabRows {
        role: Option<Value>,
        permissions: Vec<Value>,
        grants: Vec<Value>,
        admin: Option<Value>,
        settings: Option<Value>,
        next_id: usize,
    }

    impl LabRows {
        fn id(&mut self) -> String {
            self.next_id += 1;
            format!("00000000-0000-0000-0000-{:012}", self.next_id)
        }

        fn snapshot(&self) -> SeedSnapshot {
            SeedSnapshot::from_rows(
                self.role.as_ref(),
                &self.permissions,
                &self.grants,
                self.admin.as_ref(),
                self.settings.as_ref(),
            )
        }

        fn apply(&mut self, plan: &SeedPlan) {
            if plan.create_role {
                let id = self.id();
                self.role = Some(json!({ "id": id, "name": ADMIN_ROLE }));
            }
            let role_id = row_id(self.role.as_ref().unwrap()).unwrap();
            for (module, action) in &plan.missing_permissions {
                let id = self.id();
                self.permissions.push(json!({ "id": id, "module": module, "action": action }));
            }
            if plan.create_admin {
                let id = self.id();
                self.admin = Some(json!({ "id": id, "username": ADMIN_USERNAME }));
            }
            if plan.reset_grants {
                self.grants = self
                    .snapshot()
                    .permissions
                    .values()
                    .map(|p| json!({ "role_id": role_id, "permission_id": p }))
                    .collect();
            }
            if plan.create_settings {
                self.settings = Some(json!({ "key": SETTINGS_KEY }));
            }
        }
    }

    #[test]
    fn empty_lab_plans_every_default() {
        let plan = plan_seed(&SeedSnapshot::default());
        assert!(plan.create_role);
        assert_eq!(plan.missing_permissions.len(), permission_catalogue().len());
        assert!(plan.create_admin);
        assert!(plan.reset_grants);
        assert!(plan.create_settings);
    }

    #[test]
    fn second_seeding_pass_plans_nothing() {
        let mut lab = LabRows::default();
        let first = plan_seed(&lab.snapshot());
        assert!(!first.is_empty());
        lab.apply(&first);

        let second = plan_seed(&lab.snapshot());
        assert!(second.is_empty(), "{second:?}");
        assert_eq!(lab.permissions.len(), permission_catalogue().len());
        assert_eq!(lab.grants.len(), permission_catalogue().len());
    }

    #[test]
    fn lost_grant_only_resets_grants() {
        let mut lab = LabRows::default();
        lab.apply(&plan_seed(&lab.snapshot()));
        lab.grants.pop();

        let plan = plan_seed(&lab.snapshot());
        assert_eq!(
            plan,
            SeedPlan {
                reset_grants: true,
                ..SeedPlan::default()
            }
        );
        lab.apply(&plan);
        assert!(plan_seed(&lab.snapshot()).is_empty());
    }

    #[test]
    fn foreign_permissions_are_ignored_but_foreign_grants_are_not() {
        let mut lab = LabRows::default();
        lab.apply(&plan_seed(&lab.snapshot()));
        lab.permissions
            .push(json!({ "id": "00000000-0000-0000-0000-999999999999", "module": "inventory", "action": "view" }));
        assert!(plan_seed(&lab.snapshot()).is_empty());

        let role_id = row_id(lab.role.as_ref().unwrap()).unwrap();
        lab.grants
            .push(json!({ "role_id": role_id, "permission_id": "00000000-0000-0000-0000-999999999999" }));
        assert!(plan_seed(&lab.snapshot()).reset_grants);
    }

    #[test]
    fn recreated_role_gets_grants_for_existing_permissions() {
        let mut lab = LabRows::default();
        lab.apply(&plan_seed(&lab.snapshot()));
        lab.role = None;
        lab.grants.clear();

        let plan = plan_seed(&lab.snapshot());
        assert!(plan.create_role);
        assert!(plan.reset_grants);
        assert!(plan.missing_permissions.is_empty());
        assert!(!plan.create_admin);
    }

    #[test]
    fn admin_email_is_lowercased() {
        assert_eq!(admin_email("ACME01"), "admin@acme01.lab");
    }

    #[test]
    fn empty_report_means_nothing_changed() {
        assert!(!SeedReport::default().changed_anything());
        let r = SeedReport {
            admin_created: true,
            ..Default::default()
        };
        assert!(r.changed_anything());
    }

    /// Runs against the database named by `LAB_TEST_DATABASE_URL`; the database is modified.
    #[tokio::test]
    #[ignore = "needs a scratch PostgreSQL database in LAB_TEST_DATABASE_URL"]
    async fn sync_and_seed_twice_against_postgres() {
        use crate::entity::bind_entities;
        use crate::schema::{lab_schema, synchronize_schema};

        let Ok(url) = std::env::var("LAB_TEST_DATABASE_URL") else {
            return;
        };
        let pool = sqlx::PgPool::connect(&url).await.unwrap();
        synchronize_schema(&pool, lab_schema()).await.unwrap();
        synchronize_schema(&pool, lab_schema()).await.unwrap();

        let bindings = bind_entities(&pool, lab_schema()).unwrap();
        seed_defaults(&bindings, "ACME01", "admin123").await.unwrap();
        let second = seed_defaults(&bindings, "ACME01", "admin123").await.unwrap();
        assert!(!second.changed_anything(), "{second:?}");

        let admin_filter = [("username".to_string(), json!(ADMIN_USERNAME))];
        assert_eq!(bindings.staff.count_where(&admin_filter).await.unwrap(), 1);
        let admin = bindings.staff.find_by("username", &json!(ADMIN_USERNAME)).await.unwrap().unwrap();
        assert!(verify_password("admin123", row_str(&admin, "password_hash")));

        let role = bindings.roles.find_by("name", &json!(ADMIN_ROLE)).await.unwrap().unwrap();
        let role_filter = [("role_id".to_string(), json!(row_id(&role).unwrap()))];
        assert_eq!(
            bindings.role_permissions.count_where(&role_filter).await.unwrap(),
            permission_catalogue().len() as i64
        );
        pool.close().await;
    }
}
