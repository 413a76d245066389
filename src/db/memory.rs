//! In-process backend with the observable semantics of the managed service:
//! schema-addressed tables, the named procedures the console calls, a
//! password auth store and object storage. Used by the test-suite.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::query::{Query, TableRef, SHARED_SCHEMA};
use super::tenant::{TenantMigration, OWNER_POLICY};
use super::Backend;
use crate::error::{Error, Result, NO_ROWS_CODE};
use crate::models::auth::{AuthEvent, AuthSession, Principal};
use crate::models::storage::StoredObject;

struct MemoryUser {
    principal: Principal,
    password: String,
}

#[derive(Default)]
struct MemoryState {
    users: Vec<MemoryUser>,
    session: Option<AuthSession>,
    schemas: BTreeSet<String>,
    tables: HashMap<TableRef, Vec<Value>>,
    rls: HashSet<TableRef>,
    policies: BTreeSet<(TableRef, String)>,
    objects: HashMap<(String, String), (Bytes, String)>,
    failing_rpcs: HashSet<String>,
    offline: bool,
    fail_sign_out: bool,
    /// The refresh token of the current session is no longer accepted.
    refresh_revoked: bool,
    last_timestamp: Option<DateTime<Utc>>,
    executed_sql: Vec<String>,
}

impl MemoryState {
    /// Strictly increasing timestamps so `created_at` ordering is stable.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        now
    }

    fn check_online(&self) -> Result<()> {
        if self.offline {
            return Err(Error::Network("connection refused".into()));
        }
        Ok(())
    }

    fn check_target(&self, target: &TableRef) -> Result<()> {
        if target.is_shared() {
            return Ok(());
        }
        if !self.schemas.contains(&target.schema) {
            return Err(Error::from_backend(
                406,
                Some("PGRST106"),
                &format!("The schema must be one of the following: {SHARED_SCHEMA}"),
            ));
        }
        if !self.tables.contains_key(target) {
            return Err(Error::from_backend(
                404,
                Some("42P01"),
                &format!("relation \"{target}\" does not exist"),
            ));
        }
        Ok(())
    }

    fn rows(&self, target: &TableRef) -> &[Value] {
        self.tables.get(target).map(Vec::as_slice).unwrap_or_default()
    }

    fn insert_row(&mut self, target: &TableRef, row: Value) -> Result<Value> {
        self.check_target(target)?;
        let Value::Object(mut obj) = row else {
            return Err(Error::InvalidInput("row must be a JSON object".into()));
        };
        let now = self.next_timestamp();
        obj.entry("id").or_insert_with(|| json!(Uuid::new_v4()));
        obj.entry("created_at").or_insert_with(|| json!(now));
        let row = Value::Object(obj);
        self.tables.entry(target.clone()).or_default().push(row.clone());
        Ok(row)
    }

    fn apply_ddl(&mut self, sql: &str) -> Result<()> {
        let ops = parse_ddl(sql);
        if ops.is_empty() {
            return Err(Error::from_backend(400, Some("42601"), "unsupported statement"));
        }
        // The script runs in one transaction: validate before touching state.
        let mut known: HashSet<&str> = self.schemas.iter().map(String::as_str).collect();
        for op in &ops {
            match op {
                Ddl::CreateSchema(schema) => {
                    known.insert(schema);
                }
                Ddl::CreateTable(target) if !target.is_shared() && !known.contains(target.schema.as_str()) => {
                    return Err(Error::from_backend(
                        400,
                        Some("3F000"),
                        &format!("schema \"{}\" does not exist", target.schema),
                    ));
                }
                _ => {}
            }
        }
        for op in ops {
            match op {
                Ddl::CreateSchema(schema) => {
                    self.schemas.insert(schema);
                }
                Ddl::CreateTable(target) => {
                    self.tables.entry(target).or_default();
                }
                Ddl::EnableRls(target) => {
                    self.rls.insert(target);
                }
                Ddl::CreatePolicy(target, name) => {
                    self.policies.insert((target, name));
                }
                Ddl::DropSchema(schema) => {
                    self.schemas.remove(&schema);
                    self.tables.retain(|t, _| t.schema != schema);
                    self.rls.retain(|t| t.schema != schema);
                    self.policies.retain(|(t, _)| t.schema != schema);
                }
            }
        }
        self.executed_sql.push(sql.to_string());
        Ok(())
    }

    fn tenant_tables(&self) -> Vec<&TableRef> {
        let mut tables: Vec<&TableRef> = self.tables.keys().filter(|t| !t.is_shared()).collect();
        tables.sort_by(|a, b| (&a.schema, &a.table).cmp(&(&b.schema, &b.table)));
        tables
    }
}

pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            state: Mutex::new(MemoryState::default()),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: AuthEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn add_user(&self, email: &str, password: &str, metadata: Value) -> Principal {
        let principal = Principal {
            id: Uuid::new_v4(),
            email: email.to_lowercase(),
            metadata,
        };
        self.state().users.push(MemoryUser {
            principal: principal.clone(),
            password: password.to_string(),
        });
        principal
    }

    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        let mut state = self.state();
        let target = TableRef::shared(table);
        for row in rows {
            // Shared tables always accept inserts.
            let _ = state.insert_row(&target, row);
        }
    }

    pub fn rows(&self, target: &TableRef) -> Vec<Value> {
        self.state().rows(target).to_vec()
    }

    /// Sorted table names present in a schema.
    pub fn tables_in(&self, schema: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .state()
            .tables
            .keys()
            .filter(|t| t.schema == schema)
            .map(|t| t.table.clone())
            .collect();
        names.sort();
        names
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.state().executed_sql.clone()
    }

    pub fn fail_rpc(&self, name: &str) {
        self.state().failing_rpcs.insert(name.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn fail_sign_out(&self, fail: bool) {
        self.state().fail_sign_out = fail;
    }

    /// Ends the current session on the backend side, as a sign-out from
    /// another device would. The next refresh is refused.
    pub fn revoke_session(&self) {
        self.state().refresh_revoked = true;
    }

    fn new_session(principal: Principal) -> AuthSession {
        AuthSession {
            access_token: format!("mem-access-{}", Uuid::new_v4()),
            refresh_token: format!("mem-refresh-{}", Uuid::new_v4()),
            expires_at: Utc::now() + Duration::hours(1),
            principal,
        }
    }

    fn run_rpc(&self, function: &str, args: &Value) -> Result<Value> {
        let mut state = self.state();
        state.check_online()?;
        if state.failing_rpcs.contains(function) {
            return Err(Error::from_backend(500, Some("P0001"), &format!("{function} failed")));
        }
        let arg = |name: &str| -> Result<String> {
            args.get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::from_backend(400, Some("PGRST102"), &format!("missing argument {name}")))
        };

        match function {
            "execute_sql" => {
                let sql = arg("sql")?;
                state.apply_ddl(&sql)?;
                Ok(Value::Null)
            }
            "create_tenant_schema" => {
                let schema = arg("schema_name")?;
                let trainer_id = arg("trainer_id")?;
                let sql = TenantMigration::standard().render(&schema, &trainer_id);
                state.apply_ddl(&sql)?;
                Ok(json!(true))
            }
            "is_superadmin" => {
                let user_id = arg("user_id")?;
                let query = Query::table("superadmins").eq("id", user_id);
                let found = !query.apply(state.rows(&TableRef::shared("superadmins"))).is_empty();
                Ok(json!(found))
            }
            "get_schemas_info" => {
                let rows: Vec<Value> = state
                    .schemas
                    .iter()
                    .map(|s| {
                        let count = state.tables.keys().filter(|t| &t.schema == s).count();
                        json!({ "schema_name": s, "table_count": count })
                    })
                    .collect();
                Ok(Value::Array(rows))
            }
            "get_tables_info" => {
                let rows: Vec<Value> = state
                    .tenant_tables()
                    .into_iter()
                    .map(|t| {
                        json!({
                            "schema_name": t.schema,
                            "table_name": t.table,
                            "rls_enabled": state.rls.contains(t),
                        })
                    })
                    .collect();
                Ok(Value::Array(rows))
            }
            "get_policies_info" => {
                let rows: Vec<Value> = state
                    .policies
                    .iter()
                    .map(|(t, name)| {
                        json!({
                            "schema_name": t.schema,
                            "table_name": t.table,
                            "policy_name": name,
                            "command": "ALL",
                        })
                    })
                    .collect();
                Ok(Value::Array(rows))
            }
            "create_missing_policies" => {
                let missing: Vec<TableRef> = state
                    .tenant_tables()
                    .into_iter()
                    .filter(|t| !state.policies.contains(&((*t).clone(), OWNER_POLICY.to_string())))
                    .cloned()
                    .collect();
                for t in &missing {
                    state.rls.insert(t.clone());
                    state.policies.insert((t.clone(), OWNER_POLICY.to_string()));
                }
                Ok(json!(missing.len()))
            }
            "add_player_to_trainer_schema" => {
                let target = TableRef::in_schema(&arg("schema_name")?, "players");
                let row = json!({
                    "id": arg("player_id")?,
                    "name": arg("player_name")?,
                    "email": arg("player_email")?,
                });
                state.insert_row(&target, row)
            }
            other => Err(Error::from_backend(
                404,
                Some("PGRST202"),
                &format!("Could not find the function public.{other}"),
            )),
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let session = {
            let mut state = self.state();
            state.check_online()?;
            let principal = state
                .users
                .iter()
                .find(|u| u.principal.email.eq_ignore_ascii_case(email) && u.password == password)
                .map(|u| u.principal.clone())
                .ok_or(Error::InvalidCredentials)?;
            let session = Self::new_session(principal);
            state.session = Some(session.clone());
            state.refresh_revoked = false;
            session
        };
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        {
            let mut state = self.state();
            state.check_online()?;
            if state.fail_sign_out {
                return Err(Error::from_backend(500, Some("unexpected_failure"), "sign-out failed"));
            }
            state.session = None;
        }
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn current_session(&self) -> Result<Option<AuthSession>> {
        let state = self.state();
        state.check_online()?;
        Ok(state.session.clone())
    }

    async fn refresh_session(&self) -> Result<AuthSession> {
        let session = {
            let mut state = self.state();
            state.check_online()?;
            let current = state.session.clone().ok_or(Error::Unauthenticated)?;
            if state.refresh_revoked {
                state.session = None;
                drop(state);
                self.emit(AuthEvent::SignedOut);
                return Err(Error::Unauthenticated);
            }
            let session = Self::new_session(current.principal);
            state.session = Some(session.clone());
            session
        };
        self.emit(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    async fn create_principal(&self, email: &str, password: &str, metadata: Value) -> Result<Principal> {
        {
            let state = self.state();
            state.check_online()?;
            if state.users.iter().any(|u| u.principal.email.eq_ignore_ascii_case(email)) {
                return Err(Error::from_backend(422, Some("user_already_exists"), "User already registered"));
            }
        }
        Ok(self.add_user(email, password, metadata))
    }

    async fn update_user_metadata(&self, metadata: Value) -> Result<Principal> {
        let principal = {
            let mut state = self.state();
            state.check_online()?;
            let session = state.session.as_mut().ok_or(Error::Unauthenticated)?;
            let mut merged = match session.principal.metadata.take() {
                Value::Object(m) => m,
                _ => Map::new(),
            };
            if let Value::Object(patch) = metadata {
                merged.extend(patch);
            }
            session.principal.metadata = Value::Object(merged);
            let principal = session.principal.clone();
            if let Some(user) = state.users.iter_mut().find(|u| u.principal.id == principal.id) {
                user.principal = principal.clone();
            }
            principal
        };
        self.emit(AuthEvent::UserUpdated(principal.clone()));
        Ok(principal)
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        let state = self.state();
        state.check_online()?;
        state.check_target(&query.target)?;
        Ok(query.apply(state.rows(&query.target)))
    }

    async fn select_single(&self, query: &Query) -> Result<Value> {
        let mut rows = self.select(query).await?;
        if rows.len() != 1 {
            return Err(Error::from_backend(
                406,
                Some(NO_ROWS_CODE),
                "JSON object requested, multiple (or no) rows returned",
            ));
        }
        Ok(rows.remove(0))
    }

    async fn insert(&self, target: &TableRef, row: Value) -> Result<Value> {
        let mut state = self.state();
        state.check_online()?;
        state.insert_row(target, row)
    }

    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>> {
        let mut state = self.state();
        state.check_online()?;
        state.check_target(&query.target)?;
        let Value::Object(patch) = patch else {
            return Err(Error::InvalidInput("patch must be a JSON object".into()));
        };
        let now = state.next_timestamp();
        let mut updated = Vec::new();
        if let Some(rows) = state.tables.get_mut(&query.target) {
            for row in rows.iter_mut().filter(|r| query.matches(r)) {
                if let Value::Object(obj) = row {
                    obj.extend(patch.clone());
                    obj.insert("updated_at".into(), json!(now));
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, query: &Query) -> Result<Vec<Value>> {
        let mut state = self.state();
        state.check_online()?;
        state.check_target(&query.target)?;
        let mut removed = Vec::new();
        if let Some(rows) = state.tables.get_mut(&query.target) {
            let (gone, kept): (Vec<Value>, Vec<Value>) = rows.drain(..).partition(|r| query.matches(r));
            *rows = kept;
            removed = gone;
        }
        Ok(removed)
    }

    async fn rpc(&self, function: &str, args: Value) -> Result<Value> {
        self.run_rpc(function, &args)
    }

    async fn upload(&self, bucket: &str, path: &str, body: Bytes, content_type: &str) -> Result<()> {
        let mut state = self.state();
        state.check_online()?;
        state
            .objects
            .insert((bucket.to_string(), path.to_string()), (body, content_type.to_string()));
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://storage/public/{bucket}/{path}")
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<StoredObject>> {
        let state = self.state();
        state.check_online()?;
        let mut objects: Vec<StoredObject> = state
            .objects
            .iter()
            .filter(|((b, p), _)| b == bucket && p.starts_with(prefix))
            .map(|((b, p), (body, ct))| StoredObject {
                bucket: b.clone(),
                path: p.clone(),
                public_url: self.public_url(b, p),
                size_bytes: Some(body.len() as u64),
                content_type: Some(ct.clone()),
            })
            .collect();
        objects.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(objects)
    }

    async fn ping(&self) -> Result<()> {
        self.state().check_online()
    }
}

enum Ddl {
    CreateSchema(String),
    CreateTable(TableRef),
    EnableRls(TableRef),
    CreatePolicy(TableRef, String),
    DropSchema(String),
}

/// Recognises the DDL the tenant migration emits. Anything else in the
/// script is accepted and ignored.
fn parse_ddl(sql: &str) -> Vec<Ddl> {
    const MARKERS: [&str; 5] = [
        "CREATE SCHEMA IF NOT EXISTS ",
        "CREATE TABLE IF NOT EXISTS ",
        "ALTER TABLE ",
        "CREATE POLICY ",
        "DROP SCHEMA IF EXISTS ",
    ];

    let mut found: Vec<(usize, Ddl)> = Vec::new();
    for marker in MARKERS {
        for (pos, _) in sql.match_indices(marker) {
            let rest = &sql[pos + marker.len()..];
            let op = match marker {
                "CREATE SCHEMA IF NOT EXISTS " => parse_ident(rest).map(|(s, _)| Ddl::CreateSchema(s)),
                "CREATE TABLE IF NOT EXISTS " => parse_qualified(rest).map(|(t, _)| Ddl::CreateTable(t)),
                "ALTER TABLE " => parse_qualified(rest)
                    .filter(|(_, tail)| tail.trim_start().starts_with("ENABLE ROW LEVEL SECURITY"))
                    .map(|(t, _)| Ddl::EnableRls(t)),
                "CREATE POLICY " => parse_ident(rest).and_then(|(name, tail)| {
                    let tail = tail.trim_start().strip_prefix("ON ")?;
                    parse_qualified(tail).map(|(t, _)| Ddl::CreatePolicy(t, name))
                }),
                _ => parse_ident(rest).map(|(s, _)| Ddl::DropSchema(s)),
            };
            if let Some(op) = op {
                found.push((pos, op));
            }
        }
    }
    found.sort_by_key(|(pos, _)| *pos);
    found.into_iter().map(|(_, op)| op).collect()
}

fn parse_ident(s: &str) -> Option<(String, &str)> {
    if let Some(body) = s.strip_prefix('"') {
        let mut out = String::new();
        let mut chars = body.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '"' {
                if matches!(chars.peek(), Some((_, '"'))) {
                    out.push('"');
                    chars.next();
                } else {
                    return Some((out, &body[i + 1..]));
                }
            } else {
                out.push(c);
            }
        }
        None
    } else {
        let end = s
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(s.len());
        (end > 0).then(|| (s[..end].to_lowercase(), &s[end..]))
    }
}

fn parse_qualified(s: &str) -> Option<(TableRef, &str)> {
    let (first, rest) = parse_ident(s)?;
    match rest.strip_prefix('.') {
        Some(rest) => {
            let (table, rest) = parse_ident(rest)?;
            Some((TableRef::in_schema(&first, &table), rest))
        }
        None => Some((TableRef::shared(&first), rest)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ddl_parser_reads_quoted_identifiers() {
        let ops = parse_ddl(
            "CREATE SCHEMA IF NOT EXISTS \"trainer_a\";\nCREATE TABLE IF NOT EXISTS \"trainer_a\".\"players\" (id UUID);\nDROP SCHEMA IF EXISTS \"odd\"\"name\" CASCADE",
        );
        assert_eq!(ops.len(), 3);
        assert!(matches!(&ops[0], Ddl::CreateSchema(s) if s == "trainer_a"));
        assert!(matches!(&ops[1], Ddl::CreateTable(t) if t.table == "players" && t.schema == "trainer_a"));
        assert!(matches!(&ops[2], Ddl::DropSchema(s) if s == "odd\"name"));
    }

    #[tokio::test]
    async fn unknown_schema_is_rejected() {
        let backend = MemoryBackend::new();
        let err = backend
            .select(&Query::new(TableRef::in_schema("trainer_nobody", "players")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend { ref code, .. } if code == "PGRST106"));
    }

    #[tokio::test]
    async fn single_row_reads_distinguish_no_rows() {
        let backend = MemoryBackend::new();
        backend.seed("ads", vec![json!({ "slot": "home", "title": "A" })]);

        let found = backend.select_single(&Query::table("ads").eq("slot", "home")).await.unwrap();
        assert_eq!(found["title"], "A");

        let err = backend.select_single(&Query::table("ads").eq("slot", "footer")).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
