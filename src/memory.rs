//! In-memory backend for tests and offline demos.
//!
//! Mirrors the hosted service closely enough for the apps: identities and
//! sessions, JSON tables with filters, and a change feed that fires on
//! every write.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::auth::{AuthChangeEvent, AuthStateChange, Session, SessionStore, SignUpResponse, User};
use crate::backend::Backend;
use crate::error::Error;
use crate::postgrest::Filter;
use crate::realtime::{ChangeCallback, ChangeEvent, ChangeKind, ChannelHandle, ChannelSpec};

/// Operations that can be made to fail with [`MemoryBackend::fail_next`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    SignUp,
    SignIn,
    Select,
    Insert,
    Update,
    Delete,
    Subscribe,
}

#[derive(Debug)]
struct Failure {
    op: Op,
    table: Option<String>,
    message: String,
}

#[derive(Default)]
struct State {
    /// email -> (password, user)
    users: HashMap<String, (String, User)>,
    tables: HashMap<String, Vec<Value>>,
    selects: HashMap<String, usize>,
    failures: Vec<Failure>,
    require_email_confirmation: bool,
    next_row_id: i64,
}

/// In-memory [`Backend`]
pub struct MemoryBackend {
    state: Mutex<State>,
    store: SessionStore,
    channels: RwLock<HashMap<u64, (ChannelSpec, ChangeCallback)>>,
    next_channel: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_row_id: 1,
                ..Default::default()
            }),
            store: SessionStore::new(),
            channels: RwLock::new(HashMap::new()),
            next_channel: AtomicU64::new(1),
        }
    }

    // Poisoning is ignored: no write leaves `State` half-updated.
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_channels(&self) -> RwLockReadGuard<'_, HashMap<u64, (ChannelSpec, ChangeCallback)>> {
        self.channels.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_channels(&self) -> RwLockWriteGuard<'_, HashMap<u64, (ChannelSpec, ChangeCallback)>> {
        self.channels.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sign-ups create the identity but open no session
    pub fn require_email_confirmation(&self, value: bool) {
        self.lock_state().require_email_confirmation = value;
    }

    /// Create an identity without a profile row
    pub fn create_user(&self, email: &str, password: &str) -> User {
        let user = User::new(&Uuid::new_v4().to_string(), email);
        self.lock_state()
            .users
            .insert(email.to_string(), (password.to_string(), user.clone()));
        user
    }

    /// Put rows into a table without emitting changes
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        let mut state = self.lock_state();
        if let Some(max) = rows.iter().filter_map(|row| row["id"].as_i64()).max() {
            state.next_row_id = state.next_row_id.max(max + 1);
        }
        state.tables.entry(table.to_string()).or_default().extend(rows);
    }

    /// Current rows of a table
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock_state()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// How many selects hit `table` so far
    pub fn select_count(&self, table: &str) -> usize {
        self.lock_state()
            .selects
            .get(table)
            .copied()
            .unwrap_or(0)
    }

    /// Make the next `op` (on `table`, if given) fail with `message`
    pub fn fail_next(&self, op: Op, table: Option<&str>, message: &str) {
        self.lock_state().failures.push(Failure {
            op,
            table: table.map(str::to_string),
            message: message.to_string(),
        });
    }

    /// Mark the current session as expired
    pub fn expire_session(&self) {
        if let Some(mut session) = self.store.get() {
            session.expires_at = Some(0);
            self.store.set(AuthChangeEvent::TokenRefreshed, session);
        }
    }

    /// Number of live channel subscriptions
    pub fn channel_count(&self) -> usize {
        self.read_channels().len()
    }

    /// Simulate a write made by someone else
    pub fn emit_change(&self, table: &str, kind: ChangeKind) {
        self.emit(ChangeEvent::new(table, kind));
    }

    fn emit(&self, event: ChangeEvent) {
        // Held across the callbacks so that an unsubscribe waits for them.
        let channels = self.read_channels();
        for (spec, callback) in channels.values() {
            if spec.matches(&event) {
                callback(event.clone());
            }
        }
    }

    fn take_failure(&self, op: Op, table: Option<&str>) -> Option<String> {
        let mut state = self.lock_state();
        let index = state.failures.iter().position(|f| {
            f.op == op && (f.table.is_none() || f.table.as_deref() == table)
        })?;
        Some(state.failures.remove(index).message)
    }

    fn check(&self, op: Op, table: &str) -> Result<(), Error> {
        match self.take_failure(op, Some(table)) {
            Some(message) => Err(Error::Database(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpResponse, Error> {
        if let Some(message) = self.take_failure(Op::SignUp, None) {
            return Err(Error::Auth(message));
        }
        let (user, confirm) = {
            let state = self.lock_state();
            if state.users.contains_key(email) {
                return Err(Error::auth("User already registered"));
            }
            (User::new(&Uuid::new_v4().to_string(), email), state.require_email_confirmation)
        };
        self.lock_state()
            .users
            .insert(email.to_string(), (password.to_string(), user.clone()));

        let session = if confirm {
            None
        } else {
            let session = Session::new(&Uuid::new_v4().to_string(), "refresh", user.clone(), 3600);
            self.store.set(AuthChangeEvent::SignedIn, session.clone());
            Some(session)
        };
        Ok(SignUpResponse {
            user: Some(user),
            session,
        })
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, Error> {
        if let Some(message) = self.take_failure(Op::SignIn, None) {
            return Err(Error::Auth(message));
        }
        let user = match self.lock_state().users.get(email) {
            Some((stored, user)) if stored == password => user.clone(),
            _ => return Err(Error::auth("Invalid login credentials")),
        };
        let session = Session::new(&Uuid::new_v4().to_string(), "refresh", user, 3600);
        self.store.set(AuthChangeEvent::SignedIn, session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), Error> {
        self.store.clear();
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>, Error> {
        match self.store.get() {
            Some(session) if session.is_expired() => {
                self.store.clear();
                Ok(None)
            }
            other => Ok(other),
        }
    }

    fn session_changes(&self) -> watch::Receiver<Option<Session>> {
        self.store.watch()
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthStateChange> {
        self.store.events()
    }

    async fn select(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>, Error> {
        let mut state = self.lock_state();
        *state.selects.entry(table.to_string()).or_default() += 1;
        drop(state);
        self.check(Op::Select, table)?;

        let state = self.lock_state();
        Ok(state
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filters.iter().all(|f| f.matches(row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, table: &str, record: Value) -> Result<Vec<Value>, Error> {
        self.check(Op::Insert, table)?;
        let records = match record {
            Value::Array(records) => records,
            single => vec![single],
        };

        let mut inserted = Vec::new();
        {
            let mut state = self.lock_state();
            for mut row in records {
                if !row.is_object() {
                    return Err(Error::database("inserted record must be an object"));
                }
                if row.get("id").map_or(true, Value::is_null) {
                    row["id"] = json!(state.next_row_id);
                    state.next_row_id += 1;
                }
                let rows = state.tables.entry(table.to_string()).or_default();
                let id = row["id"].clone();
                if rows.iter().any(|existing| existing["id"] == id) {
                    return Err(Error::database(format!(
                        "duplicate key value violates unique constraint \"{}_pkey\"",
                        table
                    )));
                }
                rows.push(row.clone());
                inserted.push(row);
            }
        }

        for row in &inserted {
            let mut event = ChangeEvent::new(table, ChangeKind::Insert);
            event.record = Some(row.clone());
            self.emit(event);
        }
        Ok(inserted)
    }

    async fn update(&self, table: &str, patch: Value, filters: &[Filter]) -> Result<Vec<Value>, Error> {
        self.check(Op::Update, table)?;
        let patch = match patch {
            Value::Object(map) => map,
            _ => return Err(Error::database("update patch must be an object")),
        };

        let mut changed = Vec::new();
        {
            let mut state = self.lock_state();
            if let Some(rows) = state.tables.get_mut(table) {
                for row in rows.iter_mut().filter(|row| filters.iter().all(|f| f.matches(row))) {
                    let old = row.clone();
                    if let Value::Object(fields) = row {
                        for (key, value) in &patch {
                            fields.insert(key.clone(), value.clone());
                        }
                    }
                    changed.push((old, row.clone()));
                }
            }
        }

        for (old, new) in &changed {
            let mut event = ChangeEvent::new(table, ChangeKind::Update);
            event.record = Some(new.clone());
            event.old_record = Some(old.clone());
            self.emit(event);
        }
        Ok(changed.into_iter().map(|(_, new)| new).collect())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<(), Error> {
        self.check(Op::Delete, table)?;
        let removed: Vec<Value> = {
            let mut state = self.lock_state();
            match state.tables.get_mut(table) {
                Some(rows) => {
                    let (gone, kept): (Vec<Value>, Vec<Value>) = rows
                        .drain(..)
                        .partition(|row| filters.iter().all(|f| f.matches(row)));
                    *rows = kept;
                    gone
                }
                None => Vec::new(),
            }
        };

        for row in removed {
            let mut event = ChangeEvent::new(table, ChangeKind::Delete);
            event.old_record = Some(row);
            self.emit(event);
        }
        Ok(())
    }

    async fn subscribe(&self, spec: ChannelSpec, callback: ChangeCallback) -> Result<ChannelHandle, Error> {
        if let Some(message) = self.take_failure(Op::Subscribe, None) {
            return Err(Error::Realtime(message));
        }
        let id = self.next_channel.fetch_add(1, Ordering::SeqCst);
        let topic = spec.topic();
        self.write_channels().insert(id, (spec, callback));
        Ok(ChannelHandle { id, topic })
    }

    async fn unsubscribe(&self, handle: &ChannelHandle) -> Result<(), Error> {
        self.write_channels().remove(&handle.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::TableBinding;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn writes_emit_changes_to_matching_channels() {
        let backend = MemoryBackend::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let handle = backend
            .subscribe(
                ChannelSpec::new("test").on(TableBinding::all("courses")),
                Arc::new(move |_: ChangeEvent| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        backend.insert("courses", json!({"title": "A"})).await.unwrap();
        backend.insert("profiles", json!({"role": "student"})).await.unwrap();
        backend
            .update("courses", json!({"title": "B"}), &[Filter::eq("id", 1)])
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        backend.unsubscribe(&handle).await.unwrap();
        backend.delete("courses", &[Filter::eq("id", 1)]).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(backend.rows("courses").is_empty());
    }

    #[tokio::test]
    async fn select_filters_and_counts() {
        let backend = MemoryBackend::new();
        backend.seed(
            "profiles",
            vec![
                json!({"id": "a", "role": "admin"}),
                json!({"id": "b", "role": "student"}),
            ],
        );
        let rows = backend
            .select("profiles", &[Filter::eq("role", "student")])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(backend.select_count("profiles"), 1);

        backend.fail_next(Op::Select, Some("profiles"), "boom");
        assert!(backend.select("profiles", &[]).await.is_err());
        assert!(backend.select("profiles", &[]).await.is_ok());
    }

    #[test]
    fn poisoned_lock_does_not_cascade() {
        let backend = Arc::new(MemoryBackend::new());
        let holder = backend.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.state.lock().unwrap();
            panic!("test panicked while holding the state");
        })
        .join();
        assert!(backend.state.is_poisoned());

        backend.seed("courses", vec![json!({"id": 1})]);
        assert_eq!(backend.rows("courses").len(), 1);
        backend.create_user("a@b.io", "pw");
    }

    #[tokio::test]
    async fn auth_round_trip() {
        let backend = MemoryBackend::new();
        backend.sign_up("a@b.io", "pw").await.unwrap();
        assert!(backend.get_session().await.unwrap().is_some());

        backend.sign_out().await.unwrap();
        assert!(backend.session_changes().borrow().is_none());

        let err = backend.sign_in_with_password("a@b.io", "nope").await.unwrap_err();
        assert_eq!(err.user_message(), "Invalid login credentials");

        backend.sign_in_with_password("a@b.io", "pw").await.unwrap();
        backend.expire_session();
        assert!(backend.get_session().await.unwrap().is_none());
    }
}
