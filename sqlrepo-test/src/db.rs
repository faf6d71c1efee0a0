use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sqlrepo_data::entity::{Entity, EntityMeta, FieldKind, Record};
use sqlrepo_data::error::DataError;
use sqlrepo_data::query::{CountQuery, DeleteStatement, InsertStatement, SelectQuery, UpdateStatement};
use sqlrepo_data::session::{AsyncSession, AsyncSessionFactory, Session, SessionFactory};
use sqlrepo_data::value::Value;

use crate::eval::{self, Store};

/// Session operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Fetch,
    Count,
    Insert,
    Update,
    Delete,
    Flush,
    Commit,
    Rollback,
}

/// Error returned by an operation registered with
/// [`MemoryDatabase::fail_on`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedFailure(pub Operation);

impl fmt::Display for InjectedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "injected failure on {:?}", self.0)
    }
}

impl std::error::Error for InjectedFailure {}

/// Constraint violations raised by the engine itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation(pub String);

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "constraint violation: {}", self.0)
    }
}

impl std::error::Error for ConstraintViolation {}

/// Counters shared by every session of a database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub opened: u64,
    pub closed: u64,
    pub flushes: u64,
    pub commits: u64,
    pub rollbacks: u64,
}

#[derive(Default)]
struct Counters {
    opened: AtomicU64,
    closed: AtomicU64,
    flushes: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

#[derive(Default)]
struct Shared {
    store: Mutex<Store>,
    failures: Mutex<HashSet<Operation>>,
    latency: Mutex<Option<Duration>>,
    counters: Counters,
}

/// In-memory transactional database.
///
/// Each session works on a private snapshot taken when its transaction
/// starts; commit replaces the shared tables with the snapshot (last writer
/// wins), rollback and drop discard it.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a table exists for `T`.
    pub fn register<T: Entity>(&self) -> &Self {
        lock(&self.shared.store).table_mut(T::meta());
        self
    }

    /// Insert committed rows directly, bypassing sessions.
    pub fn seed<T: Entity>(&self, rows: impl IntoIterator<Item = Record>) -> Result<Vec<Record>, DataError> {
        let mut store = lock(&self.shared.store);
        rows.into_iter()
            .map(|row| insert_row(&mut store, T::meta(), row.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()))
            .collect()
    }

    /// Committed rows of `T`'s table, in insertion order.
    pub fn rows<T: Entity>(&self) -> Vec<Record> {
        lock(&self.shared.store).rows(T::meta()).to_vec()
    }

    pub fn len<T: Entity>(&self) -> usize {
        lock(&self.shared.store).rows(T::meta()).len()
    }

    pub fn session(&self) -> MemorySession {
        self.shared.counters.opened.fetch_add(1, Ordering::SeqCst);
        MemorySession {
            db: self.clone(),
            working: None,
            closed: false,
        }
    }

    pub fn factory(&self) -> MemorySessionFactory {
        MemorySessionFactory { db: self.clone() }
    }

    /// Make every later `op` fail with [`InjectedFailure`].
    pub fn fail_on(&self, op: Operation) {
        lock(&self.shared.failures).insert(op);
    }

    pub fn clear_failures(&self) {
        lock(&self.shared.failures).clear();
    }

    /// Delay applied before every suspending session call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.shared.latency) = latency;
    }

    pub fn stats(&self) -> SessionStats {
        let c = &self.shared.counters;
        SessionStats {
            opened: c.opened.load(Ordering::SeqCst),
            closed: c.closed.load(Ordering::SeqCst),
            flushes: c.flushes.load(Ordering::SeqCst),
            commits: c.commits.load(Ordering::SeqCst),
            rollbacks: c.rollbacks.load(Ordering::SeqCst),
        }
    }

    fn check(&self, op: Operation) -> Result<(), DataError> {
        if lock(&self.shared.failures).contains(&op) {
            return Err(DataError::database(InjectedFailure(op)));
        }
        Ok(())
    }

    fn latency(&self) -> Option<Duration> {
        *lock(&self.shared.latency)
    }
}

fn insert_row(store: &mut Store, meta: &'static EntityMeta, values: Vec<(String, Value)>) -> Result<Record, DataError> {
    let mut row = Record::new();
    for field in meta.fields() {
        row.set(field.name, Value::Null);
    }
    for (name, value) in values {
        row.set(name, value);
    }
    let table = store.table_mut(meta);
    if let Some(pk) = meta.primary_key() {
        match row.get(pk.name).cloned().unwrap_or(Value::Null) {
            Value::Null if pk.generated && pk.kind == FieldKind::Integer => {
                table.next_id += 1;
                row.set(pk.name, table.next_id);
            }
            Value::Int(id) => table.next_id = table.next_id.max(id),
            _ => {}
        }
        let id = row.get(pk.name).cloned().unwrap_or(Value::Null);
        if table.rows.iter().any(|r| r.get(pk.name) == Some(&id)) {
            return Err(DataError::database(ConstraintViolation(format!(
                "duplicate {}.{} = {id}",
                meta.table, pk.name
            ))));
        }
    }
    table.rows.push(row.clone());
    Ok(row)
}

/// Session over a [`MemoryDatabase`]; implements both session flavors.
pub struct MemorySession {
    db: MemoryDatabase,
    working: Option<Store>,
    closed: bool,
}

impl MemorySession {
    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }

    /// True while uncommitted work exists.
    pub fn in_transaction(&self) -> bool {
        self.working.is_some()
    }

    fn begin(&mut self, op: Operation) -> Result<&mut Store, DataError> {
        if self.closed {
            return Err(DataError::SessionClosed);
        }
        self.db.check(op)?;
        if self.working.is_none() {
            self.working = Some(lock(&self.db.shared.store).clone());
        }
        self.working.as_mut().ok_or(DataError::SessionClosed)
    }

    fn run_fetch(&mut self, query: &SelectQuery) -> Result<Vec<Record>, DataError> {
        let store = self.begin(Operation::Fetch)?;
        eval::select(store, query)
    }

    fn run_count(&mut self, query: &CountQuery) -> Result<u64, DataError> {
        let store = self.begin(Operation::Count)?;
        eval::count(store, query)
    }

    fn run_add(&mut self, stmt: &InsertStatement) -> Result<Record, DataError> {
        let store = self.begin(Operation::Insert)?;
        insert_row(store, stmt.entity, stmt.values.clone())
    }

    fn run_update(&mut self, stmt: &UpdateStatement) -> Result<Vec<Record>, DataError> {
        let store = self.begin(Operation::Update)?;
        let meta = stmt.entity;
        let mut hits = Vec::new();
        for (index, row) in store.rows(meta).iter().enumerate() {
            if eval::matches_all(store, meta, row, &stmt.filters)? {
                hits.push(index);
            }
        }
        let table = store.table_mut(meta);
        let mut updated = Vec::with_capacity(hits.len());
        for index in hits {
            let row = &mut table.rows[index];
            for (name, value) in &stmt.values {
                row.set(name.as_str(), value.clone());
            }
            updated.push(row.clone());
        }
        Ok(updated)
    }

    fn run_delete(&mut self, stmt: &DeleteStatement) -> Result<u64, DataError> {
        let store = self.begin(Operation::Delete)?;
        let meta = stmt.entity;
        let mut keep = Vec::new();
        for row in store.rows(meta) {
            keep.push(!eval::matches_all(store, meta, row, &stmt.filters)?);
        }
        let table = store.table_mut(meta);
        let before = table.rows.len();
        let mut flags = keep.into_iter();
        table.rows.retain(|_| flags.next().unwrap_or(true));
        Ok((before - table.rows.len()) as u64)
    }

    fn run_flush(&mut self) -> Result<(), DataError> {
        self.begin(Operation::Flush)?;
        self.db.shared.counters.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn run_commit(&mut self) -> Result<(), DataError> {
        if self.closed {
            return Err(DataError::SessionClosed);
        }
        self.db.check(Operation::Commit)?;
        if let Some(store) = self.working.take() {
            *lock(&self.db.shared.store) = store;
        }
        self.db.shared.counters.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn run_rollback(&mut self) -> Result<(), DataError> {
        if self.closed {
            return Err(DataError::SessionClosed);
        }
        self.db.check(Operation::Rollback)?;
        self.working = None;
        self.db.shared.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn run_close(&mut self) -> Result<(), DataError> {
        if !self.closed {
            self.working = None;
            self.closed = true;
            self.db.shared.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn pause(&self) {
        if let Some(latency) = self.db.latency() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.working.is_some() {
            tracing::debug!("Memory session dropped with uncommitted work, discarding");
        }
    }
}

impl Session for MemorySession {
    fn fetch(&mut self, query: &SelectQuery) -> Result<Vec<Record>, DataError> {
        self.run_fetch(query)
    }

    fn count(&mut self, query: &CountQuery) -> Result<u64, DataError> {
        self.run_count(query)
    }

    fn add(&mut self, stmt: &InsertStatement) -> Result<Record, DataError> {
        self.run_add(stmt)
    }

    fn update(&mut self, stmt: &UpdateStatement) -> Result<Vec<Record>, DataError> {
        self.run_update(stmt)
    }

    fn delete(&mut self, stmt: &DeleteStatement) -> Result<u64, DataError> {
        self.run_delete(stmt)
    }

    fn flush(&mut self) -> Result<(), DataError> {
        self.run_flush()
    }

    fn commit(&mut self) -> Result<(), DataError> {
        self.run_commit()
    }

    fn rollback(&mut self) -> Result<(), DataError> {
        self.run_rollback()
    }

    fn close(&mut self) -> Result<(), DataError> {
        self.run_close()
    }
}

impl AsyncSession for MemorySession {
    async fn fetch(&mut self, query: &SelectQuery) -> Result<Vec<Record>, DataError> {
        self.pause().await;
        self.run_fetch(query)
    }

    async fn count(&mut self, query: &CountQuery) -> Result<u64, DataError> {
        self.pause().await;
        self.run_count(query)
    }

    async fn add(&mut self, stmt: &InsertStatement) -> Result<Record, DataError> {
        self.pause().await;
        self.run_add(stmt)
    }

    async fn update(&mut self, stmt: &UpdateStatement) -> Result<Vec<Record>, DataError> {
        self.pause().await;
        self.run_update(stmt)
    }

    async fn delete(&mut self, stmt: &DeleteStatement) -> Result<u64, DataError> {
        self.pause().await;
        self.run_delete(stmt)
    }

    async fn flush(&mut self) -> Result<(), DataError> {
        self.pause().await;
        self.run_flush()
    }

    async fn commit(&mut self) -> Result<(), DataError> {
        self.pause().await;
        self.run_commit()
    }

    async fn rollback(&mut self) -> Result<(), DataError> {
        self.run_rollback()
    }

    async fn close(&mut self) -> Result<(), DataError> {
        self.run_close()
    }
}

/// Opens [`MemorySession`]s; usable as a blocking or suspending factory.
#[derive(Clone)]
pub struct MemorySessionFactory {
    db: MemoryDatabase,
}

impl MemorySessionFactory {
    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }
}

impl SessionFactory for MemorySessionFactory {
    type Session = MemorySession;

    fn open(&self) -> Result<MemorySession, DataError> {
        Ok(self.db.session())
    }
}

impl AsyncSessionFactory for MemorySessionFactory {
    type Session = MemorySession;

    async fn open(&self) -> Result<MemorySession, DataError> {
        Ok(self.db.session())
    }
}
