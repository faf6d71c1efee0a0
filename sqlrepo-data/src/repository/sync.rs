use crate::config::{AllowedNoneFields, RepositoryConfig};
use crate::entity::{Entity, Record};
use crate::error::DataError;
use crate::filter::FilterSpec;
use crate::load::LoadOptions;
use crate::page::{Page, Pageable};
use crate::query::UpdateStatement;
use crate::session::{Session, SessionHandle};
use crate::value::Value;

use super::{ListOptions, RepositoryCore};

/// Blocking repository for one entity type.
///
/// Every call locks the shared session for its duration, so operations of
/// repositories sharing a handle run in the order they are issued.
pub struct Repository<T, S> {
    session: SessionHandle<S>,
    core: RepositoryCore<T>,
}

impl<T, S> Clone for Repository<T, S> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            core: self.core.clone(),
        }
    }
}

impl<T: Entity, S: Session> Repository<T, S> {
    /// Repository with the default configuration.
    pub fn new(session: SessionHandle<S>) -> Result<Self, DataError> {
        Self::with_config(session, RepositoryConfig::default())
    }

    /// Fails when `config` names fields `T` does not have.
    pub fn with_config(session: SessionHandle<S>, config: RepositoryConfig) -> Result<Self, DataError> {
        Ok(Self {
            session,
            core: RepositoryCore::new(config)?,
        })
    }

    /// Repository owning its own session, outside any unit of work.
    pub fn standalone(session: S) -> Result<Self, DataError> {
        Self::new(SessionHandle::new(session))
    }

    pub fn config(&self) -> &RepositoryConfig {
        self.core.config()
    }

    pub fn session(&self) -> &SessionHandle<S> {
        &self.session
    }

    /// Exactly one entity matching `filters`.
    pub fn get(&self, filters: impl Into<FilterSpec>) -> Result<T, DataError> {
        let query = self.core.get_query(&filters.into(), None)?;
        let rows = self.session.with(|s| s.fetch(&query))?;
        self.core.decode_one(rows)
    }

    pub fn get_with(&self, filters: impl Into<FilterSpec>, loads: &LoadOptions) -> Result<T, DataError> {
        let query = self.core.get_query(&filters.into(), Some(loads))?;
        let rows = self.session.with(|s| s.fetch(&query))?;
        self.core.decode_one(rows)
    }

    pub fn first(&self, filters: impl Into<FilterSpec>) -> Result<Option<T>, DataError> {
        let query = self.core.first_query(&filters.into())?;
        let rows = self.session.with(|s| s.fetch(&query))?;
        self.core.decode_first(rows)
    }

    pub fn list(&self, options: impl Into<ListOptions>) -> Result<Vec<T>, DataError> {
        let query = self.core.select(&options.into())?;
        let rows = self.session.with(|s| s.fetch(&query))?;
        self.core.decode_list(rows)
    }

    /// Exactly one entity matching `options`, which may join relationships
    /// and add a search. Ordering and slicing of `options` are ignored.
    pub fn get_by(&self, options: impl Into<ListOptions>) -> Result<T, DataError> {
        let query = self.core.get_by_query(&options.into())?;
        let rows = self.session.with(|s| s.fetch(&query))?;
        self.core.decode_one(rows)
    }

    /// One page of matches plus the total match count.
    ///
    /// A sort on `pageable` replaces the ordering of `options`.
    pub fn list_page(&self, options: impl Into<ListOptions>, pageable: &Pageable) -> Result<Page<T>, DataError> {
        let mut options = options.into();
        let offset = pageable.offset()?;
        let total = self.count_by(options.clone())?;
        options.offset = Some(offset);
        options.limit = Some(pageable.size);
        if pageable.sort.is_some() {
            options.order_by = pageable.order_by()?.iter().map(ToString::to_string).collect();
        }
        let content = self.list(options)?;
        Ok(Page::new(content, pageable, total))
    }

    pub fn count(&self, filters: impl Into<FilterSpec>) -> Result<u64, DataError> {
        let query = self.core.count_query(&filters.into())?;
        self.session.with(|s| s.count(&query))
    }

    /// Rows matching `options`; a to-many join counts each joined row.
    pub fn count_by(&self, options: impl Into<ListOptions>) -> Result<u64, DataError> {
        let query = self.core.count_by_query(&options.into())?;
        self.session.with(|s| s.count(&query))
    }

    pub fn exists(&self, filters: impl Into<FilterSpec>) -> Result<bool, DataError> {
        let query = self.core.exists_query(&filters.into())?;
        let rows = self.session.with(|s| s.fetch(&query))?;
        Ok(!rows.is_empty())
    }

    pub fn create(&self, data: Record) -> Result<T, DataError> {
        let stmt = self.core.insert(&data)?;
        let row = self.session.with(|s| {
            let row = s.add(&stmt)?;
            self.finish_write(s)?;
            Ok(row)
        })?;
        tracing::debug!(entity = self.core.meta().name, mode = self.core.finish_label(), "Created entity");
        T::from_record(&row)
    }

    /// Insert several rows; all of them are staged before the single flush
    /// or commit.
    pub fn create_many(&self, data: Vec<Record>) -> Result<Vec<T>, DataError> {
        let stmts = data
            .iter()
            .map(|record| self.core.insert(record))
            .collect::<Result<Vec<_>, _>>()?;
        let rows = self.session.with(|s| {
            let rows = stmts.iter().map(|stmt| s.add(stmt)).collect::<Result<Vec<_>, _>>()?;
            self.finish_write(s)?;
            Ok(rows)
        })?;
        tracing::debug!(
            entity = self.core.meta().name,
            rows = rows.len(),
            mode = self.core.finish_label(),
            "Created entities"
        );
        self.core.decode_rows(&rows)
    }

    /// Bulk update of every row matching `filters`.
    pub fn update(&self, filters: impl Into<FilterSpec>, data: Record) -> Result<Vec<T>, DataError> {
        let stmt = self.core.bulk_update(&filters.into(), &data)?;
        let rows = self.session.with(|s| {
            let rows = s.update(&stmt)?;
            self.finish_write(s)?;
            Ok(rows)
        })?;
        tracing::debug!(
            entity = self.core.meta().name,
            rows = rows.len(),
            mode = self.core.finish_label(),
            "Updated entities"
        );
        self.core.decode_rows(&rows)
    }

    /// Apply `data` to `instance` and persist the changed fields.
    ///
    /// Returns `false` when no value differs, in which case nothing is
    /// written.
    pub fn update_instance(&self, instance: &mut T, data: Record) -> Result<bool, DataError> {
        let allowed = self.core.config().update_allowed_none_fields.clone();
        self.update_instance_with(instance, data, &allowed)
    }

    /// Like [`update_instance`](Self::update_instance) with a per-call set
    /// of fields that may be set to null.
    pub fn update_instance_with(
        &self,
        instance: &mut T,
        data: Record,
        allowed: &AllowedNoneFields,
    ) -> Result<bool, DataError> {
        let Some(stmt) = self.core.instance_update(instance, &data, allowed)? else {
            return Ok(false);
        };
        let mut updated = instance.clone();
        self.core.apply_changes(&mut updated, &stmt.values)?;
        self.session.with(|s| {
            s.update(&stmt)?;
            self.finish_write(s)
        })?;
        *instance = updated;
        tracing::debug!(
            entity = self.core.meta().name,
            fields = stmt.values.len(),
            mode = self.core.finish_label(),
            "Updated instance"
        );
        Ok(true)
    }

    pub fn delete(&self, filters: impl Into<FilterSpec>) -> Result<u64, DataError> {
        let stmt = self.core.delete(&filters.into())?;
        let deleted = self.session.with(|s| {
            let deleted = s.delete(&stmt)?;
            self.finish_write(s)?;
            Ok(deleted)
        })?;
        tracing::debug!(entity = self.core.meta().name, rows = deleted, mode = self.core.finish_label(), "Deleted entities");
        Ok(deleted)
    }

    /// Mark every matching, still-enabled row as disabled.
    pub fn disable(&self, filters: impl Into<FilterSpec>) -> Result<u64, DataError> {
        let stmt = self.core.disable(&filters.into(), None)?;
        self.run_disable(stmt)
    }

    /// Disable rows by identifier, narrowed by `filters`.
    pub fn disable_ids(&self, ids: &[Value], filters: impl Into<FilterSpec>) -> Result<u64, DataError> {
        let stmt = self.core.disable(&filters.into(), Some(ids))?;
        self.run_disable(stmt)
    }

    fn run_disable(&self, stmt: UpdateStatement) -> Result<u64, DataError> {
        let rows = self.session.with(|s| {
            let rows = s.update(&stmt)?;
            self.finish_write(s)?;
            Ok(rows)
        })?;
        tracing::debug!(entity = self.core.meta().name, rows = rows.len(), "Disabled entities");
        Ok(rows.len() as u64)
    }

    fn finish_write(&self, session: &mut S) -> Result<(), DataError> {
        if self.core.config().use_flush {
            session.flush()
        } else {
            session.commit()
        }
    }
}
