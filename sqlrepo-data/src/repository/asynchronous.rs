use crate::config::{AllowedNoneFields, RepositoryConfig};
use crate::entity::{Entity, Record};
use crate::error::DataError;
use crate::filter::FilterSpec;
use crate::load::LoadOptions;
use crate::page::{Page, Pageable};
use crate::query::{CountQuery, SelectQuery, UpdateStatement};
use crate::session::{AsyncSession, AsyncSessionHandle};
use crate::value::Value;

use super::{ListOptions, RepositoryCore};

/// Suspending repository for one entity type.
///
/// Planning is synchronous; only the session calls are awaited. Dropping a
/// pending call leaves the staged work to the session's rollback-on-drop.
pub struct AsyncRepository<T, S> {
    session: AsyncSessionHandle<S>,
    core: RepositoryCore<T>,
}

impl<T, S> Clone for AsyncRepository<T, S> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            core: self.core.clone(),
        }
    }
}

impl<T: Entity, S: AsyncSession> AsyncRepository<T, S> {
    pub fn new(session: AsyncSessionHandle<S>) -> Result<Self, DataError> {
        Self::with_config(session, RepositoryConfig::default())
    }

    pub fn with_config(session: AsyncSessionHandle<S>, config: RepositoryConfig) -> Result<Self, DataError> {
        Ok(Self {
            session,
            core: RepositoryCore::new(config)?,
        })
    }

    pub fn standalone(session: S) -> Result<Self, DataError> {
        Self::new(AsyncSessionHandle::new(session))
    }

    pub fn config(&self) -> &RepositoryConfig {
        self.core.config()
    }

    pub fn session(&self) -> &AsyncSessionHandle<S> {
        &self.session
    }

    async fn fetch(&self, query: &SelectQuery) -> Result<Vec<Record>, DataError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(DataError::SessionClosed)?;
        session.fetch(query).await
    }

    async fn finish_write(&self, session: &mut S) -> Result<(), DataError> {
        if self.core.config().use_flush {
            session.flush().await
        } else {
            session.commit().await
        }
    }

    pub async fn get(&self, filters: impl Into<FilterSpec>) -> Result<T, DataError> {
        let query = self.core.get_query(&filters.into(), None)?;
        let rows = self.fetch(&query).await?;
        self.core.decode_one(rows)
    }

    pub async fn get_with(&self, filters: impl Into<FilterSpec>, loads: &LoadOptions) -> Result<T, DataError> {
        let query = self.core.get_query(&filters.into(), Some(loads))?;
        let rows = self.fetch(&query).await?;
        self.core.decode_one(rows)
    }

    pub async fn first(&self, filters: impl Into<FilterSpec>) -> Result<Option<T>, DataError> {
        let query = self.core.first_query(&filters.into())?;
        let rows = self.fetch(&query).await?;
        self.core.decode_first(rows)
    }

    pub async fn list(&self, options: impl Into<ListOptions>) -> Result<Vec<T>, DataError> {
        let query = self.core.select(&options.into())?;
        let rows = self.fetch(&query).await?;
        self.core.decode_list(rows)
    }

    pub async fn get_by(&self, options: impl Into<ListOptions>) -> Result<T, DataError> {
        let query = self.core.get_by_query(&options.into())?;
        let rows = self.fetch(&query).await?;
        self.core.decode_one(rows)
    }

    pub async fn list_page(&self, options: impl Into<ListOptions>, pageable: &Pageable) -> Result<Page<T>, DataError> {
        let mut options = options.into();
        let offset = pageable.offset()?;
        let total = self.count_by(options.clone()).await?;
        options.offset = Some(offset);
        options.limit = Some(pageable.size);
        if pageable.sort.is_some() {
            options.order_by = pageable.order_by()?.iter().map(ToString::to_string).collect();
        }
        let content = self.list(options).await?;
        Ok(Page::new(content, pageable, total))
    }

    pub async fn count(&self, filters: impl Into<FilterSpec>) -> Result<u64, DataError> {
        let query = self.core.count_query(&filters.into())?;
        self.run_count(&query).await
    }

    pub async fn count_by(&self, options: impl Into<ListOptions>) -> Result<u64, DataError> {
        let query = self.core.count_by_query(&options.into())?;
        self.run_count(&query).await
    }

    async fn run_count(&self, query: &CountQuery) -> Result<u64, DataError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(DataError::SessionClosed)?;
        session.count(query).await
    }

    pub async fn exists(&self, filters: impl Into<FilterSpec>) -> Result<bool, DataError> {
        let query = self.core.exists_query(&filters.into())?;
        Ok(!self.fetch(&query).await?.is_empty())
    }

    pub async fn create(&self, data: Record) -> Result<T, DataError> {
        let stmt = self.core.insert(&data)?;
        let row = {
            let mut guard = self.session.lock().await;
            let session = guard.as_mut().ok_or(DataError::SessionClosed)?;
            let row = session.add(&stmt).await?;
            self.finish_write(session).await?;
            row
        };
        tracing::debug!(entity = self.core.meta().name, mode = self.core.finish_label(), "Created entity");
        T::from_record(&row)
    }

    pub async fn create_many(&self, data: Vec<Record>) -> Result<Vec<T>, DataError> {
        let stmts = data
            .iter()
            .map(|record| self.core.insert(record))
            .collect::<Result<Vec<_>, _>>()?;
        let rows = {
            let mut guard = self.session.lock().await;
            let session = guard.as_mut().ok_or(DataError::SessionClosed)?;
            let mut rows = Vec::with_capacity(stmts.len());
            for stmt in &stmts {
                rows.push(session.add(stmt).await?);
            }
            self.finish_write(session).await?;
            rows
        };
        tracing::debug!(
            entity = self.core.meta().name,
            rows = rows.len(),
            mode = self.core.finish_label(),
            "Created entities"
        );
        self.core.decode_rows(&rows)
    }

    pub async fn update(&self, filters: impl Into<FilterSpec>, data: Record) -> Result<Vec<T>, DataError> {
        let stmt = self.core.bulk_update(&filters.into(), &data)?;
        let rows = self.write_update(&stmt).await?;
        tracing::debug!(
            entity = self.core.meta().name,
            rows = rows.len(),
            mode = self.core.finish_label(),
            "Updated entities"
        );
        self.core.decode_rows(&rows)
    }

    pub async fn update_instance(&self, instance: &mut T, data: Record) -> Result<bool, DataError> {
        let allowed = self.core.config().update_allowed_none_fields.clone();
        self.update_instance_with(instance, data, &allowed).await
    }

    pub async fn update_instance_with(
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
        self.write_update(&stmt).await?;
        *instance = updated;
        tracing::debug!(
            entity = self.core.meta().name,
            fields = stmt.values.len(),
            mode = self.core.finish_label(),
            "Updated instance"
        );
        Ok(true)
    }

    pub async fn delete(&self, filters: impl Into<FilterSpec>) -> Result<u64, DataError> {
        let stmt = self.core.delete(&filters.into())?;
        let deleted = {
            let mut guard = self.session.lock().await;
            let session = guard.as_mut().ok_or(DataError::SessionClosed)?;
            let deleted = session.delete(&stmt).await?;
            self.finish_write(session).await?;
            deleted
        };
        tracing::debug!(entity = self.core.meta().name, rows = deleted, mode = self.core.finish_label(), "Deleted entities");
        Ok(deleted)
    }

    pub async fn disable(&self, filters: impl Into<FilterSpec>) -> Result<u64, DataError> {
        let stmt = self.core.disable(&filters.into(), None)?;
        let rows = self.write_update(&stmt).await?;
        tracing::debug!(entity = self.core.meta().name, rows = rows.len(), "Disabled entities");
        Ok(rows.len() as u64)
    }

    pub async fn disable_ids(&self, ids: &[Value], filters: impl Into<FilterSpec>) -> Result<u64, DataError> {
        let stmt = self.core.disable(&filters.into(), Some(ids))?;
        let rows = self.write_update(&stmt).await?;
        tracing::debug!(entity = self.core.meta().name, rows = rows.len(), "Disabled entities");
        Ok(rows.len() as u64)
    }

    async fn write_update(&self, stmt: &UpdateStatement) -> Result<Vec<Record>, DataError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(DataError::SessionClosed)?;
        let rows = session.update(stmt).await?;
        self.finish_write(session).await?;
        Ok(rows)
    }
}
