//! Generic CRUD repositories.
//!
//! [`Repository`] (blocking) and [`AsyncRepository`] (suspending) expose the
//! same operations. Both plan statements through one pure core, so filter,
//! load and statement assembly never suspend; only session calls do.

mod asynchronous;
mod sync;

pub use asynchronous::AsyncRepository;
pub use sync::Repository;

use chrono::Utc;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::config::{AllowedNoneFields, RepositoryConfig};
use crate::entity::{Entity, EntityMeta, Record};
use crate::error::DataError;
use crate::filter::{self, Expr, FilterSpec};
use crate::load::{self, LoadDirective, LoadOptions};
use crate::query::{
    self, CountQuery, DeleteStatement, DisablePlan, InsertStatement, OrderBy, Search, SelectQuery,
    UpdateStatement,
};
use crate::value::Value;

/// Arguments of `list`-style operations.
///
/// ```ignore
/// let books = repo.list(
///     ListOptions::new()
///         .filter(filter! { "archived" => false })
///         .order_by("-pages")
///         .limit(10),
/// )?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub filters: FilterSpec,
    /// Order terms such as `"name"` or `"-created_at"`.
    pub order_by: Vec<String>,
    pub offset: Option<u64>,
    /// `Some(0)` is a valid request for no rows.
    pub limit: Option<u64>,
    /// `None` uses the repository's default load strategy.
    pub loads: Option<LoadOptions>,
    pub search: Option<Search>,
    /// Relationship paths to inner join, e.g. `"author"` or
    /// `"author.publisher"`. Joined columns may be ordered on as
    /// `"author.name"`.
    pub joins: Vec<String>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filters: impl Into<FilterSpec>) -> Self {
        self.filters = filters.into();
        self
    }

    pub fn order_by(mut self, term: impl Into<String>) -> Self {
        self.order_by.push(term.into());
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn loads(mut self, loads: LoadOptions) -> Self {
        self.loads = Some(loads);
        self
    }

    pub fn search(mut self, search: Search) -> Self {
        self.search = Some(search);
        self
    }

    pub fn join(mut self, path: impl Into<String>) -> Self {
        self.joins.push(path.into());
        self
    }
}

impl From<FilterSpec> for ListOptions {
    fn from(filters: FilterSpec) -> Self {
        ListOptions::new().filter(filters)
    }
}

impl From<()> for ListOptions {
    fn from(_: ()) -> Self {
        ListOptions::new()
    }
}

/// Statement planning shared by both repository flavors.
pub(crate) struct RepositoryCore<T> {
    config: Arc<RepositoryConfig>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for RepositoryCore<T> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Entity> RepositoryCore<T> {
    pub(crate) fn new(config: RepositoryConfig) -> Result<Self, DataError> {
        config.validate(T::meta())?;
        Ok(Self {
            config: Arc::new(config),
            _marker: PhantomData,
        })
    }

    pub(crate) fn meta(&self) -> &'static EntityMeta {
        T::meta()
    }

    pub(crate) fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    fn filters(&self, spec: &FilterSpec) -> Result<Vec<Expr>, DataError> {
        filter::convert(T::meta(), spec, self.config.filter_convert_strategy)
    }

    fn loads(&self, options: Option<&LoadOptions>) -> Result<Vec<LoadDirective>, DataError> {
        let default = self.config.default_load_strategy;
        match options {
            Some(options) => load::resolve(T::meta(), options, default),
            None => load::resolve(T::meta(), &LoadOptions::default(), default),
        }
    }

    pub(crate) fn select(&self, options: &ListOptions) -> Result<SelectQuery, DataError> {
        let meta = T::meta();
        let mut query = SelectQuery::new(meta);
        query.filters = self.filters(&options.filters)?;
        if let Some(search) = &options.search {
            query.filters.extend(search.to_expr(meta)?);
        }
        query.loads = self.loads(options.loads.as_ref())?;
        query.joins = query::resolve_joins(meta, &options.joins)?;
        for term in &options.order_by {
            let order = OrderBy::parse(term)?;
            order.validate(meta, &query.joins)?;
            query.order_by.push(order);
        }
        query.offset = options.offset;
        query.limit = options.limit;
        Ok(query)
    }

    /// Two rows are enough to tell "one" from "several".
    pub(crate) fn get_query(&self, spec: &FilterSpec, loads: Option<&LoadOptions>) -> Result<SelectQuery, DataError> {
        let mut query = SelectQuery::new(T::meta());
        query.filters = self.filters(spec)?;
        query.loads = self.loads(loads)?;
        query.limit = Some(2);
        Ok(query)
    }

    /// A to-many join repeats its parent row, so every row is fetched to
    /// tell one match from several.
    pub(crate) fn get_by_query(&self, options: &ListOptions) -> Result<SelectQuery, DataError> {
        let mut query = self.select(options)?;
        query.order_by.clear();
        query.offset = None;
        query.limit = if query.joins.iter().any(|join| join.collection) {
            None
        } else {
            Some(2)
        };
        Ok(query)
    }

    pub(crate) fn first_query(&self, spec: &FilterSpec) -> Result<SelectQuery, DataError> {
        let mut query = self.get_query(spec, None)?;
        query.limit = Some(1);
        Ok(query)
    }

    pub(crate) fn count_query(&self, spec: &FilterSpec) -> Result<CountQuery, DataError> {
        Ok(CountQuery {
            entity: T::meta(),
            filters: self.filters(spec)?,
            joins: Vec::new(),
        })
    }

    pub(crate) fn count_by_query(&self, options: &ListOptions) -> Result<CountQuery, DataError> {
        let query = self.select(options)?;
        Ok(CountQuery {
            entity: query.entity,
            filters: query.filters,
            joins: query.joins,
        })
    }

    /// Existence checks never load relationships.
    pub(crate) fn exists_query(&self, spec: &FilterSpec) -> Result<SelectQuery, DataError> {
        let mut query = SelectQuery::new(T::meta());
        query.filters = self.filters(spec)?;
        query.limit = Some(1);
        Ok(query)
    }

    pub(crate) fn insert(&self, data: &Record) -> Result<InsertStatement, DataError> {
        Ok(InsertStatement {
            entity: T::meta(),
            values: query::prepare_insert(T::meta(), data)?,
        })
    }

    pub(crate) fn bulk_update(&self, spec: &FilterSpec, data: &Record) -> Result<UpdateStatement, DataError> {
        let values = query::prepare_update(
            T::meta(),
            data,
            &self.config,
            &self.config.update_allowed_none_fields,
        )?;
        if values.is_empty() {
            return Err(DataError::configuration(format!(
                "update of {} has no values to set",
                T::meta().name
            )));
        }
        Ok(UpdateStatement {
            entity: T::meta(),
            filters: self.filters(spec)?,
            values,
        })
    }

    /// Statement writing the columns of `data` that differ from `instance`,
    /// or `None` when nothing changes.
    pub(crate) fn instance_update(
        &self,
        instance: &T,
        data: &Record,
        allowed: &AllowedNoneFields,
    ) -> Result<Option<UpdateStatement>, DataError> {
        let meta = T::meta();
        let values = query::prepare_update(meta, data, &self.config, allowed)?;
        let changed = query::changed_values(&instance.to_record(), values);
        if changed.is_empty() {
            return Ok(None);
        }
        let pk = meta.require_primary_key()?;
        let identity = instance.identity();
        if identity.is_null() {
            return Err(DataError::configuration(format!(
                "{} instance has no identity and cannot be updated",
                meta.name
            )));
        }
        Ok(Some(UpdateStatement {
            entity: meta,
            filters: vec![Expr::eq(pk.name, identity)],
            values: changed,
        }))
    }

    pub(crate) fn apply_changes(&self, instance: &mut T, values: &[(String, Value)]) -> Result<(), DataError> {
        for (name, value) in values {
            instance.set_field(name, value.clone())?;
        }
        Ok(())
    }

    pub(crate) fn delete(&self, spec: &FilterSpec) -> Result<DeleteStatement, DataError> {
        Ok(DeleteStatement {
            entity: T::meta(),
            filters: self.filters(spec)?,
        })
    }

    pub(crate) fn disable(&self, spec: &FilterSpec, ids: Option<&[Value]>) -> Result<UpdateStatement, DataError> {
        let meta = T::meta();
        let plan = DisablePlan::from_config(&self.config, meta, Utc::now())?;
        let mut filters = Vec::new();
        if let Some(ids) = ids {
            filters.push(plan.ids_filter(meta, ids)?);
        }
        filters.extend(self.filters(spec)?);
        if let Some(enabled) = plan.enabled_filter {
            filters.push(enabled);
        }
        Ok(UpdateStatement {
            entity: meta,
            filters,
            values: vec![(plan.field, plan.disabled_value)],
        })
    }

    fn identity_key(&self) -> Result<&'static str, DataError> {
        Ok(T::meta().require_primary_key()?.name)
    }

    pub(crate) fn decode_list(&self, records: Vec<Record>) -> Result<Vec<T>, DataError> {
        let records = if self.config.unique_list_items {
            query::unique_by_identity(records, self.identity_key()?)
        } else {
            records
        };
        records.iter().map(T::from_record).collect()
    }

    pub(crate) fn decode_one(&self, records: Vec<Record>) -> Result<T, DataError> {
        let meta = T::meta();
        let mut records = query::unique_by_identity(records, self.identity_key()?);
        match records.len() {
            0 => Err(DataError::NotFound(format!("{} matching the given filters", meta.name))),
            1 => T::from_record(&records.remove(0)),
            count => Err(DataError::MultipleResults {
                entity: meta.name.to_string(),
                count,
            }),
        }
    }

    pub(crate) fn decode_first(&self, records: Vec<Record>) -> Result<Option<T>, DataError> {
        records.first().map(T::from_record).transpose()
    }

    pub(crate) fn decode_rows(&self, records: &[Record]) -> Result<Vec<T>, DataError> {
        records.iter().map(T::from_record).collect()
    }

    pub(crate) fn finish_label(&self) -> &'static str {
        if self.config.use_flush {
            "flush"
        } else {
            "commit"
        }
    }
}
