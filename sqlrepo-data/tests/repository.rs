use std::sync::OnceLock;

use sqlrepo_data::config::{AllowedNoneFields, DisableFieldType, RepositoryConfig};
use sqlrepo_data::entity::{Entity, EntityMeta, FieldKind, FieldMeta, Record};
use sqlrepo_data::error::{DataError, ErrorKind};
use sqlrepo_data::filter::{Clause, FilterSpec, FilterStrategy};
use sqlrepo_data::load::{LoadOptions, LoadStrategy};
use sqlrepo_data::page::Pageable;
use sqlrepo_data::query::Search;
use sqlrepo_data::repository::{ListOptions, Repository};
use sqlrepo_data::session::{Session, SessionHandle};
use sqlrepo_data::value::Value;
use sqlrepo_data::{filter, record};
use sqlrepo_test::{library, Author, Book, MemoryDatabase, MemorySession};

fn repo<T: Entity>(db: &MemoryDatabase) -> Repository<T, MemorySession> {
    Repository::standalone(db.session()).unwrap()
}

fn repo_with<T: Entity>(db: &MemoryDatabase, config: RepositoryConfig) -> Repository<T, MemorySession> {
    Repository::with_config(SessionHandle::new(db.session()), config).unwrap()
}

fn titles(books: &[Book]) -> Vec<&str> {
    books.iter().map(|b| b.title.as_str()).collect()
}

#[test]
fn list_with_empty_filters_returns_every_row() {
    let db = library().unwrap();
    let books = repo::<Book>(&db).list(()).unwrap();
    assert_eq!(books.len(), db.len::<Book>());
}

#[test]
fn get_distinguishes_zero_one_and_many() {
    let db = library().unwrap();
    let books = repo::<Book>(&db);

    let dune = books.get(filter! { "id" => 1 }).unwrap();
    assert_eq!(dune.title, "Dune");
    assert_eq!(dune.author.as_ref().map(|a| a.name.as_str()), Some("Ann"));

    let err = books.get(filter! { "id" => 99 }).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = books.get(filter! { "author_id" => 1 }).unwrap_err();
    assert!(matches!(err, DataError::MultipleResults { count: 2, .. }));
}

#[test]
fn create_then_get_round_trips() {
    let db = library().unwrap();
    let books = repo_with::<Book>(&db, RepositoryConfig::default().with_use_flush(false));

    let created = books
        .create(record! { "title" => "Ink", "pages" => "50", "author_id" => 2 })
        .unwrap();
    assert_eq!(created.id, 6);
    assert_eq!(created.pages, 50);
    assert!(!created.archived);
    assert_eq!(db.len::<Book>(), 6);

    let fetched = books
        .get_with(filter! { "id" => created.id }, &LoadOptions::none())
        .unwrap();
    assert_eq!(fetched, created);
}

#[test]
fn create_rejects_unknown_and_missing_fields() {
    let db = library().unwrap();
    let books = repo::<Book>(&db);

    let err = books.create(record! { "title" => "Ink", "isbn" => "x" }).unwrap_err();
    assert!(matches!(err, DataError::FieldResolution { ref field, .. } if field == "isbn"));

    let err = books.create(record! { "pages" => 10 }).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn flushed_changes_wait_for_commit() {
    let db = library().unwrap();
    let authors = repo::<Author>(&db);
    let created = authors.create(record! { "name" => "Dee" }).unwrap();
    assert!(created.active);

    assert_eq!(db.len::<Author>(), 3);
    assert_eq!(authors.count(()).unwrap(), 4);
    assert_eq!(db.stats().flushes, 1);

    authors.session().with(|s| s.commit()).unwrap();
    assert_eq!(db.len::<Author>(), 4);
}

#[test]
fn create_many_stages_every_row_before_one_flush() {
    let db = library().unwrap();
    let authors = repo::<Author>(&db);
    let created = authors
        .create_many(vec![record! { "name" => "Dee" }, record! { "name" => "Eve" }])
        .unwrap();
    assert_eq!(created.iter().map(|a| a.id).collect::<Vec<_>>(), vec![4, 5]);
    assert_eq!(db.stats().flushes, 1);
}

#[test]
fn update_instance_rejects_none_unless_allowed() {
    let db = library().unwrap();
    let books = repo::<Book>(&db);
    let mut dune = books.get(filter! { "id" => 1 }).unwrap();
    let err = books
        .update_instance(&mut dune, record! { "price" => Value::Null })
        .unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(dune.price, Some(9.5));

    let config = RepositoryConfig::default()
        .with_update_set_none(true)
        .with_update_allowed_none_fields(AllowedNoneFields::only(["price"]));
    let books = repo_with::<Book>(&db, config);
    let mut dune = books.get(filter! { "id" => 1 }).unwrap();
    assert!(books
        .update_instance(&mut dune, record! { "price" => Value::Null })
        .unwrap());
    assert_eq!(dune.price, None);

    let err = books
        .update_instance(&mut dune, record! { "author_id" => Value::Null })
        .unwrap_err();
    assert!(err.is_configuration());

    let reread = books.get(filter! { "id" => 1 }).unwrap();
    assert_eq!(reread.price, None);
}

#[test]
fn update_instance_with_overrides_the_allowed_set() {
    let db = library().unwrap();
    let books = repo_with::<Book>(
        &db,
        RepositoryConfig::default()
            .with_update_set_none(true)
            .with_update_allowed_none_fields(AllowedNoneFields::only(["price"])),
    );
    let mut dune = books.get(filter! { "id" => 1 }).unwrap();
    assert!(books
        .update_instance_with(
            &mut dune,
            record! { "author_id" => Value::Null },
            &AllowedNoneFields::only(["author_id"]),
        )
        .unwrap());
    assert_eq!(dune.author_id, None);
}

#[test]
fn update_instance_skips_unchanged_values() {
    let db = library().unwrap();
    let books = repo::<Book>(&db);
    let mut dune = books.get(filter! { "id" => 1 }).unwrap();
    let changed = books
        .update_instance(&mut dune, record! { "title" => "Dune", "pages" => 412 })
        .unwrap();
    assert!(!changed);
    assert_eq!(db.stats().flushes, 0);

    assert!(books.update_instance(&mut dune, record! { "pages" => 500 }).unwrap());
    assert_eq!(dune.pages, 500);
}

#[test]
fn bulk_update_returns_updated_entities() {
    let db = library().unwrap();
    let books = repo::<Book>(&db);
    let updated = books
        .update(filter! { "author_id" => 1 }, record! { "pages" => 1 })
        .unwrap();
    assert_eq!(titles(&updated), vec!["Dune", "Emma"]);
    assert!(updated.iter().all(|b| b.pages == 1));

    let err = books.update(filter! { "author_id" => 1 }, record! {}).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn delete_returns_the_number_of_rows() {
    let db = library().unwrap();
    let books = repo::<Book>(&db);
    assert_eq!(books.delete(filter! { "archived" => true }).unwrap(), 1);
    assert_eq!(books.count(()).unwrap(), 4);
}

#[test]
fn disable_twice_only_changes_rows_once() {
    let db = library().unwrap();
    let config = RepositoryConfig::default().with_disable("archived", DisableFieldType::Bool, "id");
    let books = repo_with::<Book>(&db, config);

    assert_eq!(books.disable(filter! { "author_id" => 1 }).unwrap(), 2);
    assert_eq!(books.disable(filter! { "author_id" => 1 }).unwrap(), 0);
    assert_eq!(books.count(filter! { "archived" => true }).unwrap(), 3);
}

#[test]
fn disable_without_filter_by_value_touches_disabled_rows_again() {
    let db = library().unwrap();
    let config = RepositoryConfig::default()
        .with_disable("archived", DisableFieldType::Bool, "id")
        .with_allow_disable_filter_by_value(false);
    let books = repo_with::<Book>(&db, config);
    assert_eq!(books.disable(filter! { "id" => 4 }).unwrap(), 1);
}

#[test]
fn disable_by_timestamp_sets_the_disable_time() {
    let db = library().unwrap();
    let config = RepositoryConfig::default().with_disable("deleted_at", DisableFieldType::Datetime, "id");
    let books = repo_with::<Book>(&db, config);

    assert_eq!(books.disable_ids(&[Value::Int(5), Value::from("2")], ()).unwrap(), 2);
    assert_eq!(books.disable_ids(&[Value::Int(5)], ()).unwrap(), 0);
    let halo = books.get(filter! { "id" => 5 }).unwrap();
    assert!(halo.deleted_at.is_some());

    let err = books.disable_ids(&[], ()).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn disable_requires_complete_configuration() {
    let db = library().unwrap();
    let books = repo_with::<Book>(&db, RepositoryConfig::default().with_disable_field("archived"));
    let err = books.disable(()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AttributeConfiguration);
}

#[test]
fn construction_rejects_unknown_configured_fields() {
    let db = library().unwrap();
    let err = Repository::<Book, _>::with_config(
        SessionHandle::new(db.session()),
        RepositoryConfig::default().with_disable_field("removed"),
    )
    .err()
    .unwrap();
    assert!(err.is_configuration());
}

#[test]
fn simple_filters_follow_dotted_paths() {
    let db = library().unwrap();
    let books = repo::<Book>(&db);
    let orbit = books
        .list(ListOptions::new().filter(filter! { "author.publisher.name" => "Orbit" }).order_by("id"))
        .unwrap();
    assert_eq!(titles(&orbit), vec!["Dune", "Emma", "Fall"]);

    let err = books.list(filter! { "author.nothing" => 1 }).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PathResolution);
}

#[test]
fn django_lookups_traverse_relationships() {
    let db = library().unwrap();
    let books = repo_with::<Book>(
        &db,
        RepositoryConfig::default().with_filter_strategy(FilterStrategy::DjangoLike),
    );

    let found = books
        .list(filter! { "author__publisher__name__icontains" => "orb", "pages__gte" => 200 })
        .unwrap();
    assert_eq!(titles(&found), vec!["Dune", "Emma"]);

    let orphans = books.list(filter! { "author__isnull" => true }).unwrap();
    assert_eq!(titles(&orphans), vec!["Halo"]);

    let err = books.list(filter! { "author__shelf__gt" => 1 }).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PathResolution);

    let err = books.list(filter! { "pages__near" => 1 }).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn advanced_clauses_from_json() {
    let db = library().unwrap();
    let books = repo_with::<Book>(
        &db,
        RepositoryConfig::default().with_filter_strategy(FilterStrategy::Advanced),
    );

    let spec = FilterSpec::from_json(serde_json::json!([
        {"field": "pages", "operator": "between", "value": [100, 300]},
        {"field": "price", "operator": "is_not", "value": null},
    ]))
    .unwrap();
    assert_eq!(titles(&books.list(spec).unwrap()), vec!["Emma"]);

    let err = books
        .list(FilterSpec::from(Clause::new("pages", "between", vec![Value::Int(1)])))
        .unwrap_err();
    assert!(err.is_configuration());

    let err = books.list(filter! { "pages" => 1 }).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn list_page_orders_and_counts() {
    let db = library().unwrap();
    let books = repo::<Book>(&db);
    let page = books
        .list_page((), &Pageable::new(0, 2).with_sort("-pages"))
        .unwrap();
    assert_eq!(titles(&page.content), vec!["Dune", "Halo"]);
    assert_eq!(page.total_elements, 5);
    assert_eq!(page.total_pages, 3);

    let last = books
        .list_page((), &Pageable::new(2, 2).with_sort("-pages"))
        .unwrap();
    assert_eq!(titles(&last.content), vec!["Gulf"]);

    let err = books.list(ListOptions::new().order_by("colour")).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn list_page_rejects_an_offset_past_the_integer_range() {
    let db = library().unwrap();
    let books = repo::<Book>(&db);
    let err = books.list_page((), &Pageable::new(u64::MAX / 2, 20)).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn limit_zero_selects_nothing() {
    let db = library().unwrap();
    let books = repo::<Book>(&db).list(ListOptions::new().limit(0)).unwrap();
    assert!(books.is_empty());
}

#[test]
fn joined_collections_are_deduplicated_when_configured() {
    let db = library().unwrap();
    let options = ListOptions::new()
        .filter(filter! { "id" => 1 })
        .loads(LoadOptions::none().with("books", LoadStrategy::Joined));

    let unique = repo::<Author>(&db).list(options.clone()).unwrap();
    assert_eq!(unique.len(), 1);
    assert_eq!(unique[0].books.as_ref().map(Vec::len), Some(2));

    let raw = repo_with::<Author>(&db, RepositoryConfig::default().with_unique_list_items(false))
        .list(options)
        .unwrap();
    assert_eq!(raw.len(), 2);
}

#[test]
fn load_options_control_population() {
    let db = library().unwrap();
    let authors = repo::<Author>(&db);

    let lazy = authors
        .get_with(filter! { "id" => 1 }, &LoadOptions::new().with_default(LoadStrategy::Lazy))
        .unwrap();
    assert!(lazy.books.is_none());
    assert!(lazy.publisher.is_none());

    let nested = authors
        .get_with(
            filter! { "id" => 1 },
            &LoadOptions::none().with("publisher", LoadStrategy::Immediate).with("publisher.authors", LoadStrategy::SelectIn),
        )
        .unwrap();
    let publisher = nested.publisher.unwrap();
    assert_eq!(publisher.authors.map(|a| a.len()), Some(2));

    let err = authors
        .get_with(filter! { "id" => 1 }, &LoadOptions::none().with("agent", LoadStrategy::Joined))
        .unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn search_matches_text_columns() {
    let db = library().unwrap();
    let books = repo::<Book>(&db);
    let found = books
        .list(ListOptions::new().search(Search::new("U", ["title"])).order_by("title"))
        .unwrap();
    assert_eq!(titles(&found), vec!["Dune", "Gulf"]);

    let err = books
        .list(ListOptions::new().search(Search::new("1", ["pages"])))
        .unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn count_exists_and_first() {
    let db = library().unwrap();
    let books = repo::<Book>(&db);
    assert_eq!(books.count(filter! { "author_id" => 1 }).unwrap(), 2);
    assert!(books.exists(filter! { "title" => "Fall" }).unwrap());
    assert!(!books.exists(filter! { "title" => "Gone" }).unwrap());
    assert_eq!(books.first(filter! { "author_id" => 1 }).unwrap().map(|b| b.id), Some(1));
    assert!(books.first(filter! { "author_id" => 9 }).unwrap().is_none());
}

// ── Joins ───────────────────────────────────────────────────────────────

#[test]
fn joins_drop_unmatched_rows_and_order_on_related_columns() {
    let db = library().unwrap();
    let books = repo::<Book>(&db);

    let by_author = books
        .list(ListOptions::new().join("author").order_by("-author.name").order_by("title"))
        .unwrap();
    assert_eq!(titles(&by_author), vec!["Gulf", "Fall", "Dune", "Emma"]);

    let by_country = books
        .list(
            ListOptions::new()
                .join("author.publisher")
                .order_by("-author.publisher.country")
                .order_by("-pages"),
        )
        .unwrap();
    assert_eq!(titles(&by_country), vec!["Gulf", "Dune", "Emma", "Fall"]);

    assert_eq!(books.count_by(ListOptions::new().join("author")).unwrap(), 4);
    assert_eq!(
        books
            .count_by(ListOptions::new().join("author.publisher").filter(filter! { "archived" => false }))
            .unwrap(),
        3
    );
}

#[test]
fn to_many_joins_repeat_parents_until_deduplicated() {
    let db = library().unwrap();
    let authors = repo::<Author>(&db);

    assert_eq!(authors.count_by(ListOptions::new().join("books")).unwrap(), 4);
    let listed = authors
        .list(ListOptions::new().join("books").order_by("-books.pages"))
        .unwrap();
    let names: Vec<&str> = listed.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["Ann", "Ben", "Cid"]);

    let ann = authors
        .get_by(ListOptions::new().join("books").filter(filter! { "name" => "Ann" }))
        .unwrap();
    assert_eq!(ann.id, 1);

    let err = authors
        .get_by(ListOptions::new().join("books").filter(filter! { "publisher_id" => 1 }))
        .unwrap_err();
    assert!(matches!(err, DataError::MultipleResults { count: 2, .. }));
}

#[test]
fn list_page_counts_with_the_same_joins() {
    let db = library().unwrap();
    let books = repo::<Book>(&db);
    let page = books
        .list_page(
            ListOptions::new().join("author").filter(filter! { "archived" => false }),
            &Pageable::new(0, 2).with_sort("author.name"),
        )
        .unwrap();
    assert_eq!(titles(&page.content), vec!["Dune", "Emma"]);
    assert_eq!(page.total_elements, 3);
    assert_eq!(page.total_pages, 2);
}

#[test]
fn unknown_join_paths_and_unjoined_order_terms_fail() {
    let db = library().unwrap();
    let books = repo::<Book>(&db);

    let err = books.list(ListOptions::new().join("author.agent")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PathResolution);
    let err = books.count_by(ListOptions::new().join("title")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PathResolution);

    let err = books.list(ListOptions::new().order_by("author.name")).unwrap_err();
    assert!(err.is_configuration());
    let err = books
        .list(ListOptions::new().join("author").order_by("author.colour"))
        .unwrap_err();
    assert!(err.is_configuration());
}

// ── Instance updates ────────────────────────────────────────────────────

/// Ticket whose in-memory status can never become `"void"`.
#[derive(Debug, Clone, PartialEq)]
struct Ticket {
    id: i64,
    status: String,
}

impl Entity for Ticket {
    fn meta() -> &'static EntityMeta {
        static META: OnceLock<EntityMeta> = OnceLock::new();
        META.get_or_init(|| {
            EntityMeta::builder("Ticket", "tickets")
                .field(FieldMeta::new("id", FieldKind::Integer).primary_key().generated())
                .field(FieldMeta::new("status", FieldKind::Text))
                .build()
        })
    }

    fn from_record(record: &Record) -> Result<Self, DataError> {
        Ok(Self {
            id: record.extract("id")?,
            status: record.extract("status")?,
        })
    }

    fn to_record(&self) -> Record {
        Record::new().with("id", self.id).with("status", self.status.as_str())
    }

    fn set_field(&mut self, field: &str, value: Value) -> Result<(), DataError> {
        match (field, value) {
            ("status", Value::Text(status)) if status == "void" => {
                Err(DataError::Attribute("ticket status cannot be void".into()))
            }
            ("status", Value::Text(status)) => {
                self.status = status;
                Ok(())
            }
            (other, _) => Err(DataError::field("Ticket", other)),
        }
    }
}

#[test]
fn failed_instance_assignment_writes_nothing() {
    let db = MemoryDatabase::new();
    db.seed::<Ticket>([record! { "status" => "open" }]).unwrap();
    let tickets = repo_with::<Ticket>(&db, RepositoryConfig::default().with_use_flush(false));

    let mut ticket = tickets.get(filter! { "id" => 1 }).unwrap();
    let err = tickets
        .update_instance(&mut ticket, record! { "status" => "void" })
        .unwrap_err();
    assert!(matches!(err, DataError::Attribute(_)));
    assert_eq!(ticket.status, "open");
    assert_eq!(db.stats().commits, 0);
    assert_eq!(db.rows::<Ticket>()[0].get("status"), Some(&Value::from("open")));

    assert!(tickets.update_instance(&mut ticket, record! { "status" => "closed" }).unwrap());
    assert_eq!(ticket.status, "closed");
    assert_eq!(db.rows::<Ticket>()[0].get("status"), Some(&Value::from("closed")));
}
