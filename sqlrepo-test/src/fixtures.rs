//! Fixture entities: `Publisher` 1-n `Author` 1-n `Book`.

use chrono::{DateTime, Utc};
use std::sync::OnceLock;

use sqlrepo_data::entity::{Entity, EntityMeta, FieldKind, FieldMeta, Record, RelationMeta};
use sqlrepo_data::error::DataError;

#[derive(Debug, Clone, PartialEq)]
pub struct Publisher {
    pub id: i64,
    pub name: String,
    pub country: Option<String>,
    /// `None` unless loaded.
    pub authors: Option<Vec<Author>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Author {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub active: bool,
    pub publisher_id: Option<i64>,
    pub publisher: Option<Publisher>,
    pub books: Option<Vec<Book>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub pages: i64,
    pub price: Option<f64>,
    pub archived: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub author_id: Option<i64>,
    pub author: Option<Author>,
}

impl Entity for Publisher {
    fn meta() -> &'static EntityMeta {
        static META: OnceLock<EntityMeta> = OnceLock::new();
        META.get_or_init(|| {
            EntityMeta::builder("Publisher", "publishers")
                .field(FieldMeta::new("id", FieldKind::Integer).primary_key().generated())
                .field(FieldMeta::new("name", FieldKind::Text))
                .field(FieldMeta::new("country", FieldKind::Text).nullable())
                .relation(RelationMeta::many("authors", Author::meta, "id", "publisher_id"))
                .build()
        })
    }

    fn from_record(record: &Record) -> Result<Self, DataError> {
        Ok(Self {
            id: record.extract("id")?,
            name: record.extract("name")?,
            country: record.extract("country")?,
            authors: record.related_entities("authors")?,
        })
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("name", self.name.as_str())
            .with("country", self.country.clone())
    }
}

impl Entity for Author {
    fn meta() -> &'static EntityMeta {
        static META: OnceLock<EntityMeta> = OnceLock::new();
        META.get_or_init(|| {
            EntityMeta::builder("Author", "authors")
                .field(FieldMeta::new("id", FieldKind::Integer).primary_key().generated())
                .field(FieldMeta::new("name", FieldKind::Text))
                .field(FieldMeta::new("email", FieldKind::Text).nullable())
                .field(FieldMeta::new("active", FieldKind::Boolean).default_value(true))
                .field(FieldMeta::new("publisher_id", FieldKind::Integer).nullable())
                .relation(RelationMeta::one("publisher", Publisher::meta, "publisher_id", "id"))
                .relation(RelationMeta::many("books", Book::meta, "id", "author_id"))
                .build()
        })
    }

    fn from_record(record: &Record) -> Result<Self, DataError> {
        Ok(Self {
            id: record.extract("id")?,
            name: record.extract("name")?,
            email: record.extract("email")?,
            active: record.extract("active")?,
            publisher_id: record.extract("publisher_id")?,
            publisher: record.related_entity("publisher")?.flatten(),
            books: record.related_entities("books")?,
        })
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("name", self.name.as_str())
            .with("email", self.email.clone())
            .with("active", self.active)
            .with("publisher_id", self.publisher_id)
    }
}

impl Entity for Book {
    fn meta() -> &'static EntityMeta {
        static META: OnceLock<EntityMeta> = OnceLock::new();
        META.get_or_init(|| {
            EntityMeta::builder("Book", "books")
                .field(FieldMeta::new("id", FieldKind::Integer).primary_key().generated())
                .field(FieldMeta::new("title", FieldKind::Text))
                .field(FieldMeta::new("pages", FieldKind::Integer).default_value(0))
                .field(FieldMeta::new("price", FieldKind::Float).nullable())
                .field(FieldMeta::new("archived", FieldKind::Boolean).default_value(false))
                .field(FieldMeta::new("deleted_at", FieldKind::Timestamp).nullable())
                .field(FieldMeta::new("author_id", FieldKind::Integer).nullable())
                .relation(RelationMeta::one("author", Author::meta, "author_id", "id"))
                .build()
        })
    }

    fn from_record(record: &Record) -> Result<Self, DataError> {
        Ok(Self {
            id: record.extract("id")?,
            title: record.extract("title")?,
            pages: record.extract("pages")?,
            price: record.extract("price")?,
            archived: record.extract("archived")?,
            deleted_at: record.extract("deleted_at")?,
            author_id: record.extract("author_id")?,
            author: record.related_entity("author")?.flatten(),
        })
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("title", self.title.as_str())
            .with("pages", self.pages)
            .with("price", self.price)
            .with("archived", self.archived)
            .with("deleted_at", self.deleted_at)
            .with("author_id", self.author_id)
    }
}
