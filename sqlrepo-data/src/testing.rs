//! Small entity set used by unit tests: League 1-n Team 1-n Player.

use chrono::{DateTime, Utc};
use std::sync::OnceLock;

use crate::entity::{Entity, EntityMeta, FieldKind, FieldMeta, Record, RelationMeta};
use crate::error::DataError;

#[derive(Debug, Clone, PartialEq)]
pub struct League {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Team {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: i64,
    pub name: String,
    pub team_id: Option<i64>,
}

impl Entity for League {
    fn meta() -> &'static EntityMeta {
        static META: OnceLock<EntityMeta> = OnceLock::new();
        META.get_or_init(|| {
            EntityMeta::builder("League", "leagues")
                .field(FieldMeta::new("id", FieldKind::Integer).primary_key().generated())
                .field(FieldMeta::new("name", FieldKind::Text))
                .relation(RelationMeta::many("teams", Team::meta, "id", "league_id"))
                .build()
        })
    }

    fn from_record(record: &Record) -> Result<Self, DataError> {
        Ok(Self {
            id: record.extract("id")?,
            name: record.extract("name")?,
        })
    }

    fn to_record(&self) -> Record {
        Record::new().with("id", self.id).with("name", self.name.as_str())
    }
}

impl Entity for Team {
    fn meta() -> &'static EntityMeta {
        static META: OnceLock<EntityMeta> = OnceLock::new();
        META.get_or_init(|| {
            EntityMeta::builder("Team", "teams")
                .field(FieldMeta::new("id", FieldKind::Integer).primary_key().generated())
                .field(FieldMeta::new("name", FieldKind::Text))
                .field(FieldMeta::new("league_id", FieldKind::Integer).nullable())
                .relation(RelationMeta::many("players", Player::meta, "id", "team_id"))
                .relation(RelationMeta::one("league", League::meta, "league_id", "id"))
                .build()
        })
    }

    fn from_record(record: &Record) -> Result<Self, DataError> {
        Ok(Self {
            id: record.extract("id")?,
            name: record.extract("name")?,
        })
    }

    fn to_record(&self) -> Record {
        Record::new().with("id", self.id).with("name", self.name.as_str())
    }
}

impl Entity for Player {
    fn meta() -> &'static EntityMeta {
        static META: OnceLock<EntityMeta> = OnceLock::new();
        META.get_or_init(|| {
            EntityMeta::builder("Player", "players")
                .field(FieldMeta::new("id", FieldKind::Integer).primary_key().generated())
                .field(FieldMeta::new("name", FieldKind::Text))
                .field(FieldMeta::new("rating", FieldKind::Float).nullable())
                .field(FieldMeta::new("active", FieldKind::Boolean).default_value(true))
                .field(FieldMeta::new("retired_at", FieldKind::Timestamp).nullable())
                .field(FieldMeta::new("team_id", FieldKind::Integer).nullable())
                .relation(RelationMeta::one("team", Team::meta, "team_id", "id"))
                .build()
        })
    }

    fn from_record(record: &Record) -> Result<Self, DataError> {
        Ok(Self {
            id: record.extract("id")?,
            name: record.extract("name")?,
            team_id: record.extract("team_id")?,
        })
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("name", self.name.as_str())
            .with("team_id", self.team_id)
    }
}

pub fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap()
}
