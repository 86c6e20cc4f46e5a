//! Poll entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "poll")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Question shown to voters
    pub question: String,

    /// Category the poll is grouped under for category-level gating
    #[sea_orm(indexed)]
    pub category: String,

    /// Voting cycle the poll belongs to (e.g. `2026-10`)
    #[sea_orm(indexed)]
    pub cycle: String,

    /// Whether votes are still accepted
    pub is_active: bool,

    /// When the cycle window closes (null for open-ended polls)
    #[sea_orm(nullable)]
    pub ends_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::poll_option::Entity")]
    PollOption,

    #[sea_orm(has_many = "super::vote::Entity")]
    Vote,
}

impl Related<super::poll_option::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PollOption.def()
    }
}

impl Related<super::vote::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Vote.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether the poll accepts votes at `now`.
    #[must_use]
    pub fn is_open_at(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.is_active && self.ends_at.as_ref().is_none_or(|ends| *ends > now)
    }
}
