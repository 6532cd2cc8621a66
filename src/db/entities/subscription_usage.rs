use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One row per distinct (subscription, server, inbound, client) tuple ever
/// observed with a positive counter. Rows are created lazily and never
/// deleted; `usage` tracks the latest cumulative byte count the panel
/// reported for that client.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "subscription_usages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub sub_id: i64,
    pub server_id: i32,
    pub inbound_id: i64,
    pub client_id: i64,
    pub usage: i64,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: Option<ChronoDateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::subscription::Entity",
        from = "Column::SubId",
        to = "super::subscription::Column::Id"
    )]
    Subscription,
    #[sea_orm(
        belongs_to = "super::server::Entity",
        from = "Column::ServerId",
        to = "super::server::Column::Id"
    )]
    Server,
}

impl Related<super::subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscription.def()
    }
}

impl Related<super::server::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Server.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
