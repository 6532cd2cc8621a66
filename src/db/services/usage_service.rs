use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, Set,
};
use tracing::warn;

use crate::db::entities::subscription_usage;

/// Record the latest cumulative counter a panel reported for one
/// (subscription, server, inbound, client) tuple.
///
/// Equal values are elided entirely so a quiet fleet causes no writes.
/// A never-before-seen tuple is only persisted once it reports a positive
/// counter, which keeps inactive clients from bloating the table.
pub async fn upsert_usage(
    db: &DatabaseConnection,
    sub_id: i64,
    server_id: i32,
    inbound_id: i64,
    client_id: i64,
    usage: i64,
) -> Result<(), DbErr> {
    let existing = subscription_usage::Entity::find()
        .filter(subscription_usage::Column::SubId.eq(sub_id))
        .filter(subscription_usage::Column::ServerId.eq(server_id))
        .filter(subscription_usage::Column::InboundId.eq(inbound_id))
        .filter(subscription_usage::Column::ClientId.eq(client_id))
        .one(db)
        .await?;

    match existing {
        Some(record) => {
            if record.usage == usage {
                return Ok(());
            }
            if usage < record.usage {
                // Panels reset their counters on reinstall; the stored value
                // follows the panel either way.
                warn!(
                    sub_id,
                    server_id,
                    inbound_id,
                    client_id,
                    stored = record.usage,
                    observed = usage,
                    "cumulative usage moved backwards"
                );
            }
            let mut active = record.into_active_model();
            active.usage = Set(usage);
            active.updated_at = Set(Some(Utc::now()));
            active.update(db).await?;
        }
        None => {
            if usage <= 0 {
                return Ok(());
            }
            subscription_usage::ActiveModel {
                sub_id: Set(sub_id),
                server_id: Set(server_id),
                inbound_id: Set(inbound_id),
                client_id: Set(client_id),
                usage: Set(usage),
                created_at: Set(Utc::now()),
                updated_at: Set(Some(Utc::now())),
                ..Default::default()
            }
            .insert(db)
            .await?;
        }
    }
    Ok(())
}
