use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, Set,
};
use tracing::warn;

use crate::db::entities::{server, server_access};
use crate::panel::PanelTarget;
use crate::security::CredentialCipher;

/// Non-removed servers with their cached session rows, for the session
/// refresh sweep.
pub async fn get_all_with_access(
    db: &DatabaseConnection,
) -> Result<Vec<(server::Model, Option<server_access::Model>)>, DbErr> {
    server::Entity::find()
        .filter(server::Column::Removed.eq(false))
        .find_also_related(server_access::Entity)
        .all(db)
        .await
}

/// Resolve every available server into a reachable panel target. Servers
/// with unusable config or no decryptable session are logged and left out;
/// they rejoin the fleet once the session task has refreshed them.
pub async fn get_available_targets(
    db: &DatabaseConnection,
    cipher: &CredentialCipher,
) -> Result<Vec<PanelTarget>, DbErr> {
    let rows = server::Entity::find()
        .filter(server::availabled())
        .find_also_related(server_access::Entity)
        .all(db)
        .await?;

    let mut targets = Vec::with_capacity(rows.len());
    for (srv, access) in rows {
        let Some(config) = srv.panel_config() else {
            warn!(server_id = srv.id, remark = %srv.remark, "server config is not usable");
            continue;
        };
        let Some(access) = access else {
            warn!(server_id = srv.id, remark = %srv.remark, "server has no panel session yet");
            continue;
        };
        let session = match cipher.open(&access.access) {
            Ok(session) => session,
            Err(err) => {
                warn!(server_id = srv.id, error = %err, "stored panel session cannot be opened");
                continue;
            }
        };
        targets.push(PanelTarget {
            server_id: srv.id,
            remark: srv.remark,
            host: config.host,
            session,
            sub_host: config.sub_host,
        });
    }
    Ok(targets)
}

/// A session is refreshed when none exists or when its last write is older
/// than the configured TTL.
pub fn needs_session_refresh(
    access: Option<&server_access::Model>,
    now: DateTime<Utc>,
    ttl_secs: i64,
) -> bool {
    match access {
        None => true,
        Some(row) => {
            let written = row.updated_at.unwrap_or(row.created_at);
            now.signed_duration_since(written).num_seconds() >= ttl_secs
        }
    }
}

pub async fn upsert_access(
    db: &DatabaseConnection,
    server_id: i32,
    sealed: String,
) -> Result<server_access::Model, DbErr> {
    let existing = server_access::Entity::find()
        .filter(server_access::Column::ServerId.eq(server_id))
        .one(db)
        .await?;

    match existing {
        Some(row) => {
            let mut active = row.into_active_model();
            active.access = Set(sealed);
            active.updated_at = Set(Some(Utc::now()));
            active.update(db).await
        }
        None => {
            server_access::ActiveModel {
                server_id: Set(server_id),
                access: Set(sealed),
                created_at: Set(Utc::now()),
                updated_at: Set(None),
                ..Default::default()
            }
            .insert(db)
            .await
        }
    }
}
