use chrono::Utc;
use sea_orm::{DatabaseConnection, DbErr};
use tracing::{error, info, warn};

use crate::db::services::server_service;
use crate::panel::PanelClient;
use crate::security::CredentialCipher;

/// Log in to every non-removed server whose cached panel session is
/// missing or older than `ttl_secs`, and store the sealed replacement.
/// Per-server failures are logged and never abort the sweep.
pub async fn refresh_panel_sessions(
    db: &DatabaseConnection,
    panel: &dyn PanelClient,
    cipher: &CredentialCipher,
    ttl_secs: i64,
) -> Result<(), DbErr> {
    let servers = server_service::get_all_with_access(db).await?;
    let now = Utc::now();

    for (server, access) in servers {
        if !server_service::needs_session_refresh(access.as_ref(), now, ttl_secs) {
            continue;
        }
        let Some(config) = server.panel_config() else {
            warn!(server_id = server.id, remark = %server.remark, "server config is not usable");
            continue;
        };

        match panel
            .login(&config.host, &config.username, &config.password)
            .await
        {
            Ok(session) => {
                let sealed = match cipher.seal(&session) {
                    Ok(sealed) => sealed,
                    Err(err) => {
                        error!(server_id = server.id, error = %err, "failed to seal panel session");
                        continue;
                    }
                };
                server_service::upsert_access(db, server.id, sealed).await?;
                info!(server_id = server.id, remark = %server.remark, "panel session refreshed");
            }
            Err(err) => {
                warn!(server_id = server.id, remark = %server.remark, error = %err, "panel login failed");
            }
        }
    }
    Ok(())
}
