use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::ConfigHandle;
use crate::panel::PanelClient;
use crate::security::CredentialCipher;

/// Everything the web handlers, admin operations and periodic tasks share.
/// Cloning is cheap; the panel client and cipher are reference-counted.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub panel: Arc<dyn PanelClient>,
    pub cipher: Arc<CredentialCipher>,
    pub config: ConfigHandle,
}
