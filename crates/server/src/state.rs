use std::sync::Arc;

use configs::AuthConfig;
use service::resources::ResourceService;
use service::state_store::SharedDocumentDb;

#[derive(Clone)]
pub struct ServerState {
    pub resources: ResourceService,
    pub auth: Arc<AuthConfig>,
    /// `None` when the state store could not be reached at startup.
    pub state_store: Option<SharedDocumentDb>,
}
