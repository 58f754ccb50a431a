use std::sync::Arc;

use aidesk_core::ChatService;

use crate::auth::PrincipalResolver;

#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    pub resolver: Arc<dyn PrincipalResolver>,
}
