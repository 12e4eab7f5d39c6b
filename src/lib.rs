pub mod ai;
pub mod chat;
pub mod data;
pub mod middleware;
pub mod router;
pub mod utils;

use std::sync::Arc;

use ai::GatewayClient;
use data::ChatRepository;

#[derive(Clone)]
pub struct AppState {
    pub chat_repo: ChatRepository,
    pub gateway: Arc<GatewayClient>,
}
