// utils.rs
use super::models::AppState;
use tracing::info;
use uuid::Uuid;

pub async fn cleanup_client_connection(client_id: Uuid, state: &AppState) {
    if let Some((_, connected_at)) = state.clients.remove(&client_id) {
        let seconds = (chrono::Utc::now() - connected_at).num_seconds();
        info!(%client_id, seconds, "Client disconnected");
    }
}
