//! Identity lookup across the member roster and the chat platform.

use tracing::warn;

use crate::gateway::{Gateway, Identity};
use crate::store::Store;

/// Resolve `user_id` to a chat identity.
///
/// The platform is asked first, in the chats the roster has seen the user in
/// and then the configured ones. When it has no answer, the roster's own
/// record of the user is used.
pub async fn resolve_identity(store: &Store, gateway: &dyn Gateway, user_id: i64) -> Option<Identity> {
    let mut memberships = store.memberships(user_id).await.unwrap_or_else(|e| {
        warn!("Roster lookup for {} failed: {}", user_id, e);
        Vec::new()
    });
    let chats: Vec<i64> = memberships.iter().map(|m| m.chat_id).collect();

    if let Some(identity) = gateway.resolve_member(user_id, &chats).await {
        return Some(identity);
    }
    memberships.pop().map(|m| m.identity)
}
