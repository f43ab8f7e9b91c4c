use std::future::Future;

use chrono::{DateTime, Utc};

use floe_core::error::SyncError;
use floe_core::model::{Message, MessageContent, MessageId};

pub mod network;
pub mod wire;

/// An outgoing send, carrying the local id of the optimistic entry it
/// corresponds to.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: MessageContent,
    pub reply_to: Option<MessageId>,
    pub local_id: MessageId,
}

/// The remote real-time source the synchronization core is a client of.
///
/// Request/response operations live on this trait; push delivery (message
/// batches, typing, presence rosters, room lists) arrives as `remote.*`
/// events published by the implementation. Consumers are generic over the
/// source rather than holding trait objects, so implementations keep native
/// `async fn` bodies.
pub trait RemoteSource: Send + Sync + 'static {
    fn initialize(&self) -> impl Future<Output = Result<(), SyncError>> + Send;

    fn join_room(
        &self,
        room_id: &str,
        user_id: &str,
        display_name: &str,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;

    fn leave_room(&self, room_id: &str) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// Newest `limit` messages of a room, ascending by timestamp.
    fn load_initial_messages(
        &self,
        room_id: &str,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<Message>, SyncError>> + Send;

    /// Up to `limit` messages strictly older than `before`, ascending by
    /// timestamp.
    fn load_older_messages(
        &self,
        room_id: &str,
        before: DateTime<Utc>,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<Message>, SyncError>> + Send;

    /// Returns the server-confirmed record for the send.
    fn send_message(
        &self,
        outbound: OutboundMessage,
    ) -> impl Future<Output = Result<Message, SyncError>> + Send;

    fn set_typing(
        &self,
        room_id: &str,
        user_id: &str,
        display_name: &str,
        is_typing: bool,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// Suspend all push subscriptions (app went to background).
    fn pause_all(&self) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// Tear down the source entirely.
    fn cleanup(&self) -> impl Future<Output = Result<(), SyncError>> + Send;
}
