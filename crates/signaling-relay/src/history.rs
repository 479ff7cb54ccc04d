//! Membership history: who has been admitted to a room before.
//!
//! A user found in history skips host approval on their next join request.
//! Lookups that fail are treated as "never joined", which only costs the
//! user a trip through the host.

use crate::errors::RelayError;
use async_trait::async_trait;
use common::types::{RoomId, UserId};
use std::collections::HashSet;
use tokio::sync::RwLock;

/// Storage for past admissions.
#[async_trait]
pub trait MembershipHistory: Send + Sync {
    /// Whether `user_id` has been admitted to `room_id` before.
    async fn has_joined(&self, room_id: RoomId, user_id: UserId) -> Result<bool, RelayError>;

    /// Remember that `user_id` was admitted to `room_id`.
    async fn record_admission(&self, room_id: RoomId, user_id: UserId) -> Result<(), RelayError>;
}

/// Process-local history. Forgotten on restart.
#[derive(Debug, Default)]
pub struct InMemoryMembershipHistory {
    joined: RwLock<HashSet<(RoomId, UserId)>>,
}

impl InMemoryMembershipHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MembershipHistory for InMemoryMembershipHistory {
    async fn has_joined(&self, room_id: RoomId, user_id: UserId) -> Result<bool, RelayError> {
        Ok(self.joined.read().await.contains(&(room_id, user_id)))
    }

    async fn record_admission(&self, room_id: RoomId, user_id: UserId) -> Result<(), RelayError> {
        self.joined.write().await.insert((room_id, user_id));
        Ok(())
    }
}
