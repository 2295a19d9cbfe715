//! Process-wide table of live trade sessions
//!
//! Sessions are indexed by id and by each participant. Both indexes sit
//! behind one `RwLock` so creation can check and claim both users in a
//! single critical section. The lock is never held across an `.await`;
//! callers lock the returned [`SessionHandle`] afterwards.

use barterbay_common::{Participant, TradeId, UserId};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{TradeError, TradeResult};
use crate::session::TradeSession;

/// Shared, lockable session
pub type SessionHandle = Arc<Mutex<TradeSession>>;

struct Entry {
    handle: SessionHandle,
    participants: [UserId; 2],
}

#[derive(Default)]
struct RegistryInner {
    sessions: FxHashMap<TradeId, Entry>,
    by_user: FxHashMap<UserId, TradeId>,
}

/// Registry of non-terminal sessions
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an `INVITED` session between two free users
    pub fn create_session(
        &self,
        initiator: Participant,
        partner: Participant,
    ) -> TradeResult<(TradeId, SessionHandle)> {
        if initiator.id == partner.id {
            return Err(TradeError::SelfTrade);
        }

        let mut inner = self.inner.write();
        for user_id in [initiator.id, partner.id] {
            if inner.by_user.contains_key(&user_id) {
                return Err(TradeError::AlreadyInSession { user_id });
            }
        }

        let trade_id = TradeId::generate();
        let (initiator_id, partner_id) = (initiator.id, partner.id);
        let handle = Arc::new(Mutex::new(TradeSession::new(
            trade_id.clone(),
            initiator,
            partner,
        )));

        inner.sessions.insert(
            trade_id.clone(),
            Entry {
                handle: Arc::clone(&handle),
                participants: [initiator_id, partner_id],
            },
        );
        inner.by_user.insert(initiator_id, trade_id.clone());
        inner.by_user.insert(partner_id, trade_id.clone());

        debug!(trade_id = %trade_id, initiator = %initiator_id, partner = %partner_id, "Session registered");
        Ok((trade_id, handle))
    }

    #[must_use]
    pub fn get_session(&self, trade_id: &TradeId) -> Option<SessionHandle> {
        self.inner
            .read()
            .sessions
            .get(trade_id)
            .map(|entry| Arc::clone(&entry.handle))
    }

    /// Session the user currently participates in
    #[must_use]
    pub fn active_session_for_user(&self, user_id: UserId) -> Option<SessionHandle> {
        let inner = self.inner.read();
        inner
            .by_user
            .get(&user_id)
            .and_then(|trade_id| inner.sessions.get(trade_id))
            .map(|entry| Arc::clone(&entry.handle))
    }

    /// Drop a session and any user index entries still pointing at it
    pub fn remove_session(&self, trade_id: &TradeId) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.sessions.remove(trade_id) else {
            return false;
        };

        for user_id in entry.participants {
            if inner.by_user.get(&user_id) == Some(trade_id) {
                inner.by_user.remove(&user_id);
            }
        }

        debug!(trade_id = %trade_id, "Session unregistered");
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().sessions.is_empty()
    }

    /// Snapshot of live session ids
    #[must_use]
    pub fn session_ids(&self) -> Vec<TradeId> {
        self.inner.read().sessions.keys().cloned().collect()
    }
}
