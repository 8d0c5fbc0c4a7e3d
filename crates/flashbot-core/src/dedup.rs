use std::collections::{HashSet, VecDeque};

use crate::domain::MessageRef;

/// Bounded set of already-processed update identities.
///
/// Telegram re-delivers a webhook update when the listener answers slowly; a
/// re-delivered update must not produce a second model call. Eviction is
/// oldest-first once the cap is reached.
pub struct SeenUpdates {
    cap: usize,
    seen: HashSet<MessageRef>,
    order: VecDeque<MessageRef>,
}

impl SeenUpdates {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns `true` if the update is fresh (first time seen).
    pub fn insert(&mut self, id: MessageRef) -> bool {
        if !self.seen.insert(id) {
            return false;
        }

        self.order.push_back(id);
        while self.order.len() > self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChatId, MessageId};

    fn mref(chat: i64, msg: i32) -> MessageRef {
        MessageRef {
            chat_id: ChatId(chat),
            message_id: MessageId(msg),
        }
    }

    #[test]
    fn second_insert_is_a_duplicate() {
        let mut s = SeenUpdates::new(10);
        assert!(s.insert(mref(1, 1)));
        assert!(!s.insert(mref(1, 1)));
    }

    #[test]
    fn same_message_id_in_other_chat_is_fresh() {
        let mut s = SeenUpdates::new(10);
        assert!(s.insert(mref(1, 1)));
        assert!(s.insert(mref(2, 1)));
    }

    #[test]
    fn eviction_is_oldest_first() {
        let mut s = SeenUpdates::new(2);
        assert!(s.insert(mref(1, 1)));
        assert!(s.insert(mref(1, 2)));
        assert!(s.insert(mref(1, 3))); // evicts (1,1)
        assert!(s.insert(mref(1, 1)));
        assert!(!s.insert(mref(1, 3)));
    }
}
