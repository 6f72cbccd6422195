//! Pending-request table: ActionID -> one-shot reply slot.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::{
    error::{AmiError, AmiResult, DisconnectReason},
    message::AmiMessage,
};

type ReplySender = oneshot::Sender<Result<AmiMessage, AmiError>>;

/// Receiver half of a reply slot, handed to the caller awaiting a reply.
pub(crate) type ReplySlot = oneshot::Receiver<Result<AmiMessage, AmiError>>;

/// Maps each outstanding ActionID to its reply slot.
///
/// All operations take the table mutex only for map mutation; slot
/// fulfilment happens after the lock is released. The table holds at most
/// one entry per id - a second register with a live id is a caller error.
#[derive(Default)]
pub(crate) struct PendingTable {
    slots: Mutex<HashMap<String, ReplySender>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a slot for `id` and return its receiving half.
    pub fn register(&self, id: &str) -> AmiResult<ReplySlot> {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots.lock().expect("pending table lock poisoned");
        if slots.contains_key(id) {
            return Err(AmiError::DuplicateActionId {
                action_id: id.to_string(),
            });
        }
        slots.insert(id.to_string(), tx);
        Ok(rx)
    }

    /// Fulfil the slot for `id` with `message`.
    ///
    /// Returns `None` when the message was consumed as a reply, or gives the
    /// message back when no entry exists so the dispatcher can deliver it as
    /// an event.
    pub fn complete(&self, id: &str, message: AmiMessage) -> Option<AmiMessage> {
        let sender = {
            let mut slots = self.slots.lock().expect("pending table lock poisoned");
            slots.remove(id)
        };
        match sender {
            Some(tx) => {
                // The receiver may have been dropped by a cancelled caller;
                // the reply is then discarded, never re-routed.
                let _ = tx.send(Ok(message));
                None
            }
            None => Some(message),
        }
    }

    /// Remove the slot for `id`, fulfilling it with `Cancelled`.
    pub fn cancel(&self, id: &str) {
        let sender = {
            let mut slots = self.slots.lock().expect("pending table lock poisoned");
            slots.remove(id)
        };
        if let Some(tx) = sender {
            let _ = tx.send(Err(AmiError::Cancelled));
        }
    }

    /// Remove every slot, fulfilling each with the terminal cause.
    pub fn fail_all(&self, cause: &DisconnectReason) {
        let drained: Vec<ReplySender> = {
            let mut slots = self.slots.lock().expect("pending table lock poisoned");
            slots.drain().map(|(_, tx)| tx).collect()
        };
        for tx in drained {
            let _ = tx.send(Err(AmiError::ClientClosed(cause.clone())));
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str) -> AmiMessage {
        format!("Response: Success\r\nActionID: {}", id).parse().unwrap()
    }

    #[tokio::test]
    async fn register_then_complete_delivers_reply() {
        let table = PendingTable::new();
        let slot = table.register("A").unwrap();

        assert!(table.complete("A", message("A")).is_none());
        let reply = slot.await.unwrap().unwrap();
        assert_eq!(reply.action_id(), Some("A"));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn duplicate_register_is_rejected_and_first_survives() {
        let table = PendingTable::new();
        let _slot = table.register("A").unwrap();

        let err = table.register("A").unwrap_err();
        assert!(matches!(err, AmiError::DuplicateActionId { action_id } if action_id == "A"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn complete_without_entry_returns_message_back() {
        let table = PendingTable::new();
        let returned = table.complete("missing", message("missing"));
        assert!(returned.is_some());
    }

    #[tokio::test]
    async fn second_complete_with_same_id_is_an_event() {
        let table = PendingTable::new();
        let slot = table.register("X").unwrap();

        assert!(table.complete("X", message("X")).is_none());
        assert!(table.complete("X", message("X")).is_some());
        slot.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancel_fulfils_with_cancelled() {
        let table = PendingTable::new();
        let slot = table.register("A").unwrap();

        table.cancel("A");
        let err = slot.await.unwrap().unwrap_err();
        assert!(matches!(err, AmiError::Cancelled));
        // The id is free again
        assert!(table.register("A").is_ok());
    }

    #[tokio::test]
    async fn fail_all_fans_out_same_cause() {
        let table = PendingTable::new();
        let slot_a = table.register("A").unwrap();
        let slot_b = table.register("B").unwrap();

        table.fail_all(&DisconnectReason::ConnectionClosed);

        for slot in [slot_a, slot_b] {
            let err = slot.await.unwrap().unwrap_err();
            assert!(matches!(
                err,
                AmiError::ClientClosed(DisconnectReason::ConnectionClosed)
            ));
        }
        assert_eq!(table.len(), 0);
    }
}
