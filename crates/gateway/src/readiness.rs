//! Process readiness: is the listener up, is the store connected.
//!
//! The bootstrap sequencer owns the only [`ReadinessWriter`]; everything else
//! holds a [`Readiness`] handle and reads immutable snapshots. Both flags only
//! ever move from `false` to `true`.

use {serde::Serialize, tokio::sync::watch};

/// Point-in-time view of process readiness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessState {
    pub store_connected: bool,
    pub listener_active: bool,
}

/// Create the writer/reader pair. Both flags start `false`.
pub fn channel() -> (ReadinessWriter, Readiness) {
    let (tx, rx) = watch::channel(ReadinessState::default());
    (ReadinessWriter { tx }, Readiness { rx })
}

/// Sole mutator of readiness. Not `Clone`.
#[derive(Debug)]
pub struct ReadinessWriter {
    tx: watch::Sender<ReadinessState>,
}

impl ReadinessWriter {
    /// Returns `true` if this call flipped the flag.
    pub fn mark_listener_active(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if state.listener_active {
                return false;
            }
            state.listener_active = true;
            true
        })
    }

    /// Returns `true` if this call flipped the flag.
    pub fn mark_store_connected(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if state.store_connected {
                return false;
            }
            state.store_connected = true;
            true
        })
    }

    pub fn snapshot(&self) -> ReadinessState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> Readiness {
        Readiness {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only readiness handle, cheap to clone into request handlers.
#[derive(Debug, Clone)]
pub struct Readiness {
    rx: watch::Receiver<ReadinessState>,
}

impl Readiness {
    /// Current state. Never suspends.
    pub fn snapshot(&self) -> ReadinessState {
        *self.rx.borrow()
    }

    /// Wait until the store is connected.
    ///
    /// Returns `false` if the writer goes away first, which happens once the
    /// sequencer has given up on the store.
    pub async fn wait_for_store(&self) -> bool {
        let mut rx = self.rx.clone();
        rx.wait_for(|state| state.store_connected).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_not_ready() {
        let (writer, reader) = channel();
        assert_eq!(writer.snapshot(), ReadinessState::default());
        assert!(!reader.snapshot().store_connected);
        assert!(!reader.snapshot().listener_active);
    }

    #[test]
    fn marks_are_idempotent() {
        let (writer, reader) = channel();

        assert!(writer.mark_listener_active());
        let after_first = reader.snapshot();
        assert!(!writer.mark_listener_active());
        assert_eq!(reader.snapshot(), after_first);

        assert!(writer.mark_store_connected());
        let after_first = reader.snapshot();
        assert!(!writer.mark_store_connected());
        assert_eq!(reader.snapshot(), after_first);

        assert_eq!(reader.snapshot(), ReadinessState {
            store_connected: true,
            listener_active: true,
        });
    }

    #[test]
    fn flags_are_independent() {
        let (writer, reader) = channel();
        writer.mark_store_connected();
        assert_eq!(reader.snapshot(), ReadinessState {
            store_connected: true,
            listener_active: false,
        });
    }

    #[test]
    fn subscribers_see_later_writes() {
        let (writer, _reader) = channel();
        let late = writer.subscribe();
        writer.mark_listener_active();
        assert!(late.snapshot().listener_active);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(ReadinessState {
            store_connected: false,
            listener_active: true,
        })
        .unwrap();
        assert_eq!(json["storeConnected"], false);
        assert_eq!(json["listenerActive"], true);
    }

    #[tokio::test]
    async fn wait_for_store_resolves_on_connect() {
        let (writer, reader) = channel();
        let waiter = tokio::spawn({
            let reader = reader.clone();
            async move { reader.wait_for_store().await }
        });
        writer.mark_store_connected();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn wait_for_store_gives_up_when_writer_dropped() {
        let (writer, reader) = channel();
        drop(writer);
        assert!(!reader.wait_for_store().await);
    }
}
