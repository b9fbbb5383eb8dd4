use tokio::sync::watch;

/// Passive notification over the tables a query read.
///
/// Receivers must be subscribed *before* the snapshot used to evaluate the
/// query is taken: a write landing between subscription and wait is then
/// observed as an immediate wake rather than lost. Notifications are
/// coalesced and may be spurious; callers re-evaluate and check the table
/// index before replying.
#[derive(Default)]
pub struct WatchSet {
    receivers: Vec<watch::Receiver<u64>>,
}

impl WatchSet {
    pub fn new() -> Self {
        WatchSet::default()
    }

    pub(crate) fn subscribe(&mut self, receiver: watch::Receiver<u64>) {
        self.receivers.push(receiver);
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }

    /// Resolves when any subscribed table advances. Pending forever when
    /// nothing was subscribed.
    pub async fn wait(self) {
        if self.receivers.is_empty() {
            std::future::pending::<()>().await;
            return;
        }

        let waits = self
            .receivers
            .into_iter()
            .map(|mut receiver| {
                Box::pin(async move {
                    // A closed sender means the store is gone; treat as a wake
                    // so the caller can observe shutdown.
                    let _ = receiver.changed().await;
                })
            })
            .collect::<Vec<_>>();

        let _ = futures::future::select_all(waits).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn wakes_on_any_subscription() {
        let (tx_a, rx_a) = watch::channel(0_u64);
        let (_tx_b, rx_b) = watch::channel(0_u64);

        let mut ws = WatchSet::new();
        ws.subscribe(rx_a);
        ws.subscribe(rx_b);

        let wait = tokio::spawn(ws.wait());
        tx_a.send(1).expect("receiver alive");
        tokio::time::timeout(Duration::from_secs(1), wait)
            .await
            .expect("woke")
            .expect("join");
    }

    #[tokio::test]
    async fn write_before_wait_is_not_lost() {
        let (tx, rx) = watch::channel(0_u64);

        let mut ws = WatchSet::new();
        ws.subscribe(rx);

        // Mutation lands after subscription but before the wait starts.
        tx.send(1).expect("receiver alive");

        tokio::time::timeout(Duration::from_millis(100), ws.wait())
            .await
            .expect("immediate wake");
    }

    #[tokio::test]
    async fn empty_watch_set_never_fires() {
        let ws = WatchSet::new();
        assert!(ws.is_empty());
        let timed_out = tokio::time::timeout(Duration::from_millis(50), ws.wait()).await.is_err();
        assert!(timed_out);
    }
}
