use crate::models::{DatasetId, TableId};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// A change event broadcast to live subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    Row {
        table_id: TableId,
        source_id: String,
        data: serde_json::Value,
    },
    Object {
        dataset_id: DatasetId,
        object_type: String,
        data: serde_json::Value,
    },
    Ping,
}

/// Broadcast channel for `Operation`s.
///
/// Cloning the bus shares the same channel. Each `subscribe()` attaches a new
/// receiver; dropping the `OperationSubscription` detaches it.
#[derive(Clone)]
pub struct OperationBus {
    tx: broadcast::Sender<Operation>,
}

impl OperationBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to all currently attached subscribers and return how many received it.
    ///
    /// Publishing with no subscribers is not an error; the operation is dropped.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn publish(&self, op: Operation) -> usize {
        self.tx.send(op).unwrap_or(0)
    }

    pub fn subscribe(&self) -> OperationSubscription {
        OperationSubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for OperationBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// A live attachment to the bus.
pub struct OperationSubscription {
    rx: broadcast::Receiver<Operation>,
}

impl OperationSubscription {
    /// Wait for the next operation. Returns `None` once the bus is gone.
    ///
    /// A subscriber that falls behind the channel capacity skips the overwritten
    /// operations and continues with the oldest retained one.
    pub async fn recv(&mut self) -> Option<Operation> {
        loop {
            match self.rx.recv().await {
                Ok(op) => return Some(op),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "operation subscriber lagged; dropping operations");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when nothing is pending.
    pub fn try_recv(&mut self) -> Option<Operation> {
        loop {
            match self.rx.try_recv() {
                Ok(op) => return Some(op),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "operation subscriber lagged; dropping operations");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain everything currently pending.
    pub fn drain(&mut self) -> Vec<Operation> {
        let mut out = Vec::new();
        while let Some(op) = self.try_recv() {
            out.push(op);
        }
        out
    }

    pub fn into_stream(self) -> impl Stream<Item = Operation> + Send + 'static {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|op| (op, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn late_subscribers_do_not_see_earlier_operations() {
        let bus = OperationBus::new(16);
        assert_eq!(bus.publish(Operation::Ping), 0);

        let mut sub = bus.subscribe();
        assert!(sub.try_recv().is_none());

        assert_eq!(bus.publish(Operation::Ping), 1);
        assert_eq!(sub.drain(), vec![Operation::Ping]);
    }

    #[test]
    fn dropping_a_subscription_detaches_it() {
        let bus = OperationBus::new(16);
        let a = bus.subscribe();
        let _b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        drop(a);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn lagging_subscriber_keeps_the_newest_operations() {
        let bus = OperationBus::new(2);
        let mut sub = bus.subscribe();
        for i in 0..5 {
            bus.publish(Operation::Object {
                dataset_id: DatasetId::new(),
                object_type: format!("o{i}"),
                data: serde_json::json!(i),
            });
        }
        let got = sub.drain();
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn operations_serialize_with_kind_tag() {
        let v = serde_json::to_value(Operation::Ping).unwrap();
        assert_eq!(v, serde_json::json!({"kind": "ping"}));
    }

    #[tokio::test]
    async fn stream_ends_when_bus_is_dropped() {
        let bus = OperationBus::new(4);
        let stream = bus.subscribe().into_stream();
        bus.publish(Operation::Ping);
        drop(bus);
        let got: Vec<Operation> = stream.collect().await;
        assert_eq!(got, vec![Operation::Ping]);
    }
}
