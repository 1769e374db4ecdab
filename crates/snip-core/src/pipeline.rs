//! Fan-out / fan-in plumbing for batch deletion.
//!
//! A caller turns a flat list of [`DeleteRequest`]s into a set of worker
//! channels with [`fan_out`]. A backend merges those channels back into a
//! single stream with [`fan_in`] and applies each request on its own.
//! Requests are commutative, so no ordering is preserved across channels.

use tokio::sync::mpsc;
use tracing::trace;

/// Default number of worker channels used by [`fan_out`].
pub const DEFAULT_WORKERS: usize = 4;

/// Capacity of every channel created by this module.
pub const CHANNEL_CAPACITY: usize = 16;

/// A request to soft-delete `key` on behalf of `owner`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeleteRequest {
    pub key: String,
    pub owner: String,
}

impl DeleteRequest {
    pub fn new(key: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            owner: owner.into(),
        }
    }
}

pub type DeleteSender = mpsc::Sender<DeleteRequest>;
pub type DeleteReceiver = mpsc::Receiver<DeleteRequest>;

/// Creates `count` channels and returns their senders and receivers in matching order.
pub fn channels(count: usize) -> (Vec<DeleteSender>, Vec<DeleteReceiver>) {
    (0..count.max(1))
        .map(|_| mpsc::channel(CHANNEL_CAPACITY))
        .unzip()
}

/// Distributes `requests` round-robin over `workers` channels.
///
/// A single spawned task feeds the channels and drops every sender once all
/// requests are dispatched, which closes the channels. Must be called from
/// within a Tokio runtime.
pub fn fan_out<I>(requests: I, workers: usize) -> Vec<DeleteReceiver>
where
    I: IntoIterator<Item = DeleteRequest>,
    I::IntoIter: Send + 'static,
{
    let (senders, receivers) = channels(workers);
    let requests = requests.into_iter();

    tokio::spawn(async move {
        let mut dispatcher = RoundRobin::new(senders);
        for request in requests {
            if !dispatcher.send(request).await {
                break;
            }
        }
    });

    receivers
}

/// Merges every input channel into one.
///
/// One forwarding task runs per input. The returned channel closes after all
/// inputs are closed and drained. Must be called from within a Tokio runtime.
pub fn fan_in(inputs: Vec<DeleteReceiver>) -> DeleteReceiver {
    let (merged, output) = mpsc::channel(CHANNEL_CAPACITY);

    for mut input in inputs {
        let merged = merged.clone();
        tokio::spawn(async move {
            while let Some(request) = input.recv().await {
                if merged.send(request).await.is_err() {
                    trace!("merged delete stream dropped, stopping forwarder");
                    return;
                }
            }
        });
    }

    output
}

/// Sends to a fixed set of channels in turn.
#[derive(Debug)]
pub struct RoundRobin {
    senders: Vec<DeleteSender>,
    next: usize,
}

impl RoundRobin {
    pub fn new(senders: Vec<DeleteSender>) -> Self {
        Self { senders, next: 0 }
    }

    /// Sends `request` to the next open channel.
    ///
    /// Channels whose receiver has gone away are dropped from the rotation.
    /// Returns `false` when no channel is left.
    pub async fn send(&mut self, mut request: DeleteRequest) -> bool {
        while !self.senders.is_empty() {
            let index = self.next % self.senders.len();
            match self.senders[index].send(request).await {
                Ok(()) => {
                    self.next = index + 1;
                    return true;
                }
                Err(mpsc::error::SendError(returned)) => {
                    trace!(channel = index, "delete worker channel closed");
                    self.senders.remove(index);
                    self.next = index;
                    request = returned;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn requests(count: usize) -> Vec<DeleteRequest> {
        (0..count)
            .map(|i| DeleteRequest::new(format!("key-{i}"), "owner"))
            .collect()
    }

    #[tokio::test]
    async fn fan_out_distributes_round_robin() {
        let mut receivers = fan_out(requests(10), 4);
        assert_eq!(receivers.len(), 4);

        let mut per_channel = Vec::new();
        for receiver in receivers.iter_mut() {
            let mut keys = Vec::new();
            while let Some(request) = receiver.recv().await {
                keys.push(request.key);
            }
            per_channel.push(keys);
        }

        assert_eq!(per_channel[0], vec!["key-0", "key-4", "key-8"]);
        assert_eq!(per_channel[1], vec!["key-1", "key-5", "key-9"]);
        assert_eq!(per_channel[2], vec!["key-2", "key-6"]);
        assert_eq!(per_channel[3], vec!["key-3", "key-7"]);
    }

    #[tokio::test]
    async fn fan_in_merges_every_request() {
        let mut merged = fan_in(fan_out(requests(100), DEFAULT_WORKERS));

        let mut seen = HashSet::new();
        while let Some(request) = merged.recv().await {
            assert!(seen.insert(request.key));
        }
        assert_eq!(seen.len(), 100);
    }

    #[tokio::test]
    async fn empty_input_closes_all_channels() {
        let mut merged = fan_in(fan_out(Vec::new(), 3));
        assert!(merged.recv().await.is_none());
    }

    #[tokio::test]
    async fn zero_workers_still_gets_one_channel() {
        let receivers = fan_out(requests(3), 0);
        assert_eq!(receivers.len(), 1);
    }

    #[tokio::test]
    async fn round_robin_skips_closed_channels() {
        let (senders, mut receivers) = channels(2);
        let second = receivers.pop().unwrap();
        drop(second);

        let mut dispatcher = RoundRobin::new(senders);
        assert!(dispatcher.send(DeleteRequest::new("a", "o")).await);
        assert!(dispatcher.send(DeleteRequest::new("b", "o")).await);
        drop(dispatcher);

        let first = &mut receivers[0];
        assert_eq!(first.recv().await.unwrap().key, "a");
        assert_eq!(first.recv().await.unwrap().key, "b");
        assert!(first.recv().await.is_none());
    }

    #[tokio::test]
    async fn round_robin_reports_when_everything_is_closed() {
        let (senders, receivers) = channels(2);
        drop(receivers);

        let mut dispatcher = RoundRobin::new(senders);
        assert!(!dispatcher.send(DeleteRequest::new("a", "o")).await);
    }
}
