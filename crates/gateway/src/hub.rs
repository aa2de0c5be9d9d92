//! Real-time fan-out hub.
//!
//! One task owns the client registry; registrations, subscription changes,
//! and broadcasts all arrive over a bounded command channel it selects on.
//! Clients never share mutable state. A broadcast that would block a slow
//! client drops that event for that client instead of stalling the hub.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sentinel_broker::Broker;
use sentinel_store::Store;

/// Per-client outbound buffer; events past this drop for that client.
const CLIENT_BUFFER: usize = 32;

/// Hub command queue depth.
const COMMAND_BUFFER: usize = 256;

/// How often the aggregated metrics event is published.
const METRICS_INTERVAL: Duration = Duration::from_secs(5);

/// Topics an operator connection may subscribe to. An empty subscription
/// set means "all".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    TrackNew,
    TrackUpdate,
    ProposalNew,
    DecisionMade,
    EffectExecuted,
    MetricsUpdate,
}

impl Topic {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TrackNew => "track.new",
            Self::TrackUpdate => "track.update",
            Self::ProposalNew => "proposal.new",
            Self::DecisionMade => "decision.made",
            Self::EffectExecuted => "effect.executed",
            Self::MetricsUpdate => "metrics.update",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "track.new" => Some(Self::TrackNew),
            "track.update" => Some(Self::TrackUpdate),
            "proposal.new" => Some(Self::ProposalNew),
            "decision.made" => Some(Self::DecisionMade),
            "effect.executed" => Some(Self::EffectExecuted),
            "metrics.update" => Some(Self::MetricsUpdate),
            _ => None,
        }
    }
}

/// The JSON envelope every connected operator receives.
#[derive(Debug, Clone, Serialize)]
pub struct HubEvent {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl HubEvent {
    #[must_use]
    pub fn new(topic: Topic, data: serde_json::Value) -> Self {
        Self {
            event_type: topic.as_str(),
            timestamp: Utc::now(),
            data,
        }
    }
}

enum HubCommand {
    Register {
        id: u64,
        topics: HashSet<Topic>,
        sender: mpsc::Sender<HubEvent>,
    },
    Unregister {
        id: u64,
    },
    Subscribe {
        id: u64,
        topics: Vec<Topic>,
    },
    Unsubscribe {
        id: u64,
        topics: Vec<Topic>,
    },
    Broadcast {
        topic: Topic,
        event: HubEvent,
    },
}

/// Cheap cloneable handle into the hub's command channel.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    next_id: Arc<AtomicU64>,
}

impl HubHandle {
    /// Register a connection. Returns its id and the event receiver.
    pub async fn register(&self, topics: HashSet<Topic>) -> (u64, mpsc::Receiver<HubEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(CLIENT_BUFFER);
        let _ = self
            .commands
            .send(HubCommand::Register { id, topics, sender })
            .await;
        (id, receiver)
    }

    pub async fn unregister(&self, id: u64) {
        let _ = self.commands.send(HubCommand::Unregister { id }).await;
    }

    pub async fn subscribe(&self, id: u64, topics: Vec<Topic>) {
        let _ = self.commands.send(HubCommand::Subscribe { id, topics }).await;
    }

    pub async fn unsubscribe(&self, id: u64, topics: Vec<Topic>) {
        let _ = self
            .commands
            .send(HubCommand::Unsubscribe { id, topics })
            .await;
    }

    /// Publish an event to every matching connection.
    pub async fn broadcast(&self, topic: Topic, data: serde_json::Value) {
        let _ = self
            .commands
            .send(HubCommand::Broadcast {
                topic,
                event: HubEvent::new(topic, data),
            })
            .await;
    }
}

struct Client {
    topics: HashSet<Topic>,
    sender: mpsc::Sender<HubEvent>,
}

/// Spawn the hub owner task plus its broker-ingest and metrics feeders.
/// All tasks stop when `shutdown` fires; client channels close with them.
pub fn spawn_hub(
    broker: Arc<dyn Broker>,
    store: Arc<dyn Store>,
    shutdown: CancellationToken,
) -> HubHandle {
    let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
    let handle = HubHandle {
        commands,
        next_id: Arc::new(AtomicU64::new(1)),
    };

    tokio::spawn(owner_task(receiver, shutdown.clone()));

    // One ephemeral subscription per pipeline surface: the hub observes the
    // streams without competing with their durable consumers.
    let feeds = [
        ("track.classified.>", Topic::TrackNew),
        ("track.correlated.>", Topic::TrackUpdate),
        ("proposal.pending.>", Topic::ProposalNew),
        ("decision.>", Topic::DecisionMade),
        ("effect.>", Topic::EffectExecuted),
    ];
    for (filter, topic) in feeds {
        let broker = Arc::clone(&broker);
        let handle = handle.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut subscription = match broker.subscribe(filter).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    warn!(filter, error = %e, "hub subscription failed");
                    return;
                }
            };
            loop {
                let next = tokio::select! {
                    () = shutdown.cancelled() => break,
                    next = subscription.next() => next,
                };
                let Some((subject, payload)) = next else {
                    break;
                };
                match serde_json::from_slice::<serde_json::Value>(&payload) {
                    Ok(data) => handle.broadcast(topic, data).await,
                    Err(e) => debug!(%subject, error = %e, "unparseable stream payload skipped"),
                }
            }
        });
    }

    // Periodic aggregated metrics for dashboards.
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(METRICS_INTERVAL);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let since = Utc::now() - chrono::Duration::seconds(60);
                        match store.metrics_summary(since).await {
                            Ok(summary) => {
                                if let Ok(data) = serde_json::to_value(&summary) {
                                    handle.broadcast(Topic::MetricsUpdate, data).await;
                                }
                            }
                            Err(e) => debug!(error = %e, "metrics aggregation failed"),
                        }
                    }
                }
            }
        });
    }

    handle
}

async fn owner_task(mut receiver: mpsc::Receiver<HubCommand>, shutdown: CancellationToken) {
    let mut clients: HashMap<u64, Client> = HashMap::new();
    let mut dropped_events: u64 = 0;

    loop {
        let command = tokio::select! {
            () = shutdown.cancelled() => break,
            command = receiver.recv() => command,
        };
        let Some(command) = command else { break };

        match command {
            HubCommand::Register { id, topics, sender } => {
                clients.insert(id, Client { topics, sender });
                debug!(id, clients = clients.len(), "operator connected");
            }
            HubCommand::Unregister { id } => {
                clients.remove(&id);
                debug!(id, clients = clients.len(), "operator disconnected");
            }
            HubCommand::Subscribe { id, topics } => {
                if let Some(client) = clients.get_mut(&id) {
                    client.topics.extend(topics);
                }
            }
            HubCommand::Unsubscribe { id, topics } => {
                if let Some(client) = clients.get_mut(&id) {
                    for topic in topics {
                        client.topics.remove(&topic);
                    }
                }
            }
            HubCommand::Broadcast { topic, event } => {
                let mut disconnected = Vec::new();
                for (id, client) in &clients {
                    if !client.topics.is_empty() && !client.topics.contains(&topic) {
                        continue;
                    }
                    match client.sender.try_send(event.clone()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            // Slow consumer: drop the event, keep the hub hot.
                            dropped_events += 1;
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            disconnected.push(*id);
                        }
                    }
                }
                for id in disconnected {
                    clients.remove(&id);
                }
            }
        }
    }

    // Dropping the registry closes every client channel; connections
    // observe the closure and reconnect.
    info!(dropped_events, "hub stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_broker::StreamSpec;
    use sentinel_broker_memory::MemoryBroker;
    use sentinel_store_memory::MemoryStore;

    async fn test_hub() -> (Arc<MemoryBroker>, HubHandle, CancellationToken) {
        let broker = Arc::new(MemoryBroker::new());
        broker
            .ensure_stream(&StreamSpec::new("TRACKS", "track.>"))
            .await
            .unwrap();
        let store = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();
        let handle = spawn_hub(
            Arc::clone(&broker) as Arc<dyn Broker>,
            store,
            shutdown.clone(),
        );
        (broker, handle, shutdown)
    }

    #[tokio::test]
    async fn topic_filtering() {
        let (_broker, hub, shutdown) = test_hub().await;

        let (_all_id, mut all) = hub.register(HashSet::new()).await;
        let (_tracks_id, mut tracks_only) =
            hub.register(HashSet::from([Topic::TrackNew])).await;

        hub.broadcast(Topic::DecisionMade, serde_json::json!({"n": 1}))
            .await;
        hub.broadcast(Topic::TrackNew, serde_json::json!({"n": 2}))
            .await;

        let first = all.recv().await.unwrap();
        assert_eq!(first.event_type, "decision.made");
        let second = all.recv().await.unwrap();
        assert_eq!(second.event_type, "track.new");

        let only = tracks_only.recv().await.unwrap();
        assert_eq!(only.event_type, "track.new");
        assert_eq!(only.data, serde_json::json!({"n": 2}));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn slow_clients_drop_instead_of_stalling() {
        let (_broker, hub, shutdown) = test_hub().await;

        // Never drained: its buffer fills and overflow drops.
        let (_slow_id, slow) = hub.register(HashSet::new()).await;
        let (_live_id, mut live) = hub.register(HashSet::new()).await;

        for i in 0..(CLIENT_BUFFER + 20) {
            hub.broadcast(Topic::TrackNew, serde_json::json!({"i": i}))
                .await;
        }

        // The healthy client keeps receiving every event.
        for _ in 0..CLIENT_BUFFER {
            assert!(live.recv().await.is_some());
        }
        drop(slow);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn broker_feed_reaches_subscribers() {
        let (broker, hub, shutdown) = test_hub().await;
        let (_id, mut receiver) = hub.register(HashSet::from([Topic::TrackNew])).await;

        broker
            .publish(
                "track.classified.hostile",
                serde_json::to_vec(&serde_json::json!({"track_id": "H-1"}))
                    .unwrap()
                    .into(),
            )
            .await
            .unwrap();

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type, "track.new");
        assert_eq!(event.data["track_id"], "H-1");
        shutdown.cancel();
    }

    #[tokio::test]
    async fn unsubscribe_narrows_delivery() {
        let (_broker, hub, shutdown) = test_hub().await;
        let (id, mut receiver) = hub
            .register(HashSet::from([Topic::TrackNew, Topic::DecisionMade]))
            .await;

        hub.unsubscribe(id, vec![Topic::TrackNew]).await;
        hub.broadcast(Topic::TrackNew, serde_json::json!({})).await;
        hub.broadcast(Topic::DecisionMade, serde_json::json!({})).await;

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type, "decision.made");
        shutdown.cancel();
    }
}
