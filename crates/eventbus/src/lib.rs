//! Event Bus (C5): per-connection subscription state and fan-out of
//! reconciled lifecycle changes to live-stream clients (§4.5).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use th_protocol::{ClientFrame, EventType, ServerFrame, MAX_QUEUE_DEPTH};
use th_reconcile::{EventSink, LifecycleEvent};

/// One live-stream connection's server-side handle: its outbound channel
/// and its current event-type subscription set.
pub struct Connection {
    pub id: String,
    subscriptions: RwLock<HashSet<EventType>>,
    sink: mpsc::Sender<ServerFrame>,
}

impl Connection {
    /// Enqueues `frame`. A full queue means a slow consumer; the caller
    /// disconnects it (§5) rather than blocking the producer.
    fn try_send(&self, frame: ServerFrame) -> bool {
        self.sink.try_send(frame).is_ok()
    }

    fn is_subscribed(&self, event_type: EventType) -> bool {
        self.subscriptions.read().contains(&event_type)
    }
}

/// Registry of all connected live-stream clients (§4.5 "the bus maintains
/// per-connection state"). Grounded on the same connection-registry shape
/// used elsewhere in this codebase for other duplex-channel fan-out.
#[derive(Default)]
pub struct Hub {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection and returns its handle plus the receiver
    /// half the caller's writer task drains. The caller is responsible for
    /// sending the `connection.established` welcome frame.
    pub fn register(&self) -> (Arc<Connection>, mpsc::Receiver<ServerFrame>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(MAX_QUEUE_DEPTH);
        let conn = Arc::new(Connection {
            id: id.clone(),
            subscriptions: RwLock::new(HashSet::new()),
            sink: tx,
        });
        self.connections.write().insert(id, conn.clone());
        (conn, rx)
    }

    pub fn remove(&self, id: &str) {
        if self.connections.write().remove(id).is_some() {
            tracing::debug!(connection_id = id, "live-stream connection removed");
        }
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Applies an inbound `ClientFrame` and returns the direct response the
    /// connection's writer should send (subscribe/unsubscribe confirmations,
    /// pong). Returns `None` for frames that need no reply.
    pub fn handle_client_frame(&self, id: &str, frame: ClientFrame) -> Option<ServerFrame> {
        let connections = self.connections.read();
        let conn = connections.get(id)?;
        match frame {
            ClientFrame::Subscribe { events } => {
                conn.subscriptions.write().extend(events.iter().copied());
                Some(ServerFrame::subscription_confirmed(events))
            }
            ClientFrame::Unsubscribe { events } => {
                let mut subs = conn.subscriptions.write();
                for event in &events {
                    subs.remove(event);
                }
                Some(ServerFrame::subscription_confirmed(events))
            }
            ClientFrame::Ping => Some(ServerFrame::pong()),
        }
    }

    /// Serializes `frame` once and enqueues it on every connection
    /// subscribed to its event type. Connections whose queue is full are
    /// disconnected (§5).
    pub async fn broadcast(&self, frame: ServerFrame) {
        let Some(event_type) = frame.event_type() else {
            return;
        };
        let targets: Vec<Arc<Connection>> = self
            .connections
            .read()
            .values()
            .filter(|c| c.is_subscribed(event_type))
            .cloned()
            .collect();

        let mut dead = Vec::new();
        for conn in targets {
            if !conn.try_send(frame.clone()) {
                dead.push(conn.id.clone());
            }
        }
        for id in dead {
            tracing::warn!(connection_id = %id, "disconnecting slow live-stream consumer");
            self.remove(&id);
        }
    }

    /// Emitted by the Query Surface when it recomputes summary figures
    /// (§4.5: `stats.updated`, outside the Reconciliation Engine's emission
    /// policy).
    pub async fn emit_stats_updated(&self, data: Value) {
        self.broadcast(ServerFrame::lifecycle(EventType::StatsUpdated, data)).await;
    }
}

fn run_event_payload(run: &th_domain::run::Run, changed_fields: Option<&[&'static str]>) -> Value {
    let mut value = serde_json::to_value(run).unwrap_or(Value::Null);
    if let (Value::Object(map), Some(fields)) = (&mut value, changed_fields) {
        map.insert("changed_fields".to_string(), serde_json::json!(fields));
    }
    value
}

#[async_trait]
impl EventSink for Hub {
    async fn emit(&self, event: LifecycleEvent) {
        let (event_type, payload) = match &event {
            LifecycleEvent::Created(run) => (EventType::TraceCreated, run_event_payload(run, None)),
            LifecycleEvent::Updated(run, change_set) => {
                (EventType::TraceUpdated, run_event_payload(run, Some(&change_set.fields)))
            }
            LifecycleEvent::Completed(run) => (EventType::TraceCompleted, run_event_payload(run, None)),
            LifecycleEvent::Failed(run) => (EventType::TraceFailed, run_event_payload(run, None)),
        };
        self.broadcast(ServerFrame::lifecycle(event_type, payload)).await;
    }
}
