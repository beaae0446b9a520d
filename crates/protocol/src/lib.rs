//! Wire types for the live-stream protocol (§6.4). A connection is a
//! duplex JSON-frame channel at `/ws`: clients send [`ClientFrame`]s,
//! the server replies and pushes with [`ServerFrame`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum queued-but-undelivered frames per connection before the
/// connection is dropped as a slow consumer (§5 bounds).
pub const MAX_QUEUE_DEPTH: usize = 1000;

/// Client-facing lifecycle event kinds a subscriber can filter on (§4.5, §6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "trace.created")]
    TraceCreated,
    #[serde(rename = "trace.updated")]
    TraceUpdated,
    #[serde(rename = "trace.completed")]
    TraceCompleted,
    #[serde(rename = "trace.failed")]
    TraceFailed,
    #[serde(rename = "stats.updated")]
    StatsUpdated,
}

impl EventType {
    pub fn all() -> [EventType; 5] {
        [
            EventType::TraceCreated,
            EventType::TraceUpdated,
            EventType::TraceCompleted,
            EventType::TraceFailed,
            EventType::StatsUpdated,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::TraceCreated => "trace.created",
            EventType::TraceUpdated => "trace.updated",
            EventType::TraceCompleted => "trace.completed",
            EventType::TraceFailed => "trace.failed",
            EventType::StatsUpdated => "stats.updated",
        }
    }
}

/// Frames sent by the client over `/ws`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe {
        #[serde(default)]
        events: Vec<EventType>,
    },
    Unsubscribe {
        #[serde(default)]
        events: Vec<EventType>,
    },
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEstablishedData {
    pub client_id: String,
    pub supported_events: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfirmedData {
    pub events: Vec<EventType>,
}

/// Frames sent by the server over `/ws`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "connection.established")]
    ConnectionEstablished {
        data: ConnectionEstablishedData,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "subscription.confirmed")]
    SubscriptionConfirmed {
        data: SubscriptionConfirmedData,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "pong")]
    Pong { timestamp: DateTime<Utc> },
    #[serde(rename = "trace.created")]
    TraceCreated { data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "trace.updated")]
    TraceUpdated { data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "trace.completed")]
    TraceCompleted { data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "trace.failed")]
    TraceFailed { data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "stats.updated")]
    StatsUpdated { data: Value, timestamp: DateTime<Utc> },
}

impl ServerFrame {
    pub fn event_type(&self) -> Option<EventType> {
        match self {
            ServerFrame::TraceCreated { .. } => Some(EventType::TraceCreated),
            ServerFrame::TraceUpdated { .. } => Some(EventType::TraceUpdated),
            ServerFrame::TraceCompleted { .. } => Some(EventType::TraceCompleted),
            ServerFrame::TraceFailed { .. } => Some(EventType::TraceFailed),
            ServerFrame::StatsUpdated { .. } => Some(EventType::StatsUpdated),
            ServerFrame::ConnectionEstablished { .. }
            | ServerFrame::SubscriptionConfirmed { .. }
            | ServerFrame::Pong { .. } => None,
        }
    }

    pub fn connection_established(client_id: String) -> Self {
        ServerFrame::ConnectionEstablished {
            data: ConnectionEstablishedData {
                client_id,
                supported_events: EventType::all().iter().map(|e| e.as_str()).collect(),
            },
            timestamp: Utc::now(),
        }
    }

    pub fn subscription_confirmed(events: Vec<EventType>) -> Self {
        ServerFrame::SubscriptionConfirmed {
            data: SubscriptionConfirmedData { events },
            timestamp: Utc::now(),
        }
    }

    pub fn pong() -> Self {
        ServerFrame::Pong {
            timestamp: Utc::now(),
        }
    }

    pub fn lifecycle(event_type: EventType, data: Value) -> Self {
        let timestamp = Utc::now();
        match event_type {
            EventType::TraceCreated => ServerFrame::TraceCreated { data, timestamp },
            EventType::TraceUpdated => ServerFrame::TraceUpdated { data, timestamp },
            EventType::TraceCompleted => ServerFrame::TraceCompleted { data, timestamp },
            EventType::TraceFailed => ServerFrame::TraceFailed { data, timestamp },
            EventType::StatsUpdated => ServerFrame::StatsUpdated { data, timestamp },
        }
    }
}
