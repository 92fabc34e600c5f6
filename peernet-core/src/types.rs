//! Value types relayed between the native layer and callers.

use std::fmt;
use std::net::SocketAddr;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::handle::{ConnectionHandle, ListenSocketHandle};
use crate::identity::Identity;

/// Connection state as reported by the native layer. Transitions are observed, never validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    None,
    Connecting,
    FindingRoute,
    Connected,
    ClosedByPeer,
    ProblemDetectedLocally,
    /// A native state outside the public set (e.g. internal linger states), kept verbatim.
    Other(i32),
}

impl ConnectionState {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => ConnectionState::None,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::FindingRoute,
            3 => ConnectionState::Connected,
            4 => ConnectionState::ClosedByPeer,
            5 => ConnectionState::ProblemDetectedLocally,
            other => ConnectionState::Other(other),
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            ConnectionState::None => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::FindingRoute => 2,
            ConnectionState::Connected => 3,
            ConnectionState::ClosedByPeer => 4,
            ConnectionState::ProblemDetectedLocally => 5,
            ConnectionState::Other(raw) => raw,
        }
    }

    /// True for the two states in which the connection has ended and must be closed by the application.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::ClosedByPeer | ConnectionState::ProblemDetectedLocally
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::None => f.write_str("None"),
            ConnectionState::Connecting => f.write_str("Connecting"),
            ConnectionState::FindingRoute => f.write_str("FindingRoute"),
            ConnectionState::Connected => f.write_str("Connected"),
            ConnectionState::ClosedByPeer => f.write_str("ClosedByPeer"),
            ConnectionState::ProblemDetectedLocally => f.write_str("ProblemDetectedLocally"),
            ConnectionState::Other(raw) => write!(f, "Unknown({})", raw),
        }
    }
}

/// Send flags passed through to the native layer. Combine with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SendFlags(i32);

impl SendFlags {
    pub const UNRELIABLE: SendFlags = SendFlags(0);
    pub const NO_NAGLE: SendFlags = SendFlags(1);
    pub const UNRELIABLE_NO_NAGLE: SendFlags = SendFlags(1);
    pub const NO_DELAY: SendFlags = SendFlags(4);
    pub const UNRELIABLE_NO_DELAY: SendFlags = SendFlags(5);
    pub const RELIABLE: SendFlags = SendFlags(8);
    pub const RELIABLE_NO_NAGLE: SendFlags = SendFlags(9);
    pub const USE_CURRENT_THREAD: SendFlags = SendFlags(16);
    pub const AUTO_RESTART_BROKEN_SESSION: SendFlags = SendFlags(32);

    pub const fn from_raw(raw: i32) -> Self {
        SendFlags(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn contains(self, other: SendFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SendFlags {
    type Output = SendFlags;

    fn bitor(self, rhs: SendFlags) -> SendFlags {
        SendFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for SendFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SendFlags::UNRELIABLE => f.write_str("Unreliable"),
            SendFlags::UNRELIABLE_NO_NAGLE => f.write_str("UnreliableNoNagle"),
            SendFlags::RELIABLE => f.write_str("Reliable"),
            SendFlags::RELIABLE_NO_NAGLE => f.write_str("ReliableNoNagle"),
            SendFlags(raw) => write!(f, "Flags({:#x})", raw),
        }
    }
}

/// Native configuration key. Known keys are associated constants; any raw key is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigKey(pub i32);

impl ConfigKey {
    pub const SEND_BUFFER_SIZE: ConfigKey = ConfigKey(9);
    pub const SEND_RATE_MIN: ConfigKey = ConfigKey(10);
    pub const SEND_RATE_MAX: ConfigKey = ConfigKey(11);
    pub const NAGLE_TIME: ConfigKey = ConfigKey(12);
    pub const IP_ALLOW_WITHOUT_AUTH: ConfigKey = ConfigKey(23);
    pub const TIMEOUT_INITIAL: ConfigKey = ConfigKey(24);
    pub const TIMEOUT_CONNECTED: ConfigKey = ConfigKey(25);
    pub const SYMMETRIC_CONNECT: ConfigKey = ConfigKey(37);
    pub const LOCAL_VIRTUAL_PORT: ConfigKey = ConfigKey(38);
    pub const CONNECTION_USER_DATA: ConfigKey = ConfigKey(40);
}

/// Typed configuration value. In TOML: `value = { int32 = 10000 }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigValue {
    Int32(i32),
    Int64(i64),
    Float(f32),
    String(String),
}

impl ConfigValue {
    /// Native data-type tag for this value.
    pub fn data_type(&self) -> i32 {
        match self {
            ConfigValue::Int32(_) => 1,
            ConfigValue::Int64(_) => 2,
            ConfigValue::Float(_) => 3,
            ConfigValue::String(_) => 4,
        }
    }
}

/// One per-socket or per-connection option forwarded to the native layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOption {
    pub key: ConfigKey,
    pub value: ConfigValue,
}

impl ConfigOption {
    pub fn new(key: ConfigKey, value: ConfigValue) -> Self {
        Self { key, value }
    }

    pub fn int32(key: ConfigKey, value: i32) -> Self {
        Self::new(key, ConfigValue::Int32(value))
    }
}

/// Connection status change, decoded from the native callback record.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChanged {
    pub connection: ConnectionHandle,
    /// Best-effort; `Identity::Invalid` when the native layer has not resolved the peer yet.
    pub remote: Identity,
    /// Listen socket an incoming connection arrived on; invalid for outbound connections.
    pub listen_socket: ListenSocketHandle,
    pub old_state: ConnectionState,
    pub new_state: ConnectionState,
    pub end_reason: Option<i32>,
    pub end_debug: Option<String>,
}

impl StatusChanged {
    /// An event with only the handle and transition filled in.
    pub fn transition(
        connection: ConnectionHandle,
        old_state: ConnectionState,
        new_state: ConnectionState,
    ) -> Self {
        Self {
            connection,
            remote: Identity::Invalid,
            listen_socket: ListenSocketHandle::INVALID,
            old_state,
            new_state,
            end_reason: None,
            end_debug: None,
        }
    }
}

/// Snapshot of a connection's details.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub remote: Identity,
    pub user_data: i64,
    pub listen_socket: ListenSocketHandle,
    pub remote_addr: Option<SocketAddr>,
    pub pop_remote: u32,
    pub pop_relay: u32,
    pub state: ConnectionState,
    pub end_reason: i32,
    pub end_debug: String,
    pub description: String,
    pub flags: i32,
}

/// Snapshot of a connection's live transport metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealtimeStatus {
    pub state: ConnectionState,
    /// Round-trip time in milliseconds.
    pub ping: i32,
    /// 0.0 - 1.0, fraction of packets delivered, as measured locally.
    pub quality_local: f32,
    /// 0.0 - 1.0, as reported by the remote end.
    pub quality_remote: f32,
    pub out_packets_per_sec: f32,
    pub out_bytes_per_sec: f32,
    pub in_packets_per_sec: f32,
    pub in_bytes_per_sec: f32,
    pub send_rate_bytes_per_sec: i32,
    pub pending_unreliable: i32,
    pub pending_reliable: i32,
    pub sent_unacked_reliable: i32,
    pub queue_time_usec: i64,
}
