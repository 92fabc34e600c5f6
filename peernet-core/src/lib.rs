//! Connection-oriented P2P session layer over a native networking sockets library.
//! The native side is a pair of traits ([`NativeRuntime`], [`NativeSockets`]); this crate
//! validates, decodes and dispatches, and owns nothing it did not copy.

pub mod config;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod handle;
pub mod identity;
pub mod message;
pub mod native;
pub mod record;
pub mod session;
pub mod types;

#[cfg(feature = "steam-api")]
pub mod flat;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, SessionConfig};
pub use dispatch::{CallbackRegistry, Delivery, StatusCallback};
pub use driver::{spawn_poll_loop, PollLoop};
pub use error::{Error, ErrorKind};
pub use handle::{ConnectionHandle, ListenSocketHandle, PollGroupHandle};
pub use identity::{Identity, IdentityKind, IdentityParseError};
pub use message::{release_message, Message};
pub use native::{InitFailure, NativeRuntime, NativeSockets, RESULT_OK};
pub use record::RecordError;
pub use session::{PollStats, ReceiveSource, Result, Session};
pub use types::{
    ConfigKey, ConfigOption, ConfigValue, ConnectionInfo, ConnectionState, RealtimeStatus,
    SendFlags, StatusChanged,
};
