//! The session: owns the native runtime, its sockets interface and the subscriber registry.
//!
//! Every operation checks that the session is live, validates its arguments locally, and
//! only then calls into the native layer. Native failures are surfaced with the operation
//! name and native code; nothing is retried here.

use std::ops::{AddAssign, Deref};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::dispatch::{CallbackRegistry, Delivery, StatusCallback};
use crate::error::{Error, ErrorKind};
use crate::handle::{ConnectionHandle, ListenSocketHandle, PollGroupHandle};
use crate::identity::Identity;
use crate::message::{receive_batch, Message};
use crate::native::{NativeRuntime, NativeSockets, RESULT_OK};
use crate::record::{
    c_string_lossy, decode_connection_info, decode_realtime_status, decode_status_changed,
    encode_identity, encode_options, CONNECTION_INFO_SIZE, REALTIME_STATUS_SIZE,
};
use crate::types::{ConfigOption, ConnectionInfo, RealtimeStatus, SendFlags, StatusChanged};

pub type Result<T> = std::result::Result<T, Error>;

/// Largest batch a single receive may ask for; the native count is an `int`.
const MAX_BATCH: usize = i32::MAX as usize;

/// The live sockets interface, held under the session's read lock so `shutdown` waits for
/// in-flight native calls to return.
struct Live<'a> {
    _guard: RwLockReadGuard<'a, Option<Arc<dyn NativeSockets>>>,
    sockets: Arc<dyn NativeSockets>,
}

impl Deref for Live<'_> {
    type Target = Arc<dyn NativeSockets>;

    fn deref(&self) -> &Self::Target {
        &self.sockets
    }
}

/// Where a batch receive reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveSource {
    Connection(ConnectionHandle),
    ListenSocket(ListenSocketHandle),
    PollGroup(PollGroupHandle),
}

impl From<ConnectionHandle> for ReceiveSource {
    fn from(conn: ConnectionHandle) -> Self {
        ReceiveSource::Connection(conn)
    }
}

impl From<ListenSocketHandle> for ReceiveSource {
    fn from(socket: ListenSocketHandle) -> Self {
        ReceiveSource::ListenSocket(socket)
    }
}

impl From<PollGroupHandle> for ReceiveSource {
    fn from(group: PollGroupHandle) -> Self {
        ReceiveSource::PollGroup(group)
    }
}

/// Outcome of one [`Session::poll_once`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Events delivered to a subscriber.
    pub dispatched: usize,
    /// Events with no subscriber.
    pub unhandled: usize,
    /// Records that failed to decode.
    pub malformed: usize,
}

impl AddAssign for PollStats {
    fn add_assign(&mut self, rhs: PollStats) {
        self.dispatched += rhs.dispatched;
        self.unhandled += rhs.unhandled;
        self.malformed += rhs.malformed;
    }
}

fn require_connection(conn: ConnectionHandle) -> Result<()> {
    if conn.is_valid() {
        Ok(())
    } else {
        Err(Error::rejected(ErrorKind::InvalidConnection, "invalid connection handle"))
    }
}

fn require_socket(socket: ListenSocketHandle) -> Result<()> {
    if socket.is_valid() {
        Ok(())
    } else {
        Err(Error::rejected(ErrorKind::InvalidSocket, "invalid listen socket handle"))
    }
}

fn require_poll_group(group: PollGroupHandle) -> Result<()> {
    if group.is_valid() {
        Ok(())
    } else {
        Err(Error::rejected(ErrorKind::InvalidPollGroup, "invalid poll group handle"))
    }
}

fn failed(op: &'static str, kind: ErrorKind, code: i32) -> Error {
    warn!(op, code, %kind, "native call failed");
    Error::native(op, kind, code)
}

pub struct Session {
    runtime: Arc<dyn NativeRuntime>,
    sockets: RwLock<Option<Arc<dyn NativeSockets>>>,
    callbacks: Arc<CallbackRegistry>,
    config: SessionConfig,
}

impl Session {
    /// Start the native runtime and acquire its sockets interface.
    ///
    /// If the runtime starts but offers no sockets interface, it is shut down again.
    pub fn init(runtime: Arc<dyn NativeRuntime>, config: SessionConfig) -> Result<Session> {
        if let Err(failure) = runtime.initialize() {
            warn!(code = failure.code, message = %failure.message, "native initialization failed");
            return Err(Error::Init {
                code: failure.code,
                message: failure.message,
            });
        }
        let Some(sockets) = runtime.sockets() else {
            warn!("native sockets interface unavailable");
            runtime.shutdown();
            return Err(Error::Unavailable {
                capability: "sockets",
            });
        };
        debug!(poll_interval_ms = config.poll_interval_ms, "session initialized");
        Ok(Session {
            runtime,
            sockets: RwLock::new(Some(sockets)),
            callbacks: Arc::new(CallbackRegistry::new()),
            config,
        })
    }

    fn sockets(&self) -> Result<Live<'_>> {
        let guard = self.sockets.read().unwrap_or_else(|e| e.into_inner());
        let sockets = guard.clone().ok_or(Error::NotInitialized)?;
        Ok(Live {
            _guard: guard,
            sockets,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.sockets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Shut the native runtime down and drop every subscriber. Later calls do nothing.
    pub fn shutdown(&self) {
        let sockets = self
            .sockets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if sockets.is_none() {
            return;
        }
        self.callbacks.clear();
        self.runtime.shutdown();
        debug!("session shut down");
    }

    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.callbacks
    }

    /// Set or clear the subscriber for events on connections without their own subscriber.
    pub fn set_status_callback(&self, callback: Option<StatusCallback>) {
        self.callbacks.set_global(callback);
    }

    /// Set or clear the subscriber for one connection. It replaces the global subscriber for that connection.
    pub fn set_connection_callback(
        &self,
        conn: ConnectionHandle,
        callback: Option<StatusCallback>,
    ) -> Result<()> {
        require_connection(conn)?;
        self.callbacks.set_for_connection(conn, callback);
        Ok(())
    }

    pub fn clear_connection_callback(&self, conn: ConnectionHandle) {
        self.callbacks.clear_for_connection(conn);
    }

    /// Drain pending status changes and deliver each to its subscriber before returning.
    ///
    /// Subscribers run after the drain, outside the session lock, so they may call any
    /// session operation, `shutdown` included.
    pub fn poll_once(&self) -> Result<PollStats> {
        let mut stats = PollStats::default();
        let mut events = Vec::new();
        {
            let _live = self.sockets()?;
            self.runtime.poll_once(&mut |record: &[u8]| match decode_status_changed(record) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(error = %e, "malformed status-change record");
                    stats.malformed += 1;
                }
            });
        }
        for event in &events {
            match self.callbacks.dispatch(event) {
                Delivery::Dropped => stats.unhandled += 1,
                Delivery::Connection | Delivery::Global => stats.dispatched += 1,
            }
        }
        Ok(stats)
    }

    /// Deliver an already-decoded event, as if it came from the native layer.
    pub fn dispatch(&self, event: &StatusChanged) -> Delivery {
        self.callbacks.dispatch(event)
    }

    /// The local identity, or `None` if the native layer has none yet.
    pub fn local_identity(&self) -> Result<Option<Identity>> {
        let _live = self.sockets()?;
        let id = self.runtime.local_identity_id();
        Ok((id != 0).then(|| Identity::numeric(id)))
    }

    /// Listen for P2P connections on `virtual_port`.
    pub fn create_listen_socket(
        &self,
        virtual_port: i32,
        options: &[ConfigOption],
    ) -> Result<ListenSocketHandle> {
        let sockets = self.sockets()?;
        let encoded = encode_options(self.config.listen_options.iter().chain(options));
        let socket = ListenSocketHandle::from_raw(
            sockets.create_listen_socket_p2p(virtual_port, encoded.records()),
        );
        if !socket.is_valid() {
            return Err(failed("create_listen_socket", ErrorKind::InvalidSocket, 0));
        }
        debug!(%socket, virtual_port, "listen socket created");
        Ok(socket)
    }

    /// Begin connecting to `identity` on `virtual_port`. Completion is reported through status callbacks.
    pub fn connect(
        &self,
        identity: &Identity,
        virtual_port: i32,
        options: &[ConfigOption],
    ) -> Result<ConnectionHandle> {
        let sockets = self.sockets()?;
        if !identity.is_valid() {
            return Err(Error::rejected(ErrorKind::InvalidIdentity, "identity is invalid"));
        }
        let block = encode_identity(identity).ok_or_else(|| {
            Error::rejected(ErrorKind::InvalidIdentity, "address host is not an IP literal")
        })?;
        let encoded = encode_options(self.config.connect_options.iter().chain(options));
        let raw = sockets.connect_p2p(&block, virtual_port, encoded.records());
        let conn = ConnectionHandle::from_raw(raw);
        if !conn.is_valid() {
            return Err(failed("connect", ErrorKind::ConnectionFailed, 0));
        }
        debug!(%conn, peer = %identity, virtual_port, "connecting");
        Ok(conn)
    }

    pub fn accept(&self, conn: ConnectionHandle) -> Result<()> {
        let sockets = self.sockets()?;
        require_connection(conn)?;
        let result = sockets.accept_connection(conn.raw());
        if result != RESULT_OK {
            return Err(failed("accept", ErrorKind::InvalidConnection, result));
        }
        debug!(%conn, "connection accepted");
        Ok(())
    }

    /// Close a connection. An empty `debug` string is not forwarded; interior NULs cut it short.
    /// With `linger`, queued reliable data is flushed before the connection goes away.
    pub fn close_connection(
        &self,
        conn: ConnectionHandle,
        reason: i32,
        debug: &str,
        linger: bool,
    ) -> Result<()> {
        let sockets = self.sockets()?;
        require_connection(conn)?;
        let debug_c = (!debug.is_empty()).then(|| c_string_lossy(debug));
        if !sockets.close_connection(conn.raw(), reason, debug_c.as_deref(), linger) {
            return Err(failed("close_connection", ErrorKind::InvalidConnection, 0));
        }
        self.callbacks.clear_for_connection(conn);
        debug!(%conn, reason, linger, "connection closed");
        Ok(())
    }

    pub fn close_listen_socket(&self, socket: ListenSocketHandle) -> Result<()> {
        let sockets = self.sockets()?;
        require_socket(socket)?;
        if !sockets.close_listen_socket(socket.raw()) {
            return Err(failed("close_listen_socket", ErrorKind::InvalidSocket, 0));
        }
        debug!(%socket, "listen socket closed");
        Ok(())
    }

    /// Queue `payload` on a connection. Returns the message number the native layer assigned.
    pub fn send(&self, conn: ConnectionHandle, payload: &[u8], flags: SendFlags) -> Result<i64> {
        let sockets = self.sockets()?;
        require_connection(conn)?;
        if payload.is_empty() {
            return Err(Error::rejected(ErrorKind::SendFailed, "payload is empty"));
        }
        let mut message_number = 0;
        let result = sockets.send_message_to_connection(
            conn.raw(),
            payload,
            flags.raw(),
            &mut message_number,
        );
        if result != RESULT_OK {
            return Err(failed("send", ErrorKind::SendFailed, result));
        }
        Ok(message_number)
    }

    /// Send anything queued by Nagle on this connection now.
    pub fn flush(&self, conn: ConnectionHandle) -> Result<()> {
        let sockets = self.sockets()?;
        require_connection(conn)?;
        let result = sockets.flush_messages_on_connection(conn.raw());
        if result != RESULT_OK {
            return Err(failed("flush", ErrorKind::InvalidConnection, result));
        }
        Ok(())
    }

    /// Receive up to `max_count` messages. An empty vector means nothing was pending.
    /// `max_count` must be in `1..=i32::MAX`, the native batch limit.
    pub fn receive(
        &self,
        source: impl Into<ReceiveSource>,
        max_count: usize,
    ) -> Result<Vec<Message>> {
        let sockets = self.sockets()?;
        let source = source.into();
        match source {
            ReceiveSource::Connection(conn) => require_connection(conn)?,
            ReceiveSource::ListenSocket(socket) => require_socket(socket)?,
            ReceiveSource::PollGroup(group) => require_poll_group(group)?,
        }
        if max_count == 0 {
            return Err(Error::rejected(ErrorKind::ReceiveFailed, "max_count must be positive"));
        }
        if max_count > MAX_BATCH {
            return Err(Error::rejected(
                ErrorKind::ReceiveFailed,
                "max_count exceeds the native batch limit",
            ));
        }
        let batch = match source {
            ReceiveSource::Connection(conn) => {
                receive_batch(&sockets, "receive_on_connection", max_count, conn, |out| {
                    sockets.receive_messages_on_connection(conn.raw(), out)
                })
            }
            ReceiveSource::ListenSocket(socket) => receive_batch(
                &sockets,
                "receive_on_listen_socket",
                max_count,
                ConnectionHandle::INVALID,
                |out| sockets.receive_messages_on_listen_socket(socket.raw(), out),
            ),
            ReceiveSource::PollGroup(group) => receive_batch(
                &sockets,
                "receive_on_poll_group",
                max_count,
                ConnectionHandle::INVALID,
                |out| sockets.receive_messages_on_poll_group(group.raw(), out),
            ),
        };
        batch.map_err(|e| {
            warn!(?source, error = %e, "receive failed");
            e
        })
    }

    pub fn connection_info(&self, conn: ConnectionHandle) -> Result<ConnectionInfo> {
        let sockets = self.sockets()?;
        require_connection(conn)?;
        let mut buf = [0u8; CONNECTION_INFO_SIZE];
        if !sockets.get_connection_info(conn.raw(), &mut buf) {
            return Err(failed("connection_info", ErrorKind::InvalidConnection, 0));
        }
        Ok(decode_connection_info(&buf)?)
    }

    pub fn realtime_status(&self, conn: ConnectionHandle) -> Result<RealtimeStatus> {
        let sockets = self.sockets()?;
        require_connection(conn)?;
        let mut buf = [0u8; REALTIME_STATUS_SIZE];
        let result = sockets.get_connection_real_time_status(conn.raw(), &mut buf);
        if result != RESULT_OK {
            return Err(failed("realtime_status", ErrorKind::InvalidConnection, result));
        }
        Ok(decode_realtime_status(&buf)?)
    }

    pub fn create_poll_group(&self) -> Result<PollGroupHandle> {
        let sockets = self.sockets()?;
        let group = PollGroupHandle::from_raw(sockets.create_poll_group());
        if !group.is_valid() {
            return Err(failed("create_poll_group", ErrorKind::InvalidPollGroup, 0));
        }
        debug!(%group, "poll group created");
        Ok(group)
    }

    /// Destroy a poll group. Its connections are not closed, only removed from the group.
    pub fn destroy_poll_group(&self, group: PollGroupHandle) -> Result<()> {
        let sockets = self.sockets()?;
        require_poll_group(group)?;
        if !sockets.destroy_poll_group(group.raw()) {
            return Err(failed("destroy_poll_group", ErrorKind::InvalidPollGroup, 0));
        }
        debug!(%group, "poll group destroyed");
        Ok(())
    }

    pub fn set_connection_poll_group(
        &self,
        conn: ConnectionHandle,
        group: PollGroupHandle,
    ) -> Result<()> {
        let sockets = self.sockets()?;
        require_connection(conn)?;
        require_poll_group(group)?;
        if !sockets.set_connection_poll_group(conn.raw(), group.raw()) {
            return Err(failed("set_connection_poll_group", ErrorKind::InvalidConnection, 0));
        }
        Ok(())
    }

    /// Remove a connection from whatever poll group it is in.
    pub fn clear_connection_poll_group(&self, conn: ConnectionHandle) -> Result<()> {
        let sockets = self.sockets()?;
        require_connection(conn)?;
        if !sockets.set_connection_poll_group(conn.raw(), PollGroupHandle::INVALID.raw()) {
            return Err(failed("clear_connection_poll_group", ErrorKind::InvalidConnection, 0));
        }
        Ok(())
    }

    /// Tag a connection; the tag is reported in connection info and on every received message.
    pub fn set_connection_user_data(&self, conn: ConnectionHandle, user_data: i64) -> Result<()> {
        let sockets = self.sockets()?;
        require_connection(conn)?;
        if !sockets.set_connection_user_data(conn.raw(), user_data) {
            return Err(failed("set_connection_user_data", ErrorKind::InvalidConnection, 0));
        }
        Ok(())
    }

    /// Name a connection for native diagnostics.
    pub fn set_connection_name(&self, conn: ConnectionHandle, name: &str) -> Result<()> {
        let sockets = self.sockets()?;
        require_connection(conn)?;
        sockets.set_connection_name(conn.raw(), &c_string_lossy(name));
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
