//! The native networking library as seen by this crate: a runtime plus a sockets interface.
//!
//! Method shapes mirror the library's flat C API. Results are raw handles (0 = invalid), booleans,
//! EResult codes ([`RESULT_OK`] on success) or message counts; this crate only distinguishes
//! success from failure and leaves diagnostics to the native layer.

use std::ffi::{c_void, CStr};
use std::sync::Arc;

use crate::record::{
    ConfigValueRecord, IdentityBlock, CONNECTION_INFO_SIZE, REALTIME_STATUS_SIZE,
};

/// EResult success code.
pub const RESULT_OK: i32 = 1;

/// Why the native runtime refused to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitFailure {
    pub code: i32,
    pub message: String,
}

/// Process-level lifecycle and event pump of the native library.
pub trait NativeRuntime: Send + Sync {
    fn initialize(&self) -> Result<(), InitFailure>;

    /// Tear the runtime down. Safe to call more than once.
    fn shutdown(&self);

    /// Drain pending status-change callback records, handing each raw record to `sink`
    /// before returning. The slice is only valid for the duration of the call.
    fn poll_once(&self, sink: &mut dyn FnMut(&[u8]));

    /// Numeric ID of the local identity, or 0 if unavailable.
    fn local_identity_id(&self) -> u64;

    /// The sockets interface, if the runtime provides one.
    fn sockets(&self) -> Option<Arc<dyn NativeSockets>>;
}

/// Connection-oriented sockets interface of the native library.
pub trait NativeSockets: Send + Sync {
    fn create_listen_socket_p2p(&self, virtual_port: i32, options: &[ConfigValueRecord]) -> u32;

    fn connect_p2p(
        &self,
        identity: &IdentityBlock,
        virtual_port: i32,
        options: &[ConfigValueRecord],
    ) -> u32;

    fn accept_connection(&self, conn: u32) -> i32;

    fn close_connection(&self, conn: u32, reason: i32, debug: Option<&CStr>, linger: bool) -> bool;

    fn close_listen_socket(&self, socket: u32) -> bool;

    fn send_message_to_connection(
        &self,
        conn: u32,
        data: &[u8],
        flags: i32,
        out_message_number: &mut i64,
    ) -> i32;

    fn flush_messages_on_connection(&self, conn: u32) -> i32;

    /// Fill `out` with up to `out.len()` message record pointers. Returns the count, or negative on failure.
    /// Every non-null pointer returned must later be passed to [`release_record`](Self::release_record) once.
    fn receive_messages_on_connection(&self, conn: u32, out: &mut [*mut c_void]) -> i32;

    fn receive_messages_on_listen_socket(&self, socket: u32, out: &mut [*mut c_void]) -> i32;

    fn receive_messages_on_poll_group(&self, group: u32, out: &mut [*mut c_void]) -> i32;

    fn get_connection_info(&self, conn: u32, out: &mut [u8; CONNECTION_INFO_SIZE]) -> bool;

    fn get_connection_real_time_status(
        &self,
        conn: u32,
        out: &mut [u8; REALTIME_STATUS_SIZE],
    ) -> i32;

    fn create_poll_group(&self) -> u32;

    fn destroy_poll_group(&self, group: u32) -> bool;

    fn set_connection_poll_group(&self, conn: u32, group: u32) -> bool;

    fn set_connection_user_data(&self, conn: u32, user_data: i64) -> bool;

    fn set_connection_name(&self, conn: u32, name: &CStr);

    /// Free a message record previously returned by a receive call.
    ///
    /// # Safety
    /// `record` must come from a receive call on this interface and must not have been released before.
    unsafe fn release_record(&self, record: *mut c_void);
}
