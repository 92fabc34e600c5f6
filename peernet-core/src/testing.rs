//! In-memory native layer for unit tests. Message records are real heap allocations in the
//! native layout, so release bookkeeping is observable.

use std::collections::{HashSet, VecDeque};
use std::ffi::{c_void, CStr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::handle::ConnectionHandle;
use crate::identity::Identity;
use crate::native::{InitFailure, NativeRuntime, NativeSockets, RESULT_OK};
use crate::record::{
    encode_identity, ConfigValueRecord, IdentityBlock, CONNECTION_INFO_SIZE, IDENTITY_SIZE,
    INFO_END_DEBUG, INFO_END_REASON, INFO_IDENTITY, INFO_STATE, MESSAGE_RECORD_LEN, MSG_CONN,
    MSG_DATA, MSG_IDENTITY, MSG_NUMBER, MSG_SIZE, REALTIME_STATUS_SIZE, RT_PING, RT_QUALITY_LOCAL,
    RT_STATE, STATUS_CHANGED_LEN, STATUS_CONN, STATUS_INFO, STATUS_OLD_STATE,
};
use crate::types::ConnectionState;

fn put(buf: &mut [u8], off: usize, bytes: &[u8]) {
    buf[off..off + bytes.len()].copy_from_slice(bytes);
}

fn put_identity(buf: &mut [u8], off: usize, identity: &Identity) {
    if let Some(block) = encode_identity(identity) {
        put(buf, off, block.as_bytes());
    }
}

pub(crate) fn connection_info_record(
    remote: &Identity,
    state: ConnectionState,
    end_reason: i32,
    end_debug: &str,
) -> Vec<u8> {
    let mut rec = vec![0u8; CONNECTION_INFO_SIZE];
    write_connection_info(&mut rec, 0, remote, state, end_reason, end_debug);
    rec
}

fn write_connection_info(
    rec: &mut [u8],
    base: usize,
    remote: &Identity,
    state: ConnectionState,
    end_reason: i32,
    end_debug: &str,
) {
    put_identity(rec, base + INFO_IDENTITY, remote);
    put(rec, base + INFO_STATE, &state.raw().to_ne_bytes());
    put(rec, base + INFO_END_REASON, &end_reason.to_ne_bytes());
    put(rec, base + INFO_END_DEBUG, end_debug.as_bytes());
}

pub(crate) fn realtime_status_record(state: ConnectionState, ping: i32, quality: f32) -> Vec<u8> {
    let mut rec = vec![0u8; REALTIME_STATUS_SIZE];
    put(&mut rec, RT_STATE, &state.raw().to_ne_bytes());
    put(&mut rec, RT_PING, &ping.to_ne_bytes());
    put(&mut rec, RT_QUALITY_LOCAL, &quality.to_ne_bytes());
    rec
}

pub(crate) fn status_changed_record(
    conn: ConnectionHandle,
    remote: &Identity,
    old_state: ConnectionState,
    new_state: ConnectionState,
    end_reason: i32,
    end_debug: &str,
) -> Vec<u8> {
    let mut rec = vec![0u8; STATUS_CHANGED_LEN];
    put(&mut rec, STATUS_CONN, &conn.raw().to_ne_bytes());
    write_connection_info(&mut rec, STATUS_INFO, remote, new_state, end_reason, end_debug);
    put(&mut rec, STATUS_OLD_STATE, &old_state.raw().to_ne_bytes());
    rec
}

/// A message record queued for delivery by a receive call.
#[derive(Debug, Clone)]
pub(crate) struct MockMessage {
    header: [u8; MESSAGE_RECORD_LEN],
    payload: Vec<u8>,
    null_data: bool,
}

pub(crate) fn message_record(
    conn: u32,
    peer: &Identity,
    payload: &[u8],
    number: i64,
) -> MockMessage {
    let mut header = [0u8; MESSAGE_RECORD_LEN];
    put(&mut header, MSG_SIZE, &(payload.len() as i32).to_ne_bytes());
    put(&mut header, MSG_CONN, &conn.to_ne_bytes());
    put_identity(&mut header, MSG_IDENTITY, peer);
    put(&mut header, MSG_NUMBER, &number.to_ne_bytes());
    MockMessage {
        header,
        payload: payload.to_vec(),
        null_data: false,
    }
}

impl MockMessage {
    /// Override the size field without touching the payload.
    pub(crate) fn with_size(mut self, size: i32) -> Self {
        put(&mut self.header, MSG_SIZE, &size.to_ne_bytes());
        self
    }

    /// Leave the data pointer null regardless of the size field.
    pub(crate) fn with_null_data(mut self) -> Self {
        self.null_data = true;
        self
    }
}

#[repr(C, align(8))]
struct Header([u8; MESSAGE_RECORD_LEN]);

/// Heap layout handed out as a record pointer. The header comes first so the pointer
/// addresses the native-layout bytes.
#[repr(C)]
struct Allocated {
    header: Header,
    payload: Vec<u8>,
}

fn allocate(message: MockMessage) -> *mut c_void {
    let mut boxed = Box::new(Allocated {
        header: Header(message.header),
        payload: message.payload,
    });
    if !message.null_data && !boxed.payload.is_empty() {
        let addr = boxed.payload.as_ptr() as usize as u64;
        put(&mut boxed.header.0, MSG_DATA, &addr.to_ne_bytes());
    }
    Box::into_raw(boxed) as *mut c_void
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SendCall {
    pub conn: u32,
    pub data: Vec<u8>,
    pub flags: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CloseCall {
    pub conn: u32,
    pub reason: i32,
    pub debug: Option<String>,
    pub linger: bool,
}

/// Mutable state behind [`MockNative`]. Tests set the `*_result` fields to script the native layer.
pub(crate) struct MockState {
    pub init_result: Result<(), InitFailure>,
    pub sockets_available: bool,
    pub initialize_calls: usize,
    pub shutdown_calls: usize,
    pub local_id: u64,
    pub events: VecDeque<Vec<u8>>,

    pub listen_result: u32,
    pub connect_result: u32,
    pub poll_group_result: u32,
    pub accept_result: i32,
    pub send_result: i32,
    pub flush_result: i32,
    pub close_result: bool,
    pub group_result: bool,
    pub user_data_result: bool,
    pub info: Option<Vec<u8>>,
    pub status_result: i32,
    pub status: Vec<u8>,
    /// Overrides the count returned by receive calls.
    pub receive_count: Option<i32>,
    /// Records for the next receive call; `None` leaves a null slot.
    pub inbox: VecDeque<Option<MockMessage>>,

    /// Names of native calls in order.
    pub calls: Vec<&'static str>,
    /// Sockets calls that arrived after the runtime was shut down.
    pub calls_after_shutdown: usize,
    /// Sleep before a send touches any state, to hold a call in flight.
    pub send_delay: Option<Duration>,
    pub last_identity: Option<[u8; IDENTITY_SIZE]>,
    pub last_options: Vec<ConfigValueRecord>,
    pub last_send: Option<SendCall>,
    pub last_close: Option<CloseCall>,
    pub last_receive: Option<(&'static str, u32, usize)>,
    pub last_group: Option<(u32, u32)>,
    pub last_user_data: Option<(u32, i64)>,
    pub last_name: Option<(u32, String)>,

    live: HashSet<usize>,
    pub released: usize,
    pub double_releases: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            init_result: Ok(()),
            sockets_available: true,
            initialize_calls: 0,
            shutdown_calls: 0,
            local_id: 0,
            events: VecDeque::new(),
            listen_result: 3,
            connect_result: 7,
            poll_group_result: 11,
            accept_result: RESULT_OK,
            send_result: RESULT_OK,
            flush_result: RESULT_OK,
            close_result: true,
            group_result: true,
            user_data_result: true,
            info: None,
            status_result: RESULT_OK,
            status: vec![0u8; REALTIME_STATUS_SIZE],
            receive_count: None,
            inbox: VecDeque::new(),
            calls: Vec::new(),
            calls_after_shutdown: 0,
            send_delay: None,
            last_identity: None,
            last_options: Vec::new(),
            last_send: None,
            last_close: None,
            last_receive: None,
            last_group: None,
            last_user_data: None,
            last_name: None,
            live: HashSet::new(),
            released: 0,
            double_releases: 0,
        }
    }
}

impl MockState {
    pub fn count(&self, call: &str) -> usize {
        self.calls.iter().filter(|c| **c == call).count()
    }

    fn record(&mut self, call: &'static str) {
        if self.shutdown_calls > 0 {
            self.calls_after_shutdown += 1;
        }
        self.calls.push(call);
    }

    /// Records handed out and not yet released.
    pub fn live_records(&self) -> usize {
        self.live.len()
    }

    fn receive(&mut self, op: &'static str, handle: u32, out: &mut [*mut c_void]) -> i32 {
        self.record(op);
        self.last_receive = Some((op, handle, out.len()));
        if let Some(count) = self.receive_count {
            if count < 0 {
                return count;
            }
        }
        let mut n = 0;
        while n < out.len() {
            let Some(next) = self.inbox.pop_front() else {
                break;
            };
            out[n] = match next {
                Some(message) => {
                    let ptr = allocate(message);
                    self.live.insert(ptr as usize);
                    ptr
                }
                None => std::ptr::null_mut(),
            };
            n += 1;
        }
        self.receive_count.unwrap_or(n as i32)
    }
}

/// Scriptable stand-in for both native traits. Clones share state.
#[derive(Clone, Default)]
pub(crate) struct MockNative {
    state: Arc<Mutex<MockState>>,
}

impl MockNative {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn runtime(&self) -> Arc<dyn NativeRuntime> {
        Arc::new(self.clone())
    }

    pub fn sockets_arc(&self) -> Arc<dyn NativeSockets> {
        Arc::new(self.clone())
    }

    pub fn push_event(&self, record: Vec<u8>) {
        self.state().events.push_back(record);
    }

    pub fn push_message(&self, message: MockMessage) {
        self.state().inbox.push_back(Some(message));
    }

    pub fn push_null(&self) {
        self.state().inbox.push_back(None);
    }
}

impl NativeRuntime for MockNative {
    fn initialize(&self) -> Result<(), InitFailure> {
        let mut s = self.state();
        s.initialize_calls += 1;
        s.init_result.clone()
    }

    fn shutdown(&self) {
        self.state().shutdown_calls += 1;
    }

    fn poll_once(&self, sink: &mut dyn FnMut(&[u8])) {
        // Drain under the lock, deliver without it: subscribers call back into the mock.
        let events: Vec<Vec<u8>> = self.state().events.drain(..).collect();
        for event in &events {
            sink(event);
        }
    }

    fn local_identity_id(&self) -> u64 {
        self.state().local_id
    }

    fn sockets(&self) -> Option<Arc<dyn NativeSockets>> {
        if self.state().sockets_available {
            Some(self.sockets_arc())
        } else {
            None
        }
    }
}

impl NativeSockets for MockNative {
    fn create_listen_socket_p2p(&self, _virtual_port: i32, options: &[ConfigValueRecord]) -> u32 {
        let mut s = self.state();
        s.record("create_listen_socket_p2p");
        s.last_options = options.to_vec();
        s.listen_result
    }

    fn connect_p2p(
        &self,
        identity: &IdentityBlock,
        _virtual_port: i32,
        options: &[ConfigValueRecord],
    ) -> u32 {
        let mut s = self.state();
        s.record("connect_p2p");
        s.last_identity = Some(*identity.as_bytes());
        s.last_options = options.to_vec();
        s.connect_result
    }

    fn accept_connection(&self, _conn: u32) -> i32 {
        let mut s = self.state();
        s.record("accept_connection");
        s.accept_result
    }

    fn close_connection(&self, conn: u32, reason: i32, debug: Option<&CStr>, linger: bool) -> bool {
        let mut s = self.state();
        s.record("close_connection");
        s.last_close = Some(CloseCall {
            conn,
            reason,
            debug: debug.map(|d| d.to_string_lossy().into_owned()),
            linger,
        });
        s.close_result
    }

    fn close_listen_socket(&self, _socket: u32) -> bool {
        let mut s = self.state();
        s.record("close_listen_socket");
        s.close_result
    }

    fn send_message_to_connection(
        &self,
        conn: u32,
        data: &[u8],
        flags: i32,
        out_message_number: &mut i64,
    ) -> i32 {
        let delay = self.state().send_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut s = self.state();
        s.record("send_message_to_connection");
        s.last_send = Some(SendCall {
            conn,
            data: data.to_vec(),
            flags,
        });
        *out_message_number = s.count("send_message_to_connection") as i64;
        s.send_result
    }

    fn flush_messages_on_connection(&self, _conn: u32) -> i32 {
        let mut s = self.state();
        s.record("flush_messages_on_connection");
        s.flush_result
    }

    fn receive_messages_on_connection(&self, conn: u32, out: &mut [*mut c_void]) -> i32 {
        self.state().receive("receive_messages_on_connection", conn, out)
    }

    fn receive_messages_on_listen_socket(&self, socket: u32, out: &mut [*mut c_void]) -> i32 {
        self.state().receive("receive_messages_on_listen_socket", socket, out)
    }

    fn receive_messages_on_poll_group(&self, group: u32, out: &mut [*mut c_void]) -> i32 {
        self.state().receive("receive_messages_on_poll_group", group, out)
    }

    fn get_connection_info(&self, _conn: u32, out: &mut [u8; CONNECTION_INFO_SIZE]) -> bool {
        let mut s = self.state();
        s.record("get_connection_info");
        match &s.info {
            Some(info) => {
                out.copy_from_slice(&info[..CONNECTION_INFO_SIZE]);
                true
            }
            None => false,
        }
    }

    fn get_connection_real_time_status(
        &self,
        _conn: u32,
        out: &mut [u8; REALTIME_STATUS_SIZE],
    ) -> i32 {
        let mut s = self.state();
        s.record("get_connection_real_time_status");
        out.copy_from_slice(&s.status[..REALTIME_STATUS_SIZE]);
        s.status_result
    }

    fn create_poll_group(&self) -> u32 {
        let mut s = self.state();
        s.record("create_poll_group");
        s.poll_group_result
    }

    fn destroy_poll_group(&self, _group: u32) -> bool {
        let mut s = self.state();
        s.record("destroy_poll_group");
        s.group_result
    }

    fn set_connection_poll_group(&self, conn: u32, group: u32) -> bool {
        let mut s = self.state();
        s.record("set_connection_poll_group");
        s.last_group = Some((conn, group));
        s.group_result
    }

    fn set_connection_user_data(&self, conn: u32, user_data: i64) -> bool {
        let mut s = self.state();
        s.record("set_connection_user_data");
        s.last_user_data = Some((conn, user_data));
        s.user_data_result
    }

    fn set_connection_name(&self, conn: u32, name: &CStr) {
        let mut s = self.state();
        s.record("set_connection_name");
        s.last_name = Some((conn, name.to_string_lossy().into_owned()));
    }

    unsafe fn release_record(&self, record: *mut c_void) {
        let mut s = self.state();
        s.released += 1;
        if s.live.remove(&(record as usize)) {
            drop(Box::from_raw(record as *mut Allocated));
        } else {
            s.double_releases += 1;
        }
    }
}
