//! Native collaborator over the Steamworks flat C API (`libsteam_api`).
//!
//! Status changes are pulled with manual callback dispatch so `poll_once` sees the raw
//! callback records. Built only with the `steam-api` feature.

use std::ffi::{c_char, c_int, c_void, CStr};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::native::{InitFailure, NativeRuntime, NativeSockets};
use crate::record::{
    ConfigValueRecord, IdentityBlock, CONNECTION_INFO_SIZE, REALTIME_STATUS_SIZE,
    STATUS_CHANGED_CALLBACK_ID,
};

const INIT_OK: c_int = 0;
const ERR_MSG_LEN: usize = 1024;
/// EResult returned when a payload does not fit the native size type.
const RESULT_INVALID_PARAM: i32 = 8;

#[repr(C)]
struct CallbackMsg {
    _steam_user: i32,
    callback: c_int,
    param: *mut u8,
    param_len: c_int,
}

#[link(name = "steam_api")]
extern "C" {
    fn SteamAPI_RestartAppIfNecessary(app_id: u32) -> bool;
    fn SteamAPI_InitFlat(out_err: *mut c_char) -> c_int;
    fn SteamAPI_Shutdown();
    fn SteamAPI_GetHSteamPipe() -> i32;
    fn SteamAPI_ManualDispatch_Init();
    fn SteamAPI_ManualDispatch_RunFrame(pipe: i32);
    fn SteamAPI_ManualDispatch_GetNextCallback(pipe: i32, msg: *mut CallbackMsg) -> bool;
    fn SteamAPI_ManualDispatch_FreeLastCallback(pipe: i32);

    fn SteamAPI_SteamUser_v023() -> *mut c_void;
    fn SteamAPI_ISteamUser_GetSteamID(user: *mut c_void) -> u64;

    fn SteamAPI_SteamNetworkingSockets_SteamAPI_v012() -> *mut c_void;
    fn SteamAPI_ISteamNetworkingSockets_CreateListenSocketP2P(
        s: *mut c_void,
        virtual_port: c_int,
        n_options: c_int,
        options: *const ConfigValueRecord,
    ) -> u32;
    fn SteamAPI_ISteamNetworkingSockets_ConnectP2P(
        s: *mut c_void,
        identity: *const IdentityBlock,
        virtual_port: c_int,
        n_options: c_int,
        options: *const ConfigValueRecord,
    ) -> u32;
    fn SteamAPI_ISteamNetworkingSockets_AcceptConnection(s: *mut c_void, conn: u32) -> c_int;
    fn SteamAPI_ISteamNetworkingSockets_CloseConnection(
        s: *mut c_void,
        conn: u32,
        reason: c_int,
        debug: *const c_char,
        linger: bool,
    ) -> bool;
    fn SteamAPI_ISteamNetworkingSockets_CloseListenSocket(s: *mut c_void, socket: u32) -> bool;
    fn SteamAPI_ISteamNetworkingSockets_SetConnectionUserData(
        s: *mut c_void,
        conn: u32,
        user_data: i64,
    ) -> bool;
    fn SteamAPI_ISteamNetworkingSockets_SetConnectionName(
        s: *mut c_void,
        conn: u32,
        name: *const c_char,
    );
    fn SteamAPI_ISteamNetworkingSockets_SendMessageToConnection(
        s: *mut c_void,
        conn: u32,
        data: *const c_void,
        len: u32,
        flags: c_int,
        out_message_number: *mut i64,
    ) -> c_int;
    fn SteamAPI_ISteamNetworkingSockets_FlushMessagesOnConnection(
        s: *mut c_void,
        conn: u32,
    ) -> c_int;
    fn SteamAPI_ISteamNetworkingSockets_ReceiveMessagesOnConnection(
        s: *mut c_void,
        conn: u32,
        out: *mut *mut c_void,
        max: c_int,
    ) -> c_int;
    fn SteamAPI_ISteamNetworkingSockets_GetConnectionInfo(
        s: *mut c_void,
        conn: u32,
        info: *mut c_void,
    ) -> bool;
    fn SteamAPI_ISteamNetworkingSockets_GetConnectionRealTimeStatus(
        s: *mut c_void,
        conn: u32,
        status: *mut c_void,
        n_lanes: c_int,
        lanes: *mut c_void,
    ) -> c_int;
    fn SteamAPI_ISteamNetworkingSockets_CreatePollGroup(s: *mut c_void) -> u32;
    fn SteamAPI_ISteamNetworkingSockets_DestroyPollGroup(s: *mut c_void, group: u32) -> bool;
    fn SteamAPI_ISteamNetworkingSockets_SetConnectionPollGroup(
        s: *mut c_void,
        conn: u32,
        group: u32,
    ) -> bool;
    fn SteamAPI_ISteamNetworkingSockets_ReceiveMessagesOnPollGroup(
        s: *mut c_void,
        group: u32,
        out: *mut *mut c_void,
        max: c_int,
    ) -> c_int;

    fn SteamAPI_SteamNetworkingMessage_t_Release(message: *mut c_void);
}

/// Ask Steam whether the process should be relaunched through the client. If true, exit now.
pub fn restart_app_if_necessary(app_id: u32) -> bool {
    // SAFETY: takes a plain integer and may be called before the API is initialized.
    unsafe { SteamAPI_RestartAppIfNecessary(app_id) }
}

/// The process-wide Steam runtime.
#[derive(Default)]
pub struct FlatApi {
    pipe: AtomicI32,
    running: AtomicBool,
}

impl FlatApi {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NativeRuntime for FlatApi {
    fn initialize(&self) -> Result<(), InitFailure> {
        let mut err = [0 as c_char; ERR_MSG_LEN];
        let code = unsafe { SteamAPI_InitFlat(err.as_mut_ptr()) };
        if code != INIT_OK {
            // SteamAPI_InitFlat always NUL-terminates the message buffer.
            let message = unsafe { CStr::from_ptr(err.as_ptr()) }
                .to_string_lossy()
                .into_owned();
            return Err(InitFailure { code, message });
        }
        unsafe { SteamAPI_ManualDispatch_Init() };
        self.pipe
            .store(unsafe { SteamAPI_GetHSteamPipe() }, Ordering::Release);
        self.running.store(true, Ordering::Release);
        debug!("steam api initialized");
        Ok(())
    }

    fn shutdown(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            unsafe { SteamAPI_Shutdown() };
        }
    }

    fn poll_once(&self, sink: &mut dyn FnMut(&[u8])) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let pipe = self.pipe.load(Ordering::Acquire);
        unsafe { SteamAPI_ManualDispatch_RunFrame(pipe) };
        let mut msg = CallbackMsg {
            _steam_user: 0,
            callback: 0,
            param: ptr::null_mut(),
            param_len: 0,
        };
        while unsafe { SteamAPI_ManualDispatch_GetNextCallback(pipe, &mut msg) } {
            if msg.callback == STATUS_CHANGED_CALLBACK_ID
                && !msg.param.is_null()
                && msg.param_len > 0
            {
                // SAFETY: the parameter block stays valid until FreeLastCallback.
                let record =
                    unsafe { std::slice::from_raw_parts(msg.param, msg.param_len as usize) };
                sink(record);
            }
            unsafe { SteamAPI_ManualDispatch_FreeLastCallback(pipe) };
        }
    }

    fn local_identity_id(&self) -> u64 {
        let user = unsafe { SteamAPI_SteamUser_v023() };
        if user.is_null() {
            return 0;
        }
        unsafe { SteamAPI_ISteamUser_GetSteamID(user) }
    }

    fn sockets(&self) -> Option<Arc<dyn NativeSockets>> {
        let iface = NonNull::new(unsafe { SteamAPI_SteamNetworkingSockets_SteamAPI_v012() })?;
        Some(Arc::new(FlatSockets { iface }))
    }
}

/// The `ISteamNetworkingSockets` interface pointer.
struct FlatSockets {
    iface: NonNull<c_void>,
}

// SAFETY: ISteamNetworkingSockets is internally synchronized; the pointer is owned by the
// Steam runtime and never freed by this crate.
unsafe impl Send for FlatSockets {}
unsafe impl Sync for FlatSockets {}

#[repr(C, align(8))]
struct Aligned<const N: usize>([u8; N]);

fn max_messages(out: &[*mut c_void]) -> c_int {
    out.len().min(c_int::MAX as usize) as c_int
}

fn options_ptr(options: &[ConfigValueRecord]) -> *const ConfigValueRecord {
    if options.is_empty() {
        ptr::null()
    } else {
        options.as_ptr()
    }
}

impl FlatSockets {
    fn s(&self) -> *mut c_void {
        self.iface.as_ptr()
    }
}

impl NativeSockets for FlatSockets {
    fn create_listen_socket_p2p(&self, virtual_port: i32, options: &[ConfigValueRecord]) -> u32 {
        unsafe {
            SteamAPI_ISteamNetworkingSockets_CreateListenSocketP2P(
                self.s(),
                virtual_port,
                options.len() as c_int,
                options_ptr(options),
            )
        }
    }

    fn connect_p2p(
        &self,
        identity: &IdentityBlock,
        virtual_port: i32,
        options: &[ConfigValueRecord],
    ) -> u32 {
        unsafe {
            SteamAPI_ISteamNetworkingSockets_ConnectP2P(
                self.s(),
                identity,
                virtual_port,
                options.len() as c_int,
                options_ptr(options),
            )
        }
    }

    fn accept_connection(&self, conn: u32) -> i32 {
        unsafe { SteamAPI_ISteamNetworkingSockets_AcceptConnection(self.s(), conn) }
    }

    fn close_connection(&self, conn: u32, reason: i32, debug: Option<&CStr>, linger: bool) -> bool {
        let debug = debug.map_or(ptr::null(), CStr::as_ptr);
        unsafe {
            SteamAPI_ISteamNetworkingSockets_CloseConnection(self.s(), conn, reason, debug, linger)
        }
    }

    fn close_listen_socket(&self, socket: u32) -> bool {
        unsafe { SteamAPI_ISteamNetworkingSockets_CloseListenSocket(self.s(), socket) }
    }

    fn send_message_to_connection(
        &self,
        conn: u32,
        data: &[u8],
        flags: i32,
        out_message_number: &mut i64,
    ) -> i32 {
        let Ok(len) = u32::try_from(data.len()) else {
            return RESULT_INVALID_PARAM;
        };
        unsafe {
            SteamAPI_ISteamNetworkingSockets_SendMessageToConnection(
                self.s(),
                conn,
                data.as_ptr() as *const c_void,
                len,
                flags,
                out_message_number,
            )
        }
    }

    fn flush_messages_on_connection(&self, conn: u32) -> i32 {
        unsafe { SteamAPI_ISteamNetworkingSockets_FlushMessagesOnConnection(self.s(), conn) }
    }

    fn receive_messages_on_connection(&self, conn: u32, out: &mut [*mut c_void]) -> i32 {
        unsafe {
            SteamAPI_ISteamNetworkingSockets_ReceiveMessagesOnConnection(
                self.s(),
                conn,
                out.as_mut_ptr(),
                max_messages(out),
            )
        }
    }

    // The v012 interface receives per connection or per poll group only.
    fn receive_messages_on_listen_socket(&self, _socket: u32, _out: &mut [*mut c_void]) -> i32 {
        -1
    }

    fn receive_messages_on_poll_group(&self, group: u32, out: &mut [*mut c_void]) -> i32 {
        unsafe {
            SteamAPI_ISteamNetworkingSockets_ReceiveMessagesOnPollGroup(
                self.s(),
                group,
                out.as_mut_ptr(),
                max_messages(out),
            )
        }
    }

    fn get_connection_info(&self, conn: u32, out: &mut [u8; CONNECTION_INFO_SIZE]) -> bool {
        let mut buf = Aligned([0u8; CONNECTION_INFO_SIZE]);
        let ok = unsafe {
            SteamAPI_ISteamNetworkingSockets_GetConnectionInfo(
                self.s(),
                conn,
                buf.0.as_mut_ptr() as *mut c_void,
            )
        };
        out.copy_from_slice(&buf.0);
        ok
    }

    fn get_connection_real_time_status(
        &self,
        conn: u32,
        out: &mut [u8; REALTIME_STATUS_SIZE],
    ) -> i32 {
        let mut buf = Aligned([0u8; REALTIME_STATUS_SIZE]);
        let result = unsafe {
            SteamAPI_ISteamNetworkingSockets_GetConnectionRealTimeStatus(
                self.s(),
                conn,
                buf.0.as_mut_ptr() as *mut c_void,
                0,
                ptr::null_mut(),
            )
        };
        out.copy_from_slice(&buf.0);
        result
    }

    fn create_poll_group(&self) -> u32 {
        unsafe { SteamAPI_ISteamNetworkingSockets_CreatePollGroup(self.s()) }
    }

    fn destroy_poll_group(&self, group: u32) -> bool {
        unsafe { SteamAPI_ISteamNetworkingSockets_DestroyPollGroup(self.s(), group) }
    }

    fn set_connection_poll_group(&self, conn: u32, group: u32) -> bool {
        unsafe { SteamAPI_ISteamNetworkingSockets_SetConnectionPollGroup(self.s(), conn, group) }
    }

    fn set_connection_user_data(&self, conn: u32, user_data: i64) -> bool {
        unsafe { SteamAPI_ISteamNetworkingSockets_SetConnectionUserData(self.s(), conn, user_data) }
    }

    fn set_connection_name(&self, conn: u32, name: &CStr) {
        unsafe { SteamAPI_ISteamNetworkingSockets_SetConnectionName(self.s(), conn, name.as_ptr()) }
    }

    unsafe fn release_record(&self, record: *mut c_void) {
        SteamAPI_SteamNetworkingMessage_t_Release(record);
    }
}
