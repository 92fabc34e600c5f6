//! Fixed-layout native records: decode from byte slices of checked length, encode identity and option blocks.
//!
//! Offsets follow the native library's 64-bit ABI. Every decoder checks the slice length up front
//! and reports [`RecordError::Truncated`] instead of reading past the end.

use std::ffi::CString;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use crate::handle::{ConnectionHandle, ListenSocketHandle};
use crate::identity::Identity;
use crate::types::{
    ConfigOption, ConfigValue, ConnectionInfo, ConnectionState, RealtimeStatus, StatusChanged,
};

#[cfg(not(target_pointer_width = "64"))]
compile_error!("native record layouts are only defined for 64-bit targets");

// Identity block.
pub const IDENTITY_SIZE: usize = 136;
pub(crate) const IDENTITY_TYPE_IP_ADDRESS: i32 = 1;
pub(crate) const IDENTITY_TYPE_NUMERIC_ID: i32 = 16;
const IDENTITY_TYPE: usize = 0;
const IDENTITY_CB_SIZE: usize = 4;
const IDENTITY_DATA: usize = 8;

// IP address block (packed, 18 bytes): IPv6 bytes then host-order port.
const IP_ADDR_SIZE: usize = 18;

// Message record.
pub(crate) const MSG_DATA: usize = 0;
pub(crate) const MSG_SIZE: usize = 8;
pub(crate) const MSG_CONN: usize = 12;
pub(crate) const MSG_IDENTITY: usize = 16;
pub(crate) const MSG_CONN_USER_DATA: usize = 152;
pub(crate) const MSG_TIME_RECEIVED: usize = 160;
pub(crate) const MSG_NUMBER: usize = 168;
pub(crate) const MSG_CHANNEL: usize = 192;
pub(crate) const MSG_FLAGS: usize = 196;
/// Bytes of a message record this crate reads. The native record is at least this long.
pub const MESSAGE_RECORD_LEN: usize = 200;

// Connection info record.
pub const CONNECTION_INFO_SIZE: usize = 696;
pub(crate) const INFO_IDENTITY: usize = 0;
pub(crate) const INFO_USER_DATA: usize = 136;
pub(crate) const INFO_LISTEN_SOCKET: usize = 144;
pub(crate) const INFO_REMOTE_ADDR: usize = 148;
pub(crate) const INFO_POP_REMOTE: usize = 168;
pub(crate) const INFO_POP_RELAY: usize = 172;
pub(crate) const INFO_STATE: usize = 176;
pub(crate) const INFO_END_REASON: usize = 180;
pub(crate) const INFO_END_DEBUG: usize = 184;
pub(crate) const INFO_DESCRIPTION: usize = 312;
pub(crate) const INFO_FLAGS: usize = 440;
const INFO_STRING_LEN: usize = 128;

// Real-time status record.
pub const REALTIME_STATUS_SIZE: usize = 120;
pub(crate) const RT_STATE: usize = 0;
pub(crate) const RT_PING: usize = 4;
pub(crate) const RT_QUALITY_LOCAL: usize = 8;
pub(crate) const RT_QUALITY_REMOTE: usize = 12;
pub(crate) const RT_OUT_PACKETS: usize = 16;
pub(crate) const RT_OUT_BYTES: usize = 20;
pub(crate) const RT_IN_PACKETS: usize = 24;
pub(crate) const RT_IN_BYTES: usize = 28;
pub(crate) const RT_SEND_RATE: usize = 32;
pub(crate) const RT_PENDING_UNRELIABLE: usize = 36;
pub(crate) const RT_PENDING_RELIABLE: usize = 40;
pub(crate) const RT_SENT_UNACKED: usize = 44;
pub(crate) const RT_QUEUE_TIME: usize = 48;

// Status-changed callback record. Callback structs use 4-byte packing on Linux and macOS, 8 elsewhere.
#[cfg(any(target_os = "linux", target_os = "macos"))]
const CALLBACK_PACK: usize = 4;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const CALLBACK_PACK: usize = 8;
pub(crate) const STATUS_CONN: usize = 0;
pub(crate) const STATUS_INFO: usize = CALLBACK_PACK;
pub(crate) const STATUS_OLD_STATE: usize = STATUS_INFO + CONNECTION_INFO_SIZE;
/// Bytes of a status-changed record this crate reads.
pub const STATUS_CHANGED_LEN: usize = STATUS_OLD_STATE + 4;
/// Callback id the native layer tags status-changed records with.
pub const STATUS_CHANGED_CALLBACK_ID: i32 = 1221;

// Config value record.
pub const CONFIG_VALUE_SIZE: usize = 16;

/// Error decoding a native record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record too short: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error("negative payload size {0}")]
    NegativeSize(i32),
}

/// Bounds-checked little reader over a record whose length was validated once.
struct Fields<'a>(&'a [u8]);

impl<'a> Fields<'a> {
    fn new(bytes: &'a [u8], need: usize) -> Result<Self, RecordError> {
        if bytes.len() < need {
            return Err(RecordError::Truncated {
                need,
                got: bytes.len(),
            });
        }
        Ok(Fields(bytes))
    }

    fn array<const N: usize>(&self, off: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.0[off..off + N]);
        out
    }

    fn i32(&self, off: usize) -> i32 {
        i32::from_ne_bytes(self.array(off))
    }

    fn u32(&self, off: usize) -> u32 {
        u32::from_ne_bytes(self.array(off))
    }

    fn i64(&self, off: usize) -> i64 {
        i64::from_ne_bytes(self.array(off))
    }

    fn u64(&self, off: usize) -> u64 {
        u64::from_ne_bytes(self.array(off))
    }

    fn f32(&self, off: usize) -> f32 {
        f32::from_ne_bytes(self.array(off))
    }

    /// NUL-terminated string in a fixed `len`-byte field.
    fn c_string(&self, off: usize, len: usize) -> String {
        let field = &self.0[off..off + len];
        let end = field.iter().position(|&b| b == 0).unwrap_or(len);
        String::from_utf8_lossy(&field[..end]).into_owned()
    }

    fn slice(&self, off: usize, len: usize) -> &'a [u8] {
        &self.0[off..off + len]
    }
}

/// The native identity block, as passed to `connect_p2p`.
#[derive(Clone, Copy)]
#[repr(C, align(8))]
pub struct IdentityBlock(pub [u8; IDENTITY_SIZE]);

impl IdentityBlock {
    pub fn as_bytes(&self) -> &[u8; IDENTITY_SIZE] {
        &self.0
    }
}

/// Encode an identity into the native block. `None` if the identity has no native form
/// (invalid, or a network address whose host is not an IP literal).
pub fn encode_identity(identity: &Identity) -> Option<IdentityBlock> {
    let mut block = [0u8; IDENTITY_SIZE];
    match identity {
        Identity::Invalid => return None,
        Identity::NumericId(id) => {
            block[IDENTITY_TYPE..IDENTITY_TYPE + 4]
                .copy_from_slice(&IDENTITY_TYPE_NUMERIC_ID.to_ne_bytes());
            block[IDENTITY_CB_SIZE..IDENTITY_CB_SIZE + 4].copy_from_slice(&8i32.to_ne_bytes());
            block[IDENTITY_DATA..IDENTITY_DATA + 8].copy_from_slice(&id.to_ne_bytes());
        }
        Identity::NetworkAddress { host, port } => {
            let ip: IpAddr = host.parse().ok()?;
            block[IDENTITY_TYPE..IDENTITY_TYPE + 4]
                .copy_from_slice(&IDENTITY_TYPE_IP_ADDRESS.to_ne_bytes());
            block[IDENTITY_CB_SIZE..IDENTITY_CB_SIZE + 4]
                .copy_from_slice(&(IP_ADDR_SIZE as i32).to_ne_bytes());
            block[IDENTITY_DATA..IDENTITY_DATA + IP_ADDR_SIZE]
                .copy_from_slice(&encode_ip_addr(SocketAddr::new(ip, *port)));
        }
    }
    Some(IdentityBlock(block))
}

fn encode_ip_addr(addr: SocketAddr) -> [u8; IP_ADDR_SIZE] {
    let v6 = match addr.ip() {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    };
    let mut out = [0u8; IP_ADDR_SIZE];
    out[..16].copy_from_slice(&v6.octets());
    out[16..].copy_from_slice(&addr.port().to_ne_bytes());
    out
}

/// Decode an 18-byte IP address block. All-zero means "unset".
fn decode_ip_addr(bytes: &[u8]) -> Option<SocketAddr> {
    if bytes.iter().all(|&b| b == 0) {
        return None;
    }
    Some(ip_addr_from(bytes))
}

fn ip_addr_from(bytes: &[u8]) -> SocketAddr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&bytes[..16]);
    let port = u16::from_ne_bytes([bytes[16], bytes[17]]);
    let v6 = Ipv6Addr::from(octets);
    let ip = match v6.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(v6),
    };
    SocketAddr::new(ip, port)
}

/// Decode a native identity block. Identity types this crate does not model decode as `Invalid`.
pub fn decode_identity(bytes: &[u8]) -> Result<Identity, RecordError> {
    let f = Fields::new(bytes, IDENTITY_SIZE)?;
    Ok(identity_at(&f, 0))
}

fn identity_at(f: &Fields<'_>, base: usize) -> Identity {
    match f.i32(base + IDENTITY_TYPE) {
        IDENTITY_TYPE_NUMERIC_ID => Identity::NumericId(f.u64(base + IDENTITY_DATA)),
        IDENTITY_TYPE_IP_ADDRESS => {
            let addr = ip_addr_from(f.slice(base + IDENTITY_DATA, IP_ADDR_SIZE));
            Identity::network_address(addr.ip().to_string(), addr.port())
        }
        _ => Identity::Invalid,
    }
}

/// Fields of a native message record. The data pointer is only an address; it is never dereferenced here.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageHeader {
    pub data_addr: u64,
    pub size: usize,
    pub connection: ConnectionHandle,
    pub peer: Identity,
    pub connection_user_data: i64,
    pub time_received: i64,
    pub message_number: i64,
    pub channel: i32,
    pub flags: i32,
}

pub fn decode_message_header(bytes: &[u8]) -> Result<MessageHeader, RecordError> {
    let f = Fields::new(bytes, MESSAGE_RECORD_LEN)?;
    let size = f.i32(MSG_SIZE);
    if size < 0 {
        return Err(RecordError::NegativeSize(size));
    }
    Ok(MessageHeader {
        data_addr: f.u64(MSG_DATA),
        size: size as usize,
        connection: ConnectionHandle::from_raw(f.u32(MSG_CONN)),
        peer: identity_at(&f, MSG_IDENTITY),
        connection_user_data: f.i64(MSG_CONN_USER_DATA),
        time_received: f.i64(MSG_TIME_RECEIVED),
        message_number: f.i64(MSG_NUMBER),
        channel: f.i32(MSG_CHANNEL),
        flags: f.i32(MSG_FLAGS),
    })
}

pub fn decode_connection_info(bytes: &[u8]) -> Result<ConnectionInfo, RecordError> {
    let f = Fields::new(bytes, CONNECTION_INFO_SIZE)?;
    Ok(connection_info_at(&f, 0))
}

fn connection_info_at(f: &Fields<'_>, base: usize) -> ConnectionInfo {
    ConnectionInfo {
        remote: identity_at(f, base + INFO_IDENTITY),
        user_data: f.i64(base + INFO_USER_DATA),
        listen_socket: ListenSocketHandle::from_raw(f.u32(base + INFO_LISTEN_SOCKET)),
        remote_addr: decode_ip_addr(f.slice(base + INFO_REMOTE_ADDR, IP_ADDR_SIZE)),
        pop_remote: f.u32(base + INFO_POP_REMOTE),
        pop_relay: f.u32(base + INFO_POP_RELAY),
        state: ConnectionState::from_raw(f.i32(base + INFO_STATE)),
        end_reason: f.i32(base + INFO_END_REASON),
        end_debug: f.c_string(base + INFO_END_DEBUG, INFO_STRING_LEN),
        description: f.c_string(base + INFO_DESCRIPTION, INFO_STRING_LEN),
        flags: f.i32(base + INFO_FLAGS),
    }
}

pub fn decode_realtime_status(bytes: &[u8]) -> Result<RealtimeStatus, RecordError> {
    let f = Fields::new(bytes, RT_QUEUE_TIME + 8)?;
    Ok(RealtimeStatus {
        state: ConnectionState::from_raw(f.i32(RT_STATE)),
        ping: f.i32(RT_PING),
        quality_local: f.f32(RT_QUALITY_LOCAL),
        quality_remote: f.f32(RT_QUALITY_REMOTE),
        out_packets_per_sec: f.f32(RT_OUT_PACKETS),
        out_bytes_per_sec: f.f32(RT_OUT_BYTES),
        in_packets_per_sec: f.f32(RT_IN_PACKETS),
        in_bytes_per_sec: f.f32(RT_IN_BYTES),
        send_rate_bytes_per_sec: f.i32(RT_SEND_RATE),
        pending_unreliable: f.i32(RT_PENDING_UNRELIABLE),
        pending_reliable: f.i32(RT_PENDING_RELIABLE),
        sent_unacked_reliable: f.i32(RT_SENT_UNACKED),
        queue_time_usec: f.i64(RT_QUEUE_TIME),
    })
}

/// Decode a status-changed callback record. End reason 0 and an empty debug string map to `None`.
pub fn decode_status_changed(bytes: &[u8]) -> Result<StatusChanged, RecordError> {
    let f = Fields::new(bytes, STATUS_CHANGED_LEN)?;
    let info = connection_info_at(&f, STATUS_INFO);
    Ok(StatusChanged {
        connection: ConnectionHandle::from_raw(f.u32(STATUS_CONN)),
        remote: info.remote,
        listen_socket: info.listen_socket,
        old_state: ConnectionState::from_raw(f.i32(STATUS_OLD_STATE)),
        new_state: info.state,
        end_reason: (info.end_reason != 0).then_some(info.end_reason),
        end_debug: (!info.end_debug.is_empty()).then_some(info.end_debug),
    })
}

/// One native config-value record (key, data type, 8-byte value slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, align(8))]
pub struct ConfigValueRecord(pub [u8; CONFIG_VALUE_SIZE]);

impl ConfigValueRecord {
    pub fn key(&self) -> i32 {
        i32::from_ne_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    pub fn data_type(&self) -> i32 {
        i32::from_ne_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }

    pub fn value_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out.copy_from_slice(&self.0[8..16]);
        out
    }
}

/// Option records ready to pass to the native layer. String values point into `strings`,
/// so the records are only valid while this value is alive.
#[derive(Debug, Default)]
pub struct EncodedOptions {
    records: Vec<ConfigValueRecord>,
    strings: Vec<CString>,
}

impl EncodedOptions {
    pub fn records(&self) -> &[ConfigValueRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Encode options. A string value containing NUL is cut at the first NUL, as the native layer would read it.
pub fn encode_options<'a>(options: impl IntoIterator<Item = &'a ConfigOption>) -> EncodedOptions {
    let mut out = EncodedOptions::default();
    for option in options {
        let mut rec = [0u8; CONFIG_VALUE_SIZE];
        rec[0..4].copy_from_slice(&option.key.0.to_ne_bytes());
        rec[4..8].copy_from_slice(&option.value.data_type().to_ne_bytes());
        match &option.value {
            ConfigValue::Int32(v) => rec[8..12].copy_from_slice(&v.to_ne_bytes()),
            ConfigValue::Int64(v) => rec[8..16].copy_from_slice(&v.to_ne_bytes()),
            ConfigValue::Float(v) => rec[8..12].copy_from_slice(&v.to_ne_bytes()),
            ConfigValue::String(s) => {
                let c = c_string_lossy(s);
                // The CString's heap buffer does not move when the CString itself is moved into the Vec.
                let addr = c.as_ptr() as usize as u64;
                rec[8..16].copy_from_slice(&addr.to_ne_bytes());
                out.strings.push(c);
            }
        }
        out.records.push(ConfigValueRecord(rec));
    }
    out
}

/// Convert to a C string, truncating at the first interior NUL.
pub(crate) fn c_string_lossy(s: &str) -> CString {
    let end = s.bytes().position(|b| b == 0).unwrap_or(s.len());
    // No NUL remains in s[..end].
    CString::new(&s.as_bytes()[..end]).unwrap_or_default()
}
