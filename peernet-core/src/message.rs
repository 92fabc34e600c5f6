//! Received messages: payload copied out of the native record, record released exactly once.

use std::ffi::c_void;
use std::fmt;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::Arc;

use crate::error::{Error, ErrorKind};
use crate::handle::ConnectionHandle;
use crate::identity::Identity;
use crate::native::NativeSockets;
use crate::record::{decode_message_header, RecordError, MESSAGE_RECORD_LEN};

/// Ownership of one native message record. Dropping it releases the record.
pub(crate) struct ForeignRecord {
    ptr: NonNull<c_void>,
    native: Arc<dyn NativeSockets>,
}

// SAFETY: the pointer is only read during parsing and handed back to `release_record`,
// which the native library allows from any thread.
unsafe impl Send for ForeignRecord {}

impl ForeignRecord {
    /// # Safety
    /// `ptr` must be a record returned by a receive call on `native`, not yet released,
    /// and at least [`MESSAGE_RECORD_LEN`] bytes long.
    pub(crate) unsafe fn new(ptr: NonNull<c_void>, native: Arc<dyn NativeSockets>) -> Self {
        Self { ptr, native }
    }

    fn header_bytes(&self) -> &[u8] {
        // SAFETY: guaranteed by the constructor contract; the record outlives `self`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr() as *const u8, MESSAGE_RECORD_LEN) }
    }
}

impl Drop for ForeignRecord {
    fn drop(&mut self) {
        // SAFETY: a guard is constructed once per record and dropped once.
        unsafe { self.native.release_record(self.ptr.as_ptr()) }
    }
}

impl fmt::Debug for ForeignRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForeignRecord({:p})", self.ptr)
    }
}

/// A message received from a peer.
///
/// The payload is an owned copy. The underlying native record stays allocated until
/// [`release`](Message::release) is called or the message is dropped, whichever comes first.
#[derive(Debug)]
pub struct Message {
    payload: Vec<u8>,
    connection: ConnectionHandle,
    peer: Identity,
    connection_user_data: i64,
    time_received: i64,
    message_number: i64,
    channel: i32,
    flags: i32,
    record: Option<ForeignRecord>,
}

impl Message {
    /// Decode a native record. `fallback` replaces the connection when the record carries none.
    ///
    /// On error the record is released before returning.
    pub(crate) fn parse_record(
        record: ForeignRecord,
        fallback: ConnectionHandle,
    ) -> Result<Message, RecordError> {
        let header = decode_message_header(record.header_bytes())?;
        let payload = if header.size == 0 || header.data_addr == 0 {
            Vec::new()
        } else {
            // SAFETY: the native layer guarantees `size` readable bytes at the data pointer
            // for as long as the record is unreleased, and `record` is still held.
            unsafe { slice::from_raw_parts(header.data_addr as usize as *const u8, header.size) }
                .to_vec()
        };
        let connection = if header.connection.is_valid() {
            header.connection
        } else {
            fallback
        };
        Ok(Message {
            payload,
            connection,
            peer: header.peer,
            connection_user_data: header.connection_user_data,
            time_received: header.time_received,
            message_number: header.message_number,
            channel: header.channel,
            flags: header.flags,
            record: Some(record),
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take the payload, releasing the native record.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn connection(&self) -> ConnectionHandle {
        self.connection
    }

    /// Sender identity. `Identity::Invalid` if the native layer did not attach one.
    pub fn peer(&self) -> &Identity {
        &self.peer
    }

    pub fn connection_user_data(&self) -> i64 {
        self.connection_user_data
    }

    /// Native receive timestamp in microseconds.
    pub fn time_received(&self) -> i64 {
        self.time_received
    }

    pub fn message_number(&self) -> i64 {
        self.message_number
    }

    pub fn channel(&self) -> i32 {
        self.channel
    }

    pub fn flags(&self) -> i32 {
        self.flags
    }

    /// Release the native record. Later calls do nothing; the payload stays readable.
    pub fn release(&mut self) {
        self.record.take();
    }

    pub fn is_released(&self) -> bool {
        self.record.is_none()
    }
}

/// Release a message if there is one.
pub fn release_message(message: Option<&mut Message>) {
    if let Some(message) = message {
        message.release();
    }
}

/// Run one batch receive and take ownership of every record it returns.
///
/// `receive` fills a slot array of `max_count` entries and returns the count (negative on
/// failure). Null slots are skipped. Every non-null record is guarded before any parsing,
/// so all of them are released even if one turns out malformed.
pub(crate) fn receive_batch(
    native: &Arc<dyn NativeSockets>,
    op: &'static str,
    max_count: usize,
    fallback: ConnectionHandle,
    receive: impl FnOnce(&mut [*mut c_void]) -> i32,
) -> Result<Vec<Message>, Error> {
    let mut slots = vec![ptr::null_mut::<c_void>(); max_count];
    let count = receive(&mut slots);
    if count < 0 {
        return Err(Error::native(op, ErrorKind::ReceiveFailed, count));
    }
    let count = (count as usize).min(slots.len());

    let records: Vec<ForeignRecord> = slots[..count]
        .iter()
        .filter_map(|&p| NonNull::new(p))
        // SAFETY: each non-null pointer was just returned by the receive call and is owned here.
        .map(|p| unsafe { ForeignRecord::new(p, Arc::clone(native)) })
        .collect();

    let mut messages = Vec::with_capacity(records.len());
    for record in records {
        messages.push(Message::parse_record(record, fallback)?);
    }
    Ok(messages)
}
