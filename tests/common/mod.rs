//! Shared helpers for building synthetic traces in integration tests.

use tracestitch::record::{EventKey, RawRecord, UNKNOWN_ID};

pub fn push_utf16(buf: &mut Vec<u8>, s: &str) {
    for unit in s.encode_utf16() {
        buf.extend_from_slice(&unit.to_le_bytes());
    }
    buf.extend_from_slice(&0u16.to_le_bytes());
}

pub fn push_pointer(buf: &mut Vec<u8>, value: u64, pointer_width: u8) {
    if pointer_width == 8 {
        buf.extend_from_slice(&value.to_le_bytes());
    } else {
        buf.extend_from_slice(&(value as u32).to_le_bytes());
    }
}

pub fn thread_payload(pid: i32, tid: i32, pointer_width: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&pid.to_le_bytes());
    buf.extend_from_slice(&tid.to_le_bytes());
    for _ in 0..7 {
        push_pointer(&mut buf, 0, pointer_width);
    }
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf
}

pub fn file_payload(file_key: u64, name: &str, pointer_width: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    push_pointer(&mut buf, file_key, pointer_width);
    push_utf16(&mut buf, name);
    buf
}

pub fn disk_payload(
    disk_number: u32,
    transfer_size: u32,
    file_key: u64,
    elapsed_qpc: u64,
    pointer_width: u8,
) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&disk_number.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&transfer_size.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&0u64.to_le_bytes());
    push_pointer(&mut buf, file_key, pointer_width);
    push_pointer(&mut buf, 0, pointer_width);
    buf.extend_from_slice(&elapsed_qpc.to_le_bytes());
    buf
}

pub fn volume_mapping_payload(kernel: &str, user: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    push_utf16(&mut buf, kernel);
    push_utf16(&mut buf, user);
    buf
}

/// A record as the capture source would deliver it: ambient identity only,
/// reporter fields unset.
pub fn record(
    key: EventKey,
    version: u8,
    pointer_width: u8,
    timestamp: i64,
    thread_id: i32,
    payload: Vec<u8>,
) -> RawRecord {
    RawRecord {
        provider: key.provider,
        task: key.task,
        opcode: key.opcode,
        version,
        pointer_width,
        timestamp,
        thread_id,
        process_id: UNKNOWN_ID,
        reporter_thread_id: None,
        reporter_process_id: None,
        payload,
    }
}
