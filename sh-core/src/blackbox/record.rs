//! Blackbox wire records
//!
//! Layout (little-endian, no padding):
//!
//! | offset | size | field                        |
//! |--------|------|------------------------------|
//! | 0      | 20   | password, NUL/space padded   |
//! | 20     | 4    | result, i32 (1 = success)    |
//! | 24     | 8    | timestamp, i64 epoch seconds |
//!
//! The ioctl payload is the first 24 bytes; the device fills in the timestamp.

use crate::constants::blackbox::{AUTH_DATA_SIZE, PASSWORD_LEN, RECORD_SIZE};
use sh_protocol::LogEntry;

/// Build the ioctl payload for a login attempt.
///
/// Passwords longer than the field are truncated at the byte level; callers
/// validate ASCII beforehand so truncation never splits a character.
pub fn encode_auth_data(password: &str, success: bool) -> [u8; AUTH_DATA_SIZE] {
    let mut buf = [0u8; AUTH_DATA_SIZE];
    let bytes = password.as_bytes();
    let n = bytes.len().min(PASSWORD_LEN);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf[PASSWORD_LEN..].copy_from_slice(&i32::from(success).to_le_bytes());
    buf
}

/// Decode one full record
pub fn decode_record(raw: &[u8; RECORD_SIZE]) -> LogEntry {
    let field = &raw[..PASSWORD_LEN];
    let end = field.iter().position(|&b| b == 0).unwrap_or(PASSWORD_LEN);
    let password = String::from_utf8_lossy(&field[..end]).trim_end().to_string();

    let mut result = [0u8; 4];
    result.copy_from_slice(&raw[PASSWORD_LEN..PASSWORD_LEN + 4]);
    let mut timestamp = [0u8; 8];
    timestamp.copy_from_slice(&raw[PASSWORD_LEN + 4..]);

    LogEntry {
        password,
        result: i32::from_le_bytes(result),
        timestamp: i64::from_le_bytes(timestamp),
    }
}

/// Decode a bulk read: whole records only, zero timestamps dropped, newest first
pub fn decode_records(buf: &[u8]) -> Vec<LogEntry> {
    let mut entries: Vec<LogEntry> = buf
        .chunks_exact(RECORD_SIZE)
        .filter_map(|chunk| <&[u8; RECORD_SIZE]>::try_from(chunk).ok())
        .map(decode_record)
        .filter(|entry| entry.timestamp != 0)
        .collect();
    entries.reverse();
    entries
}

#[cfg(test)]
pub(crate) fn encode_record(password: &str, result: i32, timestamp: i64) -> [u8; RECORD_SIZE] {
    let mut raw = [0u8; RECORD_SIZE];
    let auth = encode_auth_data(password, result != 0);
    raw[..AUTH_DATA_SIZE].copy_from_slice(&auth);
    raw[PASSWORD_LEN..PASSWORD_LEN + 4].copy_from_slice(&result.to_le_bytes());
    raw[AUTH_DATA_SIZE..].copy_from_slice(&timestamp.to_le_bytes());
    raw
}
