// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Length-prefixed binary framing for replicated message batches.
//!
//! Per message: the 66 ASCII hex chars of the recipient pubkey (no
//! prefix), then `hash`, `data` and `nonce` as u64-length-prefixed
//! fields, with `ttl` and `timestamp` as bare u64s in between. All
//! integers little endian. A batch is the plain concatenation of
//! messages; decoding consumes the buffer until empty and rejects the
//! whole batch on any truncation.

use crate::{Message, MsgPubkey};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Serialized batches are closed once they reach this size. A single
/// message larger than the bound still travels, alone in its batch.
pub const MAX_BATCH_SIZE: usize = 500_000;

/// Decoding failure; the whole batch is discarded.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum WireError {
    /// Buffer ended inside the named field.
    #[error("batch truncated inside {0}")]
    Truncated(&'static str),
    /// The fixed-size pubkey field is not valid hex.
    #[error("malformed recipient pubkey")]
    BadPubkey,
    /// A string field is not valid UTF-8.
    #[error("{0} is not valid UTF-8")]
    BadUtf8(&'static str),
}

/// Append one encoded message to `buf`.
pub fn serialize_message(buf: &mut BytesMut, msg: &Message) {
    buf.put_slice(msg.pubkey.as_str().as_bytes());
    put_str(buf, &msg.hash);
    put_bytes(buf, &msg.data);
    buf.put_u64_le(msg.ttl);
    buf.put_u64_le(msg.timestamp);
    put_str(buf, &msg.nonce);
}

/// Encode messages into batches of at most [`MAX_BATCH_SIZE`] bytes,
/// never splitting a message across batches.
pub fn serialize_messages<'a>(msgs: impl IntoIterator<Item = &'a Message>) -> Vec<Bytes> {
    let mut batches = Vec::new();
    let mut buf = BytesMut::new();
    for msg in msgs {
        let mut encoded = BytesMut::new();
        serialize_message(&mut encoded, msg);
        if !buf.is_empty() && buf.len() + encoded.len() > MAX_BATCH_SIZE {
            batches.push(buf.split().freeze());
        }
        buf.unsplit(encoded);
    }
    if !buf.is_empty() {
        batches.push(buf.freeze());
    }
    trace!("serialized {} batch(es)", batches.len());
    batches
}

/// Decode a batch back into messages. Any leftover or short read fails
/// the whole batch.
pub fn deserialize_messages(blob: &[u8]) -> Result<Vec<Message>, WireError> {
    let mut buf = blob;
    let mut messages = Vec::new();
    while buf.has_remaining() {
        messages.push(get_message(&mut buf)?);
    }
    Ok(messages)
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u64_le(s.len() as u64);
    buf.put_slice(s.as_bytes());
}

fn put_bytes(buf: &mut BytesMut, b: &[u8]) {
    buf.put_u64_le(b.len() as u64);
    buf.put_slice(b);
}

fn get_message(buf: &mut &[u8]) -> Result<Message, WireError> {
    if buf.remaining() < MsgPubkey::HEX_LEN {
        return Err(WireError::Truncated("pubkey"));
    }
    let raw = buf.copy_to_bytes(MsgPubkey::HEX_LEN);
    let pubkey = std::str::from_utf8(&raw)
        .ok()
        .and_then(|s| MsgPubkey::new(s).ok())
        .ok_or(WireError::BadPubkey)?;

    let hash = get_string(buf, "hash")?;
    let data = get_field(buf, "data")?;
    let ttl = get_u64(buf, "ttl")?;
    let timestamp = get_u64(buf, "timestamp")?;
    let nonce = get_string(buf, "nonce")?;

    Ok(Message {
        pubkey,
        data,
        hash,
        ttl,
        timestamp,
        nonce,
    })
}

fn get_u64(buf: &mut &[u8], field: &'static str) -> Result<u64, WireError> {
    if buf.remaining() < 8 {
        return Err(WireError::Truncated(field));
    }
    Ok(buf.get_u64_le())
}

fn get_field(buf: &mut &[u8], field: &'static str) -> Result<Bytes, WireError> {
    let len = get_u64(buf, field)?;
    if (buf.remaining() as u64) < len {
        return Err(WireError::Truncated(field));
    }
    Ok(buf.copy_to_bytes(len as usize))
}

fn get_string(buf: &mut &[u8], field: &'static str) -> Result<String, WireError> {
    let raw = get_field(buf, field)?;
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::BadUtf8(field))
}
