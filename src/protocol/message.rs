//! Cooperation wire messages.
//!
//! Every message shares a small header (type tag and source edge index);
//! bodies are built from the typed frames defined across the crate, all
//! multi-byte integers big-endian. Foreground messages piggyback a
//! collected popularity and/or a generation-tagged victim syncset; the
//! `need_complete_sync` flag asks the destination to restart victim sync
//! with a complete syncset.

use crate::directory::DirectoryInfo;
use crate::error::{CoveredError, Result};
use crate::popularity::collected::{CollectedPopularity, FastPathHint};
use crate::popularity::edgeset::Edgeset;
use crate::primitives::bytes::{put_bytes, put_u32_be, put_u64_be, put_u8, Reader};
use crate::types::{EdgeIndex, Key, ObjectSize, Value};
use crate::victim::sync::VictimSync;
use crate::victim::syncset::VictimSyncset;

const TYPE_DIRECTORY_LOOKUP_REQUEST: u8 = 1;
const TYPE_DIRECTORY_LOOKUP_RESPONSE: u8 = 2;
const TYPE_DIRECTORY_UPDATE_REQUEST: u8 = 3;
const TYPE_DIRECTORY_UPDATE_RESPONSE: u8 = 4;
const TYPE_METADATA_UPDATE_REQUEST: u8 = 5;
const TYPE_METADATA_UPDATE_RESPONSE: u8 = 6;
const TYPE_ACQUIRE_WRITELOCK_REQUEST: u8 = 7;
const TYPE_ACQUIRE_WRITELOCK_RESPONSE: u8 = 8;
const TYPE_FINISH_BLOCK_REQUEST: u8 = 9;
const TYPE_FINISH_BLOCK_RESPONSE: u8 = 10;
const TYPE_INVALIDATION_REQUEST: u8 = 11;
const TYPE_INVALIDATION_RESPONSE: u8 = 12;
const TYPE_RELEASE_WRITELOCK_REQUEST: u8 = 13;
const TYPE_RELEASE_WRITELOCK_RESPONSE: u8 = 14;
const TYPE_REDIRECTED_GET_REQUEST: u8 = 15;
const TYPE_REDIRECTED_GET_RESPONSE: u8 = 16;
const TYPE_PLACEMENT_NOTIFY_REQUEST: u8 = 17;
const TYPE_PLACEMENT_NOTIFY_RESPONSE: u8 = 18;
const TYPE_VICTIM_FETCH_REQUEST: u8 = 19;
const TYPE_VICTIM_FETCH_RESPONSE: u8 = 20;
const TYPE_GLOBAL_GET_REQUEST: u8 = 21;
const TYPE_GLOBAL_GET_RESPONSE: u8 = 22;
const TYPE_GLOBAL_PUT_REQUEST: u8 = 23;
const TYPE_GLOBAL_PUT_RESPONSE: u8 = 24;
const TYPE_GLOBAL_DEL_REQUEST: u8 = 25;
const TYPE_GLOBAL_DEL_RESPONSE: u8 = 26;

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    DirectoryLookupRequest {
        key: Key,
        collected: CollectedPopularity,
        sync: VictimSync,
        need_complete_sync: bool,
    },
    DirectoryLookupResponse {
        key: Key,
        is_being_written: bool,
        dirinfo: Option<DirectoryInfo>,
        fast_path_hint: Option<FastPathHint>,
        sync: VictimSync,
        need_complete_sync: bool,
    },
    DirectoryUpdateRequest {
        key: Key,
        is_admit: bool,
        object_size: ObjectSize,
        collected: CollectedPopularity,
        sync: VictimSync,
        need_complete_sync: bool,
    },
    DirectoryUpdateResponse {
        key: Key,
        /// False when the beacon refused the admission (a write was in
        /// flight); the edge must invalidate its copy.
        accepted: bool,
        need_complete_sync: bool,
    },
    MetadataUpdateRequest {
        key: Key,
        is_cooperative_cached: bool,
    },
    MetadataUpdateResponse {
        key: Key,
    },
    AcquireWritelockRequest {
        key: Key,
        collected: CollectedPopularity,
        sync: VictimSync,
        need_complete_sync: bool,
    },
    AcquireWritelockResponse {
        key: Key,
        granted: bool,
        sync: VictimSync,
        need_complete_sync: bool,
    },
    FinishBlockRequest {
        key: Key,
    },
    FinishBlockResponse {
        key: Key,
    },
    InvalidationRequest {
        key: Key,
        sync: VictimSync,
        need_complete_sync: bool,
    },
    InvalidationResponse {
        key: Key,
        need_complete_sync: bool,
    },
    ReleaseWritelockRequest {
        key: Key,
        writer_cached: bool,
        object_size: ObjectSize,
        collected: CollectedPopularity,
        sync: VictimSync,
        need_complete_sync: bool,
    },
    ReleaseWritelockResponse {
        key: Key,
        placement: Option<Edgeset>,
        sync: VictimSync,
        need_complete_sync: bool,
    },
    RedirectedGetRequest {
        key: Key,
        sync: VictimSync,
        need_complete_sync: bool,
    },
    RedirectedGetResponse {
        key: Key,
        cached: bool,
        valid: bool,
        deleted: bool,
        value: Option<Value>,
        sync: VictimSync,
        need_complete_sync: bool,
    },
    PlacementNotifyRequest {
        key: Key,
        value: Value,
        is_valid: bool,
        sync: VictimSync,
        need_complete_sync: bool,
    },
    PlacementNotifyResponse {
        key: Key,
        admitted: bool,
        collected: CollectedPopularity,
        need_complete_sync: bool,
    },
    VictimFetchRequest {
        key: Key,
        required_size: u64,
    },
    VictimFetchResponse {
        key: Key,
        has_enough: bool,
        syncset: VictimSyncset,
    },
    GlobalGetRequest {
        key: Key,
    },
    GlobalGetResponse {
        key: Key,
        found: bool,
        value: Option<Value>,
    },
    GlobalPutRequest {
        key: Key,
        value: Value,
    },
    GlobalPutResponse {
        key: Key,
    },
    GlobalDelRequest {
        key: Key,
    },
    GlobalDelResponse {
        key: Key,
    },
}

fn enc_key(out: &mut Vec<u8>, key: &Key) {
    put_u32_be(out, key.len() as u32);
    put_bytes(out, key.as_bytes());
}

fn dec_key(r: &mut Reader<'_>) -> Result<Key> {
    let len = r.u32_be()? as usize;
    Ok(Key::new(r.take(len)?.to_vec()))
}

fn enc_value(out: &mut Vec<u8>, value: &Value) {
    put_u32_be(out, value.data().len() as u32);
    put_bytes(out, value.data());
}

fn dec_value(r: &mut Reader<'_>) -> Result<Value> {
    let len = r.u32_be()? as usize;
    Ok(Value::new(r.take(len)?.to_vec()))
}

fn enc_bool(out: &mut Vec<u8>, flag: bool) {
    put_u8(out, u8::from(flag));
}

fn dec_bool(r: &mut Reader<'_>) -> Result<bool> {
    Ok(r.u8()? != 0)
}

fn enc_opt<T>(out: &mut Vec<u8>, value: &Option<T>, enc: impl Fn(&mut Vec<u8>, &T)) {
    match value {
        Some(v) => {
            put_u8(out, 1);
            enc(out, v);
        }
        None => put_u8(out, 0),
    }
}

fn dec_opt<T>(
    r: &mut Reader<'_>,
    dec: impl Fn(&mut Reader<'_>) -> Result<T>,
) -> Result<Option<T>> {
    if r.u8()? != 0 {
        Ok(Some(dec(r)?))
    } else {
        Ok(None)
    }
}

impl Message {
    pub fn message_type(&self) -> u8 {
        match self {
            Message::DirectoryLookupRequest { .. } => TYPE_DIRECTORY_LOOKUP_REQUEST,
            Message::DirectoryLookupResponse { .. } => TYPE_DIRECTORY_LOOKUP_RESPONSE,
            Message::DirectoryUpdateRequest { .. } => TYPE_DIRECTORY_UPDATE_REQUEST,
            Message::DirectoryUpdateResponse { .. } => TYPE_DIRECTORY_UPDATE_RESPONSE,
            Message::MetadataUpdateRequest { .. } => TYPE_METADATA_UPDATE_REQUEST,
            Message::MetadataUpdateResponse { .. } => TYPE_METADATA_UPDATE_RESPONSE,
            Message::AcquireWritelockRequest { .. } => TYPE_ACQUIRE_WRITELOCK_REQUEST,
            Message::AcquireWritelockResponse { .. } => TYPE_ACQUIRE_WRITELOCK_RESPONSE,
            Message::FinishBlockRequest { .. } => TYPE_FINISH_BLOCK_REQUEST,
            Message::FinishBlockResponse { .. } => TYPE_FINISH_BLOCK_RESPONSE,
            Message::InvalidationRequest { .. } => TYPE_INVALIDATION_REQUEST,
            Message::InvalidationResponse { .. } => TYPE_INVALIDATION_RESPONSE,
            Message::ReleaseWritelockRequest { .. } => TYPE_RELEASE_WRITELOCK_REQUEST,
            Message::ReleaseWritelockResponse { .. } => TYPE_RELEASE_WRITELOCK_RESPONSE,
            Message::RedirectedGetRequest { .. } => TYPE_REDIRECTED_GET_REQUEST,
            Message::RedirectedGetResponse { .. } => TYPE_REDIRECTED_GET_RESPONSE,
            Message::PlacementNotifyRequest { .. } => TYPE_PLACEMENT_NOTIFY_REQUEST,
            Message::PlacementNotifyResponse { .. } => TYPE_PLACEMENT_NOTIFY_RESPONSE,
            Message::VictimFetchRequest { .. } => TYPE_VICTIM_FETCH_REQUEST,
            Message::VictimFetchResponse { .. } => TYPE_VICTIM_FETCH_RESPONSE,
            Message::GlobalGetRequest { .. } => TYPE_GLOBAL_GET_REQUEST,
            Message::GlobalGetResponse { .. } => TYPE_GLOBAL_GET_RESPONSE,
            Message::GlobalPutRequest { .. } => TYPE_GLOBAL_PUT_REQUEST,
            Message::GlobalPutResponse { .. } => TYPE_GLOBAL_PUT_RESPONSE,
            Message::GlobalDelRequest { .. } => TYPE_GLOBAL_DEL_REQUEST,
            Message::GlobalDelResponse { .. } => TYPE_GLOBAL_DEL_RESPONSE,
        }
    }

    pub fn key(&self) -> &Key {
        match self {
            Message::DirectoryLookupRequest { key, .. }
            | Message::DirectoryLookupResponse { key, .. }
            | Message::DirectoryUpdateRequest { key, .. }
            | Message::DirectoryUpdateResponse { key, .. }
            | Message::MetadataUpdateRequest { key, .. }
            | Message::MetadataUpdateResponse { key }
            | Message::AcquireWritelockRequest { key, .. }
            | Message::AcquireWritelockResponse { key, .. }
            | Message::FinishBlockRequest { key }
            | Message::FinishBlockResponse { key }
            | Message::InvalidationRequest { key, .. }
            | Message::InvalidationResponse { key, .. }
            | Message::ReleaseWritelockRequest { key, .. }
            | Message::ReleaseWritelockResponse { key, .. }
            | Message::RedirectedGetRequest { key, .. }
            | Message::RedirectedGetResponse { key, .. }
            | Message::PlacementNotifyRequest { key, .. }
            | Message::PlacementNotifyResponse { key, .. }
            | Message::VictimFetchRequest { key, .. }
            | Message::VictimFetchResponse { key, .. }
            | Message::GlobalGetRequest { key }
            | Message::GlobalGetResponse { key, .. }
            | Message::GlobalPutRequest { key, .. }
            | Message::GlobalPutResponse { key }
            | Message::GlobalDelRequest { key }
            | Message::GlobalDelResponse { key } => key,
        }
    }

    /// Encodes header and body; `source` is the sending edge.
    pub fn encode(&self, source: EdgeIndex) -> Vec<u8> {
        let mut out = Vec::new();
        put_u8(&mut out, self.message_type());
        put_u32_be(&mut out, source);
        match self {
            Message::DirectoryLookupRequest {
                key,
                collected,
                sync,
                need_complete_sync,
            } => {
                enc_key(&mut out, key);
                collected.encode(&mut out);
                sync.encode(&mut out);
                enc_bool(&mut out, *need_complete_sync);
            }
            Message::DirectoryLookupResponse {
                key,
                is_being_written,
                dirinfo,
                fast_path_hint,
                sync,
                need_complete_sync,
            } => {
                enc_key(&mut out, key);
                enc_bool(&mut out, *is_being_written);
                enc_opt(&mut out, dirinfo, |o, d: &DirectoryInfo| d.encode(o));
                enc_opt(&mut out, fast_path_hint, |o, h: &FastPathHint| h.encode(o));
                sync.encode(&mut out);
                enc_bool(&mut out, *need_complete_sync);
            }
            Message::DirectoryUpdateRequest {
                key,
                is_admit,
                object_size,
                collected,
                sync,
                need_complete_sync,
            } => {
                enc_key(&mut out, key);
                enc_bool(&mut out, *is_admit);
                put_u32_be(&mut out, *object_size);
                collected.encode(&mut out);
                sync.encode(&mut out);
                enc_bool(&mut out, *need_complete_sync);
            }
            Message::DirectoryUpdateResponse {
                key,
                accepted,
                need_complete_sync,
            } => {
                enc_key(&mut out, key);
                enc_bool(&mut out, *accepted);
                enc_bool(&mut out, *need_complete_sync);
            }
            Message::MetadataUpdateRequest {
                key,
                is_cooperative_cached,
            } => {
                enc_key(&mut out, key);
                enc_bool(&mut out, *is_cooperative_cached);
            }
            Message::MetadataUpdateResponse { key } => enc_key(&mut out, key),
            Message::AcquireWritelockRequest {
                key,
                collected,
                sync,
                need_complete_sync,
            } => {
                enc_key(&mut out, key);
                collected.encode(&mut out);
                sync.encode(&mut out);
                enc_bool(&mut out, *need_complete_sync);
            }
            Message::AcquireWritelockResponse {
                key,
                granted,
                sync,
                need_complete_sync,
            } => {
                enc_key(&mut out, key);
                enc_bool(&mut out, *granted);
                sync.encode(&mut out);
                enc_bool(&mut out, *need_complete_sync);
            }
            Message::FinishBlockRequest { key } | Message::FinishBlockResponse { key } => {
                enc_key(&mut out, key)
            }
            Message::InvalidationRequest {
                key,
                sync,
                need_complete_sync,
            } => {
                enc_key(&mut out, key);
                sync.encode(&mut out);
                enc_bool(&mut out, *need_complete_sync);
            }
            Message::InvalidationResponse {
                key,
                need_complete_sync,
            } => {
                enc_key(&mut out, key);
                enc_bool(&mut out, *need_complete_sync);
            }
            Message::ReleaseWritelockRequest {
                key,
                writer_cached,
                object_size,
                collected,
                sync,
                need_complete_sync,
            } => {
                enc_key(&mut out, key);
                enc_bool(&mut out, *writer_cached);
                put_u32_be(&mut out, *object_size);
                collected.encode(&mut out);
                sync.encode(&mut out);
                enc_bool(&mut out, *need_complete_sync);
            }
            Message::ReleaseWritelockResponse {
                key,
                placement,
                sync,
                need_complete_sync,
            } => {
                enc_key(&mut out, key);
                enc_opt(&mut out, placement, |o, e: &Edgeset| e.encode(o));
                sync.encode(&mut out);
                enc_bool(&mut out, *need_complete_sync);
            }
            Message::RedirectedGetRequest {
                key,
                sync,
                need_complete_sync,
            } => {
                enc_key(&mut out, key);
                sync.encode(&mut out);
                enc_bool(&mut out, *need_complete_sync);
            }
            Message::RedirectedGetResponse {
                key,
                cached,
                valid,
                deleted,
                value,
                sync,
                need_complete_sync,
            } => {
                enc_key(&mut out, key);
                enc_bool(&mut out, *cached);
                enc_bool(&mut out, *valid);
                enc_bool(&mut out, *deleted);
                enc_opt(&mut out, value, |o, v: &Value| enc_value(o, v));
                sync.encode(&mut out);
                enc_bool(&mut out, *need_complete_sync);
            }
            Message::PlacementNotifyRequest {
                key,
                value,
                is_valid,
                sync,
                need_complete_sync,
            } => {
                enc_key(&mut out, key);
                enc_value(&mut out, value);
                enc_bool(&mut out, *is_valid);
                sync.encode(&mut out);
                enc_bool(&mut out, *need_complete_sync);
            }
            Message::PlacementNotifyResponse {
                key,
                admitted,
                collected,
                need_complete_sync,
            } => {
                enc_key(&mut out, key);
                enc_bool(&mut out, *admitted);
                collected.encode(&mut out);
                enc_bool(&mut out, *need_complete_sync);
            }
            Message::VictimFetchRequest { key, required_size } => {
                enc_key(&mut out, key);
                put_u64_be(&mut out, *required_size);
            }
            Message::VictimFetchResponse {
                key,
                has_enough,
                syncset,
            } => {
                enc_key(&mut out, key);
                enc_bool(&mut out, *has_enough);
                syncset.encode(&mut out);
            }
            Message::GlobalGetRequest { key }
            | Message::GlobalPutResponse { key }
            | Message::GlobalDelRequest { key }
            | Message::GlobalDelResponse { key } => enc_key(&mut out, key),
            Message::GlobalGetResponse { key, found, value } => {
                enc_key(&mut out, key);
                enc_bool(&mut out, *found);
                enc_opt(&mut out, value, |o, v: &Value| enc_value(o, v));
            }
            Message::GlobalPutRequest { key, value } => {
                enc_key(&mut out, key);
                enc_value(&mut out, value);
            }
        }
        out
    }

    /// Decodes a frame into its source edge and message.
    pub fn decode(buf: &[u8]) -> Result<(EdgeIndex, Message)> {
        let mut r = Reader::new(buf);
        let msg_type = r.u8()?;
        let source = r.u32_be()?;
        let message = match msg_type {
            TYPE_DIRECTORY_LOOKUP_REQUEST => Message::DirectoryLookupRequest {
                key: dec_key(&mut r)?,
                collected: CollectedPopularity::decode(&mut r)?,
                sync: VictimSync::decode(&mut r)?,
                need_complete_sync: dec_bool(&mut r)?,
            },
            TYPE_DIRECTORY_LOOKUP_RESPONSE => Message::DirectoryLookupResponse {
                key: dec_key(&mut r)?,
                is_being_written: dec_bool(&mut r)?,
                dirinfo: dec_opt(&mut r, DirectoryInfo::decode)?,
                fast_path_hint: dec_opt(&mut r, FastPathHint::decode)?,
                sync: VictimSync::decode(&mut r)?,
                need_complete_sync: dec_bool(&mut r)?,
            },
            TYPE_DIRECTORY_UPDATE_REQUEST => Message::DirectoryUpdateRequest {
                key: dec_key(&mut r)?,
                is_admit: dec_bool(&mut r)?,
                object_size: r.u32_be()?,
                collected: CollectedPopularity::decode(&mut r)?,
                sync: VictimSync::decode(&mut r)?,
                need_complete_sync: dec_bool(&mut r)?,
            },
            TYPE_DIRECTORY_UPDATE_RESPONSE => Message::DirectoryUpdateResponse {
                key: dec_key(&mut r)?,
                accepted: dec_bool(&mut r)?,
                need_complete_sync: dec_bool(&mut r)?,
            },
            TYPE_METADATA_UPDATE_REQUEST => Message::MetadataUpdateRequest {
                key: dec_key(&mut r)?,
                is_cooperative_cached: dec_bool(&mut r)?,
            },
            TYPE_METADATA_UPDATE_RESPONSE => Message::MetadataUpdateResponse {
                key: dec_key(&mut r)?,
            },
            TYPE_ACQUIRE_WRITELOCK_REQUEST => Message::AcquireWritelockRequest {
                key: dec_key(&mut r)?,
                collected: CollectedPopularity::decode(&mut r)?,
                sync: VictimSync::decode(&mut r)?,
                need_complete_sync: dec_bool(&mut r)?,
            },
            TYPE_ACQUIRE_WRITELOCK_RESPONSE => Message::AcquireWritelockResponse {
                key: dec_key(&mut r)?,
                granted: dec_bool(&mut r)?,
                sync: VictimSync::decode(&mut r)?,
                need_complete_sync: dec_bool(&mut r)?,
            },
            TYPE_FINISH_BLOCK_REQUEST => Message::FinishBlockRequest {
                key: dec_key(&mut r)?,
            },
            TYPE_FINISH_BLOCK_RESPONSE => Message::FinishBlockResponse {
                key: dec_key(&mut r)?,
            },
            TYPE_INVALIDATION_REQUEST => Message::InvalidationRequest {
                key: dec_key(&mut r)?,
                sync: VictimSync::decode(&mut r)?,
                need_complete_sync: dec_bool(&mut r)?,
            },
            TYPE_INVALIDATION_RESPONSE => Message::InvalidationResponse {
                key: dec_key(&mut r)?,
                need_complete_sync: dec_bool(&mut r)?,
            },
            TYPE_RELEASE_WRITELOCK_REQUEST => Message::ReleaseWritelockRequest {
                key: dec_key(&mut r)?,
                writer_cached: dec_bool(&mut r)?,
                object_size: r.u32_be()?,
                collected: CollectedPopularity::decode(&mut r)?,
                sync: VictimSync::decode(&mut r)?,
                need_complete_sync: dec_bool(&mut r)?,
            },
            TYPE_RELEASE_WRITELOCK_RESPONSE => Message::ReleaseWritelockResponse {
                key: dec_key(&mut r)?,
                placement: dec_opt(&mut r, Edgeset::decode)?,
                sync: VictimSync::decode(&mut r)?,
                need_complete_sync: dec_bool(&mut r)?,
            },
            TYPE_REDIRECTED_GET_REQUEST => Message::RedirectedGetRequest {
                key: dec_key(&mut r)?,
                sync: VictimSync::decode(&mut r)?,
                need_complete_sync: dec_bool(&mut r)?,
            },
            TYPE_REDIRECTED_GET_RESPONSE => Message::RedirectedGetResponse {
                key: dec_key(&mut r)?,
                cached: dec_bool(&mut r)?,
                valid: dec_bool(&mut r)?,
                deleted: dec_bool(&mut r)?,
                value: dec_opt(&mut r, dec_value)?,
                sync: VictimSync::decode(&mut r)?,
                need_complete_sync: dec_bool(&mut r)?,
            },
            TYPE_PLACEMENT_NOTIFY_REQUEST => Message::PlacementNotifyRequest {
                key: dec_key(&mut r)?,
                value: dec_value(&mut r)?,
                is_valid: dec_bool(&mut r)?,
                sync: VictimSync::decode(&mut r)?,
                need_complete_sync: dec_bool(&mut r)?,
            },
            TYPE_PLACEMENT_NOTIFY_RESPONSE => Message::PlacementNotifyResponse {
                key: dec_key(&mut r)?,
                admitted: dec_bool(&mut r)?,
                collected: CollectedPopularity::decode(&mut r)?,
                need_complete_sync: dec_bool(&mut r)?,
            },
            TYPE_VICTIM_FETCH_REQUEST => Message::VictimFetchRequest {
                key: dec_key(&mut r)?,
                required_size: r.u64_be()?,
            },
            TYPE_VICTIM_FETCH_RESPONSE => Message::VictimFetchResponse {
                key: dec_key(&mut r)?,
                has_enough: dec_bool(&mut r)?,
                syncset: VictimSyncset::decode(&mut r)?,
            },
            TYPE_GLOBAL_GET_REQUEST => Message::GlobalGetRequest {
                key: dec_key(&mut r)?,
            },
            TYPE_GLOBAL_GET_RESPONSE => Message::GlobalGetResponse {
                key: dec_key(&mut r)?,
                found: dec_bool(&mut r)?,
                value: dec_opt(&mut r, dec_value)?,
            },
            TYPE_GLOBAL_PUT_REQUEST => Message::GlobalPutRequest {
                key: dec_key(&mut r)?,
                value: dec_value(&mut r)?,
            },
            TYPE_GLOBAL_PUT_RESPONSE => Message::GlobalPutResponse {
                key: dec_key(&mut r)?,
            },
            TYPE_GLOBAL_DEL_REQUEST => Message::GlobalDelRequest {
                key: dec_key(&mut r)?,
            },
            TYPE_GLOBAL_DEL_RESPONSE => Message::GlobalDelResponse {
                key: dec_key(&mut r)?,
            },
            other => {
                return Err(CoveredError::Codec(format!("unknown message type {other}")))
            }
        };
        if !r.is_empty() {
            return Err(CoveredError::Codec(format!(
                "{} trailing bytes after message type {msg_type}",
                r.remaining()
            )));
        }
        Ok((source, message))
    }
}
