//! Wire shapes for the context-request commands (spec §4.10, §6):
//! `REQUEST_CONTEXT`/`GET_CONTEXT` (alias), `CONTEXT_RESPONSE`,
//! `REQUEST_DEVICE_CONTEXT`, `DEVICE_CONTEXT_RESPONSE`.

use serde::{Deserialize, Serialize};

pub const COMMAND_REQUEST_CONTEXT: &str = "REQUEST_CONTEXT";
pub const COMMAND_GET_CONTEXT: &str = "GET_CONTEXT";
pub const COMMAND_CONTEXT_RESPONSE: &str = "CONTEXT_RESPONSE";
pub const COMMAND_REQUEST_DEVICE_CONTEXT: &str = "REQUEST_DEVICE_CONTEXT";
pub const COMMAND_DEVICE_CONTEXT_RESPONSE: &str = "DEVICE_CONTEXT_RESPONSE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRequestWire {
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextResponseWire {
    pub request_id: String,
    pub document: serde_json::Value,
}

/// A fresh random correlation id for a context round-trip.
pub fn new_request_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
