//! Payload and metadata packets.
//!
//! A packet carries either the inline serialized body or, once offloaded, an
//! object-store locator with `data_type` set to [`STORE_DATA_TYPE`]. The
//! offload decision itself lives here; the upload is driven by the trigger
//! pipeline because it needs the run's friendly id for the object path.

use serde_json::Value;

use crate::errors::TriggerError;

/// The default content type for payloads and metadata.
pub const JSON_DATA_TYPE: &str = "application/json";

/// Marks a packet whose `data` is an object-store locator rather than bytes.
pub const STORE_DATA_TYPE: &str = "application/store";

/// A serialized payload or metadata blob tagged with its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IOPacket {
    pub data: Option<String>,
    pub data_type: String,
}

impl IOPacket {
    /// Byte size of the inline body; zero for data-less packets.
    pub fn size(&self) -> usize {
        self.data.as_ref().map_or(0, String::len)
    }
}

/// Serialize a payload into a packet.
///
/// JSON payloads are stringified; string payloads of any other content type
/// pass through verbatim; anything else becomes a data-less packet carrying
/// only the content type.
pub fn create_packet(payload: &Value, payload_type: &str) -> Result<IOPacket, TriggerError> {
    if payload_type == JSON_DATA_TYPE {
        return Ok(IOPacket {
            data: Some(serde_json::to_string(payload)?),
            data_type: JSON_DATA_TYPE.to_string(),
        });
    }

    if let Value::String(text) = payload {
        return Ok(IOPacket {
            data: Some(text.clone()),
            data_type: payload_type.to_string(),
        });
    }

    Ok(IOPacket {
        data: None,
        data_type: payload_type.to_string(),
    })
}

/// Whether a packet's inline body exceeds the offload threshold, together
/// with its size in bytes.
pub fn packet_requires_offloading(packet: &IOPacket, threshold: usize) -> (bool, usize) {
    let size = packet.size();
    (packet.data.is_some() && size > threshold, size)
}

/// The object path a run's payload is offloaded to.
pub(crate) fn payload_object_path(run_friendly_id: &str) -> String {
    format!("{run_friendly_id}/payload.json")
}

/// Rewrite a packet into its offloaded form pointing at `filename`.
pub(crate) fn offloaded_packet(filename: String) -> IOPacket {
    IOPacket {
        data: Some(filename),
        data_type: STORE_DATA_TYPE.to_string(),
    }
}

/// Serialize request metadata into a packet. Metadata is never offloaded.
pub fn handle_metadata_packet(
    metadata: Option<&Value>,
    metadata_type: &str,
) -> Result<Option<IOPacket>, TriggerError> {
    match metadata {
        Some(value) => Ok(Some(create_packet(value, metadata_type)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_payloads_are_stringified() {
        let packet = create_packet(&json!({"to": "a@b"}), JSON_DATA_TYPE).unwrap();
        assert_eq!(packet.data.as_deref(), Some(r#"{"to":"a@b"}"#));
        assert_eq!(packet.data_type, "application/json");
    }

    #[test]
    fn string_payloads_pass_through_with_their_type() {
        let packet = create_packet(&json!("id,name\n1,a"), "text/csv").unwrap();
        assert_eq!(packet.data.as_deref(), Some("id,name\n1,a"));
        assert_eq!(packet.data_type, "text/csv");
    }

    #[test]
    fn unknown_payload_shapes_become_data_less_packets() {
        let packet = create_packet(&json!({"k": 1}), "application/octet-stream").unwrap();
        assert_eq!(packet.data, None);
        assert_eq!(packet.data_type, "application/octet-stream");
        assert_eq!(packet.size(), 0);
    }

    #[test]
    fn offload_predicate_compares_byte_size_against_threshold() {
        let packet = IOPacket {
            data: Some("x".repeat(100)),
            data_type: JSON_DATA_TYPE.to_string(),
        };
        assert_eq!(packet_requires_offloading(&packet, 99), (true, 100));
        assert_eq!(packet_requires_offloading(&packet, 100), (false, 100));

        let empty = IOPacket {
            data: None,
            data_type: JSON_DATA_TYPE.to_string(),
        };
        assert_eq!(packet_requires_offloading(&empty, 0), (false, 0));
    }

    #[test]
    fn offloaded_packets_carry_the_locator() {
        let packet = offloaded_packet(payload_object_path("run_abc"));
        assert_eq!(packet.data.as_deref(), Some("run_abc/payload.json"));
        assert_eq!(packet.data_type, "application/store");
    }

    #[test]
    fn metadata_packets_are_optional() {
        assert_eq!(handle_metadata_packet(None, JSON_DATA_TYPE).unwrap(), None);

        let meta = json!({"source": "api"});
        let packet = handle_metadata_packet(Some(&meta), JSON_DATA_TYPE)
            .unwrap()
            .unwrap();
        assert_eq!(packet.data.as_deref(), Some(r#"{"source":"api"}"#));
    }
}
