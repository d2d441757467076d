use crate::CodecError;
use serde::Serialize;
use serde_json::{Map, Value};

/// The decoded content of a message: an object of string-keyed fields.
pub type Payload = Map<String, Value>;

/// The reserved field that the publishing side stamps onto every outgoing
/// payload, holding the send time in epoch milliseconds.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Serializes the given data into the wire format, after stamping it with the
/// given send time under [`TIMESTAMP_FIELD`]. The data must serialize into an
/// object; a caller-provided `timestamp` field is overwritten.
pub(crate) fn encode<T>(data: &T, timestamp_ms: u64) -> Result<Vec<u8>, CodecError>
where
    T: Serialize + ?Sized,
{
    let mut payload = match serde_json::to_value(data)? {
        Value::Object(payload) => payload,
        other => {
            return Err(CodecError::NotAnObject {
                found: kind_of(&other),
            });
        }
    };

    payload.insert(TIMESTAMP_FIELD.to_string(), Value::from(timestamp_ms));

    Ok(serde_json::to_vec(&payload)?)
}

/// Parses the given wire bytes (UTF-8 text of a serialized object) into a
/// [`Payload`].
pub(crate) fn decode(bytes: &[u8]) -> Result<Payload, CodecError> {
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Object(payload) => Ok(payload),
        other => Err(CodecError::NotAnObject {
            found: kind_of(&other),
        }),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
