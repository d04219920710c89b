//! Frame Codec
//!
//! Splits transport frames into `(topic, payload)` and decodes the payload
//! as a JSON object.
//!
//! # Frame Layout
//!
//! - one part: empty topic, the part is the payload
//! - several parts: first part is the topic (lossy UTF-8), last part is the
//!   payload; parts in between are ignored

use serde_json::{Map, Value};

use crate::application::ports::Frame;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame had no parts.
    #[error("empty frame")]
    EmptyFrame,

    /// Payload was not valid JSON.
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload was valid JSON but not an object.
    #[error("payload is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

/// A frame whose payload decoded to a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    /// Topic, empty for single-part frames.
    pub topic: String,
    /// Decoded object.
    pub payload: Map<String, Value>,
}

/// Split a frame into topic and raw payload.
///
/// # Errors
///
/// Returns [`CodecError::EmptyFrame`] for a frame without parts.
pub fn split_frame(frame: &Frame) -> Result<(String, &[u8]), CodecError> {
    match frame.parts() {
        [] => Err(CodecError::EmptyFrame),
        [payload] => Ok((String::new(), payload.as_slice())),
        [topic, .., payload] => Ok((
            String::from_utf8_lossy(topic).into_owned(),
            payload.as_slice(),
        )),
    }
}

/// Split and decode a frame.
///
/// # Errors
///
/// Returns a [`CodecError`] when the frame is empty, the payload is not
/// JSON, or the JSON is not an object.
pub fn decode_frame(frame: &Frame) -> Result<DecodedFrame, CodecError> {
    let (topic, raw) = split_frame(frame)?;
    match serde_json::from_slice::<Value>(raw)? {
        Value::Object(payload) => Ok(DecodedFrame { topic, payload }),
        other => Err(CodecError::NotAnObject(kind_name(&other))),
    }
}

const fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_part_has_empty_topic() {
        let decoded = decode_frame(&Frame::single(r#"{"a":1}"#)).unwrap();
        assert_eq!(decoded.topic, "");
        assert_eq!(decoded.payload["a"], 1);
    }

    #[test]
    fn multi_part_uses_first_and_last() {
        let frame = Frame::new(vec![
            b"xdp.h1".to_vec(),
            b"ignored".to_vec(),
            br#"{"hostname":"h1"}"#.to_vec(),
        ]);
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.topic, "xdp.h1");
        assert_eq!(decoded.payload["hostname"], "h1");
    }

    #[test]
    fn topic_is_lossy_utf8() {
        let frame = Frame::new(vec![vec![0xff, b'a'], b"{}".to_vec()]);
        let (topic, _) = split_frame(&frame).unwrap();
        assert_eq!(topic, "\u{fffd}a");
    }

    #[test]
    fn rejects_malformed_and_non_objects() {
        assert!(matches!(
            decode_frame(&Frame::single("{not json")),
            Err(CodecError::Json(_))
        ));
        assert!(matches!(
            decode_frame(&Frame::single("[1,2]")),
            Err(CodecError::NotAnObject("array"))
        ));
        assert!(matches!(
            decode_frame(&Frame::new(Vec::new())),
            Err(CodecError::EmptyFrame)
        ));
    }
}
