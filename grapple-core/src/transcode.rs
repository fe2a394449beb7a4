//! # JSON <-> DynamicMessage transcoding
//!
//! Messages are represented as `prost_reflect::DynamicMessage`, typed at runtime by a
//! `MessageDescriptor` resolved from the registry. The textual form is the canonical
//! Protobuf JSON mapping: lowerCamelCase field names (proto names are accepted on input),
//! default values omitted, enums by name. Unknown fields are rejected.
use prost_reflect::{DeserializeOptions, DynamicMessage, MessageDescriptor};

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Invalid input message on line {line}")]
    Input {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to map response message #{index} to JSON")]
    Output {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

fn deserialize_options() -> DeserializeOptions {
    DeserializeOptions::new().deny_unknown_fields(true)
}

/// Decodes one line holding exactly one JSON value.
pub fn decode_line(
    descriptor: &MessageDescriptor,
    line: &str,
    line_number: usize,
) -> Result<DynamicMessage, TranscodeError> {
    let into_error = |source| TranscodeError::Input {
        line: line_number,
        source,
    };

    let mut deserializer = serde_json::Deserializer::from_str(line);
    let message = DynamicMessage::deserialize_with_options(
        descriptor.clone(),
        &mut deserializer,
        &deserialize_options(),
    )
    .map_err(into_error)?;
    deserializer.end().map_err(into_error)?;

    Ok(message)
}

/// Decodes the first JSON value of `text`; whatever follows it is not inspected.
pub fn decode_first(
    descriptor: &MessageDescriptor,
    text: &str,
) -> Result<DynamicMessage, TranscodeError> {
    let mut deserializer = serde_json::Deserializer::from_str(text);

    DynamicMessage::deserialize_with_options(
        descriptor.clone(),
        &mut deserializer,
        &deserialize_options(),
    )
    .map_err(|source| TranscodeError::Input {
        line: source.line().max(1),
        source,
    })
}

/// Encodes a message as a single line of canonical JSON.
pub fn encode_message(message: &DynamicMessage, index: usize) -> Result<String, TranscodeError> {
    serde_json::to_string(message).map_err(|source| TranscodeError::Output { index, source })
}
