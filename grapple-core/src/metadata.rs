//! # Metadata Composer
//!
//! Grapple accepts request headers on three independent channels:
//!
//! * **shared**: sent with both the reflection session and the RPC itself.
//! * **discovery**: sent only with the reflection session.
//! * **call**: sent only with the RPC.
//!
//! Each channel is fed by inline `"key: value"` strings and by paired raw key/value lists.
//! Keys ending in `-bin` carry base64 text which is decoded to bytes before use, accepting
//! both padded and unpadded input.
//!
//! The composer produces two independent contexts: `discovery = shared ∪ discovery` and
//! `call = shared ∪ call`.
use base64::{
    Engine,
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
};
use std::{collections::BTreeMap, fmt, str::FromStr};
use tonic::metadata::{
    AsciiMetadataKey, AsciiMetadataValue, BinaryMetadataKey, BinaryMetadataValue,
    KeyAndValueRef, MetadataMap,
    errors::{InvalidMetadataKey, InvalidMetadataValue},
};

/// Reserved key suffix marking binary (base64 encoded) header values.
pub const BINARY_SUFFIX: &str = "-bin";

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("{channel} headers: unequal number of raw keys ({keys}) and raw values ({values})")]
    UnequalRawPairs {
        channel: Channel,
        keys: usize,
        values: usize,
    },
    #[error("{channel} headers: header must be formatted as 'key: value', got '{header}'")]
    MissingSeparator { channel: Channel, header: String },
    #[error("{channel} headers: invalid base64 value for binary header '{key}'")]
    InvalidBase64 {
        channel: Channel,
        key: String,
        source: base64::DecodeError,
    },
    #[error("Invalid metadata (header) key '{key}'")]
    InvalidKey {
        key: String,
        source: InvalidMetadataKey,
    },
    #[error("Invalid metadata (header) value for key '{key}'")]
    InvalidValue {
        key: String,
        source: InvalidMetadataValue,
    },
}

/// The channel a header was supplied on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Shared,
    Discovery,
    Call,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Shared => f.write_str("shared"),
            Channel::Discovery => f.write_str("discovery"),
            Channel::Call => f.write_str("call"),
        }
    }
}

/// A header value, already decoded when its key carries the binary suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Ascii(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPair {
    pub key: String,
    pub value: HeaderValue,
}

impl HeaderPair {
    fn decode(channel: Channel, key: &str, value: &str) -> Result<Self, MetadataError> {
        let value = if key.ends_with(BINARY_SUFFIX) {
            let bytes =
                decode_binary_value(value).map_err(|source| MetadataError::InvalidBase64 {
                    channel,
                    key: key.to_string(),
                    source,
                })?;
            HeaderValue::Binary(bytes)
        } else {
            HeaderValue::Ascii(value.to_string())
        };

        Ok(Self {
            key: key.to_string(),
            value,
        })
    }
}

/// Decodes base64 text, as padded when its length is a multiple of four and as unpadded otherwise.
pub fn decode_binary_value(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    if value.len() % 4 == 0 {
        STANDARD.decode(value)
    } else {
        STANDARD_NO_PAD.decode(value)
    }
}

/// The raw user input for one header channel.
#[derive(Debug, Clone, Default)]
pub struct HeaderChannel {
    /// `"key: value"` strings.
    pub inline: Vec<String>,
    pub raw_keys: Vec<String>,
    pub raw_values: Vec<String>,
}

impl HeaderChannel {
    /// Parses every header of the channel, inline headers first.
    pub fn parse(&self, channel: Channel) -> Result<Metadata, MetadataError> {
        if self.raw_keys.len() != self.raw_values.len() {
            return Err(MetadataError::UnequalRawPairs {
                channel,
                keys: self.raw_keys.len(),
                values: self.raw_values.len(),
            });
        }

        let mut pairs = Vec::with_capacity(self.inline.len() + self.raw_keys.len());

        for header in &self.inline {
            let (key, value) = header
                .split_once(':')
                .ok_or_else(|| MetadataError::MissingSeparator {
                    channel,
                    header: header.clone(),
                })?;
            pairs.push(HeaderPair::decode(channel, key.trim(), value.trim())?);
        }

        for (key, value) in self.raw_keys.iter().zip(&self.raw_values) {
            pairs.push(HeaderPair::decode(channel, key, value)?);
        }

        Ok(Metadata(pairs))
    }
}

/// An ordered list of headers making up one outgoing context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata(Vec<HeaderPair>);

impl Metadata {
    pub fn pairs(&self) -> &[HeaderPair] {
        &self.0
    }

    /// Returns the first value registered for `key`.
    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.0.iter().find(|p| p.key == key).map(|p| &p.value)
    }

    fn union(&self, other: &Metadata) -> Metadata {
        Metadata(self.0.iter().chain(&other.0).cloned().collect())
    }

    /// Appends every header of this context to a request's metadata.
    pub fn apply(&self, map: &mut MetadataMap) -> Result<(), MetadataError> {
        for pair in &self.0 {
            match &pair.value {
                HeaderValue::Ascii(value) => {
                    let key = AsciiMetadataKey::from_str(&pair.key).map_err(|source| {
                        MetadataError::InvalidKey {
                            key: pair.key.clone(),
                            source,
                        }
                    })?;
                    let value = AsciiMetadataValue::from_str(value).map_err(|source| {
                        MetadataError::InvalidValue {
                            key: pair.key.clone(),
                            source,
                        }
                    })?;
                    map.append(key, value);
                }
                HeaderValue::Binary(bytes) => {
                    let key = BinaryMetadataKey::from_bytes(pair.key.as_bytes()).map_err(
                        |source| MetadataError::InvalidKey {
                            key: pair.key.clone(),
                            source,
                        },
                    )?;
                    map.append_bin(key, BinaryMetadataValue::from_bytes(bytes));
                }
            }
        }
        Ok(())
    }
}

/// The three raw header channels as supplied by the user.
#[derive(Debug, Clone, Default)]
pub struct MetadataComposer {
    pub shared: HeaderChannel,
    pub discovery: HeaderChannel,
    pub call: HeaderChannel,
}

/// The two outgoing contexts produced by [`MetadataComposer::compose`].
#[derive(Debug, Clone, Default)]
pub struct ComposedMetadata {
    /// Headers for the reflection session.
    pub discovery: Metadata,
    /// Headers for the RPC.
    pub call: Metadata,
}

impl MetadataComposer {
    /// Validates every channel and builds the discovery and call contexts.
    pub fn compose(&self) -> Result<ComposedMetadata, MetadataError> {
        let shared = self.shared.parse(Channel::Shared)?;
        let discovery = self.discovery.parse(Channel::Discovery)?;
        let call = self.call.parse(Channel::Call)?;

        Ok(ComposedMetadata {
            discovery: shared.union(&discovery),
            call: shared.union(&call),
        })
    }
}

/// Renders received metadata as `key -> [values]`, base64 encoding binary values.
pub fn metadata_to_json_map(map: &MetadataMap) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for entry in map.iter() {
        let (key, value) = match entry {
            KeyAndValueRef::Ascii(key, value) => (
                key.as_str().to_string(),
                value
                    .to_str()
                    .map(str::to_string)
                    .unwrap_or_else(|_| String::from_utf8_lossy(value.as_encoded_bytes()).into()),
            ),
            KeyAndValueRef::Binary(key, value) => (
                key.as_str().to_string(),
                value
                    .to_bytes()
                    .map(|bytes| STANDARD.encode(bytes))
                    .unwrap_or_else(|_| {
                        String::from_utf8_lossy(value.as_encoded_bytes()).into()
                    }),
            ),
        };
        out.entry(key).or_default().push(value);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inline(headers: &[&str]) -> HeaderChannel {
        HeaderChannel {
            inline: headers.iter().map(|h| h.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn shared_headers_reach_both_contexts() {
        let composer = MetadataComposer {
            shared: inline(&["authorization: Bearer token"]),
            ..Default::default()
        };

        let composed = composer.compose().unwrap();

        let expected = HeaderValue::Ascii("Bearer token".to_string());
        assert_eq!(composed.discovery.get("authorization"), Some(&expected));
        assert_eq!(composed.call.get("authorization"), Some(&expected));
    }

    #[test]
    fn channel_specific_headers_stay_in_their_context() {
        let composer = MetadataComposer {
            discovery: inline(&["x-reflect: yes"]),
            call: inline(&["x-call: yes"]),
            ..Default::default()
        };

        let composed = composer.compose().unwrap();

        assert!(composed.discovery.get("x-reflect").is_some());
        assert!(composed.discovery.get("x-call").is_none());
        assert!(composed.call.get("x-call").is_some());
        assert!(composed.call.get("x-reflect").is_none());
    }

    #[test]
    fn raw_pairs_are_combined_with_inline_headers() {
        let channel = HeaderChannel {
            inline: vec!["a: 1".to_string()],
            raw_keys: vec!["b".to_string()],
            raw_values: vec!["value: with colon".to_string()],
        };

        let metadata = channel.parse(Channel::Call).unwrap();

        assert_eq!(metadata.pairs().len(), 2);
        assert_eq!(
            metadata.get("b"),
            Some(&HeaderValue::Ascii("value: with colon".to_string()))
        );
    }

    #[test]
    fn unequal_raw_pairs_are_a_configuration_error() {
        let composer = MetadataComposer {
            discovery: HeaderChannel {
                raw_keys: vec!["a".to_string(), "b".to_string()],
                raw_values: vec!["1".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };

        let err = composer.compose().unwrap_err();

        assert!(matches!(
            err,
            MetadataError::UnequalRawPairs {
                channel: Channel::Discovery,
                keys: 2,
                values: 1
            }
        ));
    }

    #[test]
    fn inline_header_without_separator_is_rejected() {
        let err = inline(&["no-separator"])
            .parse(Channel::Shared)
            .unwrap_err();
        assert!(matches!(err, MetadataError::MissingSeparator { .. }));
    }

    #[test]
    fn unpadded_base64_matches_padded_base64() {
        let padded = inline(&["token-bin: aGk="]).parse(Channel::Call).unwrap();
        let unpadded = inline(&["token-bin: aGk"]).parse(Channel::Call).unwrap();

        assert_eq!(padded.get("token-bin"), Some(&HeaderValue::Binary(b"hi".to_vec())));
        assert_eq!(padded.get("token-bin"), unpadded.get("token-bin"));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let err = inline(&["token-bin: !!!"]).parse(Channel::Call).unwrap_err();
        assert!(matches!(err, MetadataError::InvalidBase64 { .. }));
    }

    #[test]
    fn apply_writes_ascii_and_binary_values() {
        let metadata = inline(&["x-user: alice", "trace-bin: AAEC"])
            .parse(Channel::Call)
            .unwrap();

        let mut map = MetadataMap::new();
        metadata.apply(&mut map).unwrap();

        assert_eq!(map.get("x-user").unwrap().to_str().unwrap(), "alice");
        assert_eq!(
            map.get_bin("trace-bin").unwrap().to_bytes().unwrap().as_ref(),
            &[0u8, 1, 2]
        );

        let rendered = metadata_to_json_map(&map);
        assert_eq!(rendered["x-user"], vec!["alice".to_string()]);
        assert_eq!(rendered["trace-bin"], vec!["AAEC".to_string()]);
    }

    #[test]
    fn apply_rejects_invalid_keys() {
        let metadata = inline(&["bad key: v"]).parse(Channel::Call).unwrap();
        let err = metadata.apply(&mut MetadataMap::new()).unwrap_err();
        assert!(matches!(err, MetadataError::InvalidKey { .. }));
    }
}
