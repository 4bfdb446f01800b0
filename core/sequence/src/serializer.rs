//! Sequence persistence format.
//!
//! Sequences are persisted as a small XML document, one `<drive>` element
//! per sequence with nonces carried as base64 attributes:
//!
//! ```text
//! <?xml version="1.0" encoding="UTF-8" standalone="no"?>
//! <drives>
//!     <drive driveID="..." authID="..." status="Active"
//!            nextNonce="AAAAAAAAAAI=" maxNonce="AAAAAAAAAAQ="/>
//! </drives>
//! ```
//!
//! Serialization is deterministic (entries ordered by drive id) and
//! `deserialize(serialize(m)) == m` for every valid map.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use driftvault_common::{AuthId, DriveId, Error, Result};
use driftvault_crypto::nonce::NONCE_SIZE;

use crate::sequence::{NonceSequence, Status};

/// Converts between the in-memory sequence map and its persisted form.
///
/// The sequencer is generic over this seam so the on-disk format can be
/// swapped without touching allocation logic.
pub trait SequenceSerializer: Send + Sync {
    /// Render the sequence map to its persisted representation.
    fn serialize(&self, sequences: &HashMap<String, NonceSequence>) -> Result<String>;

    /// Parse the persisted representation back into a sequence map.
    fn deserialize(&self, contents: &str) -> Result<HashMap<String, NonceSequence>>;
}

/// The default XML attribute format.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlSequenceSerializer;

const XML_PROLOG: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>";

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let entity = [
            ("&amp;", '&'),
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&quot;", '"'),
            ("&apos;", '\''),
        ]
        .iter()
        .find(|(name, _)| rest.starts_with(name));
        match entity {
            Some((name, c)) => {
                out.push(*c);
                rest = &rest[name.len()..];
            }
            None => {
                return Err(Error::Serialization(
                    "Unknown XML entity in sequence file".to_string(),
                ));
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn encode_nonce(nonce: Option<&[u8; NONCE_SIZE]>) -> String {
    match nonce {
        Some(nonce) => BASE64.encode(nonce),
        None => String::new(),
    }
}

fn decode_nonce(value: &str) -> Result<Option<[u8; NONCE_SIZE]>> {
    if value.is_empty() {
        return Ok(None);
    }
    let bytes = BASE64
        .decode(value)
        .map_err(|e| Error::Serialization(format!("Invalid base64 nonce: {}", e)))?;
    let nonce: [u8; NONCE_SIZE] = bytes.as_slice().try_into().map_err(|_| {
        Error::Serialization(format!(
            "Nonce must be {} bytes, got {}",
            NONCE_SIZE,
            bytes.len()
        ))
    })?;
    Ok(Some(nonce))
}

/// Pull `name="value"` attributes out of a single element's text.
fn parse_attributes(element: &str) -> Result<HashMap<String, String>> {
    let mut attrs = HashMap::new();
    let mut rest = element;
    while let Some(eq) = rest.find('=') {
        let name = rest[..eq].trim().trim_start_matches('/').to_string();
        rest = rest[eq + 1..].trim_start();
        if !rest.starts_with('"') {
            return Err(Error::Serialization(
                "Malformed attribute in sequence file".to_string(),
            ));
        }
        let close = rest[1..].find('"').ok_or_else(|| {
            Error::Serialization("Unterminated attribute in sequence file".to_string())
        })?;
        attrs.insert(name, unescape(&rest[1..1 + close])?);
        rest = &rest[close + 2..];
    }
    Ok(attrs)
}

impl SequenceSerializer for XmlSequenceSerializer {
    fn serialize(&self, sequences: &HashMap<String, NonceSequence>) -> Result<String> {
        let mut ids: Vec<&String> = sequences.keys().collect();
        ids.sort();

        let mut out = String::new();
        out.push_str(XML_PROLOG);
        out.push_str("\n<drives>\n");
        for id in ids {
            // key and embedded drive id are kept in lockstep by the sequencer
            let seq = &sequences[id];
            out.push_str(&format!(
                "    <drive driveID=\"{}\" authID=\"{}\" status=\"{}\" nextNonce=\"{}\" maxNonce=\"{}\"/>\n",
                escape(seq.drive_id().as_str()),
                escape(seq.auth_id().as_str()),
                seq.status(),
                encode_nonce(seq.next_nonce()),
                encode_nonce(seq.max_nonce()),
            ));
        }
        out.push_str("</drives>\n");
        Ok(out)
    }

    fn deserialize(&self, contents: &str) -> Result<HashMap<String, NonceSequence>> {
        let mut sequences = HashMap::new();
        let mut rest = contents;
        while let Some(start) = rest.find("<drive ") {
            rest = &rest[start + "<drive ".len()..];
            let end = rest.find("/>").ok_or_else(|| {
                Error::Serialization("Unterminated drive element".to_string())
            })?;
            let attrs = parse_attributes(&rest[..end])?;
            rest = &rest[end + 2..];

            let get = |name: &str| -> Result<&String> {
                attrs.get(name).ok_or_else(|| {
                    Error::Serialization(format!("Missing attribute {}", name))
                })
            };
            let drive_id = DriveId::new(get("driveID")?.as_str())
                .map_err(|e| Error::Serialization(e.to_string()))?;
            let auth_id = AuthId::new(get("authID")?.as_str())
                .map_err(|e| Error::Serialization(e.to_string()))?;
            let status: Status = get("status")?.parse()?;
            let next_nonce = decode_nonce(get("nextNonce")?)?;
            let max_nonce = decode_nonce(get("maxNonce")?)?;

            if sequences
                .insert(
                    drive_id.to_string(),
                    NonceSequence::from_parts(drive_id, auth_id, next_nonce, max_nonce, status),
                )
                .is_some()
            {
                return Err(Error::Serialization(
                    "Duplicate drive entry in sequence file".to_string(),
                ));
            }
        }
        Ok(sequences)
    }
}
