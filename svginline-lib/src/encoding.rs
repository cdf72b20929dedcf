//! Conversions between bytes, binary strings, base64 and data URIs.
//!
//! A "binary string" is a `String` whose every char is in `U+0000..=U+00FF` and stands for one
//! byte. It is the currency of byte-oriented base64 encoders ([`btoa`]), which reject anything
//! wider.

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const DATA_URI_PREFIX: &str = "data:";

/// Bytes tagged with the MIME type declared by the data URI they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryObject {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Maps every byte to the char with the same code point.
pub fn binary_string(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

/// Base64 of a binary string. Chars above U+00FF cannot be represented as one byte.
pub fn btoa(binary: &str) -> Result<String> {
    let bytes = binary
        .chars()
        .map(|ch| u8::try_from(u32::from(ch)).map_err(|_| Error::InvalidCharacter(ch)))
        .collect::<Result<Vec<u8>>>()?;
    Ok(STANDARD.encode(bytes))
}

/// Decodes base64 into a binary string.
pub fn atob(encoded: &str) -> Result<String> {
    let cleaned: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(cleaned)
        .map(|bytes| binary_string(&bytes))
        .map_err(|e| Error::InvalidDataUri(format!("invalid base64: {}", e)))
}

/// Base64 of a byte buffer, going through a binary string like the font loader always has.
pub fn array_buffer_to_base64(buffer: &[u8]) -> String {
    let mut binary = String::with_capacity(buffer.len());
    for &byte in buffer {
        binary.push(char::from(byte));
    }
    // Every char came from a byte, so the encoder cannot reject it.
    btoa(&binary).unwrap_or_default()
}

/// Makes arbitrary Unicode text safe for [`btoa`]: the result is the UTF-8 encoding of `data` as
/// a binary string. ASCII passes through untouched, including `%` and anything that looks like a
/// percent escape, so the output is never double-escaped.
pub fn re_encode(data: &str) -> String {
    binary_string(data.as_bytes())
}

pub fn to_data_uri(content_type: &str, bytes: &[u8]) -> String {
    format!(
        "{}{};base64,{}",
        DATA_URI_PREFIX,
        content_type,
        array_buffer_to_base64(bytes)
    )
}

/// `data:image/svg+xml;base64,...` for a complete SVG document.
pub fn svg_data_uri(document: &str) -> Result<String> {
    Ok(format!(
        "{}image/svg+xml;base64,{}",
        DATA_URI_PREFIX,
        btoa(&re_encode(document))?
    ))
}

/// Splits a data URI into its declared MIME type and decoded payload.
///
/// Base64 payloads are decoded as such; anything else is percent-decoded.
pub fn data_uri_to_binary(uri: &str) -> Result<BinaryObject> {
    let (header, payload) = uri
        .split_once(',')
        .ok_or_else(|| Error::InvalidDataUri("missing ','".into()))?;
    let (_, metadata) = header
        .split_once(':')
        .ok_or_else(|| Error::InvalidDataUri("missing 'data:' scheme".into()))?;
    let mut params = metadata.split(';');
    let content_type = params.next().unwrap_or("").trim().to_string();
    let is_base64 = params.any(|p| p.trim().eq_ignore_ascii_case("base64"));

    let data = if is_base64 {
        atob(payload)?.chars().map(|ch| ch as u8).collect()
    } else {
        percent_decode(payload)
    };
    Ok(BinaryObject { content_type, data })
}

/// Percent-decodes without treating `+` specially. Malformed escapes are kept literally.
fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}
