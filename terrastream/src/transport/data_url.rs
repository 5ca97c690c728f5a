//! Inline `data:` URLs.
//!
//! The payload of a `data:` URL is part of the URL itself, so it is decoded
//! in place and never reaches a [`Transport`](super::Transport). Both forms
//! are accepted:
//!
//! ```text
//! data:[<media type>][;base64],<data>
//! data:image/png;base64,iVBORw0KGgo...
//! data:text/plain,hello%20world
//! ```
//!
//! `blob:` URLs name objects held by a browser and cannot be resolved here;
//! they are rejected.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;

use super::TransportError;

/// Whether the URL is resolved locally rather than over the network.
pub fn is_local_url(url: &str) -> bool {
    has_scheme(url, "data") || has_scheme(url, "blob")
}

/// Decodes the payload of a `data:` URL.
///
/// Fails for `blob:` URLs, for URLs without the `,` separator and for
/// malformed base64.
pub fn decode_data_url(url: &str) -> Result<Bytes, TransportError> {
    if has_scheme(url, "blob") {
        return Err(TransportError::network(format!(
            "blob URLs cannot be fetched: {}",
            url
        )));
    }
    if !has_scheme(url, "data") {
        return Err(TransportError::network(format!("Not a data URL: {}", url)));
    }

    let Some((header, data)) = url["data:".len()..].split_once(',') else {
        return Err(TransportError::network("Malformed data URL: missing ','"));
    };

    let is_base64 = header
        .rsplit(';')
        .next()
        .is_some_and(|parameter| parameter.trim().eq_ignore_ascii_case("base64"));

    let data = percent_decode(data);
    if !is_base64 {
        return Ok(Bytes::from(data));
    }

    let compact: Vec<u8> = data.into_iter().filter(|b| !b.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map(Bytes::from)
        .map_err(|e| TransportError::network(format!("Malformed base64 in data URL: {}", e)))
}

fn has_scheme(url: &str, scheme: &str) -> bool {
    url.split_once(':')
        .is_some_and(|(prefix, _)| prefix.eq_ignore_ascii_case(scheme))
}

/// `%XX` escapes become bytes; anything else is copied as is.
fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(high), Some(low)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                decoded.push(high << 4 | low);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    decoded
}

fn hex_value(digit: u8) -> Option<u8> {
    (digit as char).to_digit(16).map(|value| value as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_payload() {
        let bytes = decode_data_url("data:text/plain,hello").unwrap();
        assert_eq!(bytes, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_percent_encoded_payload() {
        let bytes = decode_data_url("data:,a%20b%2Cc%zz%4").unwrap();
        assert_eq!(bytes, Bytes::from_static(b"a b,c%zz%4"));
    }

    #[test]
    fn test_base64_payload() {
        let bytes = decode_data_url("DATA:application/octet-stream;base64,aGVs bG8=").unwrap();
        assert_eq!(bytes, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_base64_with_charset() {
        let bytes = decode_data_url("data:text/plain;charset=utf-8;base64,aGk=").unwrap();
        assert_eq!(bytes, Bytes::from_static(b"hi"));
    }

    #[test]
    fn test_malformed() {
        assert!(decode_data_url("data:text/plain").is_err());
        assert!(decode_data_url("data:;base64,!!!").is_err());
        assert!(decode_data_url("https://example.com/a,b").is_err());
    }

    #[test]
    fn test_blob_rejected() {
        let error = decode_data_url("blob:https://example.com/1234").unwrap_err();
        assert!(error.message.contains("blob"));
        assert!(error.status.is_none());
    }

    #[test]
    fn test_is_local_url() {
        assert!(is_local_url("data:image/png;base64,AAAA"));
        assert!(is_local_url("Blob:https://example.com/x"));
        assert!(!is_local_url("https://example.com/data:x"));
        assert!(!is_local_url("no scheme"));
    }
}
