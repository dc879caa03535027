//! Multipart response parsing for the metric processor
//!
//! The processor answers with a multipart body carrying exactly one
//! `image/png` part (the processed image) and one `application/json` part
//! (the metric scores). Parts are split at the boundary declared in the
//! response content-type; each part separates its header block from its
//! payload at the first blank line.

use crate::processor::ProcessedResult;
use shelf_common::{Error, MetricScores, Result};

/// Extract the boundary token from a multipart content-type header value
pub fn boundary_from_content_type(content_type: &str) -> Result<String> {
    let lowered = content_type.to_ascii_lowercase();
    if !lowered.starts_with("multipart/") {
        return Err(Error::Processing(format!(
            "expected multipart response, got content-type {:?}",
            content_type
        )));
    }

    for param in content_type.split(';').map(str::trim) {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        // Header parameter names are case-insensitive
        if name.trim().eq_ignore_ascii_case("boundary") {
            let boundary = value.trim().trim_matches('"');
            if boundary.is_empty() {
                break;
            }
            return Ok(boundary.to_string());
        }
    }

    Err(Error::Processing(format!(
        "no boundary in content-type {:?}",
        content_type
    )))
}

/// Parse the processor's multipart response into the processed image bytes
/// and the metric scores
pub fn parse_processor_response(content_type: &str, body: &[u8]) -> Result<ProcessedResult> {
    let boundary = boundary_from_content_type(content_type)?;
    let delimiter = format!("--{}", boundary).into_bytes();

    let mut image_bytes: Option<Vec<u8>> = None;
    let mut metrics: Option<MetricScores> = None;

    for part in split_parts(body, &delimiter) {
        let (headers, payload) = split_headers(part)?;
        let headers = headers.to_ascii_lowercase();

        if headers.contains("image/png") {
            image_bytes = Some(payload.to_vec());
        } else if headers.contains("application/json") {
            metrics = Some(parse_metrics(payload)?);
        }
        // Unknown part types are ignored
    }

    match (image_bytes, metrics) {
        (Some(image_bytes), Some(metrics)) => Ok(ProcessedResult {
            image_bytes,
            metrics,
        }),
        (None, _) => Err(Error::Processing(
            "processor response missing image/png part".to_string(),
        )),
        (_, None) => Err(Error::Processing(
            "processor response missing application/json metrics part".to_string(),
        )),
    }
}

/// Slice the body into the raw part payloads between boundary markers
fn split_parts<'a>(body: &'a [u8], delimiter: &[u8]) -> Vec<&'a [u8]> {
    let mut parts = Vec::new();
    let mut rest = body;

    // Skip any preamble before the first delimiter
    let Some(first) = find(rest, delimiter) else {
        return parts;
    };
    rest = &rest[first + delimiter.len()..];

    while let Some(end) = find(rest, delimiter) {
        parts.push(trim_part(&rest[..end]));
        rest = &rest[end + delimiter.len()..];
        // "--" after the delimiter closes the multipart body
        if rest.starts_with(b"--") {
            break;
        }
    }

    parts
}

/// Split one part into its header block and payload at the first blank line
fn split_headers(part: &[u8]) -> Result<(String, &[u8])> {
    let (header_end, payload_start) = find(part, b"\r\n\r\n")
        .map(|i| (i, i + 4))
        .or_else(|| find(part, b"\n\n").map(|i| (i, i + 2)))
        .ok_or_else(|| {
            Error::Processing("multipart part has no header/payload delimiter".to_string())
        })?;

    let headers = String::from_utf8_lossy(&part[..header_end]).to_string();
    Ok((headers, &part[payload_start..]))
}

/// Extract {osa, sos, pgc} from the metrics JSON payload
fn parse_metrics(payload: &[u8]) -> Result<MetricScores> {
    let value: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| Error::Processing(format!("malformed metrics JSON: {}", e)))?;

    let field = |name: &str| -> Result<f64> {
        value
            .get(name)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| Error::Processing(format!("metrics JSON missing numeric {:?}", name)))
    };

    Ok(MetricScores::new(
        field("osa")?,
        field("sos")?,
        field("pgc")?,
    ))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Strip the single CRLF the multipart format places after the delimiter
/// line and before the next boundary. Exactly one on each side: anything
/// further belongs to the (possibly binary) payload.
fn trim_part(mut part: &[u8]) -> &[u8] {
    if part.starts_with(b"\r\n") {
        part = &part[2..];
    } else if part.starts_with(b"\n") {
        part = &part[1..];
    }
    if part.ends_with(b"\r\n") {
        part = &part[..part.len() - 2];
    } else if part.ends_with(b"\n") {
        part = &part[..part.len() - 1];
    }
    part
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];

    fn response_body(boundary: &str, json: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
        body.extend_from_slice(PNG_MAGIC);
        body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(b"Content-Type: application/json\r\n\r\n");
        body.extend_from_slice(json.as_bytes());
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
        body
    }

    #[test]
    fn test_parse_full_response() {
        let body = response_body("XBOUNDARY", r#"{"osa": 55.2, "sos": 21.0, "pgc": 37.8}"#);
        let result =
            parse_processor_response("multipart/form-data; boundary=XBOUNDARY", &body).unwrap();

        assert_eq!(result.image_bytes, PNG_MAGIC);
        assert_eq!(result.metrics.osa, 55.2);
        assert_eq!(result.metrics.sos, 21.0);
        assert_eq!(result.metrics.pgc, 37.8);
    }

    #[test]
    fn test_boundary_with_quotes() {
        let boundary =
            boundary_from_content_type("multipart/mixed; boundary=\"abc123\"").unwrap();
        assert_eq!(boundary, "abc123");
    }

    #[test]
    fn test_boundary_param_name_case_insensitive() {
        let boundary =
            boundary_from_content_type("multipart/mixed; Boundary=abc123").unwrap();
        assert_eq!(boundary, "abc123");
        let boundary =
            boundary_from_content_type("multipart/form-data; BOUNDARY=\"xyz\"").unwrap();
        assert_eq!(boundary, "xyz");
    }

    #[test]
    fn test_non_multipart_content_type() {
        let err = boundary_from_content_type("application/json").unwrap_err();
        assert!(matches!(err, Error::Processing(_)));
    }

    #[test]
    fn test_missing_boundary_parameter() {
        assert!(boundary_from_content_type("multipart/mixed").is_err());
    }

    #[test]
    fn test_missing_json_part() {
        let boundary = "XBOUNDARY";
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
        body.extend_from_slice(PNG_MAGIC);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        let err = parse_processor_response("multipart/mixed; boundary=XBOUNDARY", &body)
            .unwrap_err();
        assert!(err.to_string().contains("metrics"));
    }

    #[test]
    fn test_missing_image_part() {
        let boundary = "XBOUNDARY";
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(b"Content-Type: application/json\r\n\r\n");
        body.extend_from_slice(br#"{"osa": 1, "sos": 2, "pgc": 3}"#);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        let err = parse_processor_response("multipart/mixed; boundary=XBOUNDARY", &body)
            .unwrap_err();
        assert!(err.to_string().contains("image/png"));
    }

    #[test]
    fn test_malformed_metrics_json() {
        let body = response_body("XBOUNDARY", "{not json");
        let err = parse_processor_response("multipart/mixed; boundary=XBOUNDARY", &body)
            .unwrap_err();
        assert!(matches!(err, Error::Processing(_)));
    }

    #[test]
    fn test_non_numeric_metric_field() {
        let body = response_body("XBOUNDARY", r#"{"osa": "high", "sos": 2, "pgc": 3}"#);
        assert!(parse_processor_response("multipart/mixed; boundary=XBOUNDARY", &body).is_err());
    }

    #[test]
    fn test_binary_payload_with_crlf_survives() {
        // PNG magic itself contains \r\n; ensure part splitting keeps it
        let body = response_body("XBOUNDARY", r#"{"osa": 1, "sos": 2, "pgc": 3}"#);
        let result =
            parse_processor_response("multipart/mixed; boundary=XBOUNDARY", &body).unwrap();
        assert_eq!(result.image_bytes.len(), PNG_MAGIC.len());
    }
}
