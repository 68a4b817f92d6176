//! Bandwidth estimation wire headers and response header bookkeeping

use crate::{unix_millis_now, BandwidthAccuracy, Error, Result};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};

/// Client → server: accuracy tier code, switches the request into echo-probe mode
pub const X_BANDWIDTH_ESTIMATION: HeaderName = HeaderName::from_static("x-bandwidth-estimation");

/// Server → client: send time of the echo response in Unix milliseconds
pub const X_SENT_TIMESTAMP: HeaderName = HeaderName::from_static("x-sent-timestamp");

/// Client → server: advertised bandwidth in bytes per millisecond
pub const X_BANDWIDTH: HeaderName = HeaderName::from_static("x-bandwidth");

/// Legacy body digest header, invalidated by re-encoding
pub const CONTENT_MD5: HeaderName = HeaderName::from_static("content-md5");

const NO_CACHE_CONTROL: &str = "no-store, no-cache, must-revalidate";
const IDENTITY: &str = "identity";

/// Read the advertised bandwidth.
///
/// Absence is not an error. A value that does not parse, is not finite or is
/// not strictly positive is a protocol error.
pub fn advertised_bandwidth(headers: &HeaderMap) -> Result<Option<f64>> {
    let Some(value) = headers.get(&X_BANDWIDTH) else {
        return Ok(None);
    };

    let raw = value
        .to_str()
        .map_err(|_| Error::invalid_header("X-Bandwidth is not valid ASCII"))?;

    let bandwidth: f64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::invalid_header(format!("X-Bandwidth value '{raw}' is not a number")))?;

    if !bandwidth.is_finite() || bandwidth <= 0.0 {
        return Err(Error::invalid_header(format!(
            "X-Bandwidth value must be a number bigger than 0, got '{raw}'"
        )));
    }

    Ok(Some(bandwidth))
}

/// Render a bandwidth for the `X-Bandwidth` header
pub fn bandwidth_value(bytes_per_ms: f64) -> Result<HeaderValue> {
    HeaderValue::from_str(&bytes_per_ms.to_string())
        .map_err(|e| Error::Internal(format!("Invalid bandwidth header value: {e}")))
}

/// Read the requested probe tier, `None` when the request is not a probe
pub fn requested_accuracy(headers: &HeaderMap) -> Result<Option<BandwidthAccuracy>> {
    let Some(value) = headers.get(&X_BANDWIDTH_ESTIMATION) else {
        return Ok(None);
    };

    let raw = value.to_str().unwrap_or_default().trim();
    raw.parse::<i64>()
        .ok()
        .and_then(BandwidthAccuracy::from_code)
        .map(Some)
        .ok_or_else(|| {
            Error::invalid_header(format!(
                "Invalid bandwidth estimation header with accuracy value '{raw}'"
            ))
        })
}

/// Read the server send timestamp from a probe response
pub fn sent_timestamp(headers: &HeaderMap) -> Result<f64> {
    headers
        .get(&X_SENT_TIMESTAMP)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .ok_or_else(|| Error::invalid_header("Sent timestamp is not present in the response headers"))
}

/// Mark a response as re-encoded with `encoding`
pub fn init_compression_headers(headers: &mut HeaderMap, encoding: &str) -> Result<()> {
    let varies_by_encoding = headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case(header::ACCEPT_ENCODING.as_str()));

    if !varies_by_encoding {
        headers.append(header::VARY, HeaderValue::from_static("Accept-Encoding"));
    }

    let encoding = HeaderValue::from_str(encoding)
        .map_err(|e| Error::Internal(format!("Invalid content encoding: {e}")))?;
    headers.append(header::CONTENT_ENCODING, encoding);
    headers.remove(CONTENT_MD5);
    headers.remove(header::CONTENT_LENGTH);

    Ok(())
}

/// Headers carried by every echo-probe response
pub fn init_bandwidth_estimation_headers(headers: &mut HeaderMap) -> Result<()> {
    headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(IDENTITY));
    insert_no_cache(headers);

    let sent = HeaderValue::from_str(&format!("{:.0}", unix_millis_now()))
        .map_err(|e| Error::Internal(format!("Invalid timestamp header: {e}")))?;
    headers.insert(X_SENT_TIMESTAMP, sent);

    Ok(())
}

/// Cache-busting headers for probe requests
pub fn insert_no_cache(headers: &mut HeaderMap) {
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE_CONTROL));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
}
