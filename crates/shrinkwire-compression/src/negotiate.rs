//! `Accept-Encoding` negotiation
//!
//! Standard compression follows HTTP content negotiation: quality values are
//! honoured, `*` matches every registered provider, `identity` competes as a
//! provider-less candidate, and ties on quality go to the provider registered
//! first.

use crate::compressor::{CompressionProvider, ProviderRegistry};
use http::header::{HeaderMap, ACCEPT_ENCODING};
use std::sync::Arc;
use tracing::{debug, trace};

const IDENTITY: &str = "identity";
const WILDCARD: &str = "*";

/// One entry of an `Accept-Encoding` list
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingPreference {
    /// Coding token as sent by the client
    pub name: String,
    /// Quality in `0.0..=1.0`; absent means 1.0
    pub quality: f64,
}

/// Parse an `Accept-Encoding` value, skipping malformed entries
pub fn parse_accept_encoding(value: &str) -> Vec<EncodingPreference> {
    value
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split(';');
            let name = parts.next()?.trim();
            if name.is_empty() {
                return None;
            }

            let mut quality = 1.0;
            for param in parts {
                let (key, val) = param.split_once('=')?;
                if key.trim().eq_ignore_ascii_case("q") {
                    quality = val.trim().parse::<f64>().ok()?;
                }
            }

            if !(0.0..=1.0).contains(&quality) {
                return None;
            }

            Some(EncodingPreference {
                name: name.to_string(),
                quality,
            })
        })
        .collect()
}

/// All `Accept-Encoding` values of a request, joined and parsed
pub fn accepted_encodings(headers: &HeaderMap) -> Vec<EncodingPreference> {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(parse_accept_encoding)
        .collect()
}

/// Whether the request carries a non-empty `Accept-Encoding`
pub fn accepts_compression(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .any(|v| !v.as_bytes().iter().all(u8::is_ascii_whitespace))
}

/// Accepted encodings that have a registered provider, in header order.
///
/// Explicitly refused codings (`q=0`) are left out.
pub fn compatible_encodings(headers: &HeaderMap, registry: &ProviderRegistry) -> Vec<String> {
    let mut compatible: Vec<String> = Vec::new();

    for preference in accepted_encodings(headers) {
        if preference.quality <= 0.0 {
            continue;
        }
        let Some(provider) = registry.get(&preference.name) else {
            continue;
        };
        let name = provider.encoding_name();
        if !compatible.iter().any(|c| c.eq_ignore_ascii_case(name)) {
            compatible.push(name.to_string());
        }
    }

    compatible
}

#[derive(Debug)]
struct Candidate {
    name: String,
    quality: f64,
    priority: usize,
    provider: Option<Arc<dyn CompressionProvider>>,
}

/// Pick the provider for standard compression.
///
/// Returns `None` when nothing acceptable is registered or when `identity`
/// wins the negotiation.
pub fn select_provider(
    headers: &HeaderMap,
    registry: &ProviderRegistry,
) -> Option<Arc<dyn CompressionProvider>> {
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut add = |candidate: Candidate| {
        if !candidates
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(&candidate.name))
        {
            candidates.push(candidate);
        }
    };

    for preference in accepted_encodings(headers) {
        if preference.quality < f64::EPSILON {
            continue;
        }

        for (priority, provider) in registry.iter().enumerate() {
            if provider.encoding_name().eq_ignore_ascii_case(&preference.name) {
                add(Candidate {
                    name: provider.encoding_name().to_string(),
                    quality: preference.quality,
                    priority,
                    provider: Some(Arc::clone(provider)),
                });
            }
        }

        if preference.name == WILDCARD {
            for (priority, provider) in registry.iter().enumerate() {
                add(Candidate {
                    name: provider.encoding_name().to_string(),
                    quality: preference.quality,
                    priority,
                    provider: Some(Arc::clone(provider)),
                });
            }
            break;
        }

        if preference.name.eq_ignore_ascii_case(IDENTITY) {
            add(Candidate {
                name: IDENTITY.to_string(),
                quality: preference.quality,
                priority: usize::MAX,
                provider: None,
            });
        }
    }

    candidates.sort_by(|a, b| {
        b.quality
            .total_cmp(&a.quality)
            .then(a.priority.cmp(&b.priority))
    });

    let selected = candidates.into_iter().next().and_then(|c| c.provider);
    match &selected {
        Some(provider) => trace!(encoding = provider.encoding_name(), "Negotiated encoding"),
        None => debug!("No matching compression provider found"),
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(accept: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_str(accept).unwrap());
        headers
    }

    fn selected(accept: &str) -> Option<String> {
        select_provider(&headers(accept), &ProviderRegistry::with_defaults())
            .map(|p| p.encoding_name().to_string())
    }

    #[test]
    fn test_parse_accept_encoding() {
        let parsed = parse_accept_encoding("gzip, br;q=0.5 , deflate;q=abc, ,zstd;q=2");
        assert_eq!(
            parsed,
            vec![
                EncodingPreference { name: "gzip".into(), quality: 1.0 },
                EncodingPreference { name: "br".into(), quality: 0.5 },
            ]
        );
    }

    #[test]
    fn test_select_by_quality() {
        assert_eq!(selected("br;q=0.5, gzip;q=1.0").as_deref(), Some("gzip"));
    }

    #[test]
    fn test_select_by_priority_on_tie() {
        assert_eq!(selected("deflate, gzip, br").as_deref(), Some("br"));
        assert_eq!(selected("deflate, gzip").as_deref(), Some("gzip"));
    }

    #[test]
    fn test_wildcard_selects_highest_priority() {
        assert_eq!(selected("*").as_deref(), Some("br"));
    }

    #[test]
    fn test_wildcard_does_not_override_explicit_quality() {
        assert_eq!(selected("br;q=0.1, *;q=0.5").as_deref(), Some("gzip"));
    }

    #[test]
    fn test_identity_wins() {
        assert_eq!(selected("identity"), None);
        assert_eq!(selected("identity;q=1, gzip;q=0.5"), None);
        assert_eq!(selected("identity;q=0.5, gzip").as_deref(), Some("gzip"));
    }

    #[test]
    fn test_refused_and_unknown() {
        assert_eq!(selected("gzip;q=0, br").as_deref(), Some("br"));
        assert_eq!(selected("lzma"), None);
    }

    #[test]
    fn test_compatible_encodings() {
        let registry = ProviderRegistry::with_defaults();
        let compatible = compatible_encodings(&headers("GZIP, lzma, br;q=0.3, deflate;q=0"), &registry);
        assert_eq!(compatible, vec!["gzip".to_string(), "br".to_string()]);
    }

    #[test]
    fn test_accepts_compression() {
        assert!(accepts_compression(&headers("gzip")));
        assert!(!accepts_compression(&headers(" ")));
        assert!(!accepts_compression(&HeaderMap::new()));
    }
}
