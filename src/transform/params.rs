use crate::config::{OutputFormat, DEFAULT_QUALITY, MAX_DIM};
use serde::Deserialize;
use std::str::FromStr;

/// Raw query parameters of `GET /`, exactly as the client sent them.
///
/// Every field is kept as a string so that malformed numbers degrade to
/// "absent" during normalization instead of rejecting the whole request.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct QueryParams {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub w: Option<String>,
    #[serde(default)]
    pub h: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

impl FromStr for QueryParams {
    type Err = serde_urlencoded::de::Error;

    /// Parse URL query string into QueryParams structure
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_urlencoded::from_str(s)
    }
}

/// Normalized transformation parameters. Two requests with equal
/// `TransformRequest`s always map to the same cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransformRequest {
    pub url: String,
    /// Target width, `None` when absent or outside `(0, MAX_DIM]`
    pub width: Option<u32>,
    /// Target height, `None` when absent or outside `(0, MAX_DIM]`
    pub height: Option<u32>,
    /// Encoder quality in `[1, 100]`
    pub quality: u8,
    pub format: OutputFormat,
}

impl TransformRequest {
    /// Returns `None` when the query carries no usable source URL, in which
    /// case the caller answers with the greeting instead of the pipeline.
    pub fn from_query(query: &QueryParams) -> Option<Self> {
        let url = query.url.as_deref().map(str::trim).filter(|u| !u.is_empty())?;

        Some(Self {
            url: url.to_string(),
            width: parse_dimension(query.w.as_deref()),
            height: parse_dimension(query.h.as_deref()),
            quality: parse_quality(query.quality.as_deref()),
            format: OutputFormat::from_param(query.output.as_deref()),
        })
    }
}

/// Options handed to the transcoder; the request minus its source URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality: u8,
    pub format: OutputFormat,
}

impl From<&TransformRequest> for TranscodeOptions {
    fn from(req: &TransformRequest) -> Self {
        Self {
            width: req.width,
            height: req.height,
            quality: req.quality,
            format: req.format,
        }
    }
}

// Out-of-range dimensions are dropped, not clamped.
fn parse_dimension(raw: Option<&str>) -> Option<u32> {
    let value = raw?.trim().parse::<i64>().ok()?;
    if value > 0 && value <= MAX_DIM as i64 {
        Some(value as u32)
    } else {
        None
    }
}

fn parse_quality(raw: Option<&str>) -> u8 {
    raw.and_then(|q| q.trim().parse::<i64>().ok())
        .filter(|q| (1..=100).contains(q))
        .map(|q| q as u8)
        .unwrap_or(DEFAULT_QUALITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(query: &str) -> Option<TransformRequest> {
        TransformRequest::from_query(&query.parse::<QueryParams>().unwrap())
    }

    #[test]
    fn missing_or_blank_url_yields_none() {
        assert!(req("").is_none());
        assert!(req("w=100&h=100").is_none());
        assert!(req("url=").is_none());
        assert!(req("url=%20%20").is_none());
    }

    #[test]
    fn defaults() {
        let r = req("url=https://x/img.jpg").unwrap();
        assert_eq!(r.url, "https://x/img.jpg");
        assert_eq!(r.width, None);
        assert_eq!(r.height, None);
        assert_eq!(r.quality, 94);
        assert_eq!(r.format, OutputFormat::Jpeg);
    }

    #[test]
    fn url_is_percent_decoded() {
        let r = req("url=https%3A%2F%2Fx%2Fa.jpg%3Fv%3D2").unwrap();
        assert_eq!(r.url, "https://x/a.jpg?v=2");
    }

    #[test]
    fn out_of_range_dimensions_are_dropped() {
        for bad in ["0", "-5", "2001", "99999", "abc", ""] {
            let r = req(&format!("url=u&w={bad}&h={bad}")).unwrap();
            assert_eq!(r.width, None, "w={bad}");
            assert_eq!(r.height, None, "h={bad}");
        }
        let r = req("url=u&w=2000&h=1").unwrap();
        assert_eq!(r.width, Some(2000));
        assert_eq!(r.height, Some(1));
    }

    #[test]
    fn out_of_range_quality_resolves_to_default() {
        for bad in ["0", "-1", "101", "abc", "4.5"] {
            assert_eq!(req(&format!("url=u&quality={bad}")).unwrap().quality, 94, "quality={bad}");
        }
        assert_eq!(req("url=u&quality=1").unwrap().quality, 1);
        assert_eq!(req("url=u&quality=100").unwrap().quality, 100);
        assert_eq!(req("url=u&quality=80").unwrap().quality, 80);
    }

    #[test]
    fn output_png_or_jpeg() {
        assert_eq!(req("url=u&output=png").unwrap().format, OutputFormat::Png);
        assert_eq!(req("url=u&output=jpg").unwrap().format, OutputFormat::Jpeg);
        assert_eq!(req("url=u&output=gif").unwrap().format, OutputFormat::Jpeg);
    }
}
