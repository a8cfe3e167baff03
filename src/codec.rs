use http::{HeaderMap, HeaderValue, Method, Version, header};

/// Supported compression codecs.
///
/// "No compression" is represented as `Option::<Codec>::None` throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Brotli compression.
    Brotli,
    /// Gzip compression.
    Gzip,
}

impl Codec {
    /// Returns the Content-Encoding header value for this codec.
    pub fn content_encoding(&self) -> &'static str {
        match self {
            Codec::Brotli => "br",
            Codec::Gzip => "gzip",
        }
    }

    /// Parses an Accept-Encoding value and returns the best supported codec.
    ///
    /// `br` wins outright wherever it appears; `gzip` is only a candidate
    /// until the scan completes. Parameters are ignored except `q=0`, which
    /// refuses the coding. Unknown codings are skipped.
    pub fn from_accept_encoding(header: &str) -> Option<Codec> {
        let mut candidate = None;

        for part in header.split(',') {
            let (encoding, quality) = parse_encoding_with_quality(part.trim());

            if quality == 0.0 {
                continue;
            }

            match encoding {
                "br" => return Some(Codec::Brotli),
                "gzip" => candidate = Some(Codec::Gzip),
                _ => {}
            }
        }

        candidate
    }
}

/// Negotiates the codec for a request.
///
/// Returns `None` for `OPTIONS`, for HTTP versions older than 1.1 and for
/// connection upgrades; otherwise scans every `Accept-Encoding` value.
pub fn negotiate(method: &Method, version: Version, headers: &HeaderMap) -> Option<Codec> {
    if method == Method::OPTIONS {
        return None;
    }

    if version == Version::HTTP_09 || version == Version::HTTP_10 {
        return None;
    }

    if is_upgrade(headers) {
        return None;
    }

    let mut best = None;
    for value in headers.get_all(header::ACCEPT_ENCODING) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        match Codec::from_accept_encoding(value) {
            Some(Codec::Brotli) => return Some(Codec::Brotli),
            Some(Codec::Gzip) => best = Some(Codec::Gzip),
            None => {}
        }
    }
    best
}

/// Checks whether the Connection header requests a protocol upgrade.
fn is_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("upgrade"))
}

/// Adds Accept-Encoding to the Vary header.
///
/// An existing value gains `, Accept-Encoding`; a value that already lists
/// it, or is `*`, is left alone. Several Vary lines are folded into one.
pub fn add_vary_accept_encoding(headers: &mut HeaderMap) {
    let mut existing = Vec::new();
    let mut opaque = false;
    for vary in headers.get_all(header::VARY) {
        match vary.to_str() {
            Ok(vary) if !vary.trim().is_empty() => existing.push(vary.trim().to_owned()),
            Ok(_) => {}
            Err(_) => opaque = true,
        }
    }

    // Opaque bytes cannot be folded, keep them and add a line.
    if opaque {
        headers.append(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        return;
    }

    if existing.is_empty() {
        headers.insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        return;
    }

    let covered = existing.iter().flat_map(|v| v.split(',')).any(|v| {
        let v = v.trim();
        v == "*" || v.eq_ignore_ascii_case("accept-encoding")
    });
    if covered {
        return;
    }

    let folded = format!("{}, Accept-Encoding", existing.join(", "));
    match HeaderValue::from_str(&folded) {
        Ok(value) => {
            headers.insert(header::VARY, value);
        }
        Err(_) => {
            headers.append(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        }
    }
}

/// Parses an encoding entry like "gzip" or "br;q=0.8" into (encoding, quality).
fn parse_encoding_with_quality(s: &str) -> (&str, f32) {
    let mut parts = s.splitn(2, ';');
    let encoding = parts.next().unwrap_or("").trim();

    let quality = parts
        .next()
        .and_then(|q| {
            let q = q.trim();
            q.strip_prefix("q=")
                .or_else(|| q.strip_prefix("Q="))
                .and_then(|q| q.trim().parse::<f32>().ok())
        })
        .unwrap_or(1.0);

    (encoding, quality)
}
