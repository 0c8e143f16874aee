//! HLS playlist rewriting.
//!
//! Every URI in an upstream playlist is routed back through this gateway:
//! decryption keys through `/key`, media segments through `/segment`, and
//! nested playlists (variants, alternate audio/subtitles) through `/cdnlive`
//! so rewriting continues recursively. The live `#EXT-X-ENDLIST` marker is
//! stripped so channels always present as live.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Everything except unreserved characters is escaped in query values.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Rewrite a playlist so all URIs point at `proxy_base`. Relative URIs are
/// resolved against `source_url`, the playlist's own address. Rewriting is
/// idempotent: URIs already pointing at `proxy_base` pass through untouched.
pub fn rewrite(manifest: &str, proxy_base: &str, source_url: &str) -> String {
    let base = url::Url::parse(source_url).ok();
    let proxy_base = proxy_base.trim_end_matches('/');

    let lines = join_wrapped_lines(manifest);
    let mut output = String::with_capacity(manifest.len());
    let mut variant_pending = false;

    for line in lines {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            output.push('\n');
            continue;
        }

        if let Some(tag) = trimmed.strip_prefix('#') {
            if tag.starts_with("EXT-X-ENDLIST") {
                // Live channels never end.
                continue;
            }
            if tag.starts_with("EXT-X-STREAM-INF") {
                variant_pending = true;
                output.push_str(trimmed);
                output.push('\n');
                continue;
            }
            let route = if tag.starts_with("EXT-X-KEY") || tag.starts_with("EXT-X-SESSION-KEY") {
                "key"
            } else {
                // EXT-X-MEDIA and friends reference nested playlists.
                "cdnlive"
            };
            output.push_str(&rewrite_uri_attribute(trimmed, base.as_ref(), proxy_base, route));
            output.push('\n');
            continue;
        }

        // Bare URI line: a variant playlist, nested manifest, or segment.
        let route = if variant_pending || is_manifest_path(trimmed) {
            "cdnlive"
        } else {
            "segment"
        };
        variant_pending = false;
        output.push_str(&proxy_uri(trimmed, base.as_ref(), proxy_base, route));
        output.push('\n');
    }

    output
}

/// Some upstreams wrap long segment URLs across physical lines. A line that
/// neither starts with `#` nor a URL scheme, directly following another bare
/// URI line, is a continuation of that URI.
fn join_wrapped_lines(manifest: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in manifest.lines() {
        let trimmed = raw.trim();
        let continues_previous = !trimmed.is_empty()
            && !trimmed.starts_with('#')
            && !has_scheme(trimmed)
            && matches!(lines.last(), Some(prev) if !prev.is_empty() && !prev.starts_with('#'));
        if continues_previous {
            if let Some(prev) = lines.last_mut() {
                prev.push_str(trimmed);
                continue;
            }
        }
        lines.push(trimmed.to_string());
    }
    lines
}

fn has_scheme(uri: &str) -> bool {
    uri.starts_with("http://") || uri.starts_with("https://")
}

/// Does a bare URI line name another playlist rather than a segment?
fn is_manifest_path(uri: &str) -> bool {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    path.ends_with(".m3u8") || path.ends_with(".m3u")
}

/// Resolve a possibly-relative URI to absolute using the playlist's URL.
fn make_absolute(raw: &str, base: Option<&url::Url>) -> String {
    if has_scheme(raw) {
        return raw.to_string();
    }
    if let Some(base) = base {
        if let Ok(joined) = base.join(raw) {
            return joined.to_string();
        }
    }
    raw.to_string()
}

/// Is this URI one of our own rewritten links? A bare prefix test is not
/// enough: `https://gate.example.com.evil.net/...` must not pass for proxy
/// base `https://gate.example.com`, so the prefix must end at a path
/// boundary.
fn is_already_proxied(uri: &str, proxy_base: &str) -> bool {
    match uri.strip_prefix(proxy_base) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn proxy_uri(uri: &str, base: Option<&url::Url>, proxy_base: &str, route: &str) -> String {
    if is_already_proxied(uri, proxy_base) {
        return uri.to_string();
    }
    let absolute = make_absolute(uri, base);
    format!(
        "{proxy_base}/{route}?url={}",
        utf8_percent_encode(&absolute, QUERY_VALUE)
    )
}

/// Rewrite any `URI="..."` values found in a playlist tag line.
fn rewrite_uri_attribute(
    line: &str,
    base: Option<&url::Url>,
    proxy_base: &str,
    route: &str,
) -> String {
    let pattern = "URI=\"";
    let mut result = String::with_capacity(line.len());
    let mut remaining = line;

    while let Some(start) = remaining.find(pattern) {
        result.push_str(&remaining[..start + pattern.len()]);
        remaining = &remaining[start + pattern.len()..];

        if let Some(end) = remaining.find('"') {
            let uri = &remaining[..end];
            result.push_str(&proxy_uri(uri, base, proxy_base, route));
            result.push('"');
            remaining = &remaining[end + 1..];
        } else {
            result.push_str(remaining);
            remaining = "";
        }
    }

    result.push_str(remaining);
    result
}

/// Cheap structural check that a body is actually an HLS playlist: framing
/// marker plus at least one segment or variant tag. Upstreams routinely
/// answer 200 with an HTML error page.
pub fn looks_like_playlist(body: &str) -> bool {
    let head = body.trim_start();
    head.starts_with("#EXTM3U")
        && (head.contains("#EXTINF") || head.contains("#EXT-X-STREAM-INF"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROXY: &str = "https://gate.example.com";
    const SOURCE: &str = "https://cdn.upstream.tv/live/ch42/mono.m3u8";

    #[test]
    fn rewrites_relative_segments() {
        let manifest = "#EXTM3U\n#EXTINF:6.0,\nseg001.ts\n#EXTINF:6.0,\nseg002.ts\n";
        let out = rewrite(manifest, PROXY, SOURCE);
        assert!(out.contains(
            "https://gate.example.com/segment?url=https%3A%2F%2Fcdn.upstream.tv%2Flive%2Fch42%2Fseg001.ts"
        ));
        assert!(!out.contains("\nseg002.ts"));
    }

    #[test]
    fn rewrites_key_uri() {
        let manifest =
            "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"https://keys.upstream.tv/k/42\",IV=0xabc\n#EXTINF:6.0,\nseg.ts\n";
        let out = rewrite(manifest, PROXY, SOURCE);
        assert!(out.contains("URI=\"https://gate.example.com/key?url=https%3A%2F%2Fkeys.upstream.tv%2Fk%2F42\""));
        assert!(out.contains(",IV=0xabc"));
    }

    #[test]
    fn rewrites_variant_playlists_to_manifest_route() {
        let manifest =
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=2000000\nhigh/index.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nlow/index.m3u8\n";
        let out = rewrite(manifest, PROXY, SOURCE);
        assert_eq!(out.matches("/cdnlive?url=").count(), 2);
        assert!(!out.contains("/segment?url="));
    }

    #[test]
    fn rewrites_alternate_media_uri() {
        let manifest =
            "#EXTM3U\n#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",URI=\"audio/en.m3u8\"\n#EXT-X-STREAM-INF:BANDWIDTH=1,AUDIO=\"aud\"\nv.m3u8\n";
        let out = rewrite(manifest, PROXY, SOURCE);
        assert!(out.contains(
            "URI=\"https://gate.example.com/cdnlive?url=https%3A%2F%2Fcdn.upstream.tv%2Flive%2Fch42%2Faudio%2Fen.m3u8\""
        ));
    }

    #[test]
    fn strips_endlist_marker() {
        let manifest = "#EXTM3U\n#EXTINF:6.0,\nseg.ts\n#EXT-X-ENDLIST\n";
        let out = rewrite(manifest, PROXY, SOURCE);
        assert!(!out.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn joins_wrapped_segment_lines() {
        let manifest = "#EXTM3U\n#EXTINF:6.0,\nhttps://cdn.upstream.tv/live/ch42/very-long-\nsegment-name-001.ts\n";
        let out = rewrite(manifest, PROXY, SOURCE);
        assert!(out.contains("very-long-segment-name-001.ts"));
        assert_eq!(out.matches("/segment?url=").count(), 1);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let manifest = "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"key/42\"\n#EXTINF:6.0,\nseg001.ts\n#EXT-X-ENDLIST\n";
        let once = rewrite(manifest, PROXY, SOURCE);
        let twice = rewrite(&once, PROXY, SOURCE);
        assert_eq!(once, twice);
    }

    #[test]
    fn proxy_base_lookalike_hosts_are_still_proxied() {
        // A host that merely starts with the gateway's own name must not be
        // mistaken for an already-rewritten link.
        let manifest = "#EXTM3U\n#EXTINF:6.0,\nhttps://gate.example.com.evil.net/seg.ts\n";
        let out = rewrite(manifest, PROXY, SOURCE);
        assert!(!out.contains("\nhttps://gate.example.com.evil.net/seg.ts"));
        assert!(out.contains(
            "/segment?url=https%3A%2F%2Fgate.example.com.evil.net%2Fseg.ts"
        ));
    }

    #[test]
    fn absolute_urls_from_other_hosts_are_still_proxied() {
        let manifest = "#EXTM3U\n#EXTINF:6.0,\nhttps://edge7.other-cdn.net/c/42/seg.ts\n";
        let out = rewrite(manifest, PROXY, SOURCE);
        assert!(out.contains("/segment?url=https%3A%2F%2Fedge7.other-cdn.net%2Fc%2F42%2Fseg.ts"));
    }

    #[test]
    fn playlist_detection() {
        assert!(looks_like_playlist("#EXTM3U\n#EXTINF:6.0,\nseg.ts\n"));
        assert!(looks_like_playlist(
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nv.m3u8\n"
        ));
        assert!(!looks_like_playlist("<html><body>blocked</body></html>"));
        assert!(!looks_like_playlist("#EXTM3U\n#EXT-X-VERSION:3\n"));
        assert!(!looks_like_playlist("{\"error\":\"not found\"}"));
    }
}
