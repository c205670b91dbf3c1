// Aggregation keys: deriving them from the raw key field of a summary row, and filtering them.
//
// The summarizer names servers `backend/server` and requests by their URL as the client wrote it.
// What we want to group by is the server name alone, and the request path without scheme, host,
// query string, percent-encoding or doubled slashes, so that the same endpoint reached through
// different spellings lands on the same key.

/// How a raw key field becomes an aggregation key.

#[derive(Debug, Clone)]
pub enum KeyTransform {
    /// The field as it is.
    Identity,

    /// The part after the last '/', or the whole field if there is none.
    LastSegment,

    /// A request path, see `EndpointNormalizer`.
    Endpoint(EndpointNormalizer),
}

impl KeyTransform {
    /// The key for `raw`, or None if nothing usable is left of it.

    pub fn apply(&self, raw: &str) -> Option<String> {
        let key = match self {
            KeyTransform::Identity => raw.to_string(),
            KeyTransform::LastSegment => last_segment(raw).to_string(),
            KeyTransform::Endpoint(normalizer) => normalizer.normalize(raw)?,
        };
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    }
}

pub fn last_segment(raw: &str) -> &str {
    match raw.rfind('/') {
        Some(p) => &raw[p + 1..],
        None => raw,
    }
}

/// Turns request URLs into endpoint paths.

#[derive(Debug, Clone, Default)]
pub struct EndpointNormalizer {
    host_prefixes: Vec<String>,
}

impl EndpointNormalizer {
    /// `host_prefixes` are scheme+host strings like "https://api.example.org"; the first one that
    /// prefixes a URL is stripped from it.

    pub fn new(host_prefixes: &[String]) -> EndpointNormalizer {
        EndpointNormalizer {
            host_prefixes: host_prefixes
                .iter()
                .map(|p| p.trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn normalize(&self, raw: &str) -> Option<String> {
        let mut path = raw;
        for prefix in &self.host_prefixes {
            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                path = rest;
                break;
            }
        }
        if let Some(p) = path.find(|c: char| c == '?' || c == '#') {
            path = &path[..p];
        }
        let decoded = urlencoding::decode(path)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| path.to_string());

        let mut result = String::with_capacity(decoded.len() + 1);
        for c in decoded.chars() {
            if c == '/' && result.ends_with('/') {
                continue;
            }
            if result.is_empty() && c != '/' {
                result.push('/');
            }
            result.push(c);
        }
        if result.is_empty() {
            None
        } else {
            Some(result)
        }
    }
}

/// A set of key fragments.  A key passes the filter if it contains one of the fragments; an empty
/// filter passes every key.

#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    fragments: Vec<String>,
}

impl KeyFilter {
    /// Create a new, empty filter.

    pub fn new() -> KeyFilter {
        KeyFilter { fragments: vec![] }
    }

    pub fn from_fragments(fragments: &[String]) -> KeyFilter {
        let mut filter = KeyFilter::new();
        for f in fragments {
            filter.insert(f);
        }
        filter
    }

    /// Add a fragment.  Empty fragments are ignored, they would match everything.

    pub fn insert(&mut self, fragment: &str) {
        if !fragment.is_empty() {
            self.fragments.push(fragment.to_string());
        }
    }

    /// Return true iff the filter has no fragments.

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn accepts(&self, key: &str) -> bool {
        self.is_empty() || self.fragments.iter().any(|f| key.contains(f.as_str()))
    }
}

#[test]
fn test_last_segment() {
    assert!(KeyTransform::LastSegment.apply("all_handlers/selma").as_deref() == Some("selma"));
    assert!(KeyTransform::LastSegment.apply("selma").as_deref() == Some("selma"));
    assert!(KeyTransform::LastSegment.apply("a/b/patty").as_deref() == Some("patty"));
    assert!(KeyTransform::LastSegment.apply("backend/").is_none());
    assert!(KeyTransform::Identity.apply("a/b").as_deref() == Some("a/b"));
}

#[test]
fn test_endpoint_normalizer() {
    let n = EndpointNormalizer::new(&[
        "https://api.unipept.ugent.be/".to_string(),
        "http://api.unipept.ugent.be".to_string(),
    ]);
    assert!(n.normalize("/api/v2/pept2prot.json").as_deref() == Some("/api/v2/pept2prot.json"));
    assert!(
        n.normalize("https://api.unipept.ugent.be/api/v2//pept2lca.json?input[]=AALTER")
            .as_deref()
            == Some("/api/v2/pept2lca.json")
    );
    assert!(
        n.normalize("http://api.unipept.ugent.be//mpa/pept2data")
            .as_deref()
            == Some("/mpa/pept2data")
    );
    assert!(n.normalize("/api/v2/taxa2lca%2Ejson").as_deref() == Some("/api/v2/taxa2lca.json"));
    assert!(n.normalize("private_api/metadata").as_deref() == Some("/private_api/metadata"));
    assert!(n.normalize("https://api.unipept.ugent.be").is_none());
    assert!(n.normalize("?x=1").is_none());
}

#[test]
fn test_key_filter() {
    let f = KeyFilter::new();
    assert!(f.is_empty());
    assert!(f.accepts("anything"));

    let f = KeyFilter::from_fragments(&["/api/".to_string(), "/mpa/".to_string(), "".to_string()]);
    assert!(!f.is_empty());
    assert!(f.accepts("/api/v2/pept2prot.json"));
    assert!(f.accepts("/mpa/pept2data"));
    assert!(!f.accepts("/favicon.ico"));
}
