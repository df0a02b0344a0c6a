//! Segment-wise matching of `:name` / `*name` patterns against request paths.

/// Parameters captured from a dynamic route, in pattern order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn insert(&mut self, name: &str, value: &str) {
        match self.0.iter_mut().find(|(key, _)| key == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.0.push((name.to_string(), value.to_string())),
        }
    }
}

/// Whether a pattern needs the dynamic matcher rather than an exact lookup.
pub fn is_dynamic(pattern: &str) -> bool {
    pattern.contains([':', '*'])
}

/// Matches `path` against `pattern`.
///
/// Both are split on `/` into non-empty segments and must have the same
/// number of them. `:name` and `*name` each capture exactly one path segment;
/// every other segment must match byte for byte.
pub fn match_pattern(pattern: &str, path: &str) -> Option<Params> {
    let pattern_parts = split_path(pattern);
    let path_parts = split_path(path);

    if pattern_parts.len() != path_parts.len() {
        return None;
    }

    let mut params = Params::new();
    for (part, actual) in pattern_parts.iter().zip(&path_parts) {
        match part.strip_prefix(':').or_else(|| part.strip_prefix('*')) {
            Some(name) => params.insert(name, actual),
            None if part == actual => {}
            None => return None,
        }
    }
    Some(params)
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}
