//! Request fingerprints.
//!
//! A fingerprint identifies one cacheable request: method, path, the query
//! parameters in a canonical order, and a digest of the body. Two requests
//! that differ only in parameter order share a fingerprint.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Build a fingerprint such as `GET:/users/1` or `GET:/search?page=2&q=x`.
///
/// Parameters are sorted by name, then value. A body, when present, is
/// appended as a 64-bit SipHash digest (`#0123abcd...`). Delimiter
/// characters inside the parts are percent-encoded, so a value such as
/// `1&b=2` cannot pass for a second parameter.
///
/// `DefaultHasher` is deterministic within a process lifetime, which is all
/// an in-memory cache needs.
pub fn fingerprint(method: &str, path: &str, params: &[(&str, &str)], body: Option<&[u8]>) -> String {
    let mut fp = format!(
        "{}:{}",
        escape(&method.to_ascii_uppercase(), METHOD_RESERVED),
        escape(path, PATH_RESERVED)
    );

    if !params.is_empty() {
        let mut sorted = params.to_vec();
        sorted.sort_unstable();
        let query: Vec<String> = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", escape(k, PARAM_RESERVED), escape(v, PARAM_RESERVED)))
            .collect();
        fp.push('?');
        fp.push_str(&query.join("&"));
    }

    if let Some(body) = body {
        let mut hasher = DefaultHasher::new();
        body.hash(&mut hasher);
        fp.push_str(&format!("#{:016x}", hasher.finish()));
    }

    fp
}

const METHOD_RESERVED: &[char] = &['%', ':', '?', '#'];
const PATH_RESERVED: &[char] = &['%', '?', '#'];
const PARAM_RESERVED: &[char] = &['%', '&', '=', '?', '#'];

fn escape(part: &str, reserved: &[char]) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        if reserved.contains(&c) {
            out.push_str(&format!("%{:02X}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}
