//! Path-pair decoding for the prefixed ingestion modes.
//!
//! After the mode prefix, the remaining path alternates key and value
//! segments: `/m/<module>|<version>|<method>/c/<callback>/b/<json>`.
//! Malformed paths degrade silently to empty fields, which later fail as an
//! unknown destination rather than as a distinct error.

use std::collections::HashMap;

/// Call coordinates decoded from path pairs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PathCall {
    pub module: String,
    pub version: String,
    pub method: String,
    /// JSONP callback name (`c` pair).
    pub callback: Option<String>,
    /// Raw payload string (`b` pair), URL mode only.
    pub biz_content: Option<String>,
}

/// Decode the path remainder after the mode prefix.
pub fn parse(rest: &str) -> PathCall {
    let segments: Vec<&str> = rest.split('/').collect();
    let mut params: HashMap<&str, &str> = HashMap::new();
    // An odd segment count yields no parameters at all.
    if segments.len() % 2 == 0 {
        for pair in segments.chunks_exact(2) {
            params.insert(pair[0], pair[1]);
        }
    }

    let mut call = PathCall::default();
    if let Some((module, version, method)) = split_method(params.get("m").copied().unwrap_or("")) {
        call.module = module.to_string();
        call.version = version.to_string();
        call.method = method.to_string();
    }
    call.callback = params.get("c").filter(|c| !c.is_empty()).map(|c| c.to_string());
    call.biz_content = params.get("b").map(|b| b.to_string());
    call
}

/// Split the `m` value into (module, version, method).
///
/// The separator is `|`; the legacy `_` form is still accepted when the
/// pipe form does not yield three parts. Any other shape leaves all three
/// empty.
fn split_method(m: &str) -> Option<(&str, &str, &str)> {
    let parts: Vec<&str> = m.split('|').collect();
    if let [module, version, method] = parts[..] {
        return Some((module, version, method));
    }
    let parts: Vec<&str> = m.splitn(3, '_').collect();
    if let [module, version, method] = parts[..] {
        return Some((module, version, method));
    }
    None
}
