use std::collections::HashMap;

use crate::config::POSTS_PER_PAGE;

/// Parses the query string of `uri` into decoded key/value pairs.
/// A repeated key keeps its last value; a bare flag maps to an empty string.
pub fn parse_query_params(uri: &str) -> HashMap<String, String> {
    let Some((_, query)) = uri.split_once('?') else {
        return HashMap::new();
    };

    query
        .split('&')
        .filter(|param| !param.is_empty())
        .map(|param| {
            let (key, raw) = param.split_once('=').unwrap_or((param, ""));
            let value = urlencoding::decode(raw)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| raw.to_string());
            (key.to_string(), value)
        })
        .collect()
}

/// One page of a listing. `None` means the caller asked for everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

impl Page {
    pub fn from_params(params: &HashMap<String, String>) -> Option<Page> {
        let number = params.get("page")?.parse::<usize>().ok()?.max(1);
        Some(Page {
            number,
            size: POSTS_PER_PAGE,
        })
    }

    pub fn apply<T>(page: Option<Page>, items: Vec<T>) -> Vec<T> {
        match page {
            Some(p) => items
                .into_iter()
                .skip(p.number.saturating_sub(1).saturating_mul(p.size))
                .take(p.size)
                .collect(),
            None => items,
        }
    }
}
