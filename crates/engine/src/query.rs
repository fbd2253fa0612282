//! Tag normalization and search-query construction.

use std::collections::BTreeMap;

/// Canonical form of a tag as stored in the affinity profile.
pub fn normalize_tag(tag: &str) -> String {
    tag.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// Expand a tag into its search form.  Tags with configured aliases become an
/// OR-group: `(tag OR alias1 OR alias2)`.
pub fn expand_search_query(tag: &str, aliases: &BTreeMap<String, Vec<String>>) -> String {
    let alternatives: Vec<&str> = aliases
        .get(&normalize_tag(tag))
        .map(|list| {
            list.iter()
                .map(String::as_str)
                .filter(|alias| !alias.is_empty() && *alias != tag)
                .collect()
        })
        .unwrap_or_default();

    if alternatives.is_empty() {
        return tag.to_string();
    }

    let mut parts = vec![tag];
    parts.extend(alternatives);
    format!("({})", parts.join(" OR "))
}

/// Merge the historically most effective raw search term into the expanded
/// query for `tag`.
pub fn build_query(tag: &str, best_raw: &str, aliases: &BTreeMap<String, Vec<String>>) -> String {
    let base = expand_search_query(tag, aliases);
    let raw = best_raw.trim();
    if raw.is_empty() || raw == tag || base.contains(raw) {
        return base;
    }

    match base.strip_suffix(')') {
        Some(open) if base.starts_with('(') => format!("{open} OR {raw})"),
        _ => format!("({base} OR {raw})"),
    }
}

/// Two search queries are redundant when combining them adds nothing: they are
/// equal, or either one already contains the other (or the other's tag).
pub fn is_redundant_pair(tag1: &str, query1: &str, tag2: &str, query2: &str) -> bool {
    query1 == query2
        || query1.contains(query2)
        || query2.contains(query1)
        || query2.contains(tag1)
        || query1.contains(tag2)
}
