//! Enumeration of glob-free paths
//!
//! A pattern that contains no wildcards, only brace alternatives, names a
//! finite set of repositories. Adapters use this to skip catalog traversal.

const WILDCARDS: [char; 5] = ['*', '?', '[', ']', '\\'];

/// Expands a path with at most one `{..}` group per component.
/// Returns `None` when the path contains wildcards.
pub fn is_specific_path(path: &str) -> Option<Vec<String>> {
    if path.is_empty() {
        return None;
    }
    let mut paths = vec![String::new()];
    for component in path.split('/') {
        let alternatives = is_specific_path_component(component)?;
        let mut next = Vec::with_capacity(paths.len() * alternatives.len());
        for prefix in &paths {
            for alternative in &alternatives {
                if prefix.is_empty() {
                    next.push(alternative.clone());
                } else {
                    next.push(format!("{}/{}", prefix, alternative));
                }
            }
        }
        paths = next;
    }
    Some(paths)
}

/// Same as [`is_specific_path`] for a single component; `/` is not allowed
pub fn is_specific_path_component(component: &str) -> Option<Vec<String>> {
    if component.is_empty() || component.contains('/') || component.contains(WILDCARDS) {
        return None;
    }
    let open = component.matches('{').count();
    let close = component.matches('}').count();
    if open == 0 && close == 0 {
        return Some(vec![component.to_string()]);
    }
    if open != 1 || close != 1 {
        return None;
    }
    let start = component.find('{')?;
    let end = component.find('}')?;
    if start > end {
        return None;
    }
    let prefix = &component[..start];
    let suffix = &component[end + 1..];
    let alternatives = component[start + 1..end]
        .split(',')
        .map(|alt| format!("{}{}{}", prefix, alt, suffix))
        .filter(|alt| !alt.is_empty())
        .collect::<Vec<_>>();
    if alternatives.is_empty() {
        None
    } else {
        Some(alternatives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specific_path() {
        assert_eq!(
            is_specific_path("library/{a,b}"),
            Some(vec!["library/a".to_string(), "library/b".to_string()])
        );
        assert_eq!(is_specific_path("lib/**"), None);
        assert_eq!(is_specific_path("a/b/c"), Some(vec!["a/b/c".to_string()]));
        assert_eq!(
            is_specific_path("{x,y}/{1,2}"),
            Some(vec!["x/1".to_string(), "x/2".to_string(), "y/1".to_string(), "y/2".to_string()])
        );
        assert_eq!(is_specific_path(""), None);
    }

    #[test]
    fn test_specific_path_component() {
        assert_eq!(is_specific_path_component("library"), Some(vec!["library".to_string()]));
        assert_eq!(
            is_specific_path_component("app-{dev,prod}"),
            Some(vec!["app-dev".to_string(), "app-prod".to_string()])
        );
        assert_eq!(is_specific_path_component("a/b"), None);
        assert_eq!(is_specific_path_component("lib*"), None);
        assert_eq!(is_specific_path_component("{a,b}{c,d}"), None);
        assert_eq!(is_specific_path_component("}a{"), None);
    }
}
