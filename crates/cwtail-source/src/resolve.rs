use cwtail_types::SourceSpec;

/// Outcome of resolving a user-supplied identifier
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Exactly one source, use it directly
    Resolved(SourceSpec),
    /// Several candidates, the caller must pick one
    Ambiguous(Vec<String>),
    /// Nothing matched
    NotFound,
}

/// Resolve an identifier against the available source names.
///
/// With `exact` the identifier is taken as the source name without searching.
/// Otherwise every name containing the identifier is a candidate; a single
/// candidate, or a candidate equal to the identifier, is selected directly.
pub fn resolve(identifier: &str, exact: bool, available: &[String]) -> Resolution {
    if exact {
        return Resolution::Resolved(SourceSpec::named(identifier));
    }

    let mut candidates: Vec<&String> = available
        .iter()
        .filter(|name| name.contains(identifier))
        .collect();
    candidates.sort();
    candidates.dedup();

    match candidates.as_slice() {
        [] => Resolution::NotFound,
        [only] => Resolution::Resolved(SourceSpec::named(only.as_str())),
        many => match many.iter().find(|name| name.as_str() == identifier) {
            Some(exact_match) => Resolution::Resolved(SourceSpec::named(exact_match.as_str())),
            None => Resolution::Ambiguous(many.iter().map(|s| s.to_string()).collect()),
        },
    }
}

/// Pick a candidate by the index typed at the selection prompt
pub fn pick_candidate(candidates: &[String], choice: &str) -> Option<SourceSpec> {
    let index: usize = choice.trim().parse().ok()?;
    candidates.get(index).map(|name| SourceSpec::named(name.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exact_skips_search() {
        let resolution = resolve("/aws/lambda/api", true, &[]);
        assert_eq!(resolution, Resolution::Resolved(SourceSpec::named("/aws/lambda/api")));
    }

    #[test]
    fn test_single_candidate_auto_selected() {
        let available = names(&["/aws/lambda/api", "/aws/lambda/worker"]);
        assert_eq!(
            resolve("work", false, &available),
            Resolution::Resolved(SourceSpec::named("/aws/lambda/worker"))
        );
    }

    #[test]
    fn test_ambiguous_lists_sorted_candidates() {
        let available = names(&["/aws/lambda/b-api", "/aws/lambda/a-api", "/ecs/web"]);
        assert_eq!(
            resolve("api", false, &available),
            Resolution::Ambiguous(names(&["/aws/lambda/a-api", "/aws/lambda/b-api"]))
        );
    }

    #[test]
    fn test_exact_name_among_candidates_wins() {
        let available = names(&["/app", "/app-staging"]);
        assert_eq!(
            resolve("/app", false, &available),
            Resolution::Resolved(SourceSpec::named("/app"))
        );
    }

    #[test]
    fn test_not_found() {
        assert_eq!(resolve("nope", false, &names(&["/a"])), Resolution::NotFound);
    }

    #[test]
    fn test_pick_candidate() {
        let candidates = names(&["/a", "/b"]);
        assert_eq!(pick_candidate(&candidates, " 1\n"), Some(SourceSpec::named("/b")));
        assert_eq!(pick_candidate(&candidates, "2"), None);
        assert_eq!(pick_candidate(&candidates, "x"), None);
    }
}
