use std::collections::HashSet;

/// Case-insensitive subreddit allow-list.
///
/// No list (or an empty one) admits everything, and a record without a subreddit (or with a
/// blank one) is always admitted: the filter only excludes on data it actually has.
#[derive(Debug, Clone, Default)]
pub struct SubredditFilter {
    allow: Option<HashSet<String>>,
}

impl SubredditFilter {
    /// Builds a filter from user input, normalizing `r/Name` and `Name` to `name`.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allow: HashSet<String> = names
            .into_iter()
            .map(|n| normalize(n.as_ref()))
            .filter(|n| !n.is_empty())
            .collect();

        SubredditFilter {
            allow: (!allow.is_empty()).then_some(allow),
        }
    }

    #[must_use]
    pub fn allow_all() -> Self {
        SubredditFilter::default()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.allow.is_some()
    }

    /// The normalized allow-list, sorted, for reporting.
    #[must_use]
    pub fn names(&self) -> Option<Vec<String>> {
        self.allow.as_ref().map(|set| {
            let mut names: Vec<String> = set.iter().cloned().collect();
            names.sort();
            names
        })
    }

    #[must_use]
    pub fn admits(&self, subreddit: Option<&str>) -> bool {
        match (&self.allow, subreddit.map(str::trim)) {
            (Some(allow), Some(name)) if !name.is_empty() => {
                allow.contains(&name.to_lowercase())
            }
            _ => true,
        }
    }
}

fn normalize(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    match lower.strip_prefix("r/") {
        Some(rest) => rest.to_string(),
        None => lower,
    }
}
