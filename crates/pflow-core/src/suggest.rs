//! Fuzzy-match helpers behind every "Did you mean ...?" the engine emits.

/// Length of the longest common substring of two strings, case-insensitive.
pub fn longest_common_substring_len(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut previous = vec![0usize; b.len() + 1];
    let mut best = 0;
    for &ca in &a {
        let mut current = vec![0usize; b.len() + 1];
        for (j, &cb) in b.iter().enumerate() {
            if ca == cb {
                current[j + 1] = previous[j] + 1;
                best = best.max(current[j + 1]);
            }
        }
        previous = current;
    }
    best
}

/// Pick the candidate closest to `target`, if any candidate is close enough
/// to be a plausible typo.
pub fn closest_match<'a, I>(target: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(&str, usize)> = None;
    for candidate in candidates {
        let score = longest_common_substring_len(target, candidate);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }
    let (candidate, score) = best?;
    let threshold = (target.chars().count() / 2).max(3);
    (score >= threshold).then_some(candidate)
}

/// Candidates sharing a case-insensitive substring with `target`, capped.
pub fn similar_by_substring<'a, I>(target: &str, candidates: I, cap: usize) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let needle = target.to_lowercase();
    candidates
        .into_iter()
        .filter(|c| {
            let hay = c.to_lowercase();
            hay.contains(&needle) || needle.contains(&hay)
        })
        .take(cap)
        .collect()
}
