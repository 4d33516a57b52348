//! Spider entry-name candidates
//!
//! Catalogs name spiders loosely (`csp_Douban`, `Douban`, ...). The type a
//! module actually exports is found by trying a fixed, ordered list of
//! conventional paths. `{}` in a template stands for the bare spider name.

/// Candidate templates for one naming style
#[derive(Debug, Clone, Copy)]
pub struct CandidateTable {
    /// Tried first and alone
    pub primary: &'static str,
    /// Legacy paths, tried in declared order after the primary one
    pub legacy: &'static [&'static str],
}

/// Names carrying the reserved entry prefix
pub const PREFIXED: CandidateTable = CandidateTable {
    primary: "com.github.catvod.spider.{}",
    legacy: &[
        "com.github.catvod.{}",
        "{}",
        "com.github.catvod.spider.impl.{}",
        "com.catvod.spider.{}",
    ],
};

/// Bare names, only accepted for sources that bring their own artifact
pub const UNPREFIXED: CandidateTable = CandidateTable {
    primary: "{}",
    legacy: &[
        "com.github.catvod.spider.{}",
        "com.github.catvod.{}",
        "com.github.catvod.spider.impl.{}",
        "com.catvod.spider.{}",
    ],
};

impl CandidateTable {
    /// Expand the table for `name`, primary first, without duplicates
    pub fn expand(&self, name: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.legacy.len() + 1);
        for template in std::iter::once(&self.primary).chain(self.legacy.iter()) {
            let candidate = template.replace("{}", name);
            if !out.contains(&candidate) {
                out.push(candidate);
            }
        }
        out
    }
}

/// Ordered type-name candidates for an entry name
///
/// The prefix is stripped before substitution when present.
pub fn entry_candidates(entry: &str, prefix: &str) -> Vec<String> {
    let entry = entry.trim();
    match entry.strip_prefix(prefix).filter(|_| !prefix.is_empty()) {
        Some(bare) => PREFIXED.expand(bare),
        None => UNPREFIXED.expand(entry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_candidates() {
        let candidates = entry_candidates("csp_Douban", "csp_");
        assert_eq!(
            candidates,
            vec![
                "com.github.catvod.spider.Douban",
                "com.github.catvod.Douban",
                "Douban",
                "com.github.catvod.spider.impl.Douban",
                "com.catvod.spider.Douban",
            ]
        );
    }

    #[test]
    fn test_unprefixed_candidates() {
        let candidates = entry_candidates("Bili", "csp_");
        assert_eq!(candidates[0], "Bili");
        assert_eq!(candidates[1], "com.github.catvod.spider.Bili");
        assert_eq!(candidates.len(), 5);
    }

    #[test]
    fn test_empty_prefix_is_never_stripped() {
        assert_eq!(entry_candidates("Foo", "")[0], "Foo");
    }
}
