/// Extension of every completed file.
pub const COMPLETED_EXT: &str = ".txt";

/// The disambiguator is zero-padded so that lexicographic order of names
/// equals production order, even for many rotations within one second.
pub const DISAMBIGUATOR_WIDTH: usize = 6;

/// Parsed form of a completed file name: `<prefix><unix_seconds>-<n>.txt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CompletedName {
    pub timestamp: u64,
    pub disambiguator: u32,
}

/// Build a completed file name.
///
/// ```
/// use spool_api::naming::completed_file_name;
/// assert_eq!(completed_file_name("tw-", 1700000000, 3), "tw-1700000000-000003.txt");
/// ```
pub fn completed_file_name(prefix: &str, timestamp: u64, disambiguator: u32) -> String {
    format!(
        "{prefix}{timestamp}-{disambiguator:0width$}{COMPLETED_EXT}",
        width = DISAMBIGUATOR_WIDTH
    )
}

/// Parse a name produced by [`completed_file_name`] with the same prefix.
///
/// Returns `None` for anything else, including the working file.
pub fn parse_completed_name(prefix: &str, name: &str) -> Option<CompletedName> {
    let stem = name.strip_prefix(prefix)?.strip_suffix(COMPLETED_EXT)?;
    let (ts, n) = stem.split_once('-')?;
    if !is_digits(ts) || !is_digits(n) {
        return None;
    }
    Some(CompletedName {
        timestamp: ts.parse().ok()?,
        disambiguator: n.parse().ok()?,
    })
}

/// Does `name` follow the completed file convention for `prefix`?
pub fn is_completed_name(prefix: &str, name: &str) -> bool {
    parse_completed_name(prefix, name).is_some()
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_parses_back() {
        let name = completed_file_name("stream-", 1_700_000_123, 42);
        assert_eq!(name, "stream-1700000123-000042.txt");
        assert_eq!(
            parse_completed_name("stream-", &name),
            Some(CompletedName { timestamp: 1_700_000_123, disambiguator: 42 })
        );
    }

    #[test]
    fn foreign_names_are_rejected() {
        for name in [
            "working.tmp",
            "stream-.txt",
            "stream-1700000000.txt",
            "stream-1700000000-.txt",
            "stream-17x0-000001.txt",
            "other-1700000000-000001.txt",
            "stream-1700000000-000001.txt.part",
        ] {
            assert!(!is_completed_name("stream-", name), "{name} accepted");
        }
    }

    #[test]
    fn lexicographic_order_follows_production_order() {
        let mut names = vec![
            completed_file_name("p", 1_700_000_001, 0),
            completed_file_name("p", 1_700_000_000, 10),
            completed_file_name("p", 1_700_000_000, 2),
            completed_file_name("p", 1_700_000_000, 0),
        ];
        names.sort();
        let parsed: Vec<_> = names
            .iter()
            .map(|n| parse_completed_name("p", n).unwrap())
            .collect();
        let mut expected = parsed.clone();
        expected.sort();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn empty_prefix_is_allowed() {
        assert!(is_completed_name("", "1700000000-000000.txt"));
    }
}
