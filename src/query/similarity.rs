// String similarity used by fuzzy search and find_similar

/// Levenshtein edit distance over Unicode scalar values.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Single-row dynamic programming
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            let cost = if ca == cb { 0 } else { 1 };
            row[j + 1] = (above + 1).min(row[j] + 1).min(diagonal + cost);
            diagonal = above;
        }
    }
    row[b.len()]
}

/// `1 - distance / max(len(a), len(b))`; two empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

/// Lower-case and drop `_`/`-` so `parse_file` and `parseFile` compare equal
pub fn normalize_identifier(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_levenshtein_known_values() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("flaw", "lawn"), 2);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_similarity() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", "abc"), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert!((similarity("parsefile", "parse_file") - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_identifier() {
        assert_eq!(normalize_identifier("parse_file"), "parsefile");
        assert_eq!(normalize_identifier("parseFile"), "parsefile");
        assert_eq!(normalize_identifier("PARSE-FILE"), "parsefile");
    }

    proptest! {
        #[test]
        fn prop_similarity_is_symmetric(a in "\\PC{0,16}", b in "\\PC{0,16}") {
            prop_assert_eq!(similarity(&a, &b), similarity(&b, &a));
        }

        #[test]
        fn prop_similarity_is_bounded(a in "[a-zA-Z_]{0,20}", b in "[a-zA-Z_]{0,20}") {
            let s = similarity(&a, &b);
            prop_assert!((0.0..=1.0).contains(&s));
        }

        #[test]
        fn prop_identity_is_one(a in "\\PC{0,24}") {
            prop_assert_eq!(similarity(&a, &a), 1.0);
        }
    }
}
