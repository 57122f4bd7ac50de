use std::collections::BTreeSet;

/// Case-fold and split on whitespace. Punctuation stays attached to its token.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Indel-normalised similarity in `0.0..=100.0`.
///
/// The distance counts the insertions and deletions needed to turn one
/// string into the other (`len(a) + len(b) - 2 * lcs(a, b)`), normalised by
/// the combined length. Two empty strings score 100.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let lensum = a.len() + b.len();
    if lensum == 0 {
        return 100.0;
    }
    let distance = lensum - 2 * lcs_len(&a, &b);
    100.0 * (1.0 - distance as f64 / lensum as f64)
}

/// Order- and repetition-insensitive fuzzy match of two strings, `0.0..=100.0`.
///
/// Both inputs are case-folded and reduced to token sets. With `sect` the
/// sorted intersection and `ab` / `ba` the sorted set differences, the score
/// is the best [`ratio`] among `sect` vs `sect + ab`, `sect` vs `sect + ba`
/// and `sect + ab` vs `sect + ba`. Either side having no tokens scores 0.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<String> = tokenize(a).into_iter().collect();
    let tokens_b: BTreeSet<String> = tokenize(b).into_iter().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let sect = join_tokens(tokens_a.intersection(&tokens_b));
    let diff_ab = join_tokens(tokens_a.difference(&tokens_b));
    let diff_ba = join_tokens(tokens_b.difference(&tokens_a));

    let sect_ab = join_parts(&sect, &diff_ab);
    let sect_ba = join_parts(&sect, &diff_ba);

    ratio(&sect, &sect_ab)
        .max(ratio(&sect, &sect_ba))
        .max(ratio(&sect_ab, &sect_ba))
}

fn join_tokens<'a>(tokens: impl Iterator<Item = &'a String>) -> String {
    tokens.map(String::as_str).collect::<Vec<_>>().join(" ")
}

fn join_parts(head: &str, tail: &str) -> String {
    match (head.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (_, true) => head.to_string(),
        _ => format!("{head} {tail}"),
    }
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn ratio_matches_indel_normalisation() {
        assert_close(ratio("", ""), 100.0);
        assert_close(ratio("abc", ""), 0.0);
        assert_close(ratio("abc", "abc"), 100.0);
        // lcs("kitten", "sitting") = 4 -> distance 5 over 13 chars
        assert_close(ratio("kitten", "sitting"), 100.0 * (1.0 - 5.0 / 13.0));
    }

    #[test]
    fn token_set_ratio_ignores_case_order_and_repetition() {
        assert_close(token_set_ratio("John Doe", "doe JOHN"), 100.0);
        assert_close(token_set_ratio("John John Doe", "john doe"), 100.0);
    }

    #[test]
    fn token_set_ratio_scores_subset_as_full_match() {
        assert_close(
            token_set_ratio("John Doe has completed the course", "John Doe"),
            100.0,
        );
    }

    #[test]
    fn token_set_ratio_with_blank_side_is_zero() {
        assert_close(token_set_ratio("", "John Doe"), 0.0);
        assert_close(token_set_ratio("John Doe", "   "), 0.0);
    }

    #[test]
    fn token_set_ratio_partial_overlap_uses_best_comparison() {
        // sect = "maha", ab = "lakshmi n", ba = "devi"
        // sect vs "maha lakshmi n": lcs 4, lensum 18 -> distance 10
        // sect vs "maha devi": lcs 4, lensum 13 -> distance 5
        let score = token_set_ratio("Maha Lakshmi N", "Maha Devi");
        assert_close(score, 100.0 * (1.0 - 5.0 / 13.0));
    }

    #[test]
    fn token_set_ratio_disjoint_sets_compare_remainders() {
        let score = token_set_ratio("cse", "computer science and engineering");
        assert_close(score, ratio("cse", "and computer engineering science"));
        assert!(score < 80.0);
    }

    #[test]
    fn tokenize_lowercases_and_keeps_punctuation() {
        assert_eq!(tokenize("  Doe,  JOHN "), vec!["doe,", "john"]);
    }
}
