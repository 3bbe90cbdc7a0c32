pub fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

/// Expand the `all` keyword into `known`, keeping the remaining tokens in order
/// and dropping duplicates.
pub fn expand_all(tokens: Vec<String>, known: &[String]) -> Vec<String> {
    let mut expanded: Vec<String> = Vec::new();
    for token in tokens {
        if token.eq_ignore_ascii_case("all") {
            for name in known {
                if !expanded.contains(name) {
                    expanded.push(name.clone());
                }
            }
        } else if !expanded.contains(&token) {
            expanded.push(token);
        }
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_csv_trims_and_filters() {
        let parts = split_csv(" alpha, ,beta,  gamma ");
        assert_eq!(parts, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn expand_all_keeps_order_and_dedups() {
        let known = vec!["insider".to_string(), "phishing".to_string()];
        let expanded = expand_all(split_csv("phishing,all,phishing"), &known);
        assert_eq!(expanded, vec!["phishing", "insider"]);
    }
}
