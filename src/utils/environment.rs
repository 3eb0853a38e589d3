use regex::Regex;

/// Checks a runtime environment name against a lock pattern. Patterns are
/// literal names where `*` matches any run of characters.
pub fn environment_matches(pattern: &str, environment: &str) -> bool {
    if pattern == environment {
        return true;
    }
    if !pattern.contains('*') {
        return false;
    }

    let expression = format!(
        "^{}$",
        pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*")
    );
    match Regex::new(&expression) {
        Ok(re) => re.is_match(environment),
        Err(e) => {
            tracing::warn!("Ignoring unusable environment lock '{}': {}", pattern, e);
            false
        }
    }
}
