//! Heuristic classification of executor failure text.
//!
//! Executor CLIs do not report quota or auth problems in any structured way;
//! all we get is error text. This is a best-effort classifier: false
//! negatives fall through to `Generic` and only cost a less precise cooldown.
//! Keep every pattern here so the table can evolve against real samples
//! without touching orchestration code.

/// What a failed invocation's output looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Usage/rate limits exhausted; the account needs a long rest.
    Quota,
    /// Credentials rejected; retrying the same account is pointless.
    Auth,
    /// Anything else: crashes, tool failures, malformed invocations.
    Generic,
}

const QUOTA_PATTERNS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "rate-limit",
    "too many requests",
    "429",
    "quota",
    "usage limit",
    "usage cap",
    "out of credits",
    "credit balance",
    "overloaded",
    "capacity constraints",
];

const AUTH_PATTERNS: &[&str] = &[
    "401",
    "403",
    "unauthorized",
    "forbidden",
    "authentication failed",
    "authentication_error",
    "invalid api key",
    "api key not found",
    "token expired",
    "please log in",
    "not logged in",
];

/// Classify failure text. Quota patterns win over auth patterns because some
/// providers phrase quota exhaustion as a 4xx denial.
pub fn classify_error(text: &str) -> ErrorClass {
    let lower = text.to_lowercase();
    if QUOTA_PATTERNS.iter().any(|p| lower.contains(p)) {
        return ErrorClass::Quota;
    }
    if AUTH_PATTERNS.iter().any(|p| lower.contains(p)) {
        return ErrorClass::Auth;
    }
    ErrorClass::Generic
}

#[cfg(test)]
mod tests {
    use super::*;

    // Fixture table of real-looking executor output, one line per sample.
    const FIXTURES: &[(&str, ErrorClass)] = &[
        (
            "API Error: 429 {\"type\":\"error\",\"error\":{\"type\":\"rate_limit_error\"}}",
            ErrorClass::Quota,
        ),
        ("You've hit your usage limit. Resets at 3am.", ErrorClass::Quota),
        ("Claude is currently overloaded, try again later", ErrorClass::Quota),
        ("Your credit balance is too low to run this request", ErrorClass::Quota),
        (
            "API Error: 401 {\"error\":{\"type\":\"authentication_error\"}}",
            ErrorClass::Auth,
        ),
        ("Error: Invalid API key. Please run /login", ErrorClass::Auth),
        ("403 Forbidden: organization disabled", ErrorClass::Auth),
        ("Not logged in. Run `claude login` first.", ErrorClass::Auth),
        ("error: the sandbox denied the operation", ErrorClass::Generic),
        ("thread 'main' panicked at src/main.rs:1:1", ErrorClass::Generic),
        ("command not found: rg", ErrorClass::Generic),
        ("", ErrorClass::Generic),
    ];

    #[test]
    fn fixture_table_classifies() {
        for (sample, expected) in FIXTURES {
            assert_eq!(
                classify_error(sample),
                *expected,
                "misclassified sample: {sample:?}"
            );
        }
    }

    #[test]
    fn quota_wins_over_auth_when_both_match() {
        // Some providers phrase limit exhaustion as a denial.
        let text = "403: usage limit reached for this organization";
        assert_eq!(classify_error(text), ErrorClass::Quota);
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(classify_error("RATE LIMIT EXCEEDED"), ErrorClass::Quota);
        assert_eq!(classify_error("UNAUTHORIZED"), ErrorClass::Auth);
    }
}
