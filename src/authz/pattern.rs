//! Resource pattern validation and wildcard matching.

use crate::authz::errors::CompileError;
use crate::authz::types::ResourcePattern;

const MAX_PATTERN_LENGTH: usize = 2048;

/// Index of the account segment in `arn:partition:service:region:account:resource`.
const ACCOUNT_SEGMENT: usize = 4;

impl ResourcePattern {
    /// Validate a pattern. Accepts `*` or an ARN with six colon-separated
    /// segments (the resource segment may itself contain colons).
    pub fn parse(raw: &str) -> Result<Self, CompileError> {
        if raw.is_empty() {
            return Err(CompileError::malformed_pattern(raw, "empty pattern"));
        }
        if raw.len() > MAX_PATTERN_LENGTH {
            return Err(CompileError::malformed_pattern(
                raw,
                format!("longer than {MAX_PATTERN_LENGTH} characters"),
            ));
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(CompileError::malformed_pattern(
                raw,
                "contains whitespace or control characters",
            ));
        }
        if raw.contains("${") {
            return Err(CompileError::malformed_pattern(raw, "unresolved placeholder"));
        }
        if raw == "*" {
            return Ok(Self(raw.to_string()));
        }

        let segments: Vec<&str> = raw.splitn(6, ':').collect();
        if segments.len() < 6 {
            return Err(CompileError::malformed_pattern(
                raw,
                "expected `*` or arn:<partition>:<service>:<region>:<account>:<resource>",
            ));
        }
        if segments[0] != "arn" {
            return Err(CompileError::malformed_pattern(raw, "must start with `arn:`"));
        }
        if segments[1].is_empty() || segments[2].is_empty() {
            return Err(CompileError::malformed_pattern(
                raw,
                "partition and service segments must not be empty",
            ));
        }
        if segments[5].is_empty() {
            return Err(CompileError::malformed_pattern(raw, "empty resource segment"));
        }
        Ok(Self(raw.to_string()))
    }

    /// True if `candidate` matches this pattern in full.
    pub fn matches(&self, candidate: &str) -> bool {
        wildcard_match(&self.0, candidate)
    }

    /// The account segment, for ARN-shaped patterns.
    pub fn account_segment(&self) -> Option<&str> {
        if self.0 == "*" {
            return None;
        }
        self.0.splitn(6, ':').nth(ACCOUNT_SEGMENT)
    }

    /// `*`, or a wildcard in the account segment.
    pub fn is_account_wildcard(&self) -> bool {
        self.0 == "*" || self.account_segment().is_some_and(|a| a.contains('*'))
    }
}

/// True if any pattern in the list matches `candidate`.
pub fn matches_any(patterns: &[ResourcePattern], candidate: &str) -> bool {
    patterns.iter().any(|p| p.matches(candidate))
}

/// Anchored, case-sensitive glob match where `*` matches any run of
/// characters (including `:` and `/`).
///
/// Two-pointer scan: on mismatch, resume just after the most recent `*`
/// and let it absorb one more candidate character. Runs in
/// O(pattern + candidate) on typical inputs with no recursion.
pub fn wildcard_match(pattern: &str, candidate: &str) -> bool {
    let p = pattern.as_bytes();
    let s = candidate.as_bytes();

    let mut p_idx = 0;
    let mut s_idx = 0;
    let mut star_idx: Option<usize> = None;
    let mut match_idx = 0;

    while s_idx < s.len() {
        match p.get(p_idx) {
            Some(b'*') => {
                star_idx = Some(p_idx);
                match_idx = s_idx;
                p_idx += 1;
            }
            Some(&c) if c == s[s_idx] => {
                p_idx += 1;
                s_idx += 1;
            }
            _ => match star_idx {
                Some(star) => {
                    p_idx = star + 1;
                    match_idx += 1;
                    s_idx = match_idx;
                }
                None => return false,
            },
        }
    }

    while p.get(p_idx) == Some(&b'*') {
        p_idx += 1;
    }
    p_idx == p.len()
}
