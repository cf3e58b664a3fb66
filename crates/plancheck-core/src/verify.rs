use crate::{HarnessError, DEFAULT_PLAN_LENGTH_MARKER, DEFAULT_VERIFIED_MARKER};

/// Substrings the planner prints around a checked plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    pub verified: String,
    pub plan_length: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            verified: DEFAULT_VERIFIED_MARKER.to_string(),
            plan_length: DEFAULT_PLAN_LENGTH_MARKER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub verified: bool,
    /// 0 when the planner did not report a length.
    pub plan_size: u64,
}

impl VerificationOutcome {
    pub fn require_verified(self) -> Result<Self, HarnessError> {
        if self.verified {
            Ok(self)
        } else {
            Err(HarnessError::NotVerified)
        }
    }
}

pub fn verify_output(stdout: &str, markers: &Markers) -> Result<VerificationOutcome, HarnessError> {
    let verified = stdout.lines().any(|line| line.contains(&markers.verified));
    // An unverified run fails as such; its length line is only informative.
    let plan_size = match stdout
        .lines()
        .find(|line| line.contains(&markers.plan_length))
    {
        Some(line) if verified => parse_plan_length(line)?,
        Some(line) => parse_plan_length(line).unwrap_or(0),
        None => 0,
    };
    Ok(VerificationOutcome {
        verified,
        plan_size,
    })
}

// Last token looks like `42)` or `42).`: drop sentence punctuation, then the
// closing terminator.
fn parse_plan_length(line: &str) -> Result<u64, HarnessError> {
    let token = line.trim_end().rsplit(' ').next().unwrap_or_default();
    let unparsable = || HarnessError::PlanSizeUnparsable {
        token: token.to_string(),
    };
    let without_period = token.strip_suffix('.').unwrap_or(token);
    let mut chars = without_period.chars();
    chars.next_back().ok_or_else(unparsable)?;
    chars.as_str().parse::<u64>().map_err(|_| unparsable())
}
