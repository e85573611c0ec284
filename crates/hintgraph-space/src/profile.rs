//! Student profiles, test verdicts and task ids.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Self-reported programming experience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Experience {
    LessThanHalfYear,
    FromHalfToOneYear,
    FromOneToTwoYears,
    FromTwoToFourYears,
    FromFourToSixYears,
    MoreThanSixYears,
}

impl Experience {
    pub const ALL: [Experience; 6] = [
        Experience::LessThanHalfYear,
        Experience::FromHalfToOneYear,
        Experience::FromOneToTwoYears,
        Experience::FromTwoToFourYears,
        Experience::FromFourToSixYears,
        Experience::MoreThanSixYears,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Experience::LessThanHalfYear => "less_than_half_year",
            Experience::FromHalfToOneYear => "from_half_to_one_year",
            Experience::FromOneToTwoYears => "from_one_to_two_years",
            Experience::FromTwoToFourYears => "from_two_to_four_years",
            Experience::FromFourToSixYears => "from_four_to_six_years",
            Experience::MoreThanSixYears => "more_than_six_years",
        }
    }

    /// Position on the experience scale (0 = least experienced).
    pub fn rank(self) -> usize {
        self as usize
    }

    pub fn from_rank(rank: usize) -> Option<Self> {
        Self::ALL.get(rank).copied()
    }
}

impl fmt::Display for Experience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Experience {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("unknown experience level `{s}`"))
    }
}

/// Who produced a trajectory. Every field may be unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StudentProfile {
    #[serde(default)]
    pub age: Option<u8>,
    #[serde(default)]
    pub experience: Option<Experience>,
    /// Data source / origin of the session (school, course, platform).
    #[serde(default)]
    pub source: Option<String>,
}

impl StudentProfile {
    pub fn new(age: Option<u8>, experience: Option<Experience>, source: Option<&str>) -> Self {
        Self {
            age,
            experience,
            source: source.map(str::to_string),
        }
    }
}

/// Outcome of an external test run on a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed { passed_tests: u32, total_tests: u32 },
    NotCompiled,
}

impl Verdict {
    pub fn is_passed(self) -> bool {
        matches!(self, Verdict::Passed)
    }

    /// Fraction of passed tests.
    pub fn rate(self) -> f64 {
        match self {
            Verdict::Passed => 1.0,
            Verdict::Failed { total_tests: 0, .. } | Verdict::NotCompiled => 0.0,
            Verdict::Failed {
                passed_tests,
                total_tests,
            } => f64::from(passed_tests.min(total_tests)) / f64::from(total_tests),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Passed => f.write_str("passed"),
            Verdict::Failed {
                passed_tests,
                total_tests,
            } => write!(f, "failed ({passed_tests}/{total_tests})"),
            Verdict::NotCompiled => f.write_str("not compiled"),
        }
    }
}

/// Task identifier (one solution graph per task).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Median of a non-empty sample; for even sizes the mean of the middle pair.
pub(crate) fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}
