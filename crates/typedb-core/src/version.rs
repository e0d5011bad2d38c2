//! Language version tags and version gates.
//!
//! Records in a database may carry a `version` gate such as `">=3.0"` or
//! `">=2.6;<=2.7"`. [`LanguageVersion::applies`] evaluates a gate against the
//! version the database was built for.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Error parsing a `major.minor` version string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid language version '{0}': expected MAJOR.MINOR")]
pub struct VersionParseError(pub String);

/// A `major.minor` language version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LanguageVersion {
    pub major: u8,
    pub minor: u8,
}

impl LanguageVersion {
    pub const V2_7: Self = Self::new(2, 7);
    pub const V3_8: Self = Self::new(3, 8);

    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Whether this is a 3.x version.
    pub fn is_3x(self) -> bool {
        self.major >= 3
    }

    /// Evaluate a version gate.
    ///
    /// A gate is one or more checks joined by `;`, each one of `>=X.Y`,
    /// `<=X.Y` or `==X.Y`. Every check must pass. A check with an unknown
    /// operator or an unparseable version fails.
    pub fn applies(self, gate: &str) -> bool {
        gate.split(';').all(|check| self.check_applies(check.trim()))
    }

    fn check_applies(self, check: &str) -> bool {
        let (Some(op), Some(rest)) = (check.get(..2), check.get(2..)) else {
            return false;
        };
        let Ok(other) = rest.parse::<LanguageVersion>() else {
            return false;
        };
        match op {
            ">=" => self >= other,
            "<=" => self <= other,
            "==" => self == other,
            _ => false,
        }
    }
}

impl Default for LanguageVersion {
    fn default() -> Self {
        Self::V3_8
    }
}

impl FromStr for LanguageVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || VersionParseError(s.to_string());
        let (major, minor) = s.trim().split_once('.').ok_or_else(err)?;
        Ok(Self {
            major: major.parse().map_err(|_| err())?,
            minor: minor.parse().map_err(|_| err())?,
        })
    }
}

impl fmt::Display for LanguageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
