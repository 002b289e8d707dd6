//! Firmware version extraction and version-keyed lookups
//!
//! Versions are compared as `(number, letter)` pairs: `0.8c` is newer than
//! `0.8a` and older than `0.9`.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Version parsed from a firmware announcement
#[derive(Debug, Clone, PartialEq)]
pub struct FirmwareVersion {
    /// Numeric part, e.g. `1.1`
    pub number: f64,
    /// Trailing build letter, e.g. `h`
    pub letter: Option<char>,
    /// Line the version was parsed from
    pub raw: String,
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+\.\d+)([a-zA-Z])?").expect("invalid regex pattern"))
}

impl FirmwareVersion {
    pub fn new(number: f64, letter: Option<char>) -> Self {
        let raw = match letter {
            Some(l) => format!("{}{}", number, l),
            None => number.to_string(),
        };
        Self {
            number,
            letter,
            raw,
        }
    }

    /// Extract the first `major.minor[letter]` token from free text
    ///
    /// ```
    /// use gcodestream_communication::firmware::FirmwareVersion;
    ///
    /// let v = FirmwareVersion::parse("Grbl 1.1h ['$' for help]").unwrap();
    /// assert_eq!(v.number, 1.1);
    /// assert_eq!(v.letter, Some('h'));
    /// ```
    pub fn parse(text: &str) -> Option<Self> {
        let caps = version_pattern().captures(text)?;
        let number = caps.get(1)?.as_str().parse::<f64>().ok()?;
        let letter = caps
            .get(2)
            .and_then(|m| m.as_str().chars().next())
            .map(|c| c.to_ascii_lowercase());
        Some(Self {
            number,
            letter,
            raw: text.trim().to_string(),
        })
    }

    /// Whether this version satisfies `requirement`
    pub fn satisfies(&self, requirement: &VersionRequirement) -> bool {
        const EPSILON: f64 = 1e-9;
        if self.number > requirement.number + EPSILON {
            return true;
        }
        if (self.number - requirement.number).abs() > EPSILON {
            return false;
        }
        match requirement.letter {
            None => true,
            Some(min) => self.letter.is_some_and(|l| l >= min),
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.letter {
            Some(l) => write!(f, "{}{}", self.number, l),
            None => write!(f, "{}", self.number),
        }
    }
}

/// Minimum version for a table entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VersionRequirement {
    pub number: f64,
    pub letter: Option<char>,
}

impl VersionRequirement {
    pub const fn at_least(number: f64) -> Self {
        Self {
            number,
            letter: None,
        }
    }

    pub const fn at_least_letter(number: f64, letter: char) -> Self {
        Self {
            number,
            letter: Some(letter),
        }
    }
}

/// Pick the first entry whose requirement the version satisfies
///
/// Tables are ordered newest first. A missing version or no match means
/// the feature is unsupported.
pub fn resolve<T: Clone>(
    table: &[(VersionRequirement, T)],
    version: Option<&FirmwareVersion>,
) -> Option<T> {
    let version = version?;
    table
        .iter()
        .find(|(requirement, _)| version.satisfies(requirement))
        .map(|(_, value)| value.clone())
}
