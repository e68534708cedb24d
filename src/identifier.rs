use std::fmt;

use crate::error::EkwError;

const DELIMITER: char = '/';

/// A land-registry entry number such as `WA2M/00436586/7`.
///
/// Only the shape is checked here. Whether the entry exists, and whether the
/// check digit matches, is for the registry site to decide. Parts are taken
/// verbatim; callers trim their input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordIdentifier {
    court_code: String,
    number: String,
    check_digit: String,
}

impl RecordIdentifier {
    pub fn parse(raw: &str) -> Result<Self, EkwError> {
        let parts: Vec<&str> = raw.split(DELIMITER).collect();
        match parts.as_slice() {
            [code, number, digit] if !code.is_empty() && !number.is_empty() && !digit.is_empty() => {
                Ok(Self {
                    court_code: code.to_string(),
                    number: number.to_string(),
                    check_digit: digit.to_string(),
                })
            }
            _ => Err(EkwError::MalformedIdentifier(raw.to_string())),
        }
    }

    pub fn court_code(&self) -> &str {
        &self.court_code
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn check_digit(&self) -> &str {
        &self.check_digit
    }

    /// The three form values, in the order the search form expects them.
    pub fn parts(&self) -> [&str; 3] {
        [
            self.court_code.as_str(),
            self.number.as_str(),
            self.check_digit.as_str(),
        ]
    }

    /// Filesystem-safe name: `WA2M/00436586/7` → `WA2M_00436586_7`.
    pub fn file_stem(&self) -> String {
        self.parts().join("_")
    }
}

impl fmt::Display for RecordIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{d}{}{d}{}",
            self.court_code,
            self.number,
            self.check_digit,
            d = DELIMITER
        )
    }
}

// ── Tests ──
