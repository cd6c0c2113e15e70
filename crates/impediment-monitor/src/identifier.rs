use serde::{Deserialize, Serialize};
use std::fmt;

const TAX_ID_LEN: usize = 14;
const FIRST_CHECK_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const SECOND_CHECK_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// Canonical 14-digit national tax id (CNPJ) of a legal entity.
///
/// Only the digit-only form is ever stored or compared; [`TaxId::formatted`] is a view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxId(String);

/// Reasons a raw identifier is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidIdentifier {
    #[error("identifier must have 14 digits, found {found}")]
    WrongLength { found: usize },
    #[error("identifier digits are all identical")]
    RepeatedDigits,
    #[error("identifier check digits do not match (expected {expected}, found {found})")]
    CheckDigitMismatch { expected: String, found: String },
}

impl TaxId {
    /// Strip punctuation and validate both check digits.
    pub fn parse(raw: &str) -> Result<Self, InvalidIdentifier> {
        let digits: Vec<u32> = raw.chars().filter_map(|c| c.to_digit(10)).collect();

        if digits.len() != TAX_ID_LEN {
            return Err(InvalidIdentifier::WrongLength {
                found: digits.len(),
            });
        }

        if digits.iter().all(|digit| *digit == digits[0]) {
            return Err(InvalidIdentifier::RepeatedDigits);
        }

        let first = check_digit(&digits[..12], &FIRST_CHECK_WEIGHTS);
        let second = check_digit(&digits[..13], &SECOND_CHECK_WEIGHTS);

        if digits[12] != first || digits[13] != second {
            return Err(InvalidIdentifier::CheckDigitMismatch {
                expected: format!("{first}{second}"),
                found: format!("{}{}", digits[12], digits[13]),
            });
        }

        Ok(Self(
            digits
                .iter()
                .filter_map(|digit| char::from_digit(*digit, 10))
                .collect(),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Display form `NN.NNN.NNN/NNNN-NN`.
    pub fn formatted(&self) -> String {
        let d = &self.0;
        format!(
            "{}.{}.{}/{}-{}",
            &d[0..2],
            &d[2..5],
            &d[5..8],
            &d[8..12],
            &d[12..14]
        )
    }
}

fn check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits
        .iter()
        .zip(weights)
        .map(|(digit, weight)| digit * weight)
        .sum();
    let remainder = sum % 11;
    if remainder < 2 {
        0
    } else {
        11 - remainder
    }
}

impl fmt::Display for TaxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TaxId {
    type Error = InvalidIdentifier;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TaxId> for String {
    fn from(value: TaxId) -> Self {
        value.0
    }
}

impl std::str::FromStr for TaxId {
    type Err = InvalidIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
