use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::identity::IssuerId;

/// A number handed out by the sequence allocator (`nDPS`). Never zero.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    /// Largest value that still fits the 15-digit field of a document id.
    pub const MAX: u64 = 999_999_999_999_999;

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The 45-character document identifier.
///
/// Layout: `DPS` + municipality (7) + registration type (1) + tax id (14)
/// + series (5) + sequence (15), every numeric field left-padded with zeros.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub const LEN: usize = 45;
    const PREFIX: &'static str = "DPS";
    /// Registration type for a CNPJ-registered issuer.
    pub const REGISTRATION_CNPJ: &'static str = "2";

    pub fn derive(
        municipality_code: &str,
        issuer: &IssuerId,
        series: &str,
        sequence: SequenceNumber,
    ) -> Result<Self, TypeError> {
        let id = format!(
            "{}{:0>7}{}{:0>14}{:0>5}{:015}",
            Self::PREFIX,
            municipality_code,
            Self::REGISTRATION_CNPJ,
            issuer.as_str(),
            series,
            sequence.get(),
        );
        if id.len() != Self::LEN {
            return Err(TypeError::InvalidLength {
                expected: Self::LEN,
                actual: id.len(),
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
