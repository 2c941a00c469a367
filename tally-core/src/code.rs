use std::fmt::Display;

use lazy_static::lazy_static;
use rand::{thread_rng, Rng};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every referral code starts with this
pub const REFERRAL_CODE_PREFIX: &str = "NL";
/// The characters a code suffix is drawn from. `I`, `O`, `0` and `1` are left out.
pub const REFERRAL_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const REFERRAL_CODE_SUFFIX_LENGTH: usize = 6;

lazy_static! {
    static ref REGEX: Regex = Regex::new(r"^NL[A-HJ-NP-Z2-9]{6}$").unwrap();
}

/// A normalized, well-formed referral code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferralCode(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid referral code: {0:?}")]
pub struct InvalidReferralCode(pub String);

impl ReferralCode {
    /// Generates a random code. Uniqueness is up to the caller.
    pub fn generate() -> Self {
        Self::generate_with(&mut thread_rng())
    }

    pub fn generate_with<R: Rng>(rng: &mut R) -> Self {
        let suffix: String = std::iter::repeat(())
            .map(|_| REFERRAL_CODE_ALPHABET[rng.gen_range(0..REFERRAL_CODE_ALPHABET.len())] as char)
            .take(REFERRAL_CODE_SUFFIX_LENGTH)
            .collect();

        Self(format!("{}{}", REFERRAL_CODE_PREFIX, suffix))
    }

    /// Trims and uppercases the input, then checks it against the code pattern.
    pub fn parse(input: &str) -> Result<Self, InvalidReferralCode> {
        let normalized = input.trim().to_uppercase();

        if REGEX.is_match(&normalized) {
            Ok(Self(normalized))
        } else {
            Err(InvalidReferralCode(input.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Display for ReferralCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod test {
    use rand::{rngs::StdRng, SeedableRng};

    use super::{ReferralCode, REFERRAL_CODE_PREFIX};

    #[test]
    fn generated_codes_are_valid() {
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..500 {
            let code = ReferralCode::generate_with(&mut rng);

            assert!(code.as_str().starts_with(REFERRAL_CODE_PREFIX));
            assert_eq!(ReferralCode::parse(code.as_str()), Ok(code));
        }
    }

    #[test]
    fn codes_are_normalized_before_validation() {
        let code = ReferralCode::parse("  nlabc234 \n").unwrap();

        assert_eq!(code.as_str(), "NLABC234");
    }

    #[test]
    fn malformed_codes_are_rejected() {
        let inputs = [
            "",
            "NL",
            "NLABC23",
            "NLABC2345",
            "XXABC234",
            // Confusable characters are never issued
            "NLABC10O",
            "NLIIIIII",
            "NL-ABC23",
        ];

        for input in inputs {
            assert!(ReferralCode::parse(input).is_err(), "{input:?} was accepted");
        }
    }
}
