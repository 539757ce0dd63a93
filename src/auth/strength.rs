//! Rule-based password strength scoring.
//!
//! Every rule is evaluated and every violation is reported; nothing
//! short-circuits. The five base rules each add a point, the three pattern
//! rules subtract (never below zero), and the result is capped at 4.

use rand::seq::{IndexedRandom, SliceRandom};
use serde::{Serialize, Serializer};
use std::fmt;

use crate::error::AppError;

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_SCORE: u8 = 4;

const SYMBOLS: &str = "!@#$%^&*()_+-=[]{};':\"\\|,.<>/?";

const COMMON_PASSWORDS: [&str; 10] = [
    "password",
    "123456",
    "123456789",
    "qwerty",
    "abc123",
    "password123",
    "admin",
    "letmein",
    "welcome",
    "monkey",
];

const SEQUENCES: [&str; 32] = [
    "abc", "bcd", "cde", "def", "efg", "fgh", "ghi", "hij", "ijk", "jkl", "klm", "lmn", "mno",
    "nop", "opq", "pqr", "qrs", "rst", "stu", "tuv", "uvw", "vwx", "wxy", "xyz", "123", "234",
    "345", "456", "567", "678", "789", "012",
];

pub const ERR_LENGTH: &str = "Password must be at least 8 characters long";
pub const ERR_UPPERCASE: &str = "Password must contain at least one uppercase letter";
pub const ERR_LOWERCASE: &str = "Password must contain at least one lowercase letter";
pub const ERR_DIGIT: &str = "Password must contain at least one number";
pub const ERR_SYMBOL: &str = "Password must contain at least one special character";
pub const ERR_COMMON: &str = "Password is too common, please choose a stronger password";
pub const ERR_REPEATED: &str = "Password should not contain repeated characters";
pub const ERR_SEQUENTIAL: &str = "Password should not contain sequential characters";

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub score: u8,
}

/// Human-readable label for a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordStrength {
    VeryWeak,
    Weak,
    Medium,
    Strong,
}

impl PasswordStrength {
    pub fn from_score(score: u8) -> Self {
        match score {
            0 | 1 => PasswordStrength::VeryWeak,
            2 => PasswordStrength::Weak,
            3 => PasswordStrength::Medium,
            _ => PasswordStrength::Strong,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PasswordStrength::VeryWeak => "Very Weak",
            PasswordStrength::Weak => "Weak",
            PasswordStrength::Medium => "Medium",
            PasswordStrength::Strong => "Strong",
        }
    }
}

impl fmt::Display for PasswordStrength {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for PasswordStrength {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Error body returned when a password is rejected.
#[derive(Debug, Clone, Serialize)]
pub struct PasswordRejection {
    pub message: String,
    pub errors: Vec<String>,
    pub strength: PasswordStrength,
    pub suggestion: String,
}

/// The rule set. `Default` carries the built-in common-password list;
/// deployments can extend it through `PASSWORD_EXTRA_COMMON`.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    common_passwords: Vec<String>,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            common_passwords: COMMON_PASSWORDS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl PasswordPolicy {
    pub fn with_extra_common_passwords<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for entry in extra {
            let entry = entry.as_ref().trim().to_lowercase();
            if !entry.is_empty() && !self.common_passwords.contains(&entry) {
                self.common_passwords.push(entry);
            }
        }
        self
    }

    pub fn validate(&self, password: &str) -> PasswordValidation {
        let mut errors = Vec::new();
        let mut score: u8 = 0;

        let base_checks: [(bool, &str); 5] = [
            (password.chars().count() >= MIN_PASSWORD_LENGTH, ERR_LENGTH),
            (password.chars().any(|c| c.is_ascii_uppercase()), ERR_UPPERCASE),
            (password.chars().any(|c| c.is_ascii_lowercase()), ERR_LOWERCASE),
            (password.chars().any(|c| c.is_ascii_digit()), ERR_DIGIT),
            (password.chars().any(|c| SYMBOLS.contains(c)), ERR_SYMBOL),
        ];
        for (passed, message) in base_checks {
            if passed {
                score += 1;
            } else {
                errors.push(message.to_string());
            }
        }

        let lowered = password.to_lowercase();

        if self.common_passwords.iter().any(|p| *p == lowered) {
            errors.push(ERR_COMMON.to_string());
            score = score.saturating_sub(2);
        }

        if has_repeated_run(password, 3) {
            errors.push(ERR_REPEATED.to_string());
            score = score.saturating_sub(1);
        }

        if SEQUENCES.iter().any(|seq| lowered.contains(seq)) {
            errors.push(ERR_SEQUENTIAL.to_string());
            score = score.saturating_sub(1);
        }

        PasswordValidation {
            is_valid: errors.is_empty(),
            errors,
            score: score.min(MAX_SCORE),
        }
    }

    /// Runs the policy and turns a failure into the itemized 400 error.
    pub fn enforce(&self, password: &str, message: &str) -> Result<(), AppError> {
        let result = self.validate(password);
        if result.is_valid {
            return Ok(());
        }
        Err(AppError::WeakPassword(PasswordRejection {
            message: message.to_string(),
            errors: result.errors,
            strength: PasswordStrength::from_score(result.score),
            suggestion: self.suggest_password(),
        }))
    }

    /// A random 12-character password that this policy accepts.
    pub fn suggest_password(&self) -> String {
        loop {
            let candidate = random_password();
            if self.validate(&candidate).is_valid {
                return candidate;
            }
        }
    }
}

/// True when some character occurs `run` or more times in a row.
fn has_repeated_run(password: &str, run: usize) -> bool {
    let mut previous = None;
    let mut count = 0;
    for c in password.chars() {
        if Some(c) == previous {
            count += 1;
        } else {
            previous = Some(c);
            count = 1;
        }
        if count >= run {
            return true;
        }
    }
    false
}

/// A 12-character password the default policy accepts.
pub fn generate_password_suggestion() -> String {
    PasswordPolicy::default().suggest_password()
}

/// A random 12-character password with at least one character of every class.
/// Sequences and repeated runs are possible; `suggest_password` filters them.
fn random_password() -> String {
    const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    const DIGITS: &[u8] = b"0123456789";
    const SUGGESTION_SYMBOLS: &[u8] = b"!@#$%^&*()_+-=[]{}|;:,.<>?";
    const LENGTH: usize = 12;

    let mut rng = rand::rng();
    let classes = [UPPER, LOWER, DIGITS, SUGGESTION_SYMBOLS];
    let all: Vec<u8> = classes.concat();

    let mut chars: Vec<u8> = classes
        .iter()
        .filter_map(|class| class.choose(&mut rng).copied())
        .collect();
    while chars.len() < LENGTH {
        if let Some(c) = all.choose(&mut rng) {
            chars.push(*c);
        }
    }
    chars.shuffle(&mut rng);
    chars.into_iter().map(char::from).collect()
}
