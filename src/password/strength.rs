//! Password strength evaluation.
//!
//! Scoring: +1 per length tier (8/12/16) and per character class
//! present, -2 for a known weak password, -1 for a run of three or
//! more repeated characters. Anything under eight characters is
//! rejected outright as weak.

use serde::Serialize;

/// Minimum acceptable password length
pub const MIN_PASSWORD_LENGTH: usize = 8;

const COMMON_WEAK_PASSWORDS: &[&str] = &[
    "password",
    "123456",
    "123456789",
    "qwerty",
    "abc123",
    "password123",
    "admin",
    "root",
    "user",
    "guest",
    "12345678",
    "1234567890",
    "qwerty123",
    "password1",
    "123123",
    "111111",
    "000000",
    "1qaz2wsx",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrengthLabel {
    Weak,
    Fair,
    Good,
    Strong,
}

impl StrengthLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrengthLabel::Weak => "weak",
            StrengthLabel::Fair => "fair",
            StrengthLabel::Good => "good",
            StrengthLabel::Strong => "strong",
        }
    }
}

/// Result of a strength check, suitable for display next to a
/// password field.
#[derive(Debug, Clone, Serialize)]
pub struct StrengthReport {
    pub score: i32,
    pub label: StrengthLabel,
    pub suggestions: Vec<String>,
}

impl StrengthReport {
    /// Whether the password clears the bar for encrypting a note.
    pub fn is_acceptable(&self) -> bool {
        self.label > StrengthLabel::Weak
    }
}

/// Score a candidate password and collect improvement suggestions.
pub fn check_strength(password: &str) -> StrengthReport {
    let mut suggestions = Vec::new();
    let mut score: i32 = 0;

    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        suggestions.push(format!(
            "use at least {MIN_PASSWORD_LENGTH} characters"
        ));
        return StrengthReport {
            score: 0,
            label: StrengthLabel::Weak,
            suggestions,
        };
    }

    if length >= 8 {
        score += 1;
    }
    if length >= 12 {
        score += 1;
    }
    if length >= 16 {
        score += 1;
    }

    let mut has_lower = false;
    let mut has_upper = false;
    let mut has_digit = false;
    let mut has_symbol = false;
    for ch in password.chars() {
        match ch {
            'a'..='z' => has_lower = true,
            'A'..='Z' => has_upper = true,
            '0'..='9' => has_digit = true,
            _ => has_symbol = true,
        }
    }

    for (present, suggestion) in [
        (has_lower, "add lowercase letters"),
        (has_upper, "add uppercase letters"),
        (has_digit, "add digits"),
        (has_symbol, "add symbols (!@#$%^&* etc.)"),
    ] {
        if present {
            score += 1;
        } else {
            suggestions.push(suggestion.to_string());
        }
    }

    if is_common_weak_password(password) {
        suggestions.push("avoid common passwords".to_string());
        score -= 2;
    }

    if has_repeating_run(password) {
        suggestions.push("avoid repeated characters".to_string());
        score -= 1;
    }

    let has_all_classes = has_lower && has_upper && has_digit && has_symbol;
    let label = match score {
        i32::MIN..=2 => StrengthLabel::Weak,
        3..=4 => StrengthLabel::Fair,
        _ if !has_all_classes => StrengthLabel::Fair,
        5..=6 => StrengthLabel::Good,
        _ => StrengthLabel::Strong,
    };

    StrengthReport {
        score,
        label,
        suggestions,
    }
}

fn is_common_weak_password(password: &str) -> bool {
    let lowered = password.to_lowercase();
    COMMON_WEAK_PASSWORDS.iter().any(|weak| lowered == *weak)
}

/// Three or more of the same byte in a row.
fn has_repeating_run(password: &str) -> bool {
    let bytes = password.as_bytes();
    if bytes.len() < 3 {
        return false;
    }
    let mut run = 1;
    for pair in bytes.windows(2) {
        if pair[0] == pair[1] {
            run += 1;
            if run >= 3 {
                return true;
            }
        } else {
            run = 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_passwords_are_weak() {
        let report = check_strength("Ab1!");
        assert_eq!(report.label, StrengthLabel::Weak);
        assert!(!report.is_acceptable());
        assert!(report.suggestions[0].contains("at least 8"));
    }

    #[test]
    fn test_common_password_is_penalized() {
        let report = check_strength("password123");
        assert_eq!(report.label, StrengthLabel::Weak);
        assert!(report
            .suggestions
            .iter()
            .any(|s| s.contains("common passwords")));
    }

    #[test]
    fn test_missing_classes_caps_at_fair() {
        // Long but lowercase-only.
        let report = check_strength("longlowercasepassword");
        assert_eq!(report.label, StrengthLabel::Fair);
        assert!(report.suggestions.iter().any(|s| s.contains("uppercase")));
        assert!(report.suggestions.iter().any(|s| s.contains("digits")));
    }

    #[test]
    fn test_all_classes_medium_length_is_good() {
        let report = check_strength("Medium1!Pass");
        assert_eq!(report.label, StrengthLabel::Good);
        assert!(report.is_acceptable());
    }

    #[test]
    fn test_long_mixed_password_is_strong() {
        let report = check_strength("VeryStrong123!@#XYZ");
        assert_eq!(report.label, StrengthLabel::Strong);
        assert_eq!(report.score, 7);
    }

    #[test]
    fn test_repeated_run_lowers_score() {
        let with_run = check_strength("Abaaa1!cdefg");
        let without = check_strength("Abxya1!cdefg");
        assert!(with_run.score < without.score);
        assert!(with_run
            .suggestions
            .iter()
            .any(|s| s.contains("repeated")));
    }
}
