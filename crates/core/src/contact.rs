use std::sync::OnceLock;

use regex::Regex;

static EMAIL_PATTERN: OnceLock<Regex> = OnceLock::new();

fn email_pattern() -> &'static Regex {
    EMAIL_PATTERN.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
            .expect("email pattern is valid")
    })
}

pub fn extract_email(text: &str) -> Option<&str> {
    email_pattern().find(text).map(|found| found.as_str())
}

/// Extract a valid mobile number from free text. Accepts common formats
/// (`9876543210`, `+91 98765-43210`, `09876543210`); the country code and
/// trunk prefix are stripped and the remaining ten digits must start with
/// 6-9. Returns the normalized ten-digit number.
pub fn extract_phone(text: &str) -> Option<String> {
    let mut digits: String = text.chars().filter(char::is_ascii_digit).collect();

    if digits.len() == 12 && digits.starts_with("91") {
        digits = digits.split_off(2);
    }
    if digits.len() == 11 && digits.starts_with('0') {
        digits = digits.split_off(1);
    }

    if digits.len() == 10 && matches!(digits.as_bytes()[0], b'6'..=b'9') {
        Some(digits)
    } else {
        None
    }
}

/// Whether inbound user text carries contact details (email or phone). A
/// match while the session is at the quiet escalation level bumps it to
/// contact-info-seen and bypasses the flow for that turn.
pub fn contains_contact_info(text: &str) -> bool {
    extract_email(text).is_some() || extract_phone(text).is_some()
}
