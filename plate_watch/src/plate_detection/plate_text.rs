use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PLATE_FORMAT: Regex =
        Regex::new(r"^[A-Z]{1,2}\d{1,4}[A-Z]{1,3}$").expect("plate format regex");
}

/// Drops every character that is not an uppercase ASCII letter or a digit.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .collect()
}

/// One or two letters, one to four digits, one to three letters.
pub fn is_valid_plate(text: &str) -> bool {
    PLATE_FORMAT.is_match(text)
}

/// Normalized plate text if the OCR output reads as a plate.
pub fn read_plate(raw: &str) -> Option<String> {
    let text = normalize(raw);
    is_valid_plate(&text).then_some(text)
}
