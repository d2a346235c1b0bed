//! String formats understood by both the data generator and the contract validator.
//!
//! Each format has a generator producing syntactically valid values and a
//! checker used for drift detection. Keeping them side by side guarantees that
//! anything generated here also validates here.

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use fake::faker::internet::en::SafeEmail;
use fake::faker::lorem::en::Word;
use fake::faker::name::en::Name;
use fake::Fake;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;

pub const KNOWN_FORMATS: [&str; 9] = [
    "email", "uuid", "date", "datetime", "date-time", "name", "phone", "url", "password",
];

const PASSWORD_SYMBOLS: &[u8] = b"!@#$%^&*-_";

/// Earliest and latest instants produced for `date` / `datetime`
const EPOCH_START: i64 = 0; // 1970-01-01T00:00:00Z
const EPOCH_END: i64 = 1_924_991_999; // 2030-12-31T23:59:59Z

pub fn is_known(format: &str) -> bool {
    KNOWN_FORMATS.contains(&format)
}

/// Generate a value for `format`, or `None` when the format is unknown
pub fn generate_format(format: &str) -> Option<String> {
    let mut rng = rand::thread_rng();
    let value = match format {
        "email" => SafeEmail().fake::<String>(),
        "uuid" => uuid::Uuid::new_v4().to_string(),
        "date" => random_instant(&mut rng).date_naive().format("%Y-%m-%d").to_string(),
        "datetime" | "date-time" => {
            random_instant(&mut rng).to_rfc3339_opts(SecondsFormat::Secs, true)
        }
        "name" => Name().fake::<String>(),
        "phone" => phone_number(&mut rng),
        "url" => format!("https://{}.example.com/{}", url_word(), url_word()),
        "password" => password(&mut rng),
        _ => return None,
    };
    Some(value)
}

/// Check `value` against `format`; `None` when the format is unknown
pub fn check_format(format: &str, value: &str) -> Option<bool> {
    let ok = match format {
        "email" => email_regex().is_match(value),
        "uuid" => uuid::Uuid::parse_str(value).is_ok(),
        "date" => NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok(),
        "datetime" | "date-time" => DateTime::parse_from_rfc3339(value).is_ok(),
        "name" => !value.trim().is_empty() && !value.chars().any(char::is_control),
        "phone" => phone_regex().is_match(value),
        "url" => url_regex().is_match(value),
        "password" => value.chars().count() >= 8 && !value.chars().any(char::is_whitespace),
        _ => return None,
    };
    Some(ok)
}

fn random_instant<R: Rng + ?Sized>(rng: &mut R) -> DateTime<Utc> {
    let secs = rng.gen_range(EPOCH_START..=EPOCH_END);
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

/// `+1-###-###-####`, with `#` replaced by random digits
fn phone_number<R: Rng + ?Sized>(rng: &mut R) -> String {
    "+1-###-###-####"
        .chars()
        .map(|c| match c {
            '#' => char::from(b'0' + rng.gen_range(0..10u8)),
            other => other,
        })
        .collect()
}

fn url_word() -> String {
    let word: String = Word().fake();
    let cleaned: String = word
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if cleaned.is_empty() {
        "item".to_string()
    } else {
        cleaned
    }
}

/// 12-20 characters with at least one lowercase, uppercase, digit and symbol
fn password<R: Rng + ?Sized>(rng: &mut R) -> String {
    let len = rng.gen_range(12..=20);
    let mut chars: Vec<char> = vec![
        char::from(rng.gen_range(b'a'..=b'z')),
        char::from(rng.gen_range(b'A'..=b'Z')),
        char::from(rng.gen_range(b'0'..=b'9')),
        char::from(PASSWORD_SYMBOLS[rng.gen_range(0..PASSWORD_SYMBOLS.len())]),
    ];
    while chars.len() < len {
        let c = match rng.gen_range(0..4) {
            0 => char::from(rng.gen_range(b'a'..=b'z')),
            1 => char::from(rng.gen_range(b'A'..=b'Z')),
            2 => char::from(rng.gen_range(b'0'..=b'9')),
            _ => char::from(PASSWORD_SYMBOLS[rng.gen_range(0..PASSWORD_SYMBOLS.len())]),
        };
        chars.push(c);
    }
    chars.shuffle(rng);
    chars.into_iter().collect()
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex"))
}

fn phone_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+?[0-9][0-9 ().\-x]{6,}$").expect("static regex"))
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^https?://[^\s/?#]+[^\s]*$").expect("static regex"))
}
