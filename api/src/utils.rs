use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Datelike, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::ValidationError;

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: i64,           // Admin ID
    pub username: String,
    pub is_admin: bool,
    pub exp: i64,
    pub iat: i64,
}

/// Hash a password using Argon2id
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(password_hash)
}

/// Verify a password against an Argon2 hash
pub fn verify_password(password: &str, password_hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|e| anyhow!("Failed to parse password hash: {}", e))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Random alphanumeric password for the bootstrap admin
pub fn generate_password(len: usize) -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"abcdefghijkmnopqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();

    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

// ============================================================================
// JWT Token Functions
// ============================================================================

pub fn generate_token(
    admin_id: i64,
    username: &str,
    is_admin: bool,
    secret: &str,
    expiration_seconds: i64,
) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: admin_id,
        username: username.to_string(),
        is_admin,
        exp: (now + Duration::seconds(expiration_seconds)).timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| anyhow!("Failed to generate token: {}", e))
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| anyhow!("Failed to verify token: {}", e))?;

    Ok(token_data.claims)
}

// ============================================================================
// Formatting
// ============================================================================

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

fn scale_size(bytes: i64) -> (f64, &'static str) {
    let mut size = bytes.max(0) as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    (size, SIZE_UNITS[unit])
}

/// Human readable size in binary units, e.g. `1.50 GB`
pub fn readable_size(bytes: i64) -> String {
    let (size, unit) = scale_size(bytes);
    format!("{:.2} {}", size, unit)
}

/// Like [`readable_size`] without decimals, e.g. `50 GB`
pub fn readable_size_short(bytes: i64) -> String {
    let (size, unit) = scale_size(bytes);
    format!("{:.0} {}", size, unit)
}

/// Amount with thousands separators: `1234567` becomes `1,234,567`
pub fn format_price(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if amount < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

const TEHRAN_OFFSET_SECS: i64 = 3 * 3600 + 30 * 60;

fn gregorian_to_jalali(gy: i32, gm: u32, gd: u32) -> (i32, i32, i32) {
    const MONTH_OFFSETS: [i32; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];

    let gy2 = if gm > 2 { gy + 1 } else { gy };
    let mut days = 355_666 + 365 * gy + (gy2 + 3) / 4 - (gy2 + 99) / 100 + (gy2 + 399) / 400
        + gd as i32
        + MONTH_OFFSETS[(gm - 1) as usize];

    let mut jy = -1595 + 33 * (days / 12_053);
    days %= 12_053;
    jy += 4 * (days / 1461);
    days %= 1461;
    if days > 365 {
        jy += (days - 1) / 365;
        days = (days - 1) % 365;
    }

    if days < 186 {
        (jy, 1 + days / 31, 1 + days % 31)
    } else {
        (jy, 7 + (days - 186) / 30, 1 + (days - 186) % 30)
    }
}

/// Solar Hijri date (`YYYY/MM/DD`) of a timestamp in Tehran time
pub fn jalali_date(at: DateTime<Utc>) -> String {
    let local = (at + Duration::seconds(TEHRAN_OFFSET_SECS)).naive_utc();
    let (y, m, d) = gregorian_to_jalali(local.year(), local.month(), local.day());
    format!("{:04}/{:02}/{:02}", y, m, d)
}

// ============================================================================
// Input validation
// ============================================================================

/// Escape text for Telegram HTML parse mode
pub fn sanitize_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Removes control characters (except newline and tab) and limits length
pub fn sanitize_string(input: &str, max_length: usize) -> Result<String> {
    let sanitized: String = input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    if sanitized.chars().count() > max_length {
        return Err(anyhow!(
            "Input exceeds maximum length of {} characters",
            max_length
        ));
    }

    Ok(sanitized)
}

/// `validator` hook: the field must hold a JSON document
pub fn validate_json_text(value: &str) -> std::result::Result<(), ValidationError> {
    serde_json::from_str::<serde_json::Value>(value)
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid_json"))
}

/// `validator` hook: 16 digit bank card, optionally grouped by spaces or dashes
pub fn validate_card_number(value: &str) -> std::result::Result<(), ValidationError> {
    let re = Regex::new(r"^\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}$")
        .map_err(|_| ValidationError::new("invalid_card_number"))?;
    if re.is_match(value.trim()) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_card_number"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn test_hash_and_verify_password() {
        let hash = hash_password("correct_password").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct_password", &hash).unwrap());
        assert!(!verify_password("wrong_password", &hash).unwrap());
    }

    #[test]
    fn test_verify_password_with_invalid_hash() {
        assert!(verify_password("password", "invalid_hash").is_err());
    }

    #[test]
    fn test_generate_password_charset() {
        let pw = generate_password(20);
        assert_eq!(pw.len(), 20);
        assert!(pw.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(!pw.contains('0') && !pw.contains('O') && !pw.contains('l'));
    }

    #[test]
    fn test_token_roundtrip() {
        let token = generate_token(7, "root", true, "secret", 3600).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let claims = verify_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.username, "root");
        assert!(claims.is_admin);
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn test_verify_token_with_invalid_secret() {
        let token = generate_token(1, "root", true, "secret", 3600).unwrap();
        assert!(verify_token(&token, "other").is_err());
        assert!(verify_token("invalid.token.format", "secret").is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        // Validation::default() allows 60s of leeway
        let token = generate_token(1, "root", true, "secret", -3600).unwrap();
        assert!(verify_token(&token, "secret").is_err());
    }

    #[test]
    fn test_readable_size() {
        assert_eq!(readable_size(0), "0.00 B");
        assert_eq!(readable_size(512), "512.00 B");
        assert_eq!(readable_size(1536), "1.50 KB");
        assert_eq!(readable_size(5 * 1024 * 1024 * 1024), "5.00 GB");
        assert_eq!(readable_size(3 * 1024_i64.pow(4)), "3.00 TB");
        assert_eq!(readable_size(2048 * 1024_i64.pow(4)), "2048.00 TB");
        assert_eq!(readable_size(-10), "0.00 B");
    }

    #[test]
    fn test_readable_size_short() {
        assert_eq!(readable_size_short(50 * 1024 * 1024 * 1024), "50 GB");
        assert_eq!(readable_size_short(100), "100 B");
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(0), "0");
        assert_eq!(format_price(999), "999");
        assert_eq!(format_price(1000), "1,000");
        assert_eq!(format_price(1_234_567), "1,234,567");
        assert_eq!(format_price(-50_000), "-50,000");
    }

    #[test]
    fn test_jalali_date_nowruz() {
        let nowruz_1403 = Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap();
        assert_eq!(jalali_date(nowruz_1403), "1403/01/01");

        let nowruz_1402 = Utc.with_ymd_and_hms(2023, 3, 21, 12, 0, 0).unwrap();
        assert_eq!(jalali_date(nowruz_1402), "1402/01/01");

        let last_day = Utc.with_ymd_and_hms(2024, 3, 19, 12, 0, 0).unwrap();
        assert_eq!(jalali_date(last_day), "1402/12/29");

        assert_eq!(
            jalali_date(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()),
            "1378/10/11"
        );
    }

    #[test]
    fn test_jalali_date_uses_tehran_offset() {
        // 21:00 UTC is already the next day in Tehran
        let late = Utc.with_ymd_and_hms(2024, 3, 19, 21, 0, 0).unwrap();
        assert_eq!(jalali_date(late), "1403/01/01");
    }

    #[test]
    fn test_sanitize_html() {
        assert_eq!(sanitize_html("<b>Tom & Jerry</b>"), "&lt;b&gt;Tom &amp; Jerry&lt;/b&gt;");
        assert_eq!(sanitize_html("plain"), "plain");
    }

    #[test]
    fn test_sanitize_string() {
        assert_eq!(sanitize_string("My\x00 Phone", 64).unwrap(), "My Phone");
        assert_eq!(sanitize_string("a\nb\tc", 64).unwrap(), "a\nb\tc");
        assert!(sanitize_string(&"a".repeat(65), 64).is_err());
    }

    #[test]
    fn test_validate_json_text() {
        assert!(validate_json_text(r#"{"a": 1}"#).is_ok());
        assert!(validate_json_text("[1, 2]").is_ok());
        assert!(validate_json_text("{broken").is_err());
    }

    #[test]
    fn test_validate_card_number() {
        assert!(validate_card_number("6037997312345678").is_ok());
        assert!(validate_card_number("6037-9973-1234-5678").is_ok());
        assert!(validate_card_number("6037 9973 1234 5678").is_ok());
        assert!(validate_card_number("6037").is_err());
        assert!(validate_card_number("abcd-efgh-ijkl-mnop").is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn test_format_price_strips_back_to_number(amount in -10_000_000_000i64..10_000_000_000i64) {
            let formatted = format_price(amount);
            let digits: String = formatted.chars().filter(|c| *c != ',').collect();
            prop_assert_eq!(digits.parse::<i64>().unwrap(), amount);
            for group in formatted.trim_start_matches('-').split(',').skip(1) {
                prop_assert_eq!(group.len(), 3);
            }
        }

        #[test]
        fn test_jalali_month_and_day_in_range(secs in 0i64..4_000_000_000i64) {
            let at = Utc.timestamp_opt(secs, 0).unwrap();
            let date = jalali_date(at);
            let parts: Vec<i32> = date.split('/').map(|p| p.parse().unwrap()).collect();
            prop_assert!((1..=12).contains(&parts[1]));
            prop_assert!((1..=31).contains(&parts[2]));
            if parts[1] > 6 {
                prop_assert!(parts[2] <= 30);
            }
        }

        #[test]
        fn test_readable_size_unit_boundaries(bytes in 0i64..1_000_000_000_000_000i64) {
            let text = readable_size(bytes);
            let value: f64 = text.split(' ').next().unwrap().parse().unwrap();
            let unit = text.split(' ').nth(1).unwrap();
            if unit != "TB" {
                prop_assert!(value <= 1024.0);
            }
        }
    }
}
