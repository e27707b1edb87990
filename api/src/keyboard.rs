//! Framework-independent inline keyboard model.
//!
//! Notifications and admin tools describe buttons as JSON; the bot turns
//! the resulting rows into a Telegram inline keyboard.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Buttons per keyboard row
pub const ROW_WIDTH: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyboardError {
    #[error("Invalid JSON format")]
    InvalidJsonFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyboard {
    pub text: String,
    #[serde(default)]
    pub callback_data: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Keyboard {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: Some(data.into()),
            url: None,
        }
    }

    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: None,
            url: Some(url.into()),
        }
    }

    /// All three keys are always present, missing values as `null`
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "text": self.text,
            "callback_data": self.callback_data,
            "url": self.url,
        })
    }
}

/// Rows of buttons, at most [`ROW_WIDTH`] per row
pub type KeyboardRows = Vec<Vec<Keyboard>>;

pub struct KeyboardFactory;

impl KeyboardFactory {
    pub fn from_keyboard(keyboards: &[Keyboard]) -> KeyboardRows {
        let buttons: Vec<Keyboard> = keyboards
            .iter()
            .map(|k| Keyboard {
                text: k.text.clone(),
                callback_data: non_empty(k.callback_data.as_deref()),
                url: non_empty(k.url.as_deref()),
            })
            .collect();

        chunk_rows(buttons)
    }

    /// Accepts a JSON string or an already decoded list of button objects.
    pub fn from_json_string(input: &Value) -> Result<KeyboardRows, KeyboardError> {
        let decoded;
        let list = match input {
            Value::Null => return Ok(Vec::new()),
            Value::String(s) if s.is_empty() => return Ok(Vec::new()),
            Value::String(s) => {
                decoded = serde_json::from_str::<Value>(s).map_err(|_| KeyboardError::InvalidJsonFormat)?;
                &decoded
            }
            other => other,
        };

        let entries = match list {
            Value::Null => return Ok(Vec::new()),
            Value::Array(entries) => entries,
            _ => return Err(KeyboardError::InvalidJsonFormat),
        };

        let buttons = entries
            .iter()
            .filter_map(|entry| {
                let text = entry.get("text")?.as_str()?;
                Some(Keyboard {
                    text: text.to_string(),
                    callback_data: truthy_str(entry.get("callback_data")),
                    url: truthy_str(entry.get("url")),
                })
            })
            .collect();

        Ok(chunk_rows(buttons))
    }

    pub fn parse(input: &str) -> Result<KeyboardRows, KeyboardError> {
        Self::from_json_string(&Value::String(input.to_string()))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

fn truthy_str(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn chunk_rows(buttons: Vec<Keyboard>) -> KeyboardRows {
    buttons.chunks(ROW_WIDTH).map(|row| row.to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_to_json_emits_all_keys() {
        let json = Keyboard::callback("Buy", "buy_service:").to_json();
        assert_eq!(json, json!({"text": "Buy", "callback_data": "buy_service:", "url": null}));
    }

    #[test]
    fn test_from_keyboard_rows_of_two() {
        let keys = vec![
            Keyboard::callback("a", "1"),
            Keyboard::callback("b", "2"),
            Keyboard::url("c", "https://t.me/c"),
        ];
        let rows = KeyboardFactory::from_keyboard(&keys);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 2);
        assert_eq!(rows[1][0].url.as_deref(), Some("https://t.me/c"));
    }

    #[test]
    fn test_from_keyboard_drops_empty_values() {
        let keys = vec![Keyboard {
            text: "x".to_string(),
            callback_data: Some(String::new()),
            url: Some(String::new()),
        }];
        let rows = KeyboardFactory::from_keyboard(&keys);
        assert_eq!(rows[0][0].callback_data, None);
        assert_eq!(rows[0][0].url, None);
    }

    #[test]
    fn test_from_json_string_empty_inputs() {
        assert!(KeyboardFactory::from_json_string(&Value::Null).unwrap().is_empty());
        assert!(KeyboardFactory::from_json_string(&json!("")).unwrap().is_empty());
        assert!(KeyboardFactory::from_json_string(&json!([])).unwrap().is_empty());
        assert!(KeyboardFactory::parse("[]").unwrap().is_empty());
    }

    #[test]
    fn test_from_json_string_invalid_json() {
        assert_eq!(
            KeyboardFactory::parse("[{broken"),
            Err(KeyboardError::InvalidJsonFormat)
        );
        assert_eq!(
            KeyboardFactory::from_json_string(&json!({"text": "a"})),
            Err(KeyboardError::InvalidJsonFormat)
        );
    }

    #[test]
    fn test_from_json_string_parses_entries() {
        let input = r#"[
            {"text": "Site", "url": "https://example.com"},
            {"text": "Menu", "callback_data": "main_menu:"},
            {"callback_data": "orphan"},
            {"text": "Empty", "url": "", "callback_data": null}
        ]"#;
        let rows = KeyboardFactory::parse(input).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Keyboard::url("Site", "https://example.com"));
        assert_eq!(rows[0][1], Keyboard::callback("Menu", "main_menu:"));
        assert_eq!(rows[1].len(), 1);
        assert_eq!(rows[1][0].text, "Empty");
        assert_eq!(rows[1][0].url, None);
        assert_eq!(rows[1][0].callback_data, None);
    }

    #[test]
    fn test_from_json_string_accepts_decoded_list() {
        let rows = KeyboardFactory::from_json_string(&json!([{"text": "A", "callback_data": "a"}])).unwrap();
        assert_eq!(rows, vec![vec![Keyboard::callback("A", "a")]]);
    }

    proptest! {
        #[test]
        fn test_rows_never_exceed_width(n in 0usize..40) {
            let keys: Vec<Keyboard> = (0..n).map(|i| Keyboard::callback(format!("k{}", i), i.to_string())).collect();
            let rows = KeyboardFactory::from_keyboard(&keys);
            prop_assert_eq!(rows.len(), (n + 1) / 2);
            prop_assert!(rows.iter().all(|r| !r.is_empty() && r.len() <= ROW_WIDTH));
            let flat: Vec<Keyboard> = rows.into_iter().flatten().collect();
            prop_assert_eq!(flat, keys);
        }
    }
}
