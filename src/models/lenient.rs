// Lenient deserializers for mobile client payloads
// Form inputs arrive as strings ("25") and user ids as either numbers or strings

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Integer(i64),
    Float(f64),
    Text(String),
}

/// Optional f64 from a JSON number or a numeric string.
/// Blank strings and null map to `None`. NaN and infinities are rejected.
pub fn opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match Option::<NumberOrString>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(NumberOrString::Integer(n)) => n as f64,
        Some(NumberOrString::Float(n)) => n,
        Some(NumberOrString::Text(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<f64>()
                .map_err(|_| D::Error::custom(format!("invalid number: {:?}", s)))?
        }
    };

    if !value.is_finite() {
        return Err(D::Error::custom(format!("non-finite number: {}", value)));
    }
    Ok(Some(value))
}

/// Identifier that may be sent as a number (legacy integer keys) or a string
pub fn id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Integer(n) => Ok(n.to_string()),
        NumberOrString::Float(n) => Ok(n.to_string()),
        NumberOrString::Text(s) => Ok(s),
    }
}

/// Optional variant of [`id`]; blank strings map to `None`.
pub fn opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<NumberOrString>::deserialize(deserializer)? {
        None => None,
        Some(NumberOrString::Integer(n)) => Some(n.to_string()),
        Some(NumberOrString::Float(n)) => Some(n.to_string()),
        Some(NumberOrString::Text(s)) if s.trim().is_empty() => None,
        Some(NumberOrString::Text(s)) => Some(s),
    })
}

/// List of identifiers, each a number or string; null maps to an empty list.
pub fn id_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<NumberOrString>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|v| match v {
            NumberOrString::Integer(n) => n.to_string(),
            NumberOrString::Float(n) => n.to_string(),
            NumberOrString::Text(s) => s,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Sample {
        #[serde(default, deserialize_with = "opt_f64")]
        quantity: Option<f64>,
        #[serde(default, deserialize_with = "opt_id")]
        user: Option<String>,
    }

    #[test]
    fn test_numeric_string_is_coerced() {
        let sample: Sample = serde_json::from_str(r#"{"quantity": "25", "user": 7}"#).unwrap();
        assert_eq!(sample.quantity, Some(25.0));
        assert_eq!(sample.user.as_deref(), Some("7"));
    }

    #[test]
    fn test_blank_and_missing_values_are_none() {
        let sample: Sample = serde_json::from_str(r#"{"quantity": " ", "user": ""}"#).unwrap();
        assert_eq!(sample.quantity, None);
        assert_eq!(sample.user, None);

        let sample: Sample = serde_json::from_str("{}").unwrap();
        assert_eq!(sample.quantity, None);
    }

    #[test]
    fn test_garbage_number_is_rejected() {
        assert!(serde_json::from_str::<Sample>(r#"{"quantity": "lots"}"#).is_err());
    }

    #[test]
    fn test_non_finite_number_is_rejected() {
        for raw in ["NaN", "inf", "-inf", " infinity "] {
            let body = serde_json::json!({ "quantity": raw }).to_string();
            assert!(serde_json::from_str::<Sample>(&body).is_err(), "{} was accepted", raw);
        }

        let sample: Sample = serde_json::from_str(r#"{"quantity": "2.5"}"#).unwrap();
        assert_eq!(sample.quantity, Some(2.5));
    }
}
