// Fixed-precision RFC 3339 timestamps
// Stored as "2024-05-01T09:30:00.000000Z" so string order matches time order
// for Firestore orderBy on createdAt

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};

pub fn format(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format(value))
}

/// Accepts any RFC 3339 precision, including records written before the
/// fixed format
pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    DateTime::<Utc>::deserialize(deserializer)
}

pub mod option {
    use super::*;

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(value) => serializer.serialize_some(&super::format(value)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<DateTime<Utc>>::deserialize(deserializer)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize)]
    struct Stamped {
        #[serde(with = "crate::models::timestamp")]
        at: DateTime<Utc>,
        #[serde(default, with = "crate::models::timestamp::option")]
        seen: Option<DateTime<Utc>>,
    }

    #[test]
    fn test_whole_and_fractional_seconds_sort_as_strings() {
        let whole = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let half = whole + chrono::Duration::milliseconds(500);
        let later = whole + chrono::Duration::seconds(1);

        let encoded: Vec<String> = [whole, half, later].iter().map(format).collect();
        assert_eq!(encoded[0], "2024-05-01T09:30:00.000000Z");
        assert_eq!(encoded[1], "2024-05-01T09:30:00.500000Z");

        let mut sorted = encoded.clone();
        sorted.sort();
        assert_eq!(sorted, encoded);
    }

    #[test]
    fn test_round_trip_and_legacy_precision() {
        let whole = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let value = serde_json::to_value(Stamped { at: whole, seen: None }).unwrap();
        assert_eq!(value["at"], "2024-05-01T09:30:00.000000Z");
        assert!(value["seen"].is_null());

        let legacy: Stamped =
            serde_json::from_str(r#"{"at": "2024-05-01T09:30:00Z", "seen": "2024-05-01T09:30:00.5+00:00"}"#).unwrap();
        assert_eq!(legacy.at, whole);
        assert_eq!(legacy.seen, Some(whole + chrono::Duration::milliseconds(500)));
    }
}
