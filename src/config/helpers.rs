use std::{fmt, time::Duration};

use serde::{Deserialize, Deserializer, Serializer, de, de::Visitor, ser::SerializeSeq};

/// Custom deserializer for Duration from milliseconds
pub fn deserialize_duration_from_ms<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let ms = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(ms))
}

/// Custom deserializer for Duration from seconds
pub fn deserialize_duration_from_seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

/// Custom serializer for Duration to milliseconds
pub fn serialize_duration_to_ms<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Custom serializer for Duration to seconds
pub fn serialize_duration_to_seconds<S>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_secs())
}

/// Custom deserializer for a vector of Durations from whole seconds.
pub fn deserialize_duration_vec_from_seconds<'de, D>(
    deserializer: D,
) -> Result<Vec<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = Vec::<u64>::deserialize(deserializer)?;
    Ok(secs.into_iter().map(Duration::from_secs).collect())
}

/// Custom serializer for a vector of Durations to whole seconds.
pub fn serialize_duration_vec_to_seconds<S>(
    durations: &[Duration],
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut seq = serializer.serialize_seq(Some(durations.len()))?;
    for duration in durations {
        seq.serialize_element(&duration.as_secs())?;
    }
    seq.end()
}

struct StringListVisitor;

impl<'de> Visitor<'de> for StringListVisitor {
    type Value = Vec<String>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a comma-separated string or a sequence of strings")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(value.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).map(String::from).collect())
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: de::SeqAccess<'de>,
    {
        let mut items = Vec::new();
        while let Some(value) = seq.next_element::<String>()? {
            items.push(value);
        }
        Ok(items)
    }
}

/// Custom deserializer for a list of strings, accepting either a sequence or
/// a single comma-separated string (the form environment variables take).
pub fn deserialize_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(StringListVisitor)
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct TestDurationSecs {
        #[serde(
            deserialize_with = "deserialize_duration_from_seconds",
            serialize_with = "serialize_duration_to_seconds"
        )]
        duration: Duration,
    }

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct TestDurationVec {
        #[serde(
            deserialize_with = "deserialize_duration_vec_from_seconds",
            serialize_with = "serialize_duration_vec_to_seconds"
        )]
        durations: Vec<Duration>,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct TestStringList {
        #[serde(deserialize_with = "deserialize_string_list")]
        items: Vec<String>,
    }

    #[test]
    fn test_deserialize_duration_from_seconds() {
        let json = r#"{"duration": 5}"#;
        let expected = TestDurationSecs { duration: Duration::from_secs(5) };
        let actual: TestDurationSecs = serde_json::from_str(json).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_serialize_duration_to_seconds() {
        let data = TestDurationSecs { duration: Duration::from_secs(5) };
        let expected = r#"{"duration":5}"#;
        let actual = serde_json::to_string(&data).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_duration_vec_round_trip() {
        let data = TestDurationVec {
            durations: vec![Duration::from_secs(60), Duration::from_secs(0)],
        };
        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(json, r#"{"durations":[60,0]}"#);
        let decoded: TestDurationVec = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_deserialize_string_list_from_string() {
        let json = r#"{"items": "uid-a, uid-b,,uid-c"}"#;
        let actual: TestStringList = serde_json::from_str(json).unwrap();
        assert_eq!(actual.items, vec!["uid-a", "uid-b", "uid-c"]);
    }

    #[test]
    fn test_deserialize_string_list_from_seq() {
        let json = r#"{"items": ["uid-a", "uid-b"]}"#;
        let actual: TestStringList = serde_json::from_str(json).unwrap();
        assert_eq!(actual.items, vec!["uid-a", "uid-b"]);
    }
}
