//! Serde adapter for semi-structured columns.
//!
//! Nested data (GPS tracks, custody details, queue payloads) is kept as typed
//! Rust values in memory and written to the store as a JSON string column.
//! Use with `#[serde(with = "crate::json_blob")]`.

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};

pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: Serialize,
    S: Serializer,
{
    let text = serde_json::to_string(value).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&text)
}

pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: DeserializeOwned,
    D: Deserializer<'de>,
{
    // Accept the structured form too, so payloads built in memory round-trip.
    let raw = serde_json::Value::deserialize(deserializer)?;
    match raw {
        serde_json::Value::String(text) => serde_json::from_str(&text).map_err(serde::de::Error::custom),
        other => serde_json::from_value(other).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Holder {
        #[serde(with = "crate::json_blob")]
        points: Vec<(i64, i64)>,
    }

    #[test]
    fn writes_a_string_column() {
        let holder = Holder { points: vec![(1, 2), (3, 4)] };
        let value = serde_json::to_value(&holder).unwrap();
        assert_eq!(value["points"], serde_json::json!("[[1,2],[3,4]]"));
    }

    #[test]
    fn reads_string_and_structured_forms() {
        let from_string: Holder = serde_json::from_value(serde_json::json!({ "points": "[[5,6]]" })).unwrap();
        let from_array: Holder = serde_json::from_value(serde_json::json!({ "points": [[5, 6]] })).unwrap();
        assert_eq!(from_string, from_array);
    }
}
