//! Serde helpers shared by configuration types

/// Serialize a `Duration` as whole milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as milliseconds
    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    /// Deserialize from milliseconds
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "super::duration_ms")]
        wait: Duration,
    }

    #[test]
    fn test_duration_ms() {
        let json = serde_json::to_string(&Wrapper {
            wait: Duration::from_millis(1500),
        })
        .unwrap();
        assert_eq!(json, r#"{"wait":1500}"#);

        let back: Wrapper = serde_json::from_str(r#"{"wait":250}"#).unwrap();
        assert_eq!(back.wait, Duration::from_millis(250));
    }
}
