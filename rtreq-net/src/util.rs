use std::fs;

/// Name of the machine, used as the default endpoint name.
pub(crate) fn hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    match fs::read_to_string("/etc/hostname") {
        Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => "localhost".to_string(),
    }
}

/// Serializes durations as a whole number of milliseconds.
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Same as `duration_millis`, for optional durations.
pub(crate) mod opt_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[test]
fn hostname_is_never_empty() {
    assert!(!hostname().is_empty());
}

#[test]
fn durations_serialize_as_millis() {
    #[derive(serde::Serialize, serde::Deserialize)]
    struct Wrapper {
        #[serde(with = "duration_millis")]
        timeout: std::time::Duration,
        #[serde(with = "opt_duration_millis")]
        uptime: Option<std::time::Duration>,
    }
    let json = serde_json::to_string(&Wrapper {
        timeout: std::time::Duration::from_millis(1500),
        uptime: None,
    })
    .unwrap();
    assert_eq!(json, r#"{"timeout":1500,"uptime":null}"#);
    let back: Wrapper = serde_json::from_str(r#"{"timeout":200,"uptime":3000}"#).unwrap();
    assert_eq!(back.timeout, std::time::Duration::from_millis(200));
    assert_eq!(back.uptime, Some(std::time::Duration::from_secs(3)));
}
