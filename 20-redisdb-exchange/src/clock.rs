use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Source of the current time for envelopes and state timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Formats a timestamp as `2020-04-01T12:00:00+00:00`.
pub fn atom<Tz: chrono::TimeZone>(ts: &DateTime<Tz>) -> String {
    ts.fixed_offset().to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Serializes an optional timestamp in the [`atom`] format.
pub(crate) fn serialize_atom<S>(
    ts: &Option<DateTime<FixedOffset>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match ts {
        Some(ts) => serializer.serialize_str(&atom(ts)),
        None => serializer.serialize_none(),
    }
}

/// Reads an optional timestamp without ever failing.
///
/// Offsetless timestamps are taken as UTC; anything else that does not parse
/// becomes `None`.
pub(crate) fn deserialize_lenient<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<FixedOffset>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(Value::as_str).and_then(parse_lenient))
}

fn parse_lenient(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text).ok().or_else(|| {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc().fixed_offset())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn atom_uses_numeric_offset_and_whole_seconds() {
        let ts = Utc
            .with_ymd_and_hms(2020, 4, 1, 12, 0, 0)
            .single()
            .expect("valid date")
            + chrono::Duration::milliseconds(250);
        assert_eq!(atom(&ts), "2020-04-01T12:00:00+00:00");
    }

    #[test]
    fn lenient_timestamps_never_fail() {
        let parse = |text: &str| parse_lenient(text).map(|ts| atom(&ts));

        assert_eq!(
            parse("2020-04-01T14:00:00+02:00").as_deref(),
            Some("2020-04-01T14:00:00+02:00")
        );
        assert_eq!(
            parse("2020-04-01T12:00:00").as_deref(),
            Some("2020-04-01T12:00:00+00:00")
        );
        assert_eq!(
            parse("2020-04-01T12:00:00.125").as_deref(),
            Some("2020-04-01T12:00:00+00:00")
        );
        assert_eq!(parse("yesterday"), None);
    }
}
