//! Project-timezone clock.
//!
//! The deployment runs in a non-UTC operational zone (Europe/Kaliningrad by
//! default, configurable). Scheduler fire times, audit timestamps and document
//! dates all cross-reference each other, so every "now" in business logic is
//! local-now from this clock — never the host's UTC. Timestamps are stored
//! naive (`TIMESTAMP WITHOUT TIME ZONE`).

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;

use crate::error::MirrorError;

/// The single source of "now" for the whole workspace.
#[derive(Debug, Clone, Copy)]
pub struct LocalClock {
    tz: Tz,
}

pub const DEFAULT_TZ: &str = "Europe/Kaliningrad";

impl LocalClock {
    /// Parses an IANA zone name, e.g. `"Europe/Kaliningrad"`.
    pub fn new(tz_name: &str) -> Result<Self, MirrorError> {
        let tz: Tz = tz_name
            .parse()
            .map_err(|_| MirrorError::Config(format!("bad timezone: {tz_name}")))?;
        Ok(Self { tz })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Current local wall time, naive.
    pub fn now(&self) -> NaiveDateTime {
        self.at(Utc::now())
    }

    /// Converts an arbitrary UTC instant into local naive time. Split out so
    /// tests can pin the instant.
    pub fn at(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.tz).naive_local()
    }

    /// `yyyy-MM-ddTHH:mm:ss` — the accounting-instant format the POS expects.
    pub fn now_pos_timestamp(&self) -> String {
        self.now().format("%Y-%m-%dT%H:%M:%S").to_string()
    }

    /// `DD.MM.YYYY` — the date format of the v1 OLAP endpoint.
    pub fn today_olap(&self) -> String {
        self.now().format("%d.%m.%Y").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn kaliningrad_is_utc_plus_two() {
        let clock = LocalClock::new(DEFAULT_TZ).unwrap();
        let instant = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let local = clock.at(instant);
        assert_eq!(local.format("%H:%M").to_string(), "14:00");
    }

    #[test]
    fn bad_zone_name_fails() {
        assert!(LocalClock::new("Mars/Olympus").is_err());
    }

    #[test]
    fn pos_timestamp_format() {
        let clock = LocalClock::new(DEFAULT_TZ).unwrap();
        let ts = clock.now_pos_timestamp();
        assert_eq!(ts.len(), 19);
        assert_eq!(&ts[10..11], "T");
    }
}
