//! Snap transition timestamps onto a small set of wall-clock slots so that
//! many pages share the same expiry instant.

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::config::HarmonizationSettings;
use crate::domain::{DomainError, UnixTimestamp};

/// Parse an `"HH:MM"` slot.
pub fn parse_slot(value: &str) -> Result<NaiveTime, DomainError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|err| {
        DomainError::validation(format!("invalid harmonization slot `{value}`: {err}"))
    })
}

#[derive(Debug, Clone)]
pub struct Harmonizer {
    slots: Vec<NaiveTime>,
    tolerance_seconds: i64,
    timezone: Tz,
}

impl Harmonizer {
    pub fn new(mut slots: Vec<NaiveTime>, tolerance_seconds: u64, timezone: Tz) -> Self {
        slots.sort();
        slots.dedup();
        Self {
            slots,
            tolerance_seconds: i64::try_from(tolerance_seconds).unwrap_or(i64::MAX),
            timezone,
        }
    }

    /// `None` when harmonization is disabled.
    pub fn from_settings(settings: &HarmonizationSettings) -> Option<Self> {
        settings.enabled.then(|| {
            Self::new(
                settings.slots.clone(),
                settings.tolerance_seconds,
                settings.timezone,
            )
        })
    }

    pub fn slots(&self) -> &[NaiveTime] {
        &self.slots
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Nearest slot instant within tolerance, or `timestamp` unchanged.
    ///
    /// Candidates are taken from the local day of `timestamp` and its two
    /// neighbours. Slots falling into a DST gap are skipped; on an ambiguous
    /// local time the earlier instant is used. Equal distances resolve to the
    /// earlier candidate.
    pub fn harmonize(&self, timestamp: UnixTimestamp) -> UnixTimestamp {
        let Some(utc) = DateTime::<Utc>::from_timestamp(timestamp, 0) else {
            return timestamp;
        };
        let local_day = utc.with_timezone(&self.timezone).date_naive();

        let mut best: Option<(i64, UnixTimestamp)> = None;
        let days = [local_day.pred_opt(), Some(local_day), local_day.succ_opt()];
        for day in days.into_iter().flatten() {
            for slot in &self.slots {
                let Some(instant) = self
                    .timezone
                    .from_local_datetime(&day.and_time(*slot))
                    .earliest()
                else {
                    continue;
                };
                let candidate = instant.timestamp();
                let distance = (candidate - timestamp).abs();
                if best.is_none_or(|(closest, _)| distance < closest) {
                    best = Some((distance, candidate));
                }
            }
        }

        match best {
            Some((distance, candidate)) if distance <= self.tolerance_seconds => candidate,
            _ => timestamp,
        }
    }
}
