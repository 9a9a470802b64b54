// Weekday-restricted categories.
//
// A template listed under any day in `flair_schedule` is only allowed on the
// listed days. "Today" is judged at both ends of the date line so a post is
// accepted if it is a permitted day anywhere in the world.

use chrono::{DateTime, Datelike, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::BTreeMap;

/// Earliest and latest calendar days currently in effect.
const DATE_LINE_ZONES: [Tz; 2] = [chrono_tz::Pacific::Auckland, chrono_tz::Pacific::Honolulu];

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleVerdict {
    pub allowed: bool,
    /// Days the template may be used. Empty when the template is unrestricted.
    pub permitted_days: Vec<Weekday>,
}

impl ScheduleVerdict {
    fn unrestricted() -> Self {
        Self {
            allowed: true,
            permitted_days: Vec::new(),
        }
    }

    /// Human list such as "Mon, Wed".
    pub fn permitted_days_label(&self) -> String {
        self.permitted_days
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub fn parse_day(key: &str) -> Option<Weekday> {
    key.parse::<Weekday>().ok()
}

/// Days the calendar currently shows somewhere on Earth.
pub fn current_days(now: DateTime<Utc>) -> Vec<Weekday> {
    let mut days = Vec::with_capacity(DATE_LINE_ZONES.len());
    for tz in DATE_LINE_ZONES {
        let day = now.with_timezone(&tz).weekday();
        if !days.contains(&day) {
            days.push(day);
        }
    }
    days
}

/// Check a chosen template against a community schedule.
pub fn check_schedule(
    template_id: &str,
    schedule: &BTreeMap<String, Vec<String>>,
    now: DateTime<Utc>,
) -> ScheduleVerdict {
    let mut permitted_days: Vec<Weekday> = schedule
        .iter()
        .filter(|(_, ids)| ids.iter().any(|id| id == template_id))
        .filter_map(|(day, _)| parse_day(day))
        .collect();

    if permitted_days.is_empty() {
        return ScheduleVerdict::unrestricted();
    }
    permitted_days.sort_by_key(|d| d.num_days_from_sunday());

    let today = current_days(now);
    ScheduleVerdict {
        allowed: permitted_days.iter().any(|d| today.contains(d)),
        permitted_days,
    }
}
