//! Wakeup probe backed by an iCalendar feed. Computes the next future
//! occurrence across all non-cancelled events, expanding `RRULE`
//! recurrences and honoring `EXDATE`/`RECURRENCE-ID` overrides the way a
//! real calendar client would.

use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use icalendar::{CalendarComponent, Component, DatePerhapsTime, Event};

use super::{required_option, Options, Wakeup};
use crate::checks::{CheckError, ConfigurationError};

/// Wakeup probe: fetches an `.ics` feed (local file or HTTP(S) URL) and
/// reports the earliest future event start time.
pub struct Calendar {
    name: String,
    source: Source,
    username: Option<String>,
    password: Option<String>,
}

enum Source {
    File(String),
    Http(String),
}

impl Calendar {
    pub fn from_config(name: &str, options: &Options) -> Result<Box<dyn Wakeup>, ConfigurationError> {
        let url = required_option(options, "url")?.to_string();
        let source = if url.starts_with("http://") || url.starts_with("https://") {
            Source::Http(url)
        } else {
            Source::File(url)
        };
        Ok(Box::new(Calendar {
            name: name.to_string(),
            source,
            username: options.get("username").cloned(),
            password: options.get("password").cloned(),
        }))
    }

    fn fetch(&self) -> Result<String, CheckError> {
        match &self.source {
            Source::File(path) => std::fs::read_to_string(path)
                .map_err(|e| CheckError::temporary(format!("cannot read calendar file {path}: {e}"))),
            Source::Http(url) => {
                let client = reqwest::blocking::Client::builder()
                    .timeout(StdDuration::from_secs(10))
                    .build()
                    .map_err(|e| CheckError::temporary(format!("cannot build http client: {e}")))?;
                let mut request = client.get(url);
                if let Some(username) = &self.username {
                    request = request.basic_auth(username, self.password.as_ref());
                }
                let response = request
                    .send()
                    .map_err(|e| CheckError::temporary(format!("cannot fetch {url}: {e}")))?;
                if !response.status().is_success() {
                    return Err(CheckError::temporary(format!(
                        "calendar fetch from {url} returned {}",
                        response.status()
                    )));
                }
                response
                    .text()
                    .map_err(|e| CheckError::temporary(format!("cannot read response body: {e}")))
            }
        }
    }
}

impl Wakeup for Calendar {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_wakeup(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, CheckError> {
        let raw = self.fetch()?;
        let calendar = Calendar_::from_str(&raw)
            .map_err(|e| CheckError::permanent(format!("cannot parse calendar: {e}")))?;
        Ok(next_occurrence(&calendar, now))
    }
}

// icalendar's own `Calendar` type shadows the probe's name above.
use icalendar::Calendar as Calendar_;

fn next_occurrence(calendar: &Calendar_, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let events: Vec<&Event> = calendar
        .components
        .iter()
        .filter_map(CalendarComponent::as_event)
        .collect();

    let overrides: Vec<&Event> = events
        .iter()
        .filter(|e| e.properties().contains_key("RECURRENCE-ID"))
        .copied()
        .collect();
    let masters: Vec<&Event> = events
        .iter()
        .filter(|e| !e.properties().contains_key("RECURRENCE-ID"))
        .copied()
        .collect();

    let mut candidates: Vec<DateTime<Utc>> = Vec::new();

    for event in &overrides {
        if is_cancelled(event) {
            continue;
        }
        if let Some(start) = event_start(event) {
            if start > now {
                candidates.push(start);
            }
        }
    }

    for event in &masters {
        if is_cancelled(event) {
            continue;
        }
        let exceptions: Vec<DateTime<Utc>> = overrides
            .iter()
            .filter(|o| o.get_uid() == event.get_uid())
            .filter_map(|o| recurrence_id(o))
            .collect();

        if let Some(rrule) = event.property_value("RRULE") {
            for occurrence in expand_recurrence(event, rrule) {
                if occurrence > now && !exceptions.contains(&occurrence) {
                    candidates.push(occurrence);
                }
            }
        } else if let Some(start) = event_start(event) {
            if start > now {
                candidates.push(start);
            }
        }
    }

    candidates.into_iter().min()
}

fn is_cancelled(event: &Event) -> bool {
    event.property_value("STATUS") == Some("CANCELLED")
}

fn event_start(event: &Event) -> Option<DateTime<Utc>> {
    let property = event.properties().get("DTSTART")?;
    date_perhaps_time_to_utc(&DatePerhapsTime::from_property(property)?)
}

fn recurrence_id(event: &Event) -> Option<DateTime<Utc>> {
    let property = event.properties().get("RECURRENCE-ID")?;
    date_perhaps_time_to_utc(&DatePerhapsTime::from_property(property)?)
}

fn date_perhaps_time_to_utc(value: &DatePerhapsTime) -> Option<DateTime<Utc>> {
    use icalendar::CalendarDateTime;
    match value {
        DatePerhapsTime::Date(date) => date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()),
        DatePerhapsTime::DateTime(CalendarDateTime::Utc(dt)) => Some(*dt),
        DatePerhapsTime::DateTime(CalendarDateTime::Floating(dt)) => Some(dt.and_utc()),
        DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, .. }) => {
            Some(date_time.and_utc())
        }
    }
}

fn expand_recurrence(event: &Event, rrule_value: &str) -> Vec<DateTime<Utc>> {
    let Some(dtstart) = event.property_value("DTSTART") else {
        return Vec::new();
    };
    let exdates: Vec<&str> = event
        .multi_properties()
        .get("EXDATE")
        .map(|props| props.iter().map(|p| p.value()).collect())
        .unwrap_or_default();

    let mut block = format!("DTSTART:{dtstart}\nRRULE:{rrule_value}");
    for exdate in exdates {
        block.push_str(&format!("\nEXDATE:{exdate}"));
    }

    let Ok(set) = rrule::RRuleSet::from_str(&block) else {
        return Vec::new();
    };
    set.all(512)
        .dates
        .into_iter()
        .map(|dt| dt.with_timezone(&Utc))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn calendar_from(ics: &str) -> Calendar_ {
        Calendar_::from_str(ics).unwrap()
    }

    #[test]
    fn single_event_start_in_future_is_reported() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ics = "\
BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//test//test//EN
BEGIN:VEVENT
UID:1
DTSTART:20240102T100000Z
SUMMARY:meeting
END:VEVENT
END:VCALENDAR
";
        let calendar = calendar_from(ics);
        let next = next_occurrence(&calendar, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap());
    }

    #[test]
    fn past_events_are_ignored() {
        let now = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let ics = "\
BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//test//test//EN
BEGIN:VEVENT
UID:1
DTSTART:20240102T100000Z
SUMMARY:meeting
END:VEVENT
END:VCALENDAR
";
        let calendar = calendar_from(ics);
        assert!(next_occurrence(&calendar, now).is_none());
    }

    #[test]
    fn recurring_event_expands_and_honors_exdate() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ics = "\
BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//test//test//EN
BEGIN:VEVENT
UID:weekly
DTSTART:20240102T100000Z
RRULE:FREQ=WEEKLY;COUNT=3
EXDATE:20240109T100000Z
SUMMARY:standup
END:VEVENT
END:VCALENDAR
";
        let calendar = calendar_from(ics);
        let next = next_occurrence(&calendar, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap());

        let now_after_first = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let next = next_occurrence(&calendar, now_after_first).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 16, 10, 0, 0).unwrap());
    }

    #[test]
    fn cancelled_event_is_ignored() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ics = "\
BEGIN:VCALENDAR
VERSION:2.0
PRODID:-//test//test//EN
BEGIN:VEVENT
UID:1
DTSTART:20240102T100000Z
STATUS:CANCELLED
SUMMARY:meeting
END:VEVENT
END:VCALENDAR
";
        let calendar = calendar_from(ics);
        assert!(next_occurrence(&calendar, now).is_none());
    }
}
