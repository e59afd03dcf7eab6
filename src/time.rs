//! Time phrase resolution
//!
//! Turns relative and absolute time phrases into half-open `[start, end)`
//! ranges, always relative to the `now` handed in by the caller. Weeks start on
//! Monday.

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref BETWEEN: Regex =
        Regex::new(r"\b(?:between|from) (\d{4}-\d{2}-\d{2}) (?:and|to|until) (\d{4}-\d{2}-\d{2})\b").unwrap();
    static ref SINCE: Regex = Regex::new(r"\bsince (\d{4}-\d{2}-\d{2})\b").unwrap();
    static ref ON_DATE: Regex = Regex::new(r"\b(?:on |for )?(\d{4}-\d{2}-\d{2})\b").unwrap();
    static ref ROLLING: Regex =
        Regex::new(r"\b(?:in the )?(?:last|past) (\d{1,4}) (hour|hours|day|days|week|weeks|month|months)\b").unwrap();
    static ref ROLLING_ONE: Regex = Regex::new(r"\b(?:in the )?past (day|week|month|year)\b").unwrap();
    static ref TODAY: Regex = Regex::new(r"\b(today|tonight|yesterday)\b").unwrap();
    static ref CALENDAR: Regex = Regex::new(r"\b(this|last|previous) (week|month|year)\b").unwrap();
    static ref WEEKDAY: Regex = Regex::new(
        r"\b(last|on|this past|this) (monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b"
    )
    .unwrap();
}

/// Half-open time window `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Human phrase for summaries: "on 2026-10-13", "from 2026-10-05 to 2026-10-11".
    pub label: String,
}

impl TimeRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        let label = describe(start, end);
        Self { start, end, label }
    }

    /// Whole days `[first, last_exclusive)`.
    pub fn days(first: NaiveDate, last_exclusive: NaiveDate) -> Self {
        Self::new(midnight(first), midnight(last_exclusive))
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// A time phrase found in a prompt, with its byte span.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeMatch {
    pub range: TimeRange,
    pub start: usize,
    pub end: usize,
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn describe(start: NaiveDateTime, end: NaiveDateTime) -> String {
    let whole_days = start.time() == NaiveTime::MIN && end.time() == NaiveTime::MIN;
    if !whole_days {
        return format!(
            "from {} to {}",
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M")
        );
    }
    let last = end.date() - Duration::days(1);
    if last == start.date() {
        format!("on {}", start.date())
    } else {
        format!("from {} to {}", start.date(), last)
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn parse_weekday(s: &str) -> Option<Weekday> {
    match s {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

pub struct TimeResolver {
    now: NaiveDateTime,
}

impl TimeResolver {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now }
    }

    fn today(&self) -> NaiveDate {
        self.now.date()
    }

    fn tomorrow(&self) -> NaiveDate {
        self.today() + Duration::days(1)
    }

    fn week_start(&self) -> NaiveDate {
        let today = self.today();
        today - Duration::days(today.weekday().num_days_from_monday() as i64)
    }

    fn month_start(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.today().year(), self.today().month(), 1)
    }

    /// Earliest time phrase in `text` (lowercased), if any.
    ///
    /// Several phrases may match at the same offset ("on 2026-10-13" and the bare
    /// date); the longest one wins.
    pub fn find(&self, text: &str) -> Option<TimeMatch> {
        type Builder = fn(&TimeResolver, &Captures) -> Option<TimeRange>;
        let patterns: [(&Regex, Builder); 8] = [
            (&*BETWEEN, TimeResolver::between),
            (&*SINCE, TimeResolver::since),
            (&*ON_DATE, TimeResolver::on_date),
            (&*ROLLING, TimeResolver::rolling),
            (&*ROLLING_ONE, TimeResolver::rolling_one),
            (&*TODAY, TimeResolver::today_phrase),
            (&*CALENDAR, TimeResolver::calendar),
            (&*WEEKDAY, TimeResolver::weekday),
        ];

        let mut best: Option<TimeMatch> = None;
        for (regex, build) in patterns {
            for caps in regex.captures_iter(text) {
                let whole = match caps.get(0) {
                    Some(m) => m,
                    None => continue,
                };
                let range = match build(self, &caps) {
                    Some(range) => range,
                    None => continue,
                };
                let better = match &best {
                    None => true,
                    Some(b) => {
                        whole.start() < b.start
                            || (whole.start() == b.start && whole.end() > b.end)
                    }
                };
                if better {
                    best = Some(TimeMatch {
                        range,
                        start: whole.start(),
                        end: whole.end(),
                    });
                }
            }
        }
        best
    }

    pub fn resolve(&self, text: &str) -> Option<TimeRange> {
        self.find(text).map(|m| m.range)
    }

    fn between(&self, caps: &Captures) -> Option<TimeRange> {
        let first = parse_date(&caps[1])?;
        let last = parse_date(&caps[2])?;
        let (first, last) = if first <= last { (first, last) } else { (last, first) };
        Some(TimeRange::days(first, last + Duration::days(1)))
    }

    fn since(&self, caps: &Captures) -> Option<TimeRange> {
        let first = parse_date(&caps[1])?;
        if first > self.today() {
            return None;
        }
        Some(TimeRange::days(first, self.tomorrow()))
    }

    fn on_date(&self, caps: &Captures) -> Option<TimeRange> {
        let day = parse_date(&caps[1])?;
        Some(TimeRange::days(day, day + Duration::days(1)))
    }

    fn rolling(&self, caps: &Captures) -> Option<TimeRange> {
        let n: u32 = caps[1].parse().ok()?;
        if n == 0 {
            return None;
        }
        let today = self.today();
        match caps[2].trim_end_matches('s') {
            "hour" => Some(TimeRange::new(
                self.now - Duration::hours(n as i64),
                self.now,
            )),
            "day" => Some(TimeRange::days(
                today - Duration::days(n as i64 - 1),
                self.tomorrow(),
            )),
            "week" => Some(TimeRange::days(
                today - Duration::days(7 * n as i64 - 1),
                self.tomorrow(),
            )),
            "month" => {
                let start = today.checked_sub_months(Months::new(n))? + Duration::days(1);
                Some(TimeRange::days(start, self.tomorrow()))
            }
            _ => None,
        }
    }

    fn rolling_one(&self, caps: &Captures) -> Option<TimeRange> {
        let today = self.today();
        let start = match &caps[1] {
            "day" => today,
            "week" => today - Duration::days(6),
            "month" => today.checked_sub_months(Months::new(1))? + Duration::days(1),
            "year" => today.checked_sub_months(Months::new(12))? + Duration::days(1),
            _ => return None,
        };
        Some(TimeRange::days(start, self.tomorrow()))
    }

    fn today_phrase(&self, caps: &Captures) -> Option<TimeRange> {
        let today = self.today();
        match &caps[1] {
            "yesterday" => Some(TimeRange::days(today - Duration::days(1), today)),
            _ => Some(TimeRange::days(today, self.tomorrow())),
        }
    }

    fn calendar(&self, caps: &Captures) -> Option<TimeRange> {
        let current = &caps[1] == "this";
        match &caps[2] {
            "week" => {
                let monday = self.week_start();
                if current {
                    Some(TimeRange::days(monday, monday + Duration::days(7)))
                } else {
                    Some(TimeRange::days(monday - Duration::days(7), monday))
                }
            }
            "month" => {
                let first = self.month_start()?;
                if current {
                    Some(TimeRange::days(first, first.checked_add_months(Months::new(1))?))
                } else {
                    Some(TimeRange::days(first.checked_sub_months(Months::new(1))?, first))
                }
            }
            "year" => {
                let year = self.today().year() - if current { 0 } else { 1 };
                Some(TimeRange::days(
                    NaiveDate::from_ymd_opt(year, 1, 1)?,
                    NaiveDate::from_ymd_opt(year + 1, 1, 1)?,
                ))
            }
            _ => None,
        }
    }

    /// "last tuesday" and "this past tuesday" are strictly before today; "on
    /// tuesday" and "this tuesday" may be today.
    fn weekday(&self, caps: &Captures) -> Option<TimeRange> {
        let target = parse_weekday(&caps[2])?;
        let today = self.today();
        let mut back = (today.weekday().num_days_from_monday() + 7
            - target.num_days_from_monday())
            % 7;
        let strictly_before = matches!(&caps[1], "last" | "this past");
        if back == 0 && strictly_before {
            back = 7;
        }
        let day = today - Duration::days(back as i64);
        Some(TimeRange::days(day, day + Duration::days(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Saturday
    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 17)
            .unwrap()
            .and_hms_opt(15, 30, 0)
            .unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn resolve(text: &str) -> TimeRange {
        TimeResolver::new(now()).resolve(text).unwrap()
    }

    #[test]
    fn test_last_weekday_is_strictly_before_today() {
        let range = resolve("what was my peak viewer count last tuesday");
        assert_eq!(range.start, day(2026, 10, 13));
        assert_eq!(range.end, day(2026, 10, 14));
        assert_eq!(range.label, "on 2026-10-13");

        let range = resolve("streams last saturday");
        assert_eq!(range.start, day(2026, 10, 10));

        let range = resolve("streams on saturday");
        assert_eq!(range.start, day(2026, 10, 17));
    }

    #[test]
    fn test_calendar_weeks_start_monday() {
        let this_week = resolve("this week");
        assert_eq!(this_week.start, day(2026, 10, 12));
        assert_eq!(this_week.end, day(2026, 10, 19));

        let last_week = resolve("chat toxicity last week");
        assert_eq!(last_week.start, day(2026, 10, 5));
        assert_eq!(last_week.end, day(2026, 10, 12));
        assert_eq!(last_week.label, "from 2026-10-05 to 2026-10-11");
    }

    #[test]
    fn test_calendar_month_and_year() {
        let last_month = resolve("last month");
        assert_eq!(last_month.start, day(2026, 9, 1));
        assert_eq!(last_month.end, day(2026, 10, 1));

        let this_year = resolve("this year");
        assert_eq!(this_year.start, day(2026, 1, 1));
        assert_eq!(this_year.end, day(2027, 1, 1));
    }

    #[test]
    fn test_rolling_windows_include_today() {
        let range = resolve("in the last 7 days");
        assert_eq!(range.start, day(2026, 10, 11));
        assert_eq!(range.end, day(2026, 10, 18));

        let range = resolve("past 2 weeks");
        assert_eq!(range.start, day(2026, 10, 4));

        let range = resolve("past week");
        assert_eq!(range.start, day(2026, 10, 11));

        let range = resolve("last 24 hours");
        assert_eq!(range.end, now());
        assert_eq!(range.start, now() - Duration::hours(24));
    }

    #[test]
    fn test_today_and_yesterday() {
        assert_eq!(resolve("today").start, day(2026, 10, 17));
        let yesterday = resolve("yesterday");
        assert_eq!(yesterday.start, day(2026, 10, 16));
        assert_eq!(yesterday.end, day(2026, 10, 17));
    }

    #[test]
    fn test_absolute_dates() {
        let range = resolve("between 2026-09-01 and 2026-09-30");
        assert_eq!(range.start, day(2026, 9, 1));
        assert_eq!(range.end, day(2026, 10, 1));

        let range = resolve("since 2026-10-01");
        assert_eq!(range.start, day(2026, 10, 1));
        assert_eq!(range.end, day(2026, 10, 18));

        let found = TimeResolver::new(now()).find("streams on 2026-10-13").unwrap();
        assert_eq!(found.range.start, day(2026, 10, 13));
        assert_eq!(&"streams on 2026-10-13"[found.start..found.end], "on 2026-10-13");
    }

    #[test]
    fn test_invalid_or_missing_phrase() {
        let resolver = TimeResolver::new(now());
        assert!(resolver.resolve("on 2026-13-45").is_none());
        assert!(resolver.resolve("peak viewers by category").is_none());
    }

    #[test]
    fn test_earliest_phrase_wins() {
        let range = resolve("yesterday compared to last week");
        assert_eq!(range.start, day(2026, 10, 16));
    }

    #[test]
    fn test_range_contains_is_half_open() {
        let range = TimeRange::days(
            NaiveDate::from_ymd_opt(2026, 10, 13).unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 14).unwrap(),
        );
        assert!(range.contains(day(2026, 10, 13)));
        assert!(!range.contains(day(2026, 10, 14)));
    }
}
