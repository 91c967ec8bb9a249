// 📅 Calendar helpers - month arithmetic and broadcast-day counting
//
// All schedule math works at month granularity:
//   implementation date = first day of the service month
//   expected payment    = (first of month + N months) - 1 day
//
// Dates are plain calendar dates (no timezone). Stores keep them as TEXT
// in YYYY-MM-DD; the billing ledger may also use YYYY/MM/DD.

use chrono::{Datelike, Duration, Months, NaiveDate, Weekday};

/// The only date literals the stores are allowed to contain
pub const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

/// Parse `YYYY-MM-DD` or `YYYY/MM/DD`. Anything else is `None`.
pub fn parse_date(date_str: &str) -> Option<NaiveDate> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.day0() as i64)
}

/// `date` moved by `days` (negative goes back); `None` outside chrono's range
pub fn offset_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    Duration::try_days(days).and_then(|delta| date.checked_add_signed(delta))
}

/// Calendar month addition; the day is clamped to the target month's end
pub fn add_months(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    date.checked_add_months(Months::new(months))
}

/// Last day of the month `months_ahead` months after `date`'s month.
///
/// `months_ahead = 0` is the end of the same month, `1` the end of the
/// following month. Computed as "first of month + (N + 1) months - 1 day".
pub fn month_end_after(date: NaiveDate, months_ahead: u32) -> Option<NaiveDate> {
    add_months(first_of_month(date), months_ahead + 1).and_then(|d| d.pred_opt())
}

pub fn end_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1).and_then(|first| month_end_after(first, 0))
}

/// First-of-month dates from `start`'s month through `end`'s month inclusive
pub fn months_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let last = first_of_month(end);
    let mut current = first_of_month(start);
    let mut months = Vec::new();

    while current <= last {
        months.push(current);
        match add_months(current, 1) {
            Some(next) => current = next,
            None => break,
        }
    }

    months
}

pub fn count_weekday_in_month(year: i32, month: u32, weekday: Weekday) -> u32 {
    let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
        return 0;
    };

    first
        .iter_days()
        .take_while(|d| d.month() == month)
        .filter(|d| d.weekday() == weekday)
        .count() as u32
}

/// Total broadcasts in a month: each configured weekday counted independently
pub fn count_broadcasts_in_month(year: i32, month: u32, days: &[Weekday]) -> u32 {
    days.iter()
        .map(|day| count_weekday_in_month(year, month, *day))
        .sum()
}

// ============================================================================
// BROADCAST DAY PARSING
// ============================================================================

fn weekday_from_kanji(c: char) -> Option<Weekday> {
    match c {
        '月' => Some(Weekday::Mon),
        '火' => Some(Weekday::Tue),
        '水' => Some(Weekday::Wed),
        '木' => Some(Weekday::Thu),
        '金' => Some(Weekday::Fri),
        '土' => Some(Weekday::Sat),
        '日' => Some(Weekday::Sun),
        _ => None,
    }
}

fn weekday_from_english(token: &str) -> Option<Weekday> {
    match token.to_lowercase().as_str() {
        "mon" | "monday" => Some(Weekday::Mon),
        "tue" | "tues" | "tuesday" => Some(Weekday::Tue),
        "wed" | "wednesday" => Some(Weekday::Wed),
        "thu" | "thur" | "thurs" | "thursday" => Some(Weekday::Thu),
        "fri" | "friday" => Some(Weekday::Fri),
        "sat" | "saturday" => Some(Weekday::Sat),
        "sun" | "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Parse a production's broadcast-day field.
///
/// Accepts `"月,水"`, `"月水金"`, `"月・水"`, `"月曜日、木曜日"` and English
/// names (`"Mon, Wed"`). Characters that are not day names are skipped.
/// Duplicates collapse so a weekday is never counted twice. An empty result
/// means nothing usable was configured.
pub fn parse_broadcast_days(raw: &str) -> Vec<Weekday> {
    let mut days: Vec<Weekday> = Vec::new();

    let tokens = raw
        .split(|c: char| BROADCAST_DAY_SEPARATORS.contains(&c) || c.is_whitespace())
        .map(str::trim)
        .filter(|t| !t.is_empty());

    for token in tokens {
        let parsed: Vec<Weekday> = match weekday_from_english(token) {
            Some(day) => vec![day],
            // "曜日" would otherwise read as Sunday
            None => token
                .replace("曜日", "")
                .replace('曜', "")
                .chars()
                .filter_map(weekday_from_kanji)
                .collect(),
        };

        for day in parsed {
            if !days.contains(&day) {
                days.push(day);
            }
        }
    }

    days
}

const BROADCAST_DAY_SEPARATORS: [char; 6] = [',', '、', '，', '・', '/', '／'];
