// 🎙️ Production Entity - programs and events that contracts belong to

use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::calendar;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Production {
    pub id: i64,
    pub name: String,

    /// "regular" program or one-off "event"
    pub production_type: Option<String>,

    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,

    /// Weekly broadcast days as entered, e.g. "月,水" or "月水金"
    pub broadcast_days: Option<String>,

    pub status: Option<String>,
}

impl Production {
    pub fn new(name: &str) -> Self {
        Production {
            id: 0,
            name: name.to_string(),
            production_type: None,
            start_date: None,
            end_date: None,
            broadcast_days: None,
            status: None,
        }
    }

    /// Broadcast-day field with NULL and blank treated the same
    pub fn broadcast_days_configured(&self) -> Option<&str> {
        self.broadcast_days
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Parsed weekdays; empty when nothing usable is configured
    pub fn broadcast_weekdays(&self) -> Vec<Weekday> {
        self.broadcast_days_configured()
            .map(calendar::parse_broadcast_days)
            .unwrap_or_default()
    }
}
