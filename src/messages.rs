use chrono::{DateTime, Datelike as _, Utc};
use chrono_tz::Tz;

use crate::debounce::Timestamp;

const MONTHS_GENITIVE: [&str; 12] = [
    "січня",
    "лютого",
    "березня",
    "квітня",
    "травня",
    "червня",
    "липня",
    "серпня",
    "вересня",
    "жовтня",
    "листопада",
    "грудня",
];

#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    PowerChanged { online: bool, at: DateTime<Tz> },
    Test { at: DateTime<Tz> },
}

impl Notification {
    pub fn at(&self) -> &DateTime<Tz> {
        match self {
            Notification::PowerChanged { at, .. } | Notification::Test { at } => at,
        }
    }

    pub fn online(&self) -> Option<bool> {
        match self {
            Notification::PowerChanged { online, .. } => Some(*online),
            Notification::Test { .. } => None,
        }
    }

    pub fn text(&self) -> String {
        let when = format_timestamp(self.at());
        match self {
            Notification::PowerChanged { online: true, .. } => {
                format!("✅ Електрику увімкнено!\n\n🕐 {when}")
            }
            Notification::PowerChanged { online: false, .. } => {
                format!("❌ Електрику вимкнено\n\n🕐 {when}")
            }
            Notification::Test { .. } => {
                format!("🧪 Тестове повідомлення\n\n🕐 {when}\n\nМоніторинг електроживлення працює!")
            }
        }
    }
}

/// "18 жовтня 2026 о 14:05"
pub fn format_timestamp(at: &DateTime<Tz>) -> String {
    let month = MONTHS_GENITIVE[at.month0() as usize];
    format!("{} {} {} о {}", at.day(), month, at.year(), at.format("%H:%M"))
}

pub fn local_time(ts: Timestamp, tz: Tz) -> DateTime<Tz> {
    let secs = ts.floor();
    let nanos = ((ts - secs) * 1e9) as u32;
    DateTime::<Utc>::from_timestamp(secs as i64, nanos)
        .unwrap_or_default()
        .with_timezone(&tz)
}
