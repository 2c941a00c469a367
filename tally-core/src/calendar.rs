use std::collections::HashSet;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

/// Decides which calendar day an instant belongs to.
/// All check-in dates are computed with one of these so "today" means the same thing everywhere.
#[derive(Debug, Clone, Copy)]
pub struct Calendar {
    offset: FixedOffset,
}

impl Calendar {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Returns the date of an instant in this calendar's time zone
    pub fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// Returns the current date
    pub fn today(&self) -> NaiveDate {
        self.date_of(Utc::now())
    }
}

/// Counts consecutive check-in days ending today, or yesterday if there is no check-in today yet.
/// Dates don't need to be sorted or unique.
pub fn compute_streak(dates: &[NaiveDate], today: NaiveDate) -> u32 {
    let days: HashSet<_> = dates.iter().copied().collect();

    let mut cursor = if days.contains(&today) {
        Some(today)
    } else {
        today.pred_opt()
    };

    let mut streak = 0;

    while let Some(day) = cursor.filter(|d| days.contains(d)) {
        streak += 1;
        cursor = day.pred_opt();
    }

    streak
}
