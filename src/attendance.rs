use chrono::{Datelike, Duration, NaiveDate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Leave,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::Absent => "ABSENT",
            AttendanceStatus::Late => "LATE",
            AttendanceStatus::Leave => "LEAVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PRESENT" => Some(AttendanceStatus::Present),
            "ABSENT" => Some(AttendanceStatus::Absent),
            "LATE" => Some(AttendanceStatus::Late),
            "LEAVE" => Some(AttendanceStatus::Leave),
            _ => None,
        }
    }

    /// Toggle order used by the grid: PRESENT -> ABSENT -> LATE -> LEAVE,
    /// wrapping back to PRESENT.
    pub fn next(self) -> Self {
        match self {
            AttendanceStatus::Present => AttendanceStatus::Absent,
            AttendanceStatus::Absent => AttendanceStatus::Late,
            AttendanceStatus::Late => AttendanceStatus::Leave,
            AttendanceStatus::Leave => AttendanceStatus::Present,
        }
    }
}

/// Monday through Friday of the week containing `date`.
pub fn week_dates(date: NaiveDate) -> Vec<NaiveDate> {
    let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
    (0..5).map(|d| monday + Duration::days(d)).collect()
}

/// Display overlay for the single editable column: an unmarked cell reads as
/// PRESENT while edit mode is on. This is a view transform over the loaded
/// map and is never written back; only an explicit save persists anything.
pub fn display_status(
    stored: Option<AttendanceStatus>,
    edit_mode: bool,
) -> Option<AttendanceStatus> {
    match stored {
        Some(s) => Some(s),
        None if edit_mode => Some(AttendanceStatus::Present),
        None => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeeklyTier {
    Success,
    Warning,
    Danger,
}

impl WeeklyTier {
    pub fn as_str(self) -> &'static str {
        match self {
            WeeklyTier::Success => "success",
            WeeklyTier::Warning => "warning",
            WeeklyTier::Danger => "danger",
        }
    }
}

/// Display tier for the weekly present-count out of 5.
pub fn weekly_tier(present_count: usize) -> WeeklyTier {
    match present_count {
        5.. => WeeklyTier::Success,
        3 | 4 => WeeklyTier::Warning,
        _ => WeeklyTier::Danger,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_cycle_returns_after_four_steps() {
        for start in [
            AttendanceStatus::Present,
            AttendanceStatus::Absent,
            AttendanceStatus::Late,
            AttendanceStatus::Leave,
        ] {
            assert_eq!(start.next().next().next().next(), start);
        }
        assert_eq!(AttendanceStatus::Present.next(), AttendanceStatus::Absent);
        assert_eq!(AttendanceStatus::Leave.next(), AttendanceStatus::Present);
    }

    #[test]
    fn week_spans_monday_to_friday() {
        // 2026-03-11 is a Wednesday.
        let wed = NaiveDate::from_ymd_opt(2026, 3, 11).expect("date");
        let week = week_dates(wed);
        assert_eq!(week.len(), 5);
        assert_eq!(week[0], NaiveDate::from_ymd_opt(2026, 3, 9).expect("date"));
        assert_eq!(week[4], NaiveDate::from_ymd_opt(2026, 3, 13).expect("date"));

        // A Monday maps to its own week, as does a Sunday to the prior Monday.
        let mon = NaiveDate::from_ymd_opt(2026, 3, 9).expect("date");
        assert_eq!(week_dates(mon)[0], mon);
        let sun = NaiveDate::from_ymd_opt(2026, 3, 15).expect("date");
        assert_eq!(week_dates(sun)[0], mon);
    }

    #[test]
    fn unmarked_cells_default_to_present_only_in_edit_mode() {
        assert_eq!(display_status(None, false), None);
        assert_eq!(display_status(None, true), Some(AttendanceStatus::Present));
        assert_eq!(
            display_status(Some(AttendanceStatus::Absent), true),
            Some(AttendanceStatus::Absent)
        );
    }

    #[test]
    fn weekly_tier_thresholds() {
        assert_eq!(weekly_tier(5), WeeklyTier::Success);
        assert_eq!(weekly_tier(4), WeeklyTier::Warning);
        assert_eq!(weekly_tier(3), WeeklyTier::Warning);
        assert_eq!(weekly_tier(2), WeeklyTier::Danger);
        assert_eq!(weekly_tier(0), WeeklyTier::Danger);
    }
}
