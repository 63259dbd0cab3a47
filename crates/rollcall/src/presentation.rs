//! Dashboard view model and presenters.
//!
//! [`build_dashboard`] derives everything a dashboard shows from the roster
//! and record set; presenters only decide where it goes.

use std::fmt::Write as _;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use tracing::info;

use crate::model::{AttendanceRecord, DayKey, Student};

/// Avatar tones, indexed by [`tone_index`].
pub const TONES: &[&str] = &["blue", "green", "purple", "orange", "pink"];

/// Head-count summary for one day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TodaySummary {
    /// Records for the day.
    pub present: usize,
    /// Roster entries without a record.
    pub absent: usize,
    /// `max(present, roster size)`.
    pub total: usize,
    /// Attendance rate in percent.
    pub percentage: f64,
}

impl TodaySummary {
    /// Summarize `present` check-ins against a roster of `roster_len`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(present: usize, roster_len: usize) -> Self {
        let percentage = if roster_len > 0 {
            present as f64 / roster_len as f64 * 100.0
        } else if present > 0 {
            100.0
        } else {
            0.0
        };
        Self {
            present,
            absent: roster_len.saturating_sub(present),
            total: present.max(roster_len),
            percentage,
        }
    }
}

/// One line in a recent-activity list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEntry {
    /// Avatar initials.
    pub initials: String,
    /// Student name.
    pub name: String,
    /// Student course.
    pub course: String,
    /// Student identifier.
    pub student_id: String,
    /// When they checked in.
    pub check_in_time: DateTime<Utc>,
    /// Avatar tone from [`TONES`].
    pub tone: &'static str,
}

impl From<&AttendanceRecord> for ActivityEntry {
    fn from(record: &AttendanceRecord) -> Self {
        Self {
            initials: initials(&record.name),
            name: record.name.clone(),
            course: record.course.clone(),
            student_id: record.student_id.clone(),
            check_in_time: record.check_in_time,
            tone: TONES[tone_index(&record.student_id, TONES.len())],
        }
    }
}

/// Everything a dashboard renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    /// The day being summarized.
    pub date: DayKey,
    /// Registered students.
    pub roster_size: usize,
    /// Head counts for `date`.
    pub summary: TodaySummary,
    /// Latest check-ins on `date`, newest first.
    pub recent: Vec<ActivityEntry>,
    /// Latest check-ins on any day, newest first.
    pub activity: Vec<ActivityEntry>,
}

/// Build the dashboard for `today`, keeping at most `limit` entries per list.
#[must_use]
pub fn build_dashboard(
    students: &[Student],
    records: &[AttendanceRecord],
    today: &DayKey,
    limit: usize,
) -> DashboardView {
    let mut todays: Vec<&AttendanceRecord> = records.iter().filter(|r| &r.date == today).collect();
    let present = todays.len();
    todays.sort_by(|a, b| b.check_in_time.cmp(&a.check_in_time));

    let mut all: Vec<&AttendanceRecord> = records.iter().collect();
    all.sort_by(|a, b| b.check_in_time.cmp(&a.check_in_time));

    DashboardView {
        date: today.clone(),
        roster_size: students.len(),
        summary: TodaySummary::new(present, students.len()),
        recent: todays.into_iter().take(limit).map(ActivityEntry::from).collect(),
        activity: all.into_iter().take(limit).map(ActivityEntry::from).collect(),
    }
}

/// First letter of each word, upper-cased.
#[must_use]
pub fn initials(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Stable palette slot for `key`: sum of code points modulo `palette_len`.
#[must_use]
pub fn tone_index(key: &str, palette_len: usize) -> usize {
    if palette_len == 0 {
        return 0;
    }
    key.chars()
        .fold(0usize, |acc, c| acc.wrapping_add(c as usize))
        % palette_len
}

/// Receives a fresh view after every change.
pub trait Presenter: Send + Sync + std::fmt::Debug {
    /// Show `view`.
    fn render(&self, view: &DashboardView);
}

/// Presenter that logs each view.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPresenter;

impl Presenter for TracingPresenter {
    fn render(&self, view: &DashboardView) {
        info!(
            date = %view.date,
            present = view.summary.present,
            absent = view.summary.absent,
            total = view.summary.total,
            percentage = view.summary.percentage,
            "Dashboard updated"
        );
    }
}

/// Render a view as a plain-text table, with times shown at `offset`.
#[must_use]
pub fn render_text(view: &DashboardView, offset: FixedOffset) -> String {
    let mut out = String::new();
    let s = &view.summary;
    let _ = writeln!(out, "Attendance for {}", view.date);
    let _ = writeln!(out, "===================");
    let _ = writeln!(out, "Present:    {}", s.present);
    let _ = writeln!(out, "Absent:     {}", s.absent);
    let _ = writeln!(out, "Total:      {}", s.total);
    let _ = writeln!(out, "Rate:       {:.0}%", s.percentage);

    write_entries(&mut out, "Recent check-ins", &view.recent, offset);
    write_entries(&mut out, "Recent activity", &view.activity, offset);
    out
}

/// One roster row for listings.
#[must_use]
pub fn student_line(student: &Student) -> String {
    format!(
        "{:<10} {:<24} {:<12} {}",
        student.student_id, student.name, student.course, student.email
    )
}

/// One attendance row for listings, with the time shown at `offset`.
#[must_use]
pub fn record_line(record: &AttendanceRecord, offset: FixedOffset) -> String {
    format!(
        "{} {:<10} {:<24} {:<12} {}",
        record.date,
        record.student_id,
        record.name,
        record.course,
        record.check_in_time.with_timezone(&offset).format("%H:%M:%S")
    )
}

fn write_entries(out: &mut String, title: &str, entries: &[ActivityEntry], offset: FixedOffset) {
    let _ = writeln!(out);
    let _ = writeln!(out, "{title}:");
    if entries.is_empty() {
        let _ = writeln!(out, "  (none)");
        return;
    }
    for e in entries {
        let _ = writeln!(
            out,
            "  [{:<3}] {:<24} {:<12} {:<10} {}",
            e.initials,
            e.name,
            e.course,
            e.student_id,
            e.check_in_time
                .with_timezone(&offset)
                .format("%Y-%m-%d %H:%M:%S")
        );
    }
}
