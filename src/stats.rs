//! Summary statistics over already-fetched collections.
//!
//! Every average falls back to 0.0 on an empty input.

use chrono::{DateTime, Utc};

use crate::models::{
    AcademicRecord, AttendeeRole, Classroom, Communication, Event, EventAttendee, EventStatus,
    LunchAccount, RsvpStatus, Student, SupportTicket, TicketStatus,
};

pub fn average(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Average current GPA over students that have one.
pub fn average_gpa(students: &[Student]) -> f64 {
    average(students.iter().filter_map(|s| s.current_gpa))
}

pub fn average_attendance(students: &[Student]) -> f64 {
    average(students.iter().filter_map(|s| s.attendance_rate))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcademicSummary {
    pub current_gpa: f64,
    pub average_gpa: f64,
    pub current_attendance: f64,
    pub average_attendance: f64,
    pub record_count: usize,
}

/// `records` must be ordered newest first; the head supplies the current values.
pub fn academic_summary(records: &[AcademicRecord]) -> AcademicSummary {
    let latest = records.first();
    AcademicSummary {
        current_gpa: latest.map_or(0.0, |r| r.gpa),
        average_gpa: average(records.iter().map(|r| r.gpa)),
        current_attendance: latest.map_or(0.0, |r| r.attendance_rate),
        average_attendance: average(records.iter().map(|r| r.attendance_rate)),
        record_count: records.len(),
    }
}

pub fn unread_count(messages: &[Communication]) -> usize {
    messages.iter().filter(|m| m.is_unread()).count()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentStats {
    pub total: usize,
    pub average_gpa: f64,
    pub average_attendance: f64,
}

pub fn student_stats(students: &[Student]) -> StudentStats {
    StudentStats {
        total: students.len(),
        average_gpa: average_gpa(students),
        average_attendance: average_attendance(students),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassroomStats {
    pub student_count: usize,
    pub average_gpa: f64,
    pub average_attendance: f64,
    /// Students whose current GPA is below the given floor.
    pub below_gpa_floor: usize,
}

pub fn classroom_stats(students: &[Student], gpa_floor: f64) -> ClassroomStats {
    ClassroomStats {
        student_count: students.len(),
        average_gpa: average_gpa(students),
        average_attendance: average_attendance(students),
        below_gpa_floor: students
            .iter()
            .filter(|s| s.current_gpa.is_some_and(|gpa| gpa < gpa_floor))
            .count(),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchoolStats {
    pub total_students: usize,
    pub total_teachers: usize,
    pub total_classrooms: usize,
    pub unassigned_classrooms: usize,
    pub upcoming_events: usize,
    pub average_gpa: f64,
    pub average_attendance: f64,
}

pub fn school_stats(
    students: &[Student],
    teacher_count: usize,
    classrooms: &[Classroom],
    events: &[Event],
) -> SchoolStats {
    SchoolStats {
        total_students: students.len(),
        total_teachers: teacher_count,
        total_classrooms: classrooms.len(),
        unassigned_classrooms: classrooms.iter().filter(|c| c.teacher_id.is_none()).count(),
        upcoming_events: events
            .iter()
            .filter(|e| e.status == EventStatus::Upcoming)
            .count(),
        average_gpa: average_gpa(students),
        average_attendance: average_attendance(students),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventStats {
    pub total: usize,
    pub upcoming: usize,
    pub cancelled: usize,
    pub completed: usize,
    /// Attendee rows with status `attending`.
    pub attending: usize,
    pub volunteers: usize,
}

pub fn event_stats(events: &[Event], attendees: &[EventAttendee]) -> EventStats {
    let by_status = |status: EventStatus| events.iter().filter(|e| e.status == status).count();
    let attending = attendees
        .iter()
        .filter(|a| a.status == RsvpStatus::Attending);
    EventStats {
        total: events.len(),
        upcoming: by_status(EventStatus::Upcoming),
        cancelled: by_status(EventStatus::Cancelled),
        completed: by_status(EventStatus::Completed),
        attending: attending.clone().count(),
        volunteers: attending.filter(|a| a.role == AttendeeRole::Volunteer).count(),
    }
}

pub fn attendee_count(event: &Event, attendees: &[EventAttendee]) -> usize {
    attendees.iter().filter(|a| a.event_id == event.id).count()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketStats {
    pub total: usize,
    pub open: usize,
    pub in_progress: usize,
    pub resolved: usize,
    pub closed: usize,
    /// Mean hours from creation to resolution over settled tickets.
    pub average_resolution_hours: f64,
}

pub fn ticket_stats(tickets: &[SupportTicket]) -> TicketStats {
    let by_status = |status: TicketStatus| tickets.iter().filter(|t| t.status == status).count();
    TicketStats {
        total: tickets.len(),
        open: by_status(TicketStatus::Open),
        in_progress: by_status(TicketStatus::InProgress),
        resolved: by_status(TicketStatus::Resolved),
        closed: by_status(TicketStatus::Closed),
        average_resolution_hours: average(tickets.iter().filter_map(|t| {
            t.resolved_at
                .map(|resolved| hours_between(t.created_at, resolved))
        })),
    }
}

fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_minutes() as f64 / 60.0
}

pub fn total_balance(accounts: &[LunchAccount]) -> f64 {
    accounts.iter().map(|a| a.balance).sum()
}

pub fn low_balance_accounts(accounts: &[LunchAccount], threshold: f64) -> Vec<LunchAccount> {
    accounts
        .iter()
        .filter(|a| a.balance < threshold)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::Map;
    use uuid::Uuid;

    fn student(gpa: Option<f64>, attendance: Option<f64>) -> Student {
        Student {
            id: Uuid::new_v4(),
            parent_id: Uuid::new_v4(),
            school_id: Uuid::new_v4(),
            classroom_id: None,
            first_name: "Avery".to_string(),
            last_name: "Lee".to_string(),
            grade_level: "4".to_string(),
            created_at: Utc::now(),
            current_gpa: gpa,
            attendance_rate: attendance,
        }
    }

    fn record(gpa: f64, attendance: f64) -> AcademicRecord {
        AcademicRecord {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            teacher_id: None,
            gpa,
            attendance_rate: attendance,
            grade_level: "4".to_string(),
            term: "fall".to_string(),
            year: 2026,
            subject_grades: Map::new(),
            comments: None,
            created_at: Utc::now(),
        }
    }

    fn lunch(balance: f64) -> LunchAccount {
        LunchAccount {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            parent_id: Uuid::new_v4(),
            balance,
            updated_at: None,
        }
    }

    #[test]
    fn empty_average_is_zero_not_nan() {
        assert_eq!(average(Vec::new()), 0.0);
        assert_eq!(academic_summary(&[]), AcademicSummary::default());
        assert_eq!(student_stats(&[]).average_gpa, 0.0);
    }

    #[test]
    fn average_gpa_of_two_students() {
        let students = vec![student(Some(3.8), None), student(Some(3.9), None)];
        assert!((average_gpa(&students) - 3.85).abs() < 1e-9);
    }

    #[test]
    fn students_without_records_are_left_out_of_averages() {
        let students = vec![student(Some(3.0), Some(90.0)), student(None, None)];
        let stats = student_stats(&students);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.average_gpa, 3.0);
        assert_eq!(stats.average_attendance, 90.0);
    }

    #[test]
    fn summary_uses_head_as_current_and_mean_over_all() {
        let records = vec![record(3.2, 96.0), record(3.6, 90.0), record(3.1, 93.0)];
        let summary = academic_summary(&records);
        assert_eq!(summary.current_gpa, 3.2);
        assert_eq!(summary.current_attendance, 96.0);
        assert!((summary.average_gpa - (3.2 + 3.6 + 3.1) / 3.0).abs() < 1e-9);
        assert!((summary.average_attendance - 93.0).abs() < 1e-9);
        assert_eq!(summary.record_count, 3);
    }

    #[test]
    fn lunch_totals_and_low_balances() {
        let accounts = vec![lunch(25.50), lunch(3.25)];
        assert!((total_balance(&accounts) - 28.75).abs() < 1e-9);
        let low = low_balance_accounts(&accounts, 5.0);
        assert_eq!(low, vec![accounts[1].clone()]);
    }

    #[test]
    fn classroom_counts_students_below_floor() {
        let students = vec![
            student(Some(1.8), Some(80.0)),
            student(Some(3.4), Some(97.0)),
            student(None, None),
        ];
        let stats = classroom_stats(&students, 2.0);
        assert_eq!(stats.student_count, 3);
        assert_eq!(stats.below_gpa_floor, 1);
        assert!((stats.average_attendance - 88.5).abs() < 1e-9);
    }

    #[test]
    fn ticket_resolution_hours_only_count_settled_tickets() {
        let created = Utc::now() - Duration::hours(10);
        let ticket = |status, resolved_at| SupportTicket {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            school_id: Uuid::new_v4(),
            title: "Login".to_string(),
            description: "Cannot sign in".to_string(),
            category: "account".to_string(),
            priority: Default::default(),
            status,
            created_at: created,
            resolved_at,
        };
        let tickets = vec![
            ticket(TicketStatus::Open, None),
            ticket(TicketStatus::Resolved, Some(created + Duration::hours(4))),
            ticket(TicketStatus::Closed, Some(created + Duration::hours(8))),
        ];
        let stats = ticket_stats(&tickets);
        assert_eq!(stats.open, 1);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.closed, 1);
        assert!((stats.average_resolution_hours - 6.0).abs() < 1e-9);
    }
}
