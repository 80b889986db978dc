use std::fmt::Write;
use std::sync::Arc;

use crate::config::Config;
use crate::models::{Communication, Profile, Student, SupportTicket, UserRole};
use crate::notify::Notifier;
use crate::resources::classroom::{ClassroomRoster, Classrooms};
use crate::resources::communications::Communications;
use crate::resources::events::{EventListing, SchoolEvents, Viewer};
use crate::resources::lunch_accounts::{Availability, LunchAccounts, LunchLedger};
use crate::resources::school_management::{SchoolManagement, SchoolOverview};
use crate::resources::students::Students;
use crate::resources::support_tickets::{SupportTickets, TicketScope};
use crate::resources::teacher_events::{OrganizedEvent, Organizer, TeacherEvents};
use crate::stats::{self, ClassroomStats, TicketStats};
use crate::store::Store;

pub struct ParentView {
    pub students: Vec<Student>,
    pub messages: Vec<Communication>,
    pub events: Vec<EventListing>,
    pub lunch: LunchLedger,
    pub tickets: Vec<SupportTicket>,
}

pub struct TeacherView {
    pub rosters: Vec<ClassroomRoster>,
    pub stats: ClassroomStats,
    pub events: Vec<OrganizedEvent>,
}

pub struct AdminView {
    pub overview: SchoolOverview,
    pub tickets: Vec<SupportTicket>,
    pub ticket_stats: TicketStats,
}

fn or_dash(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

pub fn parent_report(profile: &Profile, view: &ParentView, config: &Config) -> String {
    let mut output = String::new();
    let student_stats = stats::student_stats(&view.students);

    let _ = writeln!(output, "# Parent Dashboard");
    let _ = writeln!(output, "Signed in as {} ({})", profile.full_name(), profile.email);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Children");

    if view.students.is_empty() {
        let _ = writeln!(output, "No students linked to this account.");
    } else {
        for student in &view.students {
            let _ = writeln!(
                output,
                "- {} (grade {}) GPA {} attendance {}%",
                student.full_name(),
                student.grade_level,
                or_dash(student.current_gpa, 2),
                or_dash(student.attendance_rate, 1)
            );
        }
        let _ = writeln!(
            output,
            "Average GPA {:.2}, average attendance {:.1}%",
            student_stats.average_gpa, student_stats.average_attendance
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "## Messages ({} unread)",
        stats::unread_count(&view.messages)
    );
    if view.messages.is_empty() {
        let _ = writeln!(output, "No messages.");
    } else {
        for message in view.messages.iter().take(config.report.recent_messages) {
            let marker = if message.is_unread() { "*" } else { " " };
            let _ = writeln!(
                output,
                "-{marker}{} ({:?}, {})",
                message.subject,
                message.priority,
                message.created_at.format("%Y-%m-%d")
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Upcoming Events");
    write_listings(&mut output, &view.events, config.report.upcoming_events);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Lunch Accounts");
    match view.lunch.availability {
        Availability::NotImplemented => {
            let _ = writeln!(output, "Lunch accounts are not available yet.");
        }
        Availability::Unknown => {
            let _ = writeln!(output, "Lunch balances have not loaded.");
        }
        Availability::Available => {
            let low = stats::low_balance_accounts(
                &view.lunch.accounts,
                config.portal.low_balance_threshold,
            );
            let _ = writeln!(
                output,
                "Total balance ${:.2} across {} accounts, {} low",
                stats::total_balance(&view.lunch.accounts),
                view.lunch.accounts.len(),
                low.len()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Support Tickets");
    write_tickets(&mut output, &view.tickets);

    output
}

pub fn teacher_report(profile: &Profile, view: &TeacherView, config: &Config) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Teacher Dashboard");
    let _ = writeln!(output, "Signed in as {} ({})", profile.full_name(), profile.email);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Classrooms");

    if view.rosters.is_empty() {
        let _ = writeln!(output, "No classrooms assigned.");
    } else {
        for roster in &view.rosters {
            let room = stats::classroom_stats(&roster.students, config.portal.gpa_floor);
            let _ = writeln!(
                output,
                "- {} (grade {}): {} students, GPA {:.2}, attendance {:.1}%",
                roster.classroom.name,
                roster.classroom.grade_level,
                room.student_count,
                room.average_gpa,
                room.average_attendance
            );
        }
        let _ = writeln!(
            output,
            "{} of {} students below GPA {:.1}",
            view.stats.below_gpa_floor, view.stats.student_count, config.portal.gpa_floor
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## My Events");
    if view.events.is_empty() {
        let _ = writeln!(output, "No events organised.");
    } else {
        for organized in view.events.iter().take(config.report.upcoming_events) {
            let _ = writeln!(
                output,
                "- {} on {} ({:?}): {} responses",
                organized.event.title,
                organized.event.start_time.format("%Y-%m-%d %H:%M"),
                organized.event.status,
                organized.attendee_count
            );
        }
    }

    output
}

pub fn admin_report(profile: &Profile, view: &AdminView, config: &Config) -> String {
    let mut output = String::new();
    let school = stats::school_stats(
        &view.overview.students,
        view.overview.teachers.len(),
        &view.overview.classrooms,
        &view.overview.events,
    );

    let _ = writeln!(output, "# School Admin Dashboard");
    let _ = writeln!(output, "Signed in as {} ({})", profile.full_name(), profile.email);
    let _ = writeln!(output);
    let _ = writeln!(output, "## School Overview");
    let _ = writeln!(output, "- Students: {}", school.total_students);
    let _ = writeln!(output, "- Teachers: {}", school.total_teachers);
    let _ = writeln!(
        output,
        "- Classrooms: {} ({} without a teacher)",
        school.total_classrooms, school.unassigned_classrooms
    );
    let _ = writeln!(output, "- Upcoming events: {}", school.upcoming_events);
    let _ = writeln!(
        output,
        "- Average GPA {:.2}, average attendance {:.1}%",
        school.average_gpa, school.average_attendance
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Events");
    if view.overview.events.is_empty() {
        let _ = writeln!(output, "No events scheduled.");
    } else {
        for event in view.overview.events.iter().take(config.report.upcoming_events) {
            let _ = writeln!(
                output,
                "- {} on {} ({:?})",
                event.title,
                event.start_time.format("%Y-%m-%d %H:%M"),
                event.status
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Support Tickets");
    let _ = writeln!(
        output,
        "{} open, {} in progress, {} resolved, {} closed",
        view.ticket_stats.open,
        view.ticket_stats.in_progress,
        view.ticket_stats.resolved,
        view.ticket_stats.closed
    );
    if view.ticket_stats.average_resolution_hours > 0.0 {
        let _ = writeln!(
            output,
            "Average resolution time {:.1} hours",
            view.ticket_stats.average_resolution_hours
        );
    }
    write_tickets(&mut output, &view.tickets);

    output
}

fn write_listings(output: &mut String, listings: &[EventListing], limit: usize) {
    if listings.is_empty() {
        let _ = writeln!(output, "No upcoming events.");
        return;
    }
    for listing in listings.iter().take(limit) {
        let rsvp = match &listing.my_rsvp {
            Some(attendee) => format!("{:?} as {:?}", attendee.status, attendee.role),
            None => "no response".to_string(),
        };
        let _ = writeln!(
            output,
            "- {} on {} at {} ({} attending, {})",
            listing.event.title,
            listing.event.start_time.format("%Y-%m-%d %H:%M"),
            listing.event.location.as_deref().unwrap_or("TBA"),
            listing.attending,
            rsvp
        );
    }
}

fn write_tickets(output: &mut String, tickets: &[SupportTicket]) {
    let open: Vec<&SupportTicket> = tickets.iter().filter(|t| !t.status.is_settled()).collect();
    if open.is_empty() {
        let _ = writeln!(output, "No open tickets.");
        return;
    }
    for ticket in open {
        let _ = writeln!(
            output,
            "- {} [{:?}, {:?}] opened {}",
            ticket.title,
            ticket.status,
            ticket.priority,
            ticket.created_at.format("%Y-%m-%d")
        );
    }
}

/// Loads every resource a role's dashboard needs for `profile` and renders it.
pub async fn dashboard(
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    config: &Config,
    profile: &Profile,
) -> String {
    let user_id = profile.id;
    match (profile.role, profile.school_id) {
        (UserRole::Parent, school_id) => {
            let students = Students::new(store.clone(), notifier.clone());
            let messages = Communications::new(store.clone(), notifier.clone());
            let events = SchoolEvents::new(store.clone(), notifier.clone());
            let lunch = LunchAccounts::new(
                store.clone(),
                notifier.clone(),
                config.portal.low_balance_threshold,
            );
            let tickets = SupportTickets::new(store, notifier);

            let viewer = school_id.map(|school_id| Viewer { school_id, user_id });
            let scope = school_id.map(|school_id| TicketScope::User { user_id, school_id });
            tokio::join!(
                students.set_parent(Some(user_id)),
                messages.set_parent(Some(user_id)),
                events.set_viewer(viewer),
                lunch.set_parent(Some(user_id)),
                tickets.set_scope(scope),
            );

            let view = ParentView {
                students: students.students(),
                messages: messages.messages(),
                events: events.events(),
                lunch: lunch.ledger(),
                tickets: tickets.tickets(),
            };
            parent_report(profile, &view, config)
        }
        (UserRole::Teacher, school_id) => {
            let classes = Classrooms::new(store.clone(), notifier.clone(), config.portal.gpa_floor);
            let events = TeacherEvents::new(store, notifier);
            let organizer = school_id.map(|school_id| Organizer { user_id, school_id });
            tokio::join!(
                classes.set_teacher(Some(user_id)),
                events.set_organizer(organizer),
            );

            let view = TeacherView {
                rosters: classes.rosters(),
                stats: classes.stats(),
                events: events.events(),
            };
            teacher_report(profile, &view, config)
        }
        (UserRole::SchoolAdmin, school_id) => {
            let management = SchoolManagement::new(store.clone(), notifier.clone());
            let tickets = SupportTickets::new(store, notifier);
            let scope = school_id.map(|school_id| TicketScope::School { user_id, school_id });
            tokio::join!(management.set_school(school_id), tickets.set_scope(scope));

            let view = AdminView {
                overview: management.overview(),
                ticket_stats: tickets.stats(),
                tickets: tickets.tickets(),
            };
            admin_report(profile, &view, config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::notify::RecordingNotifier;
    use crate::session::load_profile;
    use crate::store::memory::MemoryStore;

    async fn seeded() -> (Arc<MemoryStore>, db::SeedIds) {
        let store = Arc::new(MemoryStore::portal());
        let ids = db::seed(store.as_ref()).await.unwrap();
        (store, ids)
    }

    #[tokio::test]
    async fn parent_dashboard_lists_children_and_unread_messages() {
        let (store, ids) = seeded().await;
        let profile = load_profile(store.as_ref(), ids.parent_id).await.unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let report = dashboard(store, notifier, &Config::default(), &profile).await;

        assert!(report.starts_with("# Parent Dashboard"));
        assert!(report.contains("- Avery Lee (grade 4) GPA 3.80 attendance 96.0%"));
        assert!(report.contains("## Messages (2 unread)"));
        assert!(report.contains("Fall Festival"));
        assert!(report.contains("Lunch accounts are not available yet."));
        assert!(report.contains("Cannot see report card"));
    }

    #[tokio::test]
    async fn teacher_dashboard_summarises_classrooms() {
        let (store, ids) = seeded().await;
        let profile = load_profile(store.as_ref(), ids.teacher_id).await.unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let report = dashboard(store, notifier, &Config::default(), &profile).await;

        assert!(report.contains("- 4B (grade 4): 2 students, GPA 3.50, attendance 93.5%"));
        assert!(report.contains("0 of 2 students below GPA 2.0"));
        assert!(report.contains("Science Night"));
    }

    #[tokio::test]
    async fn admin_dashboard_counts_the_school() {
        let (store, ids) = seeded().await;
        let profile = load_profile(store.as_ref(), ids.admin_id).await.unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let report = dashboard(store, notifier, &Config::default(), &profile).await;

        assert!(report.contains("- Students: 2"));
        assert!(report.contains("- Teachers: 1"));
        assert!(report.contains("- Classrooms: 1 (0 without a teacher)"));
        assert!(report.contains("- Upcoming events: 3"));
        assert!(report.contains("1 open, 0 in progress, 0 resolved, 0 closed"));
    }

    #[test]
    fn empty_parent_view_renders_placeholders() {
        let profile = Profile {
            id: uuid::Uuid::new_v4(),
            school_id: None,
            role: UserRole::Parent,
            first_name: "Dana".into(),
            last_name: "Lee".into(),
            email: "dana@example.com".into(),
        };
        let view = ParentView {
            students: Vec::new(),
            messages: Vec::new(),
            events: Vec::new(),
            lunch: LunchLedger::default(),
            tickets: Vec::new(),
        };
        let report = parent_report(&profile, &view, &Config::default());
        assert!(report.contains("No students linked to this account."));
        assert!(report.contains("## Messages (0 unread)"));
        assert!(report.contains("No upcoming events."));
        assert!(report.contains("Lunch balances have not loaded."));
        assert!(report.contains("No open tickets."));
    }
}
