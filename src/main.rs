use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use uuid::Uuid;

use school_portal::config::Config;
use school_portal::db;
use school_portal::models::{AttendeeRole, NewTicket, Priority, RsvpStatus, TicketStatus, UserRole};
use school_portal::notify::{LogNotifier, Notifier};
use school_portal::report;
use school_portal::resources::communications::Communications;
use school_portal::resources::events::{RsvpRequest, SchoolEvents, Viewer};
use school_portal::resources::support_tickets::{SupportTickets, TicketScope};
use school_portal::session::{load_profile, load_profile_as};
use school_portal::store::memory::MemoryStore;
use school_portal::store::postgres::PgStore;
use school_portal::store::Store;

#[derive(Parser)]
#[command(name = "school-portal")]
#[command(about = "Data layer and dashboards for a school community portal", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "PORTAL_CONFIG", default_value = "portal.toml")]
    config: PathBuf,

    /// Postgres connection string (overrides config file)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import a student roster from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        school: Uuid,
    },
    /// Render the dashboard for a user's role as markdown
    Dashboard {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List a parent's messages
    Messages {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        mark_all_read: bool,
    },
    /// Respond to an event invitation
    Rsvp {
        #[arg(long)]
        event: Uuid,
        #[arg(long)]
        user: Uuid,
        #[arg(long, value_enum, default_value_t = RsvpArg::Attending)]
        status: RsvpArg,
        #[arg(long)]
        volunteer: bool,
    },
    /// Open or update support tickets
    Ticket {
        #[command(subcommand)]
        command: TicketCommands,
    },
    /// Run against an in-memory store with seed data and print every dashboard
    Demo,
}

#[derive(Subcommand)]
enum TicketCommands {
    Open {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long, default_value = "general")]
        category: String,
        #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,
    },
    Status {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        ticket: Uuid,
        #[arg(long, value_enum)]
        status: TicketStatusArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RsvpArg {
    Attending,
    Declined,
    Cancelled,
}

impl From<RsvpArg> for RsvpStatus {
    fn from(value: RsvpArg) -> Self {
        match value {
            RsvpArg::Attending => RsvpStatus::Attending,
            RsvpArg::Declined => RsvpStatus::Declined,
            RsvpArg::Cancelled => RsvpStatus::Cancelled,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PriorityArg {
    Low,
    Normal,
    High,
    Urgent,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::High => Priority::High,
            PriorityArg::Urgent => Priority::Urgent,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TicketStatusArg {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl From<TicketStatusArg> for TicketStatus {
    fn from(value: TicketStatusArg) -> Self {
        match value {
            TicketStatusArg::Open => TicketStatus::Open,
            TicketStatusArg::InProgress => TicketStatus::InProgress,
            TicketStatusArg::Resolved => TicketStatus::Resolved,
            TicketStatusArg::Closed => TicketStatus::Closed,
        }
    }
}

async fn connect(config: &Config) -> anyhow::Result<PgStore> {
    let database_url = config
        .database
        .url
        .as_deref()
        .context("DATABASE_URL must be set to a Postgres instance")?;

    PgStore::connect(database_url, &config.database)
        .await
        .context("failed to connect to Postgres")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("school_portal=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;
    if let Some(url) = cli.database_url {
        config.database.url = Some(url);
    }

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    match cli.command {
        Commands::InitDb => {
            let store = connect(&config).await?;
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let store = connect(&config).await?;
            let ids = db::seed(&store).await?;
            println!("Seed data inserted for school {}.", ids.school_id);
        }
        Commands::Import { csv, school } => {
            let store = connect(&config).await?;
            let inserted = db::import_csv(&store, school, &csv).await?;
            println!("Inserted {inserted} students from {}.", csv.display());
        }
        Commands::Dashboard { user, out } => {
            let store: Arc<dyn Store> = Arc::new(connect(&config).await?);
            let profile = load_profile(store.as_ref(), user).await?;
            let markdown = report::dashboard(store, notifier, &config, &profile).await;
            match out {
                Some(path) => {
                    std::fs::write(&path, markdown)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Dashboard written to {}.", path.display());
                }
                None => print!("{markdown}"),
            }
        }
        Commands::Messages { user, mark_all_read } => {
            let store: Arc<dyn Store> = Arc::new(connect(&config).await?);
            load_profile_as(store.as_ref(), user, UserRole::Parent).await?;
            let messages = Communications::new(store, notifier);
            messages.set_parent(Some(user)).await;
            if let Some(error) = messages.state().error {
                anyhow::bail!("could not load messages: {error}");
            }

            if mark_all_read {
                let marked = messages
                    .mark_all_as_read()
                    .await
                    .into_result()
                    .map_err(anyhow::Error::msg)?;
                println!("Marked {marked} messages as read.");
            }

            println!("{} unread", messages.unread_count());
            for message in messages.messages() {
                let marker = if message.is_unread() { "*" } else { " " };
                println!(
                    "{marker} {} {} ({:?})",
                    message.created_at.format("%Y-%m-%d"),
                    message.subject,
                    message.priority
                );
            }
        }
        Commands::Rsvp {
            event,
            user,
            status,
            volunteer,
        } => {
            let store: Arc<dyn Store> = Arc::new(connect(&config).await?);
            let profile = load_profile(store.as_ref(), user).await?;
            let school_id = profile
                .school_id
                .context("user is not attached to a school")?;
            let events = SchoolEvents::new(store, notifier);
            events
                .set_viewer(Some(Viewer {
                    school_id,
                    user_id: user,
                }))
                .await;

            let role = if volunteer {
                AttendeeRole::Volunteer
            } else {
                AttendeeRole::Guest
            };
            let attendee = events
                .rsvp(
                    event,
                    RsvpRequest {
                        status: status.into(),
                        role,
                        notes: None,
                    },
                )
                .await
                .into_result()
                .map_err(anyhow::Error::msg)?;
            println!("RSVP recorded: {:?} as {:?}.", attendee.status, attendee.role);
        }
        Commands::Ticket { command } => {
            let store: Arc<dyn Store> = Arc::new(connect(&config).await?);
            match command {
                TicketCommands::Open {
                    user,
                    title,
                    description,
                    category,
                    priority,
                } => {
                    let tickets = ticket_desk(store, notifier, user).await?;
                    let ticket = tickets
                        .create_ticket(NewTicket {
                            title,
                            description,
                            category,
                            priority: priority.into(),
                        })
                        .await
                        .into_result()
                        .map_err(anyhow::Error::msg)?;
                    println!("Ticket {} opened.", ticket.id);
                }
                TicketCommands::Status {
                    user,
                    ticket,
                    status,
                } => {
                    let tickets = ticket_desk(store, notifier, user).await?;
                    let updated = tickets
                        .update_status(ticket, status.into())
                        .await
                        .into_result()
                        .map_err(anyhow::Error::msg)?;
                    println!("Ticket {} is now {:?}.", updated.id, updated.status);
                }
            }
        }
        Commands::Demo => {
            let store = Arc::new(MemoryStore::portal());
            let ids = db::seed(store.as_ref()).await?;
            info!(school_id = %ids.school_id, "demo store seeded");

            for user_id in [ids.parent_id, ids.teacher_id, ids.admin_id] {
                let profile = load_profile(store.as_ref(), user_id).await?;
                let markdown =
                    report::dashboard(store.clone(), notifier.clone(), &config, &profile).await;
                println!("{markdown}");
            }
        }
    }

    Ok(())
}

/// Ticket desk scoped the way the user would see it in the portal.
async fn ticket_desk(
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    user_id: Uuid,
) -> anyhow::Result<SupportTickets> {
    let profile = load_profile(store.as_ref(), user_id).await?;
    let school_id = profile
        .school_id
        .context("user is not attached to a school")?;
    let scope = match profile.role {
        UserRole::SchoolAdmin => TicketScope::School { user_id, school_id },
        UserRole::Parent | UserRole::Teacher => TicketScope::User { user_id, school_id },
    };
    let tickets = SupportTickets::new(store, notifier);
    tickets.set_scope(Some(scope)).await;
    Ok(tickets)
}
