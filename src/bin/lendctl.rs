//! Command-line front end for library staff.
//!
//! Runs single lending operations against the PostgreSQL database without
//! going through the daemon. Events raised by a command are delivered to
//! the log notifier of this process.
//!
//! # Usage
//!
//! ```bash
//! # Catalog and patrons
//! cargo run --bin lendctl -- book add --title "Dune" --author "Frank Herbert" --cost 20.00 --copies 2
//! cargo run --bin lendctl -- user add --name "Ada" --email ada@example.com
//!
//! # Loans
//! cargo run --bin lendctl -- checkout --book <BOOK_ID> --user <USER_ID>
//! cargo run --bin lendctl -- return --loan <LOAN_ID>
//! cargo run --bin lendctl -- lost --loan <LOAN_ID>
//!
//! # Reservations
//! cargo run --bin lendctl -- reserve --book <BOOK_ID> --user <USER_ID>
//! cargo run --bin lendctl -- cancel --reservation <RESERVATION_ID>
//! cargo run --bin lendctl -- queue --book <BOOK_ID>
//! cargo run --bin lendctl -- expire
//! ```
//!
//! # Environment Variables
//!
//! Same as the daemon, see `library_lending::config`.

use library_lending::application::LendingEngine;
use library_lending::config::{self, Config};
use library_lending::daemon;
use library_lending::domain::clock::{Clock, SystemClock};
use library_lending::domain::entities::{Book, BookId, LoanId, ReservationId, User, UserId};
use library_lending::error::AppError;
use library_lending::infrastructure::persistence::PgLendingRepository;
use library_lending::telemetry;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::Confirm;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::Arc;

/// CLI tool for the library lending engine.
#[derive(Parser)]
#[command(name = "lendctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage catalog entries
    Book {
        #[command(subcommand)]
        action: BookAction,
    },

    /// Manage patrons
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Lend a copy to a patron
    Checkout {
        #[arg(long)]
        book: BookId,
        #[arg(long)]
        user: UserId,
        /// Loan period in days (defaults to DEFAULT_LOAN_PERIOD_DAYS)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Close a loan as returned
    Return {
        #[arg(long)]
        loan: LoanId,
        /// Return time in RFC 3339 (defaults to now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Close a loan as lost and charge the replacement cost
    Lost {
        #[arg(long)]
        loan: LoanId,
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Join a book's waiting list
    Reserve {
        #[arg(long)]
        book: BookId,
        #[arg(long)]
        user: UserId,
    },

    /// Cancel an active reservation
    Cancel {
        #[arg(long)]
        reservation: ReservationId,
    },

    /// Show a book's waiting list
    Queue {
        #[arg(long)]
        book: BookId,
    },

    /// Expire uncollected reservations now
    Expire,

    /// List overdue loans
    Overdue,

    /// Show the fines of a loan
    Fines {
        #[arg(long)]
        loan: LoanId,
    },

    /// Database operations
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

#[derive(Subcommand)]
enum BookAction {
    /// Add a title with all copies on the shelf
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        author: String,
        /// Replacement cost charged when a copy is lost
        #[arg(long)]
        cost: Decimal,
        #[arg(long, default_value_t = 1)]
        copies: u32,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Register a patron
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
}

#[derive(Subcommand)]
enum DbAction {
    /// Check database connection
    Check,

    /// Apply pending migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = config::load_from_env()?;
    telemetry::init_tracing("warn", &config.log_format);

    let pool = daemon::connect(&config).await?;

    if let Err(e) = dispatch(cli.command, pool, &config).await {
        match e.downcast_ref::<AppError>() {
            Some(app) => {
                println!("{} {}", "❌".red(), app.to_string().red().bold());
                println!("   {}", app.details().to_string().bright_black());
            }
            None => println!("{} {}", "❌".red(), format!("{e:#}").red().bold()),
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn dispatch(command: Commands, pool: PgPool, config: &Config) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match command {
        Commands::Book { action } => handle_book_action(action, &pool).await,
        Commands::User { action } => handle_user_action(action, &pool).await,
        Commands::Db { action } => handle_db_action(action, &pool).await,
        command => {
            let engine = daemon::build_engine(pool, config, clock.clone());
            handle_lending(command, &engine, clock.as_ref()).await
        }
    }
}

async fn handle_book_action(action: BookAction, pool: &PgPool) -> Result<()> {
    let repo = PgLendingRepository::new(Arc::new(pool.clone()));

    match action {
        BookAction::Add {
            title,
            author,
            cost,
            copies,
        } => {
            let book = Book::new(title, author, cost, copies);
            repo.add_book(&book).await?;

            println!("{}", "✅ Book added".green().bold());
            println!("  Title:  {}", book.title.cyan());
            println!("  Copies: {}", book.total_copies.to_string().bright_white());
            println!("  ID:     {}", book.id.to_string().bright_yellow());
        }
    }

    Ok(())
}

async fn handle_user_action(action: UserAction, pool: &PgPool) -> Result<()> {
    let repo = PgLendingRepository::new(Arc::new(pool.clone()));

    match action {
        UserAction::Add { name, email } => {
            let user = User::new(name, email);
            repo.add_user(&user).await?;

            println!("{}", "✅ Patron registered".green().bold());
            println!("  Name: {}", user.name.cyan());
            println!("  ID:   {}", user.id.to_string().bright_yellow());
        }
    }

    Ok(())
}

async fn handle_lending(
    command: Commands,
    engine: &LendingEngine<PgLendingRepository>,
    clock: &dyn Clock,
) -> Result<()> {
    match command {
        Commands::Checkout { book, user, days } => {
            let loan = match days {
                Some(days) => engine.loans.checkout(book, user, days).await?,
                None => engine.loans.checkout_default(book, user).await?,
            };

            println!("{}", "📚 Checked out".green().bold());
            println!("  Loan: {}", loan.id.to_string().bright_yellow());
            println!(
                "  Due:  {}",
                loan.due_date.format("%Y-%m-%d %H:%M").to_string().cyan()
            );
        }
        Commands::Return { loan, at } => {
            let outcome = engine
                .loans
                .return_book(loan, at.unwrap_or_else(|| clock.now()))
                .await?;

            println!("{}", "📥 Returned".green().bold());
            match outcome.fine {
                Some(fine) => println!("  Late fee: {}", fine.amount.to_string().red().bold()),
                None => println!("  Late fee: {}", "none".bright_black()),
            }
            println!("  Copy:     {:?}", outcome.copy);
        }
        Commands::Lost { loan, yes } => {
            let current = engine.loans.get(loan).await?;
            println!("  Loan: {}", current.id.to_string().bright_yellow());
            println!("  Book: {}", current.book_id.to_string().bright_black());
            println!();

            if !yes {
                let confirmed = Confirm::new()
                    .with_prompt("Mark this loan as lost and charge the patron?")
                    .default(false)
                    .interact()?;

                if !confirmed {
                    println!("{}", "❌ Cancelled".red());
                    return Ok(());
                }
            }

            let outcome = engine.loans.mark_lost(loan).await?;
            println!("{}", "⚠️  Marked lost".yellow().bold());
            println!("  Charged: {}", outcome.fine.amount.to_string().red().bold());
        }
        Commands::Reserve { book, user } => {
            let reservation = engine.reservations.reserve(book, user).await?;

            println!("{}", "🔖 Reserved".green().bold());
            println!(
                "  Reservation: {}",
                reservation.id.to_string().bright_yellow()
            );
            println!(
                "  Position:    {}",
                reservation.position.to_string().bright_white().bold()
            );
        }
        Commands::Cancel { reservation } => {
            let cancelled = engine.reservations.cancel(reservation).await?;
            println!(
                "{} {}",
                "✅ Cancelled".green().bold(),
                cancelled.id.to_string().bright_black()
            );
        }
        Commands::Queue { book } => {
            let queue = engine.reservations.queue(book).await?;
            print_queue(&queue);
        }
        Commands::Expire => {
            let sweep = engine.reservations.expire_overdue(clock.now()).await?;
            println!(
                "  Expired:  {}",
                sweep.expired.len().to_string().bright_white().bold()
            );
            println!(
                "  Promoted: {}",
                sweep.promoted.len().to_string().bright_white().bold()
            );
        }
        Commands::Overdue => {
            let loans = engine.loans.overdue_loans(clock.now()).await?;
            if loans.is_empty() {
                println!("{}", "  No overdue loans".green());
            }
            for loan in &loans {
                println!(
                    "  {} {} due {}",
                    loan.id.to_string().bright_yellow(),
                    loan.user_id.to_string().bright_black(),
                    loan.due_date.format("%Y-%m-%d").to_string().red()
                );
            }
        }
        Commands::Fines { loan } => {
            let fines = engine.loans.fines_for_loan(loan).await?;
            if fines.is_empty() {
                println!("{}", "  No fines".green());
            }
            for fine in &fines {
                println!(
                    "  {:<12} {:>8} {}",
                    fine.kind.as_str().cyan(),
                    fine.amount.to_string().red().bold(),
                    fine.status.as_str().bright_black()
                );
            }
        }
        Commands::Book { .. } | Commands::User { .. } | Commands::Db { .. } => {
            anyhow::bail!("not a lending command")
        }
    }

    Ok(())
}

fn print_queue(queue: &[library_lending::domain::entities::Reservation]) {
    println!("{}", "📋 Waiting list".bright_blue().bold());
    println!();

    if queue.is_empty() {
        println!("{}", "  Nobody is waiting".yellow());
        return;
    }

    println!(
        "  {:<4} {:<38} {:<18} {}",
        "Pos".bright_white().bold(),
        "Patron".bright_white().bold(),
        "Status".bright_white().bold(),
        "Pickup by".bright_white().bold()
    );
    println!("  {}", "─".repeat(80).bright_black());

    for entry in queue {
        let status = if entry.is_ready() {
            entry.status.as_str().green()
        } else {
            entry.status.as_str().normal()
        };
        let deadline = entry
            .pickup_deadline
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();

        println!(
            "  {:<4} {:<38} {:<18} {}",
            entry.position,
            entry.user_id.to_string().cyan(),
            status,
            deadline.bright_black()
        );
    }
    println!();
}

async fn handle_db_action(action: DbAction, pool: &PgPool) -> Result<()> {
    match action {
        DbAction::Check => {
            println!("{}", "🔍 Checking database connection...".bright_blue());

            sqlx::query("SELECT 1").execute(pool).await?;

            println!("{}", "✅ Database connection OK".green().bold());
        }
        DbAction::Migrate => {
            sqlx::migrate!("./migrations")
                .run(pool)
                .await
                .context("Failed to migrate")?;

            println!("{}", "✅ Migrations applied".green().bold());
        }
    }

    Ok(())
}
