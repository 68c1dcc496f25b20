use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use colored::{ColoredString, Colorize};
use eyre::{Result, eyre};
use snapstore::domains::{budget, college, grocery, healthcare, library};
use snapstore::views::{Period, Tier};
use snapstore::{Backend, Config, Document, Error, Storage, Store};
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser)]
#[command(name = "snapstore")]
#[command(about = "SnapStore CLI - Inspect, export, import and reset app snapshots")]
#[command(version = env!("GIT_DESCRIBE"))]
struct Cli {
    /// Configuration file (default: <config dir>/snapstore/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the snapshots (overrides the config file)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Storage backend (overrides the config file)
    #[arg(short, long, value_enum)]
    backend: Option<Backend>,

    /// Log debug output to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Which app's snapshot to operate on
    #[arg(value_enum)]
    app: App,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum App {
    Budget,
    Library,
    Healthcare,
    Grocery,
    College,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current snapshot as JSON
    Show,

    /// Write the snapshot as pretty JSON to a file or stdout
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a previously exported file and replace the snapshot with it
    Import { file: PathBuf },

    /// Replace the snapshot with the app's starting data
    Reset,

    /// Print a summary of the snapshot
    Report {
        /// Month to report on, as YYYY-MM (default: current month)
        #[arg(short, long)]
        month: Option<Period>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so exported JSON on stdout stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .init();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }

    let storage = config.open_storage()?;
    match cli.app {
        App::Budget => run::<budget::BudgetDocument>(storage, cli.command, &config),
        App::Library => run::<library::LibraryDocument>(storage, cli.command, &config),
        App::Healthcare => run::<healthcare::HealthcareDocument>(storage, cli.command, &config),
        App::Grocery => run::<grocery::GroceryDocument>(storage, cli.command, &config),
        App::College => run::<college::CollegeDocument>(storage, cli.command, &config),
    }
}

fn run<D: Report>(storage: Box<dyn Storage>, command: Commands, config: &Config) -> Result<()> {
    let mut store = Store::<D>::open(storage)?;

    match command {
        Commands::Show => {
            println!("{}", serde_json::to_string(store.document())?);
        }
        Commands::Export { output } => match output {
            Some(path) => {
                store.export_to(&path)?;
                eprintln!("Exported {} to {}", D::storage_key(), path.display());
            }
            None => println!("{}", store.export_blob()?),
        },
        Commands::Import { file } => match store.import_from(&file) {
            Ok(()) => println!("Imported {} from {}", D::storage_key(), file.display()),
            Err(Error::Invalid(reason)) => {
                eprintln!("{} {}", "Import rejected:".red().bold(), reason);
                return Err(eyre!("import of {} rejected", file.display()));
            }
            Err(e) => return Err(e.into()),
        },
        Commands::Reset => {
            store.reset()?;
            println!("Reset {} to its starting data", D::storage_key());
        }
        Commands::Report { month } => {
            D::report(store.document(), config, month.unwrap_or_else(Period::current));
        }
    }

    Ok(())
}

fn tier_label(tier: Tier) -> ColoredString {
    match tier {
        Tier::Under => tier.to_string().green(),
        Tier::Near => tier.to_string().yellow(),
        Tier::Over => tier.to_string().red().bold(),
    }
}

/// Human-readable summary printed by `report`
trait Report: Document {
    fn report(doc: &Self, config: &Config, period: Period);
}

impl Report for budget::BudgetDocument {
    fn report(doc: &Self, config: &Config, period: Period) {
        let summary = budget::month_summary(doc, &period);
        println!("{} {} ({})", "Budget".bold(), period, doc.user.name);
        println!("  income   {:>12.2}", summary.income);
        println!("  expense  {:>12.2}", summary.expense);
        let net = format!("{:>12.2}", summary.net);
        println!("  net      {}", if summary.net < 0.0 { net.red() } else { net.green() });

        let breakdown = budget::spending_breakdown(doc, &period, config.views.top_categories);
        if !breakdown.is_empty() {
            println!("\n{}", "Top spending".bold());
            for row in breakdown {
                println!("  {:<20} {:>12.2} {:>6.1}%", row.name, row.amount, row.share_pct);
            }
        }

        let status = budget::budget_status(doc, &period, &config.thresholds.budget_scale());
        if !status.is_empty() {
            println!("\n{}", "Budgets".bold());
            for s in status {
                println!(
                    "  {:<20} {:>10.2} / {:<10.2} {:>6.1}% {}",
                    s.name,
                    s.spent,
                    s.limit,
                    s.progress.percent,
                    tier_label(s.progress.tier)
                );
            }
        }

        let goals = budget::goal_progress(doc, &config.thresholds.goal_scale());
        if !goals.is_empty() {
            println!("\n{}", "Saving goals".bold());
            for g in goals {
                let mark = if g.completed { " (completed)".green() } else { "".normal() };
                println!("  {:<20} {:>6.1}%{}", g.name, g.progress.percent, mark);
            }
        }
    }
}

impl Report for library::LibraryDocument {
    fn report(doc: &Self, _config: &Config, _period: Period) {
        let stats = library::stats(doc);
        println!("{}", "Library".bold());
        println!("  members    {}", stats.members);
        println!("  books      {}", stats.books);
        println!("  available  {}", stats.available.to_string().green());
        println!("  borrowed   {}", stats.borrowed.to_string().yellow());

        let loans = library::active_borrows(doc);
        if !loans.is_empty() {
            println!("\n{}", "On loan".bold());
            for loan in loans {
                println!("  {:<30} {}", loan.title, loan.member);
            }
        }
    }
}

impl Report for healthcare::HealthcareDocument {
    fn report(doc: &Self, _config: &Config, _period: Period) {
        println!("{}", "Healthcare".bold());
        println!("  patients      {}", doc.patients.len());
        println!("  doctors       {}", doc.doctors.len());
        println!("  appointments  {}", doc.appointments.len());

        let upcoming = healthcare::upcoming(doc, Utc::now());
        if !upcoming.is_empty() {
            println!("\n{}", "Upcoming".bold());
            for a in upcoming {
                println!("  {}  {:<20} {}", a.date.format("%Y-%m-%d %H:%M"), a.doctor, a.patient);
            }
        }
    }
}

impl Report for grocery::GroceryDocument {
    fn report(doc: &Self, _config: &Config, _period: Period) {
        println!("{}", "Grocery".bold());
        println!("  items  {}", doc.items.len());

        let lines = grocery::cart_lines(doc);
        if !lines.is_empty() {
            println!("\n{}", "Cart".bold());
            for line in &lines {
                println!("  {:<20} {:>4} x {:>8.2} = {:>10.2}", line.item, line.quantity, line.unit_price, line.line_total);
            }
        }
        println!("  total  {:.2}", grocery::cart_total(doc));
    }
}

impl Report for college::CollegeDocument {
    fn report(doc: &Self, _config: &Config, _period: Period) {
        println!("{}", "College admissions".bold());
        println!("  students  {}", doc.students.len());
        for (status, count) in college::status_counts(doc) {
            println!("  {:<14} {}", status.to_string(), count);
        }
    }
}
