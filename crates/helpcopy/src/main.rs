use std::io::{BufRead, Write};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use helpcopy_core::cleanup::{CleanupReport, collect_categories, delete_categories};
use helpcopy_core::client::{HelpCenterClient, HelpCenterClientConfig, HelpCenterReadApi};
use helpcopy_core::copier::{
    CopyEvent, CopyPhase, CopyProgress, CopyReport, HelpCenterCopier, LevelSummary,
};
use helpcopy_core::credentials::{
    Credentials, DEST_ENV_PREFIX, PartialCredentials, SOURCE_ENV_PREFIX, mask_token,
};

#[derive(Debug, Parser)]
#[command(
    name = "helpcopy",
    version,
    about = "Copy a Zendesk help center's categories, sections and articles between instances"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Copy all help center content from source to destination")]
    Copy(CopyArgs),
    #[command(about = "Delete every category (and its subtree) on the destination")]
    Cleanup(CleanupArgs),
}

#[derive(Debug, Args)]
struct CopyArgs {
    #[arg(long, value_name = "SUBDOMAIN", help = "Source Zendesk subdomain")]
    source_subdomain: Option<String>,
    #[arg(long, value_name = "EMAIL", help = "Source account email")]
    source_email: Option<String>,
    #[arg(long, value_name = "TOKEN", help = "Source API token")]
    source_token: Option<String>,
    #[arg(long, value_name = "SUBDOMAIN", help = "Destination Zendesk subdomain")]
    dest_subdomain: Option<String>,
    #[arg(long, value_name = "EMAIL", help = "Destination account email")]
    dest_email: Option<String>,
    #[arg(long, value_name = "TOKEN", help = "Destination API token")]
    dest_token: Option<String>,
    #[arg(long, short = 'y', help = "Skip the confirmation prompt")]
    yes: bool,
}

#[derive(Debug, Args)]
struct CleanupArgs {
    #[arg(long, value_name = "SUBDOMAIN", help = "Destination Zendesk subdomain")]
    subdomain: Option<String>,
    #[arg(long, value_name = "EMAIL", help = "Destination account email")]
    email: Option<String>,
    #[arg(long, value_name = "TOKEN", help = "Destination API token")]
    token: Option<String>,
    #[arg(long, short = 'y', help = "Skip the typed DELETE confirmation")]
    yes: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    match cli.command {
        Commands::Copy(args) => run_copy(args),
        Commands::Cleanup(args) => run_cleanup(args),
    }
}

fn run_copy(args: CopyArgs) -> Result<()> {
    let source_creds = resolve_credentials(
        "source",
        SOURCE_ENV_PREFIX,
        PartialCredentials::from_values(
            args.source_subdomain.as_deref(),
            args.source_email.as_deref(),
            args.source_token.as_deref(),
        ),
    )?;
    let dest_creds = resolve_credentials(
        "destination",
        DEST_ENV_PREFIX,
        PartialCredentials::from_values(
            args.dest_subdomain.as_deref(),
            args.dest_email.as_deref(),
            args.dest_token.as_deref(),
        ),
    )?;

    if source_creds.subdomain == dest_creds.subdomain {
        bail!(
            "source and destination are the same instance ({}); refusing to copy",
            source_creds.subdomain
        );
    }

    let mut source = connect("source", &source_creds)?;
    let mut dest = connect("destination", &dest_creds)?;

    println!();
    println!("copy plan");
    println!("source: {}.zendesk.com ({})", source_creds.subdomain, source_creds.email);
    println!(
        "destination: {}.zendesk.com ({})",
        dest_creds.subdomain, dest_creds.email
    );
    if !args.yes {
        let answer = prompt_line("Proceed with the copy? [y/N] ")?;
        if !matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
            println!("aborted");
            return Ok(());
        }
    }

    let mut progress = PrintProgress;
    let report = HelpCenterCopier::new(&mut source, &mut dest, &mut progress).copy_all();
    render_copy_report(&report);

    if !report.success {
        bail!("copy did not complete; see errors above");
    }
    Ok(())
}

fn run_cleanup(args: CleanupArgs) -> Result<()> {
    let creds = resolve_credentials(
        "destination",
        DEST_ENV_PREFIX,
        PartialCredentials::from_values(
            args.subdomain.as_deref(),
            args.email.as_deref(),
            args.token.as_deref(),
        ),
    )?;
    let mut dest = connect("destination", &creds)?;

    let (categories, listing_errors) = collect_categories(&mut dest);
    for error in &listing_errors {
        eprintln!("{} {error}", "warning:".yellow());
    }
    if categories.is_empty() {
        if !listing_errors.is_empty() {
            bail!("could not list destination categories; nothing was deleted");
        }
        println!("no categories on {}.zendesk.com; nothing to delete", creds.subdomain);
        return Ok(());
    }

    println!();
    println!(
        "{}",
        format!(
            "About to delete ALL {} categories on {}.zendesk.com, including every \
             section and article underneath them.",
            categories.len(),
            creds.subdomain
        )
        .red()
        .bold()
    );
    for category in categories.iter().take(10) {
        println!("  - {} ({})", category.name, category.id);
    }
    if categories.len() > 10 {
        println!("  ... and {} more", categories.len() - 10);
    }

    if !args.yes {
        let answer = prompt_line("Type DELETE to confirm: ")?;
        if answer.trim() != "DELETE" {
            println!("aborted");
            return Ok(());
        }
    }

    let mut report = delete_categories(&mut dest, &categories);
    if !listing_errors.is_empty() {
        report.success = false;
        report.errors.extend(listing_errors);
    }
    render_cleanup_report(&report);

    if !report.success {
        bail!("cleanup did not complete; see errors above");
    }
    Ok(())
}

/// Flags win over environment variables; anything still missing is asked
/// for interactively. Token input is echoed masked only in the summary,
/// never stored anywhere.
fn resolve_credentials(
    role: &str,
    env_prefix: &str,
    from_flags: PartialCredentials,
) -> Result<Credentials> {
    let mut merged = from_flags.or(PartialCredentials::from_env(env_prefix));
    if merged.subdomain.is_none() {
        merged.subdomain = Some(prompt_required(&format!("{role} subdomain: "))?);
    }
    if merged.email.is_none() {
        merged.email = Some(prompt_required(&format!("{role} email: "))?);
    }
    if merged.api_token.is_none() {
        merged.api_token = Some(prompt_required(&format!("{role} API token: "))?);
    }
    merged.into_credentials(role)
}

fn connect(role: &str, creds: &Credentials) -> Result<HelpCenterClient> {
    let mut client = HelpCenterClient::new(HelpCenterClientConfig::from_credentials(creds))?;
    client
        .test_connection()
        .with_context(|| format!("could not reach the {role} help center"))?;
    println!(
        "{} {role}: {}.zendesk.com as {} (token {})",
        "ok".green(),
        creds.subdomain,
        creds.email,
        mask_token(&creds.api_token)
    );
    Ok(client)
}

struct PrintProgress;

impl CopyProgress for PrintProgress {
    fn on_event(&mut self, event: &CopyEvent) {
        match event {
            CopyEvent::PhaseStarted { phase } => {
                println!();
                println!("{}", format!("copying {}", phase.label()).bold());
            }
            CopyEvent::Created { source_id, dest_id, name, .. } => {
                println!("  {} {name} ({source_id} -> {dest_id})", "+".green());
            }
            CopyEvent::Skipped { name, reason, .. } => {
                println!("  {} {name}: {reason}", "~".yellow());
            }
            CopyEvent::Failed { name, error, .. } => {
                println!("  {} {name}: {error}", "!".red());
            }
            CopyEvent::ListingFailed { phase, parent_id, error } => {
                let scope = match parent_id {
                    Some(id) => format!("{} under {id}", phase.label()),
                    None => phase.label().to_string(),
                };
                println!("  {} listing {scope} failed: {error}", "!".red());
            }
        }
    }
}

fn render_level(phase: CopyPhase, summary: &LevelSummary) {
    println!(
        "{}: found {}, created {}, skipped {}, failed {}",
        phase.label(),
        summary.found,
        summary.created,
        summary.skipped,
        summary.failed
    );
}

fn render_copy_report(report: &CopyReport) {
    println!();
    if report.success {
        println!("{}", "copy finished".green().bold());
    } else {
        println!("{}", "copy failed".red().bold());
    }
    render_level(CopyPhase::Categories, &report.categories);
    render_level(CopyPhase::Sections, &report.sections);
    render_level(CopyPhase::Articles, &report.articles);
    println!("source_requests: {}", report.source_requests);
    println!("dest_requests: {}", report.dest_requests);

    if !report.errors.is_empty() {
        println!();
        println!("{}", format!("errors ({})", report.errors.len()).red());
        for error in &report.errors {
            println!("  - {error}");
        }
    }
    if let Some(failure) = &report.first_article_failure {
        println!();
        println!(
            "first rejected article: '{}' ({}) into destination section {}",
            failure.title, failure.source_article_id, failure.destination_section_id
        );
        println!("error: {}", failure.error);
        match serde_json::to_string_pretty(&failure.payload) {
            Ok(rendered) => println!("payload:\n{rendered}"),
            Err(_) => println!("payload: <unserializable>"),
        }
    }
}

fn render_cleanup_report(report: &CleanupReport) {
    println!();
    if report.success {
        println!("{}", "cleanup finished".green().bold());
    } else {
        println!("{}", "cleanup failed".red().bold());
    }
    println!(
        "categories: found {}, deleted {}, failed {}",
        report.found, report.deleted, report.failed
    );
    for result in &report.results {
        if result.deleted {
            println!("  {} {} ({})", "-".green(), result.name, result.category_id);
        } else {
            println!(
                "  {} {} ({}): {}",
                "!".red(),
                result.name,
                result.category_id,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    if !report.errors.is_empty() {
        println!();
        println!("{}", format!("errors ({})", report.errors.len()).red());
        for error in &report.errors {
            println!("  - {error}");
        }
    }
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    std::io::stdout().flush().context("failed to flush stdout")?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read from stdin")?;
    Ok(line)
}

fn prompt_required(prompt: &str) -> Result<String> {
    loop {
        let line = prompt_line(prompt)?;
        let value = line.trim();
        if !value.is_empty() {
            return Ok(value.to_string());
        }
        println!("a value is required");
    }
}
