//! amftpd operator CLI
//!
//! Inspect and exercise the accounting engine without a running daemon.
//!
//! ## Usage
//!
//! ```bash
//! amftpd check
//! amftpd resolve /incoming/new.zip --user amy
//! amftpd quote --section incoming --bytes 1048576 --user amy
//! amftpd user add amy --credits 1024 --group staff
//! amftpd user credit amy --section incoming --bytes 4096
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use amftpd_core::{Quote, RatioEngine, Settlement, User, Verdict};
use amftpd_server::bootstrap::{self, Accounting};
use amftpd_server::constants::DEFAULT_LOG_FILTER;

/// amftpd access accounting.
#[derive(Parser, Debug)]
#[command(name = "amftpd", version)]
#[command(about = "Section, ratio and credit management for amftpd")]
struct Cli {
    /// Configuration script (default: ~/.config/amftpd/amftpd.rhai)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate configuration and open the user store
    Check,

    /// Show which section governs a virtual path
    Resolve {
        path: String,

        /// Also show what this user may do there
        #[arg(long)]
        user: Option<String>,
    },

    /// Price a transfer in a section
    Quote {
        #[arg(long)]
        section: String,

        #[arg(long)]
        bytes: u64,

        /// Price for this user (group overrides, balance)
        #[arg(long)]
        user: Option<String>,
    },

    /// Manage user records
    #[command(subcommand)]
    User(UserCommand),
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Create a user
    Add {
        name: String,

        /// Starting balance in KiB
        #[arg(long, default_value_t = 0)]
        credits: u64,

        /// Exempt from download charges
        #[arg(long)]
        no_ratio: bool,

        #[arg(long)]
        group: Option<String>,
    },

    /// Show one user
    Show { name: String },

    /// List all users
    List,

    /// Credit a user as if they had uploaded BYTES into SECTION
    Credit {
        name: String,

        #[arg(long)]
        section: String,

        #[arg(long)]
        bytes: u64,
    },

    /// Charge a user as if they had downloaded BYTES from SECTION
    Charge {
        name: String,

        #[arg(long)]
        section: String,

        #[arg(long)]
        bytes: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let (config, source) =
        bootstrap::load(cli.config.as_deref()).context("failed to load configuration")?;
    let stack = Accounting::build(&config, &bootstrap::store_registry())
        .context("failed to start accounting")?;

    match cli.command {
        Command::Check => cmd_check(&stack, &config, &source),
        Command::Resolve { path, user } => cmd_resolve(&stack, &path, user.as_deref()).await,
        Command::Quote {
            section,
            bytes,
            user,
        } => cmd_quote(&stack, &section, bytes, user.as_deref()).await,
        Command::User(command) => {
            if config.store.backend == "memory" && command.mutates() {
                tracing::warn!("memory store: changes are discarded on exit");
            }
            cmd_user(&stack, command).await
        }
    }
}

fn cmd_check(
    stack: &Accounting,
    config: &amftpd_core::AccountingConfig,
    source: &bootstrap::ConfigSource,
) -> Result<()> {
    let catalog = stack.catalog();

    println!("config:   {source}");
    println!(
        "ratio:    {}",
        if stack.facade.is_enabled() { "enforced" } else { "disabled" }
    );
    match &config.store.path {
        Some(path) => println!("store:    {} ({})", stack.store.name(), path.display()),
        None => println!("store:    {}", stack.store.name()),
    }

    println!("sections: {}", catalog.section_count());
    for section in catalog.resolver().sections() {
        println!(
            "  {:<16} {:<24} up {:<8} down {:<8}{}{}",
            section.name,
            section.root,
            format!("x{}", section.upload),
            format!("x{}", section.download),
            if section.allow_upload { "" } else { " no-upload" },
            if section.allow_download { "" } else { " no-download" },
        );
    }

    println!("groups:   {}", catalog.group_count());
    for name in catalog.group_names() {
        let Some(group) = catalog.find_group(name) else {
            continue;
        };
        let mut overrides: Vec<_> = group.overrides.iter().collect();
        overrides.sort_by(|a, b| a.0.cmp(b.0));
        let rendered: Vec<String> = overrides
            .iter()
            .map(|(section, m)| format!("{section}=x{m}"))
            .collect();
        println!("  {:<16} {}", name, rendered.join(" "));
    }
    Ok(())
}

async fn cmd_resolve(stack: &Accounting, path: &str, user: Option<&str>) -> Result<()> {
    let catalog = stack.catalog();
    let section = catalog.resolver().resolve(path);

    match section {
        Some(section) => println!("{path} -> {} ({})", section.name, section.root),
        None => println!("{path} -> no section"),
    }

    if let Some(name) = user {
        let user = find_user(stack, name).await?;
        let access = stack.facade.access(section, &user);
        println!(
            "{}: list={} upload={} download={}",
            user.name(),
            access.can_list,
            access.can_upload,
            access.can_download
        );
    }
    Ok(())
}

async fn cmd_quote(stack: &Accounting, section: &str, bytes: u64, user: Option<&str>) -> Result<()> {
    if !stack.facade.is_enabled() {
        println!("ratio disabled: transfers are neither charged nor credited");
        return Ok(());
    }

    let user = match user {
        Some(name) => find_user(stack, name).await?,
        None => User::new("anonymous"),
    };
    let engine = RatioEngine::new(stack.catalog.clone());

    let download = engine.compute_download_cost(&user, section, bytes);
    if let Quote::UnknownSection = download {
        bail!("no section named {section}");
    }
    let upload = engine.compute_upload_credit(&user, section, bytes);

    println!("{}", describe_quote("download costs", &download));
    println!("{}", describe_quote("upload earns", &upload));

    if user.is_no_ratio() {
        println!("{} is exempt from download charges", user.name());
    } else {
        match stack.facade.can_download(&user, section, bytes) {
            Verdict::Allowed => println!(
                "{} can afford it: balance {} KiB",
                user.name(),
                user.credits_kb()
            ),
            verdict => println!(
                "{} cannot download: {}",
                user.name(),
                verdict.reason().unwrap_or_default()
            ),
        }
    }
    Ok(())
}

async fn cmd_user(stack: &Accounting, command: UserCommand) -> Result<()> {
    match command {
        UserCommand::Add {
            name,
            credits,
            no_ratio,
            group,
        } => {
            let catalog = stack.catalog();
            if let Some(missing) = group.as_deref().filter(|g| catalog.find_group(g).is_none()) {
                tracing::warn!(group = %missing, "group is not configured");
            }
            let user = User::new(name)
                .with_credits_kb(credits)
                .with_no_ratio(no_ratio)
                .with_group(group);
            let user = stack.store.insert_user(user).await?;
            print_user(&user);
        }
        UserCommand::Show { name } => {
            print_user(&find_user(stack, &name).await?);
        }
        UserCommand::List => {
            for user in stack.store.list_users().await? {
                print_user(&user);
            }
        }
        UserCommand::Credit {
            name,
            section,
            bytes,
        } => {
            let user = find_user(stack, &name).await?;
            let settlement = stack.facade.apply_upload(&user, &section, bytes).await?;
            println!("{}", describe_settlement(&user, &settlement));
        }
        UserCommand::Charge {
            name,
            section,
            bytes,
        } => {
            let user = find_user(stack, &name).await?;
            let verdict = stack.facade.can_download(&user, &section, bytes);
            if let Some(reason) = verdict.reason() {
                bail!("{name} cannot download: {reason}");
            }
            let settlement = stack.facade.apply_download(&user, &section, bytes).await?;
            println!("{}", describe_settlement(&user, &settlement));
        }
    }
    Ok(())
}

impl UserCommand {
    fn mutates(&self) -> bool {
        !matches!(self, UserCommand::Show { .. } | UserCommand::List)
    }
}

async fn find_user(stack: &Accounting, name: &str) -> Result<User> {
    stack
        .store
        .find_user(name)
        .await?
        .with_context(|| format!("no such user: {name}"))
}

fn print_user(user: &User) {
    println!(
        "{:<16} {:>12} KiB  {}{}  [{}]",
        user.name(),
        user.credits_kb(),
        user.group().unwrap_or("-"),
        if user.is_no_ratio() { " no-ratio" } else { "" },
        user.id().short()
    );
}

fn describe_quote(label: &str, quote: &Quote) -> String {
    match quote {
        Quote::Priced { kb, multiplier } => format!("{label} {kb} KiB (x{multiplier})"),
        Quote::UnknownSection => format!("{label} nothing (unknown section)"),
    }
}

fn describe_settlement(user: &User, settlement: &Settlement) -> String {
    match settlement {
        Settlement::Skipped => format!("{}: not accounted", user.name()),
        Settlement::Free => format!("{}: free, balance {} KiB", user.name(), user.credits_kb()),
        Settlement::Declined { balance, cost } => {
            format!("{}: declined, {cost} KiB needed, {balance} KiB available", user.name())
        }
        Settlement::Committed { user, delta } => {
            format!("{}: moved {delta} KiB, balance {} KiB", user.name(), user.credits_kb())
        }
    }
}
