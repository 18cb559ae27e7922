mod backup;
mod catalog;
mod client;
mod config;
mod console;
mod deploy;
mod registry;
mod replay;
mod report;
mod rewrite;
mod store;

use crate::backup::{Snapshot, backup_file, list_backups};
use crate::catalog::Catalog;
use crate::client::ApiClient;
use crate::config::{EffectiveConfig, Overrides, Scope, mask, resolve, save};
use crate::console::Progress;
use crate::deploy::{RestoreError, RestoreOptions, deploy_catalog};
use crate::report::{DeployEvent, RestoreReport};
use crate::store::{DryRunStore, ObjectStore};
use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use dialoguer::{Confirm, Input, Select};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Destination id used when a dry run would have created the org.
const DRY_RUN_ORG_ID: &str = "00000000-0000-4000-8000-000000000000";

#[derive(Parser)]
#[command(
    name = "mistrestore",
    version,
    about = "Restore a Mist organization backup into another organization"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "API token override for this invocation (otherwise read from config or MIST_APITOKEN)"
    )]
    api_token: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "HOST",
        help = "Mist API host, e.g. api.eu.mist.com (defaults to api.mist.com)"
    )]
    host: Option<String>,

    #[arg(
        long,
        short = 'o',
        value_enum,
        default_value_t = OutputFormat::Pretty,
        global = true,
        help = "Output format for results"
    )]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Persist an API token and defaults to the chosen scope
    Configure {
        #[arg(long)]
        token: Option<String>,
        #[arg(
            long,
            value_enum,
            default_value_t = ScopeArg::User,
            help = "Where to write the config (local project dir or user config dir)"
        )]
        scope: ScopeArg,
        #[arg(long, value_name = "HOST", help = "API host to store alongside the token")]
        host: Option<String>,
        #[arg(long, value_name = "PATH", help = "Default folder holding the backups")]
        backup_folder: Option<String>,
    },
    /// Deploy a backup into a new or existing organization
    Restore(RestoreArgs),
    /// Validate stored credentials
    Validate,
    /// Show current configuration (secrets masked)
    ConfigShow,
    /// Generate shell completion scripts
    Completion {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Args)]
struct RestoreArgs {
    #[arg(
        long,
        value_name = "ID",
        help = "Existing destination org; without --org-name you will be asked to type its name"
    )]
    org_id: Option<String>,

    #[arg(
        long,
        value_name = "NAME",
        help = "Name of the destination org: checked against --org-id, or used to create a new org"
    )]
    org_name: Option<String>,

    #[arg(long, value_name = "PATH", help = "Folder holding the backups (default ./org_backup)")]
    backup_folder: Option<String>,

    #[arg(
        long,
        value_name = "NAME",
        help = "Backup to deploy, i.e. the sub-folder of the backup folder"
    )]
    source_backup: Option<String>,

    #[arg(long, help = "Walk the backup without writing anything to the destination")]
    dry_run: bool,

    #[arg(long, short = 'y', help = "Do not ask for confirmation")]
    yes: bool,

    #[arg(long, value_name = "PATH", default_value = "./script.log")]
    log_file: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum OutputFormat {
    Pretty,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScopeArg {
    Local,
    User,
}

impl From<ScopeArg> for Scope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::Local => Scope::Local,
            ScopeArg::User => Scope::User,
        }
    }
}

struct Destination {
    id: String,
    name: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("reading current directory")?;
    let overrides = Overrides {
        api_token: cli.api_token.clone(),
        host: cli.host.clone(),
        backup_folder: None,
    };

    match cli.command {
        Commands::Configure {
            token,
            scope,
            host,
            backup_folder,
        } => {
            let mut existing = config::load_scope(scope.into(), &cwd)?;
            if token.is_none() && host.is_none() && backup_folder.is_none() {
                bail!("Nothing to configure; pass --token, --host or --backup-folder");
            }
            if let Some(token) = token {
                existing.api_token = Some(token);
            }
            if let Some(host) = host {
                existing.host = Some(host);
            }
            if let Some(folder) = backup_folder {
                existing.backup_folder = Some(folder);
            }
            let path = save(scope.into(), &existing, &cwd)?;
            println!("Saved configuration to {}", path.display());
        }
        Commands::Restore(args) => run_restore(&cwd, overrides, args, cli.output)?,
        Commands::Validate => {
            let effective = resolve(&cwd, overrides, true)?;
            let client = ApiClient::new(&effective.host, &effective.api_token)?;
            println!("Validating credentials against {}...", effective.host);
            match client.whoami() {
                Ok(me) => {
                    let who = me
                        .get("email")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown user");
                    println!("Mist API: ok ({who})");
                }
                Err(e) => println!("Mist API: FAILED ({e})"),
            }
        }
        Commands::ConfigShow => {
            let mut masked = config::load(&cwd)?;
            if let Some(token) = masked.api_token.as_deref() {
                masked.api_token = Some(mask(token));
            }
            println!("{}", serde_json::to_string_pretty(&masked)?);
        }
        Commands::Completion { shell } => {
            use clap_complete::{generate, shells};
            let mut cmd = Cli::command();
            let bin = cmd.get_name().to_string();
            match shell {
                CompletionShell::Bash => {
                    generate(shells::Bash, &mut cmd, bin, &mut std::io::stdout())
                }
                CompletionShell::Zsh => {
                    generate(shells::Zsh, &mut cmd, bin, &mut std::io::stdout())
                }
                CompletionShell::Fish => {
                    generate(shells::Fish, &mut cmd, bin, &mut std::io::stdout())
                }
                CompletionShell::PowerShell => {
                    generate(shells::PowerShell, &mut cmd, bin, &mut std::io::stdout())
                }
            }
        }
    }

    Ok(())
}

fn init_logging(path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating log file {:?}", path))?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mistrestore=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|err| anyhow!(err))
}

fn run_restore(
    cwd: &Path,
    mut overrides: Overrides,
    args: RestoreArgs,
    output: OutputFormat,
) -> Result<()> {
    init_logging(&args.log_file)?;
    let pretty = output == OutputFormat::Pretty;

    overrides.backup_folder = args.backup_folder.clone();
    let effective = resolve(cwd, overrides, !args.dry_run)?;

    let source = select_backup(&effective.backup_folder, args.source_backup.as_deref(), args.yes)?;
    let path = backup_file(&effective.backup_folder, &source);
    let snapshot = Snapshot::load(&path).with_context(|| format!("loading backup {source}"))?;
    let catalog = Catalog::standard();
    let total = snapshot.count_steps(&catalog);
    info!(backup = %path.display(), total, "backup loaded");
    if pretty {
        println!("Backup {source} loaded; the process will deploy {total} new objects");
    }

    let client = build_client(&effective, args.dry_run)?;
    let destination = resolve_destination(client.as_ref(), &args)?;

    if !args.yes {
        let name = destination.name.as_deref().unwrap_or("(unnamed)");
        let proceed = Confirm::new()
            .with_prompt(format!(
                "Are you sure about this? Do you want to import the configuration into the organization {name} with the id {}?",
                destination.id
            ))
            .default(false)
            .interact()?;
        if !proceed {
            info!("restore aborted by user");
            println!("Aborted.");
            return Ok(());
        }
    }

    let mut options = RestoreOptions::new(destination.id.clone());
    options.destination_org_name = destination.name.clone();
    let cancel = Arc::clone(&options.cancel);
    ctrlc::set_handler(move || {
        cancel.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler")?;

    let dry_run_store = DryRunStore::new();
    let store: &dyn ObjectStore = match (&client, args.dry_run) {
        (Some(client), false) => client as &dyn ObjectStore,
        _ => &dry_run_store,
    };

    let mut progress = Progress::stdout(total);
    let mut observer = |event: &DeployEvent<'_>| {
        if pretty {
            progress.handle(event);
        }
    };

    let outcome = deploy_catalog(store, &catalog, &snapshot, &options, &mut observer);
    match outcome {
        Ok(report) => render_report(&report, output),
        Err(RestoreError::Interrupted { report }) => {
            error!("restore interrupted");
            if pretty {
                println!("\n[Ctrl C] Interrupted. Objects already created are left in place.");
            }
            render_report(&report, output)
        }
    }
}

fn build_client(effective: &EffectiveConfig, dry_run: bool) -> Result<Option<ApiClient>> {
    if dry_run && effective.api_token.is_empty() {
        return Ok(None);
    }
    ApiClient::new(&effective.host, &effective.api_token).map(Some)
}

fn select_backup(folder: &Path, requested: Option<&str>, assume_yes: bool) -> Result<String> {
    let backups = list_backups(folder)?;
    if let Some(name) = requested {
        if backups.iter().any(|b| b == name) {
            return Ok(name.to_string());
        }
        bail!("Backup {name} not found in {}", folder.display());
    }
    if backups.is_empty() {
        bail!("No backups found in {}", folder.display());
    }
    if assume_yes {
        bail!("--source-backup is required with --yes");
    }
    let index = Select::new()
        .with_prompt("Which backup do you want to deploy?")
        .items(&backups)
        .default(0)
        .interact()?;
    Ok(backups[index].clone())
}

fn resolve_destination(client: Option<&ApiClient>, args: &RestoreArgs) -> Result<Destination> {
    match (args.org_id.clone(), args.org_name.clone()) {
        (Some(id), Some(name)) => {
            if let Some(client) = client {
                let actual = client.org_name(&id)?;
                if actual != name {
                    bail!("Org name {name} does not match the org {id}");
                }
            }
            Ok(Destination {
                id,
                name: Some(name),
            })
        }
        (Some(id), None) => {
            if args.yes {
                bail!("--org-name is required with --org-id and --yes");
            }
            let client = client.ok_or_else(|| {
                anyhow!("--org-name is required when no API token is configured")
            })?;
            let name = client.org_name(&id)?;
            confirm_org_name(&name)?;
            Ok(Destination {
                id,
                name: Some(name),
            })
        }
        (None, Some(name)) => create_destination(client, &name, args.dry_run),
        (None, None) => {
            if args.yes {
                bail!("--org-id or --org-name is required with --yes");
            }
            let choice = Select::new()
                .with_prompt("Destination organization")
                .items(&["Create a new organization", "Restore to an existing one"])
                .default(0)
                .interact()?;
            if choice == 0 {
                let name: String = Input::new()
                    .with_prompt("Organization name")
                    .interact_text()?;
                create_destination(client, name.trim(), args.dry_run)
            } else {
                let id: String = Input::new().with_prompt("Organization id").interact_text()?;
                let client = client.ok_or_else(|| {
                    anyhow!("an API token is required to restore into an existing org")
                })?;
                let name = client.org_name(id.trim())?;
                confirm_org_name(&name)?;
                Ok(Destination {
                    id: id.trim().to_string(),
                    name: Some(name),
                })
            }
        }
    }
}

fn create_destination(client: Option<&ApiClient>, name: &str, dry_run: bool) -> Result<Destination> {
    if name.is_empty() {
        bail!("Organization name must not be empty");
    }
    if dry_run {
        info!(name, "dry run: would create org");
        return Ok(Destination {
            id: DRY_RUN_ORG_ID.to_string(),
            name: Some(name.to_string()),
        });
    }
    let client = client.ok_or_else(|| anyhow!("an API token is required to create an org"))?;
    let id = client
        .create_org(name)
        .with_context(|| format!("creating the organization {name}"))?;
    info!(%id, name, "destination org created");
    println!("New Org id: {id}");
    Ok(Destination {
        id,
        name: Some(name.to_string()),
    })
}

fn confirm_org_name(expected: &str) -> Result<()> {
    let expected = expected.to_string();
    Input::<String>::new()
        .with_prompt("To avoid any error, please confirm the current destination organization name")
        .validate_with(|input: &String| -> Result<(), &'static str> {
            if *input == expected {
                Ok(())
            } else {
                Err("The organization names do not match... Please try again...")
            }
        })
        .interact_text()?;
    Ok(())
}

fn render_report(report: &RestoreReport, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Pretty => console::print_summary(report),
    }
    Ok(())
}
