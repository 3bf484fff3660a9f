mod config;
mod credentials;
mod orchestrator;
mod pr;
mod provider;
mod report;
mod resolver;
mod review;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;

use credentials::{ConfigCredentialStore, Credential, CredentialStore, ProviderKind};
use pr::{CommentSide, PendingComment, PrId, Review, ReviewAction};
use provider::{AdapterFactory, HttpAdapterFactory, ProviderAdapter};

/// pr-hub: one view over open pull requests across GitHub and Azure DevOps
/// accounts, with diff, comment and review commands for a single PR.
#[derive(Parser, Debug)]
#[command(name = "pr-hub", version, about)]
struct Cli {
    /// Configuration file (defaults to ./pr-hub.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List open pull requests for every active or selected credential
    List {
        /// Write the list as markdown to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show a pull request's metadata
    Show(PrArgs),
    /// Show a pull request's diff
    Diff(PrArgs),
    /// Show the comments on a pull request
    Comments(PrArgs),
    /// Add a general or inline comment
    Comment {
        #[command(flatten)]
        target: PrArgs,

        #[arg(short, long)]
        body: String,

        /// File path for an inline comment
        #[arg(long, requires = "line")]
        path: Option<String>,

        /// Line in the new version of the file
        #[arg(long, requires = "path")]
        line: Option<u32>,
    },
    /// Submit a review
    Review {
        #[command(flatten)]
        target: PrArgs,

        #[arg(short, long, value_enum)]
        action: ActionArg,

        #[arg(short, long, default_value = "")]
        body: String,

        /// Inline comment as `path:line[:left]=body`; repeatable
        #[arg(long = "inline", value_parser = parse_inline)]
        inline: Vec<PendingComment>,
    },
    /// Check that credentials authenticate as their configured user
    Validate {
        /// Only check this credential
        #[arg(long)]
        credential: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct PrArgs {
    /// PR URL or `owner/repo#number`
    reference: String,

    /// Backend for `owner/repo#number` references
    #[arg(long, value_enum, default_value_t = ProviderArg::Github)]
    provider: ProviderArg,

    /// Credential id to act with
    #[arg(long)]
    credential: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProviderArg {
    Github,
    Azure,
}

impl From<ProviderArg> for ProviderKind {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Github => ProviderKind::GitHub,
            ProviderArg::Azure => ProviderKind::AzureDevOps,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ActionArg {
    Approve,
    RequestChanges,
    Comment,
}

impl From<ActionArg> for ReviewAction {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Approve => ReviewAction::Approve,
            ActionArg::RequestChanges => ReviewAction::RequestChanges,
            ActionArg::Comment => ReviewAction::Comment,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    info!("loading configuration");
    let config = config::Config::load(cli.config.as_deref())?;
    let store = ConfigCredentialStore::from_config(&config);
    let factory = Arc::new(HttpAdapterFactory::new(config));
    debug!(credentials = store.list().len(), "credentials loaded");

    match cli.command {
        Command::List { output } => {
            let credentials = store.list();
            let orchestrator = orchestrator::Orchestrator::new(factory);
            let aggregate = orchestrator
                .list_all(&credentials)
                .instrument(info_span!("list"))
                .await;
            if aggregate.is_partial() {
                warn!(failures = aggregate.failures.len(), "some credentials could not be listed");
            }
            let list = report::build(aggregate);
            report::output(&list, output.as_deref())?;
            info!(total = list.total, "done");
        }
        Command::Show(args) => {
            let (id, credential, adapter) = open(&store, factory.as_ref(), &args)?;
            let mut pull_request = adapter.get_pull_request(&id).await?;
            pull_request.credential_id = Some(credential.id.clone());
            pull_request.credential_name = Some(credential.name.clone());
            report::print_pull_request(&pull_request);
        }
        Command::Diff(args) => {
            let (id, _, adapter) = open(&store, factory.as_ref(), &args)?;
            let diff = adapter.get_diff(&id).await?;
            info!(files = diff.files.len(), "fetched diff");
            report::print_diff(&diff);
        }
        Command::Comments(args) => {
            let (id, _, adapter) = open(&store, factory.as_ref(), &args)?;
            let comments = adapter.get_comments(&id).await?;
            report::print_comments(&comments);
        }
        Command::Comment {
            target,
            body,
            path,
            line,
        } => {
            let (id, _, adapter) = open(&store, factory.as_ref(), &target)?;
            adapter
                .add_comment(&id, &body, path.as_deref(), line)
                .instrument(info_span!("comment", pr = %id))
                .await?;
            println!("{} Comment added to {}.", "✓".green().bold(), id);
        }
        Command::Review {
            target,
            action,
            body,
            inline,
        } => {
            let (id, credential, adapter) = open(&store, factory.as_ref(), &target)?;
            let pull_request = adapter.get_pull_request(&id).await?;
            if !inline.is_empty() {
                let diff = adapter.get_diff(&id).await?;
                for comment in &inline {
                    if outside_diff(&diff, comment) {
                        warn!(path = %comment.path, line = comment.line, "inline comment is not on a changed or context line");
                    }
                }
            }
            let review = Review {
                pr: id,
                action: action.into(),
                body,
                comments: inline,
            };

            let submitter = review::ReviewSubmitter::new();
            match submitter
                .submit(adapter.as_ref(), &pull_request, &credential.username, review)
                .await
            {
                Ok(submitted) => report::print_submission(&submitted),
                Err(error) => {
                    report::print_review_failure(&error);
                    std::process::exit(if error.has_remote_effects() { 2 } else { 1 });
                }
            }
        }
        Command::Validate { credential } => {
            let credentials = match credential {
                Some(id) => vec![store.get(&id)?],
                None => store.list(),
            };
            let mut failed = false;
            for credential in &credentials {
                failed |= !validate(factory.as_ref(), credential).await;
            }
            if failed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Resolve a PR reference and the credential and adapter to act with.
fn open(
    store: &dyn CredentialStore,
    factory: &dyn AdapterFactory,
    args: &PrArgs,
) -> Result<(PrId, Credential, Arc<dyn ProviderAdapter>), Box<dyn std::error::Error>> {
    let id = pr::parse_pr_reference(&args.reference, args.provider.into())?;
    let credential = pick_credential(store, args.credential.as_deref(), id.provider)?;
    debug!(pr = %id, credential = %credential.id, "resolved pull request reference");
    let adapter = factory.adapter_for(&credential)?;
    Ok((id, credential, adapter))
}

/// An explicit id wins. Otherwise prefer a listed credential for the same
/// backend (primary first), then fall back to the active one.
fn pick_credential(
    store: &dyn CredentialStore,
    explicit: Option<&str>,
    provider: ProviderKind,
) -> Result<Credential, credentials::CredentialError> {
    if let Some(id) = explicit {
        return store.get(id);
    }

    let mut matching: Vec<Credential> = store
        .list()
        .into_iter()
        .filter(|c| c.provider == provider && c.is_listed())
        .collect();
    matching.sort_by_key(|c| !c.primary);
    match matching.into_iter().next() {
        Some(credential) => Ok(credential),
        None => store.get_active(),
    }
}

async fn validate(factory: &dyn AdapterFactory, credential: &Credential) -> bool {
    let result = match factory.adapter_for(credential) {
        Ok(adapter) => adapter.validate_credentials().await,
        Err(error) => Err(error),
    };

    match result {
        Ok(login) if login.eq_ignore_ascii_case(&credential.username) => {
            println!("{} {} authenticates as {}", "✓".green().bold(), credential.name, login);
            true
        }
        Ok(login) => {
            println!(
                "{} {} authenticates as {}, but is configured for {}",
                "!".yellow().bold(),
                credential.name,
                login,
                credential.username
            );
            false
        }
        Err(error) => {
            println!("{} {}: {}", "✗".red().bold(), credential.name, error);
            false
        }
    }
}

fn outside_diff(diff: &pr::Diff, comment: &PendingComment) -> bool {
    diff.find_file(&comment.path)
        .and_then(|file| file.line_at(comment.side, comment.line))
        .is_none()
}

/// Parse `path:line[:left|:right]=body`.
fn parse_inline(value: &str) -> Result<PendingComment, String> {
    let (location, body) = value
        .split_once('=')
        .ok_or_else(|| format!("expected `path:line=body`, got `{value}`"))?;

    let (location, side) = if let Some(rest) = location.strip_suffix(":left") {
        (rest, CommentSide::Left)
    } else if let Some(rest) = location.strip_suffix(":right") {
        (rest, CommentSide::Right)
    } else {
        (location, CommentSide::Right)
    };

    let (path, line) = location
        .rsplit_once(':')
        .ok_or_else(|| format!("missing line number in `{location}`"))?;
    let line: u32 = line
        .parse()
        .map_err(|_| format!("invalid line number `{line}`"))?;
    if path.is_empty() {
        return Err("missing file path".to_string());
    }

    Ok(PendingComment {
        body: body.to_string(),
        path: path.to_string(),
        line,
        side,
    })
}
