use std::path::PathBuf;

use anyhow::{Result, bail};
use argh::FromArgs;
use warden_client::guard::{AuthDecision, CapabilityDecision, Requirement, RouteMeta};

use crate::config::Config;
use crate::console::{self, Console};
use crate::observability;

/// Headless agent keeping a console session's permissions current.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Whoami(WhoamiCommand),
    Check(CheckCommand),
    Page(PageCommand),
    Route(RouteCommand),
    Permissions(PermissionsCommand),
    Version(VersionCommand),
}

/// sign in and keep the session's permissions fresh until terminated
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {}

/// print the signed-in user and the navigation entries it may see
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "whoami")]
struct WhoamiCommand {}

/// check whether the signed-in user may perform an action on a subject
///
/// Exits with an error if the action is not permitted.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "check")]
struct CheckCommand {
    /// the action, e.g. `view`
    #[argh(positional)]
    action: String,
    /// the subject, e.g. `company-management`
    #[argh(positional)]
    subject: String,
}

/// evaluate the page guards for a route
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "page")]
struct PageCommand {
    /// the route path, e.g. `/companies`
    #[argh(positional)]
    path: String,
    /// capability required by the route, as `<subject>:<action>`
    #[argh(option)]
    requires: Option<String>,
}

/// check whether an API call would pass the API-call guard
///
/// Exits with an error if the call would be blocked.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "route")]
struct RouteCommand {
    /// the HTTP method, e.g. `GET`
    #[argh(positional)]
    method: String,
    /// the request path, e.g. `/companies/507f1f77bcf86cd799439011`
    #[argh(positional)]
    path: String,
}

/// print the permission catalog grouped by module
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "permissions")]
struct PermissionsCommand {}

/// print the agent version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("warden {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;

    // Sentry should be initialized before creating the async runtime.
    let _sentry_guard = observability::init_sentry(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("warden-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    runtime.block_on(async move {
        match args.command {
            Command::Run(RunCommand {}) => console::run(config).await,
            Command::Whoami(WhoamiCommand {}) => whoami(&config).await,
            Command::Check(command) => check(&config, command).await,
            Command::Page(command) => page(&config, command).await,
            Command::Route(command) => route(&config, command).await,
            Command::Permissions(PermissionsCommand {}) => permissions(&config).await,
            Command::Version(VersionCommand {}) => unreachable!(),
        }
    })
}

async fn whoami(config: &Config) -> Result<()> {
    let console = Console::connect(config).await?;
    let snapshot = console.session().snapshot();
    let Some(user) = snapshot.user() else {
        bail!("not signed in");
    };

    println!("{}", serde_json::to_string_pretty(user)?);
    for entry in console.pages() {
        println!("{}\t{}", entry.title, entry.path);
    }
    Ok(())
}

async fn check(config: &Config, command: CheckCommand) -> Result<()> {
    let console = Console::connect(config).await?;
    let CheckCommand { action, subject } = command;

    if !console.check(&action, &subject) {
        bail!("{subject}:{action} denied");
    }
    println!("{subject}:{action} allowed");
    Ok(())
}

async fn page(config: &Config, command: PageCommand) -> Result<()> {
    let console = Console::connect(config).await?;

    let mut route = RouteMeta::new(command.path);
    if let Some(requires) = &command.requires {
        route.requirement = Some(requires.parse()?);
    }

    let (auth, capability) = console.page(&route);
    match auth {
        AuthDecision::Allow => {}
        AuthDecision::Pending => bail!("session is still loading"),
        AuthDecision::Redirect { location } => bail!("redirect to {location}"),
    }

    match capability {
        CapabilityDecision::Bypass | CapabilityDecision::Granted(_) => println!("render"),
        CapabilityDecision::SoftDenied(_) => println!("render (capability check failed)"),
        CapabilityDecision::Denied { required } => bail!("blocked, requires {required}"),
    }
    Ok(())
}

async fn route(config: &Config, command: RouteCommand) -> Result<()> {
    let console = Console::connect(config).await?;

    let (requirement, denied) = console.route(&command.method, &command.path)?;
    if let Some(denied) = denied {
        bail!(denied);
    }

    match requirement {
        Requirement::Public => println!("allowed (public)"),
        Requirement::Grant(grant) => println!("allowed ({grant})"),
        Requirement::Unmapped => println!("allowed"),
    }
    Ok(())
}

async fn permissions(config: &Config) -> Result<()> {
    let console = Console::connect(config).await?;

    for (module, entries) in console.permissions().await? {
        println!("{module}");
        for entry in entries {
            println!("  {}\t{}", entry.id, entry.name);
        }
    }
    Ok(())
}
