//! remcli - run a command on a remote server
//!
//! Standard input is streamed to the remote command, its output is written
//! locally, and the process exits with the remote exit code.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::{ConfigManager, RemcliConfig};
use remcli_auth::Credential;
use remcli_client::{ClientError, RemoteCli, SessionOptions};
use remcli_keys::KeyProvider;
use remcli_tunnel::TunnelClient;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit status for configuration and usage problems
const EXIT_USAGE: i32 = 2;

/// Run a command on a remote server
#[derive(Parser, Debug)]
#[command(name = "remcli")]
#[command(about = "Run a command on a remote server over HTTP")]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(
    env!("GIT_TAG"),
    "\nCommit: ",
    env!("GIT_HASH"),
    "\nBuilt: ",
    env!("BUILD_TIME")
))]
#[command(long_about = r#"
Run a command on a remote server. Standard input is sent to the command and
its output is written here; remcli exits with the remote exit code.

EXAMPLES:
  remcli -s https://ci.example.com/ --auth alice:token help
  echo hello | remcli -s http://localhost:8080 cat

ENVIRONMENT VARIABLES:
  REMCLI_URL                        Server URL
  REMCLI_USER_ID, REMCLI_API_TOKEN  Basic credentials
  REMCLI_BEARER                     Bearer token

Values not given here are read from ~/.remcli/config.json (url, auth).
"#)]
struct Cli {
    /// Server URL
    #[arg(short = 's', long = "url", env = "REMCLI_URL")]
    url: Option<String>,

    /// Basic credentials as user:password, or @file to read them from a file
    #[arg(long)]
    auth: Option<String>,

    /// Bearer token, or @file to read it from a file
    #[arg(long, env = "REMCLI_BEARER", hide_env_values = true)]
    bearer: Option<String>,

    #[arg(long, env = "REMCLI_USER_ID", hide = true)]
    user_id: Option<String>,

    #[arg(long, env = "REMCLI_API_TOKEN", hide = true, hide_env_values = true)]
    api_token: Option<String>,

    /// Private key file (repeatable)
    #[arg(short = 'i', value_name = "KEYFILE")]
    identity: Vec<PathBuf>,

    /// Passphrase for encrypted key files
    #[arg(long, env = "REMCLI_KEY_PASSPHRASE", hide_env_values = true)]
    key_passphrase: Option<String>,

    /// Skip HTTPS certificate verification
    #[arg(long)]
    no_certificate_check: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Remote command and its arguments (default: help)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl Cli {
    /// Pick the credential: flags, then environment, then the config file
    fn credential(&self, config: &RemcliConfig) -> Result<Option<Credential>> {
        if let Some(auth) = &self.auth {
            return Ok(Some(
                Credential::basic_from_arg(auth).context("Invalid --auth value")?,
            ));
        }
        if let Some(token) = &self.bearer {
            return Ok(Some(
                Credential::bearer_from_arg(token).context("Invalid bearer token")?,
            ));
        }
        if let (Some(user), Some(token)) = (&self.user_id, &self.api_token) {
            return Ok(Some(Credential::Basic {
                user: user.clone(),
                password: token.clone(),
            }));
        }
        if let Some(auth) = &config.auth {
            return Ok(Some(
                Credential::basic_from_arg(auth).context("Invalid auth in config file")?,
            ));
        }
        Ok(None)
    }

    /// Credential for the HTTP legs
    ///
    /// `-i` keys are loaded so broken key files are reported, but the legs
    /// carry no key authentication.
    fn resolve_credential(&self, config: &RemcliConfig) -> Result<Option<Credential>> {
        if !self.identity.is_empty() {
            let mut provider = KeyProvider::new();
            for path in &self.identity {
                provider
                    .read_key(path, self.key_passphrase.as_deref())
                    .with_context(|| format!("Failed to load key {}", path.display()))?;
            }
            warn!(
                "Loaded {} key(s) but HTTP connections do not use key authentication",
                provider.keys().len()
            );
        }
        self.credential(config)
    }
}

fn setup_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Locale from the environment, as `language_COUNTRY`
fn system_locale() -> Option<String> {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.is_empty())
        .and_then(|value| parse_locale(&value))
}

fn parse_locale(value: &str) -> Option<String> {
    let locale = value.split(['.', '@']).next().unwrap_or_default();
    if locale.is_empty() || locale == "C" || locale == "POSIX" {
        return None;
    }
    Some(locale.to_string())
}

async fn run(cli: Cli) -> Result<i32> {
    let config = ConfigManager::load()?;
    let url = cli
        .url
        .clone()
        .or_else(|| config.url.clone())
        .context("Neither --url nor REMCLI_URL is set, and ~/.remcli/config.json has no url")?;

    let credential = cli.resolve_credential(&config)?;

    if cli.no_certificate_check {
        warn!("Skipping HTTPS certificate checks altogether. Note that this is not secure at all.");
    }

    let mut tunnel = TunnelClient::builder(url).accept_invalid_certs(cli.no_certificate_check);
    if let Some(credential) = &credential {
        tunnel = tunnel.credential(credential);
    }
    let remote = RemoteCli::new(tunnel.build()?);

    let args = if cli.command.is_empty() {
        vec!["help".to_string()]
    } else {
        cli.command.clone()
    };
    let options = SessionOptions {
        locale: system_locale(),
        ..SessionOptions::new(args)
    };

    Ok(remote
        .execute(
            &options,
            tokio::io::stdin(),
            tokio::io::stdout(),
            tokio::io::stderr(),
        )
        .await?)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("ERROR: {:#}", err);
            err.downcast_ref::<ClientError>()
                .map(ClientError::exit_code)
                .unwrap_or(EXIT_USAGE)
        }
    };
    std::process::exit(code);
}
