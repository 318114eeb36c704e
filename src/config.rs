use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};
use uuid::Uuid;

/// Which object store backs the service.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    /// Tencent COS through its S3-compatible endpoint.
    Cos,
    /// Objects on local disk, downloads signed and served by this process.
    Local,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub provider: ProviderKind,
    /// Base URL the local backend puts in signed links.
    pub public_url: String,
    /// Replaces the regional COS endpoint, e.g. to point at an emulator.
    pub cos_endpoint: Option<String>,
    pub max_upload_mb: u64,
    pub provider_timeout: Duration,
    pub signing_key: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "COS bucket metadata and signed-access service")]
pub struct Args {
    /// Host to bind to (overrides COS_SYNC_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides COS_SYNC_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for staged uploads and local objects (overrides COS_SYNC_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides COS_SYNC_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Object store backend (overrides COS_SYNC_PROVIDER)
    #[arg(long, value_enum)]
    pub provider: Option<ProviderKind>,

    /// Public base URL for local signed links (overrides COS_SYNC_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// COS endpoint override (overrides COS_SYNC_COS_ENDPOINT)
    #[arg(long)]
    pub cos_endpoint: Option<String>,

    /// Upload ceiling in MiB (overrides COS_SYNC_MAX_UPLOAD_MB)
    #[arg(long)]
    pub max_upload_mb: Option<u64>,

    /// Deadline for each provider call, in seconds (overrides COS_SYNC_PROVIDER_TIMEOUT_SECS)
    #[arg(long)]
    pub provider_timeout_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::merge(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values found through `lookup`, then defaults.
    fn merge(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_port = parsed(&lookup, "COS_SYNC_PORT")?.unwrap_or(3000);
        let port = args.port.unwrap_or(env_port);

        let env_provider = match lookup("COS_SYNC_PROVIDER") {
            Some(value) => <ProviderKind as ValueEnum>::from_str(&value, true)
                .map_err(|e| anyhow!("parsing COS_SYNC_PROVIDER value `{}`: {}", value, e))?,
            None => ProviderKind::Cos,
        };

        let cfg = Self {
            host: args
                .host
                .or_else(|| lookup("COS_SYNC_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port,
            storage_dir: args
                .storage_dir
                .or_else(|| lookup("COS_SYNC_STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            database_url: args
                .database_url
                .or_else(|| lookup("COS_SYNC_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/cos_sync.db".into()),
            provider: args.provider.unwrap_or(env_provider),
            public_url: args
                .public_url
                .or_else(|| lookup("COS_SYNC_PUBLIC_URL"))
                .unwrap_or_else(|| format!("http://127.0.0.1:{}", port)),
            cos_endpoint: args.cos_endpoint.or_else(|| lookup("COS_SYNC_COS_ENDPOINT")),
            max_upload_mb: match args.max_upload_mb {
                Some(mb) => mb,
                None => parsed(&lookup, "COS_SYNC_MAX_UPLOAD_MB")?.unwrap_or(10),
            },
            provider_timeout: Duration::from_secs(match args.provider_timeout_secs {
                Some(secs) => secs,
                None => parsed(&lookup, "COS_SYNC_PROVIDER_TIMEOUT_SECS")?.unwrap_or(30),
            }),
            signing_key: lookup("COS_SYNC_SIGNING_KEY")
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
        };

        if cfg.provider_timeout.is_zero() {
            anyhow::bail!("provider timeout must be at least one second");
        }
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field("provider", &self.provider)
            .field("public_url", &self.public_url)
            .field("cos_endpoint", &self.cos_endpoint)
            .field("max_upload_mb", &self.max_upload_mb)
            .field("provider_timeout", &self.provider_timeout)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", name, value))
        })
        .transpose()
}
