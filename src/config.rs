use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "UPLOAD_GATEWAY_";

const DEFAULT_CONTENT_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "video/mp4",
    "video/quicktime",
    "audio/mpeg",
    "application/pdf",
    "application/zip",
    "text/plain",
];

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub bucket: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub max_attempts: u32,
    pub key_prefix: String,
    pub allowed_content_types: Vec<String>,
    pub cors_origins: Vec<String>,
    pub part_url_ttl_secs: u64,
    pub session_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub session_db: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Multipart upload signing gateway")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Target bucket (overrides UPLOAD_GATEWAY_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Bucket region (overrides UPLOAD_GATEWAY_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Custom S3-compatible endpoint (overrides UPLOAD_GATEWAY_ENDPOINT_URL)
    #[arg(long)]
    pub endpoint_url: Option<String>,

    /// Use path-style bucket addressing (UPLOAD_GATEWAY_FORCE_PATH_STYLE accepts
    /// true/false, 1/0, yes/no, on/off)
    #[arg(long)]
    pub force_path_style: bool,

    /// Static access key id; the default AWS provider chain is used when unset
    #[arg(long)]
    pub access_key_id: Option<String>,

    /// Static secret access key
    #[arg(long)]
    pub secret_access_key: Option<String>,

    /// Maximum attempts per storage request, including the first
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Key prefix for uploaded objects
    #[arg(long)]
    pub key_prefix: Option<String>,

    /// Comma-separated list of accepted MIME types
    #[arg(long)]
    pub allowed_content_types: Option<String>,

    /// Comma-separated list of allowed CORS origins, `*` for any
    #[arg(long)]
    pub cors_origins: Option<String>,

    /// Lifetime of pre-signed part URLs
    #[arg(long)]
    pub part_url_ttl_secs: Option<u64>,

    /// Age after which an unfinished session is aborted
    #[arg(long)]
    pub session_ttl_secs: Option<u64>,

    /// How often abandoned sessions are swept
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// SQLite URL for persistent sessions; in-memory when unset
    #[arg(long)]
    pub session_db: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    /// Merge already parsed CLI args over environment variables and defaults.
    pub fn from_args(args: Args) -> Result<Self> {
        let bucket = match args.bucket.or_else(|| env_string("BUCKET")) {
            Some(bucket) if !bucket.trim().is_empty() => bucket,
            _ => bail!("a bucket is required (--bucket or {ENV_PREFIX}BUCKET)"),
        };

        let allowed_content_types = args
            .allowed_content_types
            .or_else(|| env_string("ALLOWED_CONTENT_TYPES"))
            .map(|raw| split_list(&raw))
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPES.iter().map(|s| s.to_string()).collect());

        let cors_origins = split_list(
            &args
                .cors_origins
                .or_else(|| env_string("CORS_ORIGINS"))
                .unwrap_or_else(|| "*".into()),
        );

        let cfg = Self {
            host: args
                .host
                .or_else(|| env_string("HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: pick(args.port, "PORT", 5000)?,
            bucket,
            region: args
                .region
                .or_else(|| env_string("REGION"))
                .unwrap_or_else(|| "us-east-1".into()),
            endpoint_url: args.endpoint_url.or_else(|| env_string("ENDPOINT_URL")),
            force_path_style: args.force_path_style || env_flag("FORCE_PATH_STYLE")?,
            access_key_id: args.access_key_id.or_else(|| env_string("ACCESS_KEY_ID")),
            secret_access_key: args
                .secret_access_key
                .or_else(|| env_string("SECRET_ACCESS_KEY")),
            max_attempts: pick(args.max_attempts, "MAX_ATTEMPTS", 3)?.max(1),
            key_prefix: args
                .key_prefix
                .or_else(|| env_string("KEY_PREFIX"))
                .unwrap_or_else(|| "uploads".into())
                .trim_matches('/')
                .to_string(),
            allowed_content_types,
            cors_origins,
            part_url_ttl_secs: pick(args.part_url_ttl_secs, "PART_URL_TTL_SECS", 3600)?,
            session_ttl_secs: pick(args.session_ttl_secs, "SESSION_TTL_SECS", 86_400)?,
            sweep_interval_secs: pick(args.sweep_interval_secs, "SWEEP_INTERVAL_SECS", 300)?
                .max(1),
            session_db: args.session_db.or_else(|| env_string("SESSION_DB")),
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn part_url_ttl(&self) -> Duration {
        Duration::from_secs(self.part_url_ttl_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{name}")).ok()
}

/// CLI value, else parsed environment value, else `default`.
fn pick<T>(cli: Option<T>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    let var = format!("{ENV_PREFIX}{name}");
    match env::var(&var) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {var} value `{value}`")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {var}")),
    }
}

/// Boolean environment switch; unset means false.
fn env_flag(name: &str) -> Result<bool> {
    let var = format!("{ENV_PREFIX}{name}");
    let Some(raw) = env_string(name) else {
        return Ok(false);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => bail!("parsing {var} value `{raw}`: expected true/false, 1/0, yes/no or on/off"),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
