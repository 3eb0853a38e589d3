// dbsnapshots/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "snapshots.json";
pub const DEFAULT_FILE_TEMPLATE: &str = "mysql-snapshots-{date}";
pub const DEFAULT_SNAPSHOT_DIR: &str = "mysql-snapshots";

// Structs for deserializing snapshots.json
#[derive(Debug, Clone, Deserialize)]
pub struct JsonS3StorageConfig {
    pub bucket_name: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonConnectionConfig {
    pub url: Option<String>,
    pub host: Option<String>,
    pub read_host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveDisk {
    Local,
    #[default]
    #[serde(alias = "cloud")]
    S3,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilesystemConfig {
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
    #[serde(default = "default_snapshot_dir")]
    pub local_path: String,
    #[serde(default)]
    pub archive_disk: ArchiveDisk,
    /// Root directory of the archive when `archive_disk` is `local`.
    pub archive_root: Option<PathBuf>,
    #[serde(default = "default_snapshot_dir")]
    pub archive_path: String,
    /// Smart caching: keep local copies and re-download only when stale.
    #[serde(default)]
    pub cache_by_default: bool,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        FilesystemConfig {
            local_root: default_local_root(),
            local_path: default_snapshot_dir(),
            archive_disk: ArchiveDisk::default(),
            archive_root: None,
            archive_path: default_snapshot_dir(),
            cache_by_default: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EnvironmentLocks {
    #[serde(default = "default_create_lock")]
    pub create: String,
    #[serde(default = "default_load_lock")]
    pub load: String,
}

impl Default for EnvironmentLocks {
    fn default() -> Self {
        EnvironmentLocks {
            create: default_create_lock(),
            load: default_load_lock(),
        }
    }
}

/// One entry of the `plans` map.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlanConfig {
    pub connection: Option<String>,
    pub file_template: Option<String>,
    #[serde(default)]
    pub mysqldump_options: String,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub ignore_tables: Vec<String>,
    #[serde(default)]
    pub schema_only_tables: Vec<String>,
    #[serde(default = "default_keep_last")]
    pub keep_last: usize,
    #[serde(default)]
    pub environment_locks: EnvironmentLocks,
    #[serde(default, alias = "post_load_commands")]
    pub post_load_sqls: Vec<String>,
}

/// One entry of the `plan_groups` map.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlanGroupConfig {
    #[serde(default)]
    pub plans: Vec<String>,
    #[serde(default, alias = "post_load_commands")]
    pub post_load_sqls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Utilities {
    #[serde(default = "default_mysqldump")]
    pub mysqldump: String,
    #[serde(default = "default_mysql")]
    pub mysql: String,
    #[serde(default = "default_zcat")]
    pub zcat: String,
    /// `null` or empty disables compression of new snapshots.
    #[serde(default = "default_gzip")]
    pub gzip: Option<String>,
}

impl Utilities {
    pub fn gzip(&self) -> Option<&str> {
        self.gzip.as_deref().filter(|g| !g.trim().is_empty())
    }
}

impl Default for Utilities {
    fn default() -> Self {
        Utilities {
            mysqldump: default_mysqldump(),
            mysql: default_mysql(),
            zcat: default_zcat(),
            gzip: default_gzip(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    pub environment: Option<String>,
    #[serde(default)]
    pub filesystem: FilesystemConfig,
    pub s3_storage: Option<JsonS3StorageConfig>,
    #[serde(default)]
    pub connections: HashMap<String, JsonConnectionConfig>,
    pub default_connection: Option<String>,
    #[serde(default, alias = "post_load_commands")]
    pub post_load_sqls: Vec<String>,
    // Kept as raw maps so declaration order survives (serde_json preserve_order).
    #[serde(default)]
    pub plans: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub plan_groups: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub utilities: Utilities,
}

// Application's internal configuration structs
#[derive(Debug, Clone)]
pub struct SpacesConfig {
    pub endpoint_url: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub read_host: Option<String>,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl ConnectionConfig {
    /// Host used by dump utilities; a read replica when one is configured.
    pub fn dump_host(&self) -> &str {
        self.read_host.as_deref().unwrap_or(&self.host)
    }

    /// `mysql://` URL for the statement executor.
    pub fn url(&self) -> Result<String> {
        let mut url = Url::parse("mysql://localhost").context("Failed to build base MySQL URL")?;
        url.set_host(Some(&self.host))
            .with_context(|| format!("Invalid host '{}'", self.host))?;
        url.set_port(Some(self.port))
            .map_err(|_| anyhow::anyhow!("Invalid port {}", self.port))?;
        url.set_username(&self.username)
            .map_err(|_| anyhow::anyhow!("Invalid username '{}'", self.username))?;
        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|_| anyhow::anyhow!("Invalid password for '{}'", self.username))?;
        }
        url.set_path(&self.database);
        Ok(url.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: String,
    pub filesystem: FilesystemConfig,
    pub spaces_config: Option<SpacesConfig>,
    pub connections: HashMap<String, ConnectionConfig>,
    pub default_connection: Option<String>,
    pub post_load_sqls: Vec<String>,
    pub plans: Vec<(String, PlanConfig)>,
    pub plan_groups: Vec<(String, PlanGroupConfig)>,
    pub utilities: Utilities,
}

impl AppConfig {
    /// Loads the configuration file; `SNAPSHOTS_ENV` overrides `environment`.
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let mut config = Self::from_json_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })?;

        if let Ok(environment) = std::env::var("SNAPSHOTS_ENV") {
            if !environment.trim().is_empty() {
                config.environment = environment.trim().to_string();
            }
        }
        Ok(config)
    }

    pub fn from_json_str(config_content: &str) -> Result<Self> {
        let raw_json_config: RawJsonConfig =
            serde_json::from_str(config_content).context("Invalid snapshots configuration")?;

        let spaces_config = parse_spaces_config(raw_json_config.s3_storage.as_ref());
        if raw_json_config.filesystem.archive_disk == ArchiveDisk::S3 && spaces_config.is_none() {
            anyhow::bail!(
                "filesystem.archive_disk is 's3' but s3_storage is missing or incomplete (bucket_name, region, access_key_id, secret_access_key, endpoint_url are required)"
            );
        }
        if raw_json_config.filesystem.archive_disk == ArchiveDisk::Local
            && raw_json_config.filesystem.archive_root.is_none()
        {
            anyhow::bail!("filesystem.archive_root must be set when filesystem.archive_disk is 'local'");
        }

        let mut connections = HashMap::new();
        for (name, raw) in &raw_json_config.connections {
            let connection = parse_connection(raw)
                .with_context(|| format!("Invalid database connection '{}'", name))?;
            connections.insert(name.clone(), connection);
        }

        let plans = raw_json_config
            .plans
            .iter()
            .map(|(name, value)| {
                let plan: PlanConfig = serde_json::from_value(value.clone())
                    .with_context(|| format!("Failed to parse configuration of plan '{}'", name))?;
                Ok((name.clone(), plan))
            })
            .collect::<Result<Vec<_>>>()?;

        let plan_groups = raw_json_config
            .plan_groups
            .iter()
            .map(|(name, value)| {
                let group: PlanGroupConfig = serde_json::from_value(value.clone()).with_context(
                    || format!("Failed to parse configuration of plan group '{}'", name),
                )?;
                Ok((name.clone(), group))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(AppConfig {
            environment: raw_json_config
                .environment
                .clone()
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| "production".to_string()),
            filesystem: raw_json_config.filesystem.clone(),
            spaces_config,
            connections,
            default_connection: raw_json_config.default_connection.clone(),
            post_load_sqls: raw_json_config.post_load_sqls.clone(),
            plans,
            plan_groups,
            utilities: raw_json_config.utilities.clone(),
        })
    }
}

fn parse_spaces_config(s3_raw: Option<&JsonS3StorageConfig>) -> Option<SpacesConfig> {
    let s3_raw = s3_raw?;
    if let (Some(bucket), Some(region), Some(key_id), Some(secret), Some(endpoint)) = (
        s3_raw.bucket_name.as_ref().filter(|s| !s.is_empty()),
        s3_raw.region.as_ref().filter(|s| !s.is_empty()),
        s3_raw.access_key_id.as_ref().filter(|s| !s.is_empty()),
        s3_raw.secret_access_key.as_ref().filter(|s| !s.is_empty()),
        s3_raw.endpoint_url.as_ref().filter(|s| !s.is_empty()),
    ) {
        Some(SpacesConfig {
            bucket_name: bucket.clone(),
            region: region.clone(),
            access_key_id: key_id.clone(),
            secret_access_key: secret.clone(),
            endpoint_url: endpoint.clone(),
            folder_prefix: s3_raw.folder_prefix.clone().filter(|s| !s.is_empty()),
        })
    } else {
        tracing::warn!(
            "s3_storage is present but some required fields (bucket_name, region, access_key_id, secret_access_key, endpoint_url) are missing or empty"
        );
        None
    }
}

/// Resolves a connection from either a `mysql://` URL or discrete fields.
/// Discrete fields win over the URL when both are given.
fn parse_connection(raw: &JsonConnectionConfig) -> Result<ConnectionConfig> {
    let from_url = match &raw.url {
        Some(url) => {
            let parsed = Url::parse(url).with_context(|| format!("Invalid connection URL: {}", url))?;
            if parsed.scheme() != "mysql" && parsed.scheme() != "mariadb" {
                anyhow::bail!("Connection URL must use the mysql:// scheme: {}", url);
            }
            Some(parsed)
        }
        None => None,
    };

    let host = raw
        .host
        .clone()
        .or_else(|| from_url.as_ref().and_then(|u| u.host_str().map(str::to_string)))
        .context("connection needs a host or url")?;
    let database = raw
        .database
        .clone()
        .or_else(|| {
            from_url
                .as_ref()
                .map(|u| u.path().trim_start_matches('/').to_string())
                .filter(|db| !db.is_empty())
        })
        .context("connection needs a database name")?;

    Ok(ConnectionConfig {
        host,
        read_host: raw.read_host.clone().filter(|h| !h.is_empty()),
        port: raw
            .port
            .or_else(|| from_url.as_ref().and_then(|u| u.port()))
            .unwrap_or(3306),
        username: raw
            .username
            .clone()
            .or_else(|| from_url.as_ref().map(|u| u.username().to_string()))
            .unwrap_or_default(),
        password: raw
            .password
            .clone()
            .or_else(|| from_url.as_ref().and_then(|u| u.password().map(str::to_string)))
            .unwrap_or_default(),
        database,
    })
}

fn default_local_root() -> PathBuf {
    PathBuf::from("./storage")
}

fn default_snapshot_dir() -> String {
    DEFAULT_SNAPSHOT_DIR.to_string()
}

fn default_create_lock() -> String {
    "production".to_string()
}

fn default_load_lock() -> String {
    "local".to_string()
}

fn default_keep_last() -> usize {
    1
}

fn default_mysqldump() -> String {
    "mysqldump".to_string()
}

fn default_mysql() -> String {
    "mysql".to_string()
}

fn default_zcat() -> String {
    "zcat".to_string()
}

fn default_gzip() -> Option<String> {
    Some("gzip".to_string())
}
