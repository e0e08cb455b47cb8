use serde::{Serialize, Deserialize};
use std::net::IpAddr;
use std::fs::File;
use std::path::{Path, PathBuf};
use directories::ProjectDirs;
use serde_with::{DisplayFromStr, serde_as};
use byte_unit::Byte as ByteSize;
use serde_yaml;
use log;

/// Configuration defaults
pub mod defaults {
    use std::net::{IpAddr, Ipv4Addr};
    use std::path::PathBuf;
    use std::time::Duration;
    use byte_unit::Byte as ByteSize;

    pub fn server_ip() -> IpAddr { IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)) }
    pub fn server_port() -> u16 { 8080 }
    pub fn server_payload_size_limit() -> ByteSize { ByteSize::from_u64(4 * 1024 * 1024) }
    pub fn server_static_dir() -> PathBuf { PathBuf::from("static") }

    pub fn logging_level() -> log::LevelFilter { log::LevelFilter::Info }

    pub fn storage_path() -> PathBuf { PathBuf::from("events.db") }
    pub fn storage_max_connections() -> u32 { 4 }
    pub fn storage_busy_timeout() -> humantime::Duration { Duration::from_secs(5).into() }
    pub fn storage_acquire_timeout() -> humantime::Duration { Duration::from_secs(30).into() }

    pub fn reporter_interval() -> humantime::Duration { Duration::from_secs(60).into() }
}

/// Server block
#[derive(Serialize, Deserialize, Debug)]
pub struct Server {
    /// The IP we're going to bind to
    #[serde(default = "defaults::server_ip")]
    pub ip: IpAddr,
    /// The port we're going to listen on
    #[serde(default = "defaults::server_port")]
    pub port: u16,
    /// Requests announcing a larger body are refused (0 to disable)
    #[serde(default = "defaults::server_payload_size_limit")]
    pub payload_size_limit: ByteSize,
    /// A list of allowed origins (CORS), any origin when empty
    #[serde(default)]
    pub origins: Vec<String>,
    /// Files served under /static/
    #[serde(default = "defaults::server_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for Server {
    /// Builds a default server block in case none is provided
    fn default() -> Self {
        return Self {
            ip: defaults::server_ip(),
            port: defaults::server_port(),
            payload_size_limit: defaults::server_payload_size_limit(),
            origins: vec!(),
            static_dir: defaults::server_static_dir(),
        }
    }
}

/// Logging block
#[derive(Serialize, Deserialize, Debug)]
pub struct Logging {
    #[serde(default = "defaults::logging_level")]
    pub level: log::LevelFilter,
}

impl Default for Logging {
    /// Builds a default logging block in case none is provided
    fn default() -> Self {
        return Self {
            level: defaults::logging_level(),
        }
    }
}

/// Storage block
#[serde_as]
#[derive(Serialize, Deserialize, Debug)]
pub struct Storage {
    /// Path to the SQLite database, created if missing
    #[serde(default = "defaults::storage_path")]
    pub path: PathBuf,
    /// Maximum number of open connections to the database
    #[serde(default = "defaults::storage_max_connections")]
    pub max_connections: u32,
    /// How long a write waits for SQLite's lock before giving up
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default = "defaults::storage_busy_timeout")]
    pub busy_timeout: humantime::Duration,
    /// How long a request waits for a free connection
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default = "defaults::storage_acquire_timeout")]
    pub acquire_timeout: humantime::Duration,
    /// Upper bound on a whole insert, none by default
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub write_timeout: Option<humantime::Duration>,
}

impl Default for Storage {
    /// Builds a default storage block in case none is provided
    fn default() -> Self {
        return Self {
            path: defaults::storage_path(),
            max_connections: defaults::storage_max_connections(),
            busy_timeout: defaults::storage_busy_timeout(),
            acquire_timeout: defaults::storage_acquire_timeout(),
            write_timeout: None,
        }
    }
}

/// Reporter block
#[serde_as]
#[derive(Serialize, Deserialize, Debug)]
pub struct Reporter {
    /// Time between two statistics lines
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default = "defaults::reporter_interval")]
    pub interval: humantime::Duration,
}

impl Default for Reporter {
    /// Builds a default reporter block in case none is provided
    fn default() -> Self {
        return Self {
            interval: defaults::reporter_interval(),
        }
    }
}

/// The overall configuration file
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct Configuration {
    /// A server block
    #[serde(default)]
    pub server: Server,
    /// A logging block
    #[serde(default)]
    pub logging: Logging,
    /// A storage block
    #[serde(default)]
    pub storage: Storage,
    /// A reporter block
    #[serde(default)]
    pub reporter: Reporter,
}

/// Parse a configuration file given a path
fn parse_configuration_file(path: &Path) -> Result<Configuration, String> {
    let file = File::open(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let configuration = serde_yaml::from_reader(file).map_err(|e| format!("{}: {}", path.display(), e))?;
    Ok(configuration)
}

/// Locates and parses the configuration file, falls back to defaults when there is none
pub fn get_configuration(cmd_arg: Option<&PathBuf>) -> Result<Configuration, String> {
    let given_location = cmd_arg
        .cloned()
        .or(std::env::var("WEBTICS_CONFIG").map(PathBuf::from).ok());

    /* If a path was given on the command line, ignore all other options */
    if let Some(path) = given_location {
        return parse_configuration_file(path.as_path());
    }

    /* Otherwise, try and guess */
    let xdg_dirs = ProjectDirs::from("com", "withings", "webtics");
    let inferred_locations = [
        Some(PathBuf::from("/etc/webtics/webtics.yml")),
        Some(PathBuf::from("/etc/webtics/webtics.yaml")),
        xdg_dirs.as_ref().map(|dirs| PathBuf::from(dirs.config_dir()).join("webtics.yml")),
        xdg_dirs.as_ref().map(|dirs| PathBuf::from(dirs.config_dir()).join("webtics.yaml")),
        std::env::current_dir().map(|p| p.join("webtics.yml")).ok(),
        std::env::current_dir().map(|p| p.join("webtics.yaml")).ok(),
    ];

    match inferred_locations.iter().flatten().find(|p| p.as_path().is_file()) {
        Some(path) => parse_configuration_file(path),
        None => {
            log::debug!("no configuration file found, using defaults");
            Ok(Configuration::default())
        }
    }
}
