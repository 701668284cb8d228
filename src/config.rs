//! # Configuration
//!
//! Process configuration from command-line flags, overridden by
//! `CODEMONKEY_*` environment variables.

use std::env;

/// Username hidden from user listings and from the per-user mark columns
pub const DEFAULT_RESERVED_USERNAME: &str = "admin";

/// Group that receives questions created without an explicit group
pub const DEFAULT_GROUP: &str = "General";

#[derive(Debug, Clone)]
pub struct Config {
    /// Database file path
    pub db_path: String,
    /// Server port
    pub port: u16,
    /// Host to bind to
    pub host: String,
    /// Use in-memory database
    pub in_memory: bool,
    /// JWT secret; a random one is generated when absent
    pub jwt_secret: Option<String>,
    pub reserved_username: String,
    pub default_group: String,
    /// Roll the schema back to this version and exit
    pub rollback_to: Option<i64>,
    /// Print usage and exit
    pub show_help: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "codemonkey.db".to_string(),
            port: 8000,
            host: "0.0.0.0".to_string(),
            in_memory: false,
            jwt_secret: None,
            reserved_username: DEFAULT_RESERVED_USERNAME.to_string(),
            default_group: DEFAULT_GROUP.to_string(),
            rollback_to: None,
            show_help: false,
        }
    }
}

impl Config {
    /// Reads the process arguments and environment
    pub fn from_env() -> Self {
        let args: Vec<String> = env::args().skip(1).collect();
        let mut config = Self::from_args(&args);
        config.apply_env(|key| env::var(key).ok());
        config
    }

    /// Parses command-line flags; unknown flags are ignored
    pub fn from_args(args: &[String]) -> Self {
        let mut config = Config::default();
        let mut i = 0;

        while i < args.len() {
            match args[i].as_str() {
                "--db" | "-d" => {
                    if let Some(value) = args.get(i + 1) {
                        config.db_path = value.clone();
                        i += 1;
                    }
                }
                "--port" | "-p" => {
                    if let Some(value) = args.get(i + 1) {
                        config.port = value.parse().unwrap_or(config.port);
                        i += 1;
                    }
                }
                "--host" | "-h" => {
                    if let Some(value) = args.get(i + 1) {
                        config.host = value.clone();
                        i += 1;
                    }
                }
                "--rollback-to" => {
                    if let Some(value) = args.get(i + 1) {
                        config.rollback_to = value.parse().ok();
                        i += 1;
                    }
                }
                "--memory" | "-m" => config.in_memory = true,
                "--help" => config.show_help = true,
                _ => {}
            }
            i += 1;
        }

        config
    }

    /// Environment variable overrides
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("CODEMONKEY_PORT") {
            self.port = port.parse().unwrap_or(self.port);
        }
        if let Some(db) = lookup("CODEMONKEY_DB") {
            self.db_path = db;
        }
        if let Some(host) = lookup("CODEMONKEY_HOST") {
            self.host = host;
        }
        if lookup("CODEMONKEY_MEMORY").is_some() {
            self.in_memory = true;
        }
        if let Some(secret) = lookup("CODEMONKEY_JWT_SECRET") {
            self.jwt_secret = Some(secret);
        }
        if let Some(user) = lookup("CODEMONKEY_RESERVED_USER") {
            self.reserved_username = user;
        }
        if let Some(group) = lookup("CODEMONKEY_DEFAULT_GROUP") {
            self.default_group = group;
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub fn print_help() {
    println!(
        r#"
codemonkey - practice question tracker

USAGE:
    codemonkey [OPTIONS]

OPTIONS:
    -d, --db <PATH>            Database file path [default: codemonkey.db]
    -p, --port <PORT>          Server port [default: 8000]
    -h, --host <HOST>          Host to bind to [default: 0.0.0.0]
    -m, --memory               Use in-memory database
        --rollback-to <VER>    Revert schema migrations newer than VER and exit
        --help                 Print this help message

ENVIRONMENT VARIABLES:
    CODEMONKEY_PORT            Server port
    CODEMONKEY_DB              Database file path
    CODEMONKEY_HOST            Host to bind to
    CODEMONKEY_MEMORY          Set to use in-memory database
    CODEMONKEY_JWT_SECRET      Secret for signing access tokens
    CODEMONKEY_RESERVED_USER   Username hidden from listings [default: admin]
    CODEMONKEY_DEFAULT_GROUP   Group for questions posted without one [default: General]
    RUST_LOG                   Log filter [default: info]
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_args(&[]);
        assert_eq!(config.port, 8000);
        assert_eq!(config.reserved_username, "admin");
        assert_eq!(config.default_group, "General");
        assert!(!config.in_memory);
    }

    #[test]
    fn test_flags() {
        let config = Config::from_args(&args(&[
            "--db", "q.db", "-p", "9001", "--memory", "--rollback-to", "3",
        ]));
        assert_eq!(config.db_path, "q.db");
        assert_eq!(config.port, 9001);
        assert!(config.in_memory);
        assert_eq!(config.rollback_to, Some(3));
        assert_eq!(config.bind_addr(), "0.0.0.0:9001");
    }

    #[test]
    fn test_bad_port_keeps_default() {
        let config = Config::from_args(&args(&["--port", "not-a-port"]));
        assert_eq!(config.port, 8000);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::from_args(&args(&["--port", "9001"]));
        config.apply_env(|key| match key {
            "CODEMONKEY_PORT" => Some("7000".to_string()),
            "CODEMONKEY_RESERVED_USER" => Some("root".to_string()),
            _ => None,
        });
        assert_eq!(config.port, 7000);
        assert_eq!(config.reserved_username, "root");
        assert!(config.jwt_secret.is_none());
    }
}
