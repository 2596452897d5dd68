use std::path::PathBuf;
use std::time::Duration;

use crate::common::{DbError, Result};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:7070";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Settings of the TCP server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// `host:port` to bind
    pub listen: String,
    /// Data root holding one directory per table
    pub data: PathBuf,
    /// Accepted `(user, password)` pairs. Empty accepts any credential.
    pub users: Vec<(String, String)>,
    pub auth_timeout: Duration,
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            data: PathBuf::from(DEFAULT_DATA_DIR),
            users: Vec::new(),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(mut self, addr: impl Into<String>) -> Self {
        self.listen = addr.into();
        self
    }

    pub fn data(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data = dir.into();
        self
    }

    pub fn user(mut self, name: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.push((name.into(), password.into()));
        self
    }

    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Builds the config from command-line flags, falling back to
    /// `TABULA_LISTEN`, `TABULA_DATA` and `TABULA_USERS` for flags not given.
    pub fn from_args<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        Self::parse(args, |key| std::env::var(key).ok())
    }

    fn parse<I, E>(args: I, env: E) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
        E: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();
        if let Some(listen) = env("TABULA_LISTEN") {
            config.listen = listen;
        }
        if let Some(data) = env("TABULA_DATA") {
            config.data = PathBuf::from(data);
        }
        if let Some(users) = env("TABULA_USERS") {
            for pair in users.split(',').filter(|p| !p.is_empty()) {
                config.users.push(credential(pair)?);
            }
        }

        let mut flag_users = Vec::new();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .ok_or_else(|| DbError::syntax(format!("{} needs a value", flag)))
            };
            match arg.as_str() {
                "--listen" => config.listen = value("--listen")?,
                "--data" => config.data = PathBuf::from(value("--data")?),
                "--user" => flag_users.push(credential(&value("--user")?)?),
                "--auth-timeout-secs" => {
                    let secs = value("--auth-timeout-secs")?;
                    let secs = secs
                        .parse::<u64>()
                        .map_err(|_| DbError::syntax(format!("bad timeout '{}'", secs)))?;
                    config.auth_timeout = Duration::from_secs(secs);
                }
                other => return Err(DbError::syntax(format!("unknown option '{}'", other))),
            }
        }
        if !flag_users.is_empty() {
            config.users = flag_users;
        }
        Ok(config)
    }

    /// Whether `user:password` is accepted.
    pub fn authenticate(&self, credential: &str) -> bool {
        let Some((user, password)) = credential.split_once(':') else {
            return false;
        };
        self.users.is_empty()
            || self
                .users
                .iter()
                .any(|(u, p)| u == user && p == password)
    }
}

fn credential(pair: &str) -> Result<(String, String)> {
    pair.split_once(':')
        .map(|(u, p)| (u.to_string(), p.to_string()))
        .ok_or_else(|| DbError::syntax(format!("expected user:password, got '{}'", pair)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_flags_override_env() {
        let env = |key: &str| match key {
            "TABULA_LISTEN" => Some("0.0.0.0:9000".to_string()),
            "TABULA_USERS" => Some("a:1,b:2".to_string()),
            _ => None,
        };
        let config = ServerConfig::parse(args(&[]), env).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.data, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(config.users.len(), 2);

        let config = ServerConfig::parse(
            args(&["--listen", "127.0.0.1:1", "--user", "root:pw", "--auth-timeout-secs", "3"]),
            env,
        )
        .unwrap();
        assert_eq!(config.listen, "127.0.0.1:1");
        assert_eq!(config.users, vec![("root".to_string(), "pw".to_string())]);
        assert_eq!(config.auth_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_bad_flags() {
        let none = |_: &str| None;
        assert!(ServerConfig::parse(args(&["--data"]), none).is_err());
        assert!(ServerConfig::parse(args(&["--user", "nopass"]), none).is_err());
        assert!(ServerConfig::parse(args(&["--verbose"]), none).is_err());
    }

    #[test]
    fn test_authenticate() {
        let open = ServerConfig::new();
        assert!(open.authenticate("anyone:x"));
        assert!(!open.authenticate("no-colon"));

        let config = ServerConfig::new().user("admin", "secret");
        assert!(config.authenticate("admin:secret"));
        assert!(!config.authenticate("admin:wrong"));
    }
}
