use {
    std::path::{
        Path,
        PathBuf,
    },
    smart_default::SmartDefault,
    sqlx::{
        ConnectOptions as _,
        postgres::PgConnectOptions,
    },
    tokio::time::Duration,
    crate::prelude::*,
};
#[cfg(unix)] use xdg::BaseDirectories;
#[cfg(windows)] use directories::ProjectDirs;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("failed to read config file at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file at {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[cfg(unix)]
    #[error("missing config file")]
    Missing,
}

#[allow(unused)] // variants only constructed under conditional compilation
#[derive(Debug, Default, Clone, Copy)]
pub(crate) enum Environment {
    #[cfg_attr(any(feature = "production", not(any(feature = "dev", feature = "local", debug_assertions))), default)]
    Production,
    #[cfg_attr(any(feature = "dev", all(debug_assertions, not(feature = "production"), not(feature = "local"))), default)]
    Dev,
    #[cfg_attr(feature = "local", default)]
    Local,
}

impl Environment {
    pub(crate) fn is_dev(&self) -> bool {
        match self {
            Self::Production => false,
            Self::Dev => true,
            Self::Local => true,
        }
    }

    fn config_file_name(&self) -> &'static str {
        if self.is_dev() { "league-engine-dev.json" } else { "league-engine.json" }
    }

    fn database_name(&self) -> &'static str {
        match self {
            Self::Production => "league_engine",
            Self::Dev => "league_engine_dev",
            Self::Local => "league_engine_local",
        }
    }
}

#[derive(Debug, Clone, SmartDefault, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct Config {
    pub(crate) database: ConfigDatabase,
    /// Overrides the `Info` default, e.g. `"debug"`.
    pub(crate) log_level: Option<log::LevelFilter>,
    /// Fixes the random doubles rotation, for reproducible test seasons.
    pub(crate) schedule_seed: Option<u64>,
    #[default = 3]
    pub(crate) max_concurrency_retries: u32,
}

impl Config {
    async fn read(path: &Path) -> Result<Self, Error> {
        let buf = tokio::fs::read(path).await.map_err(|source| Error::Io { path: path.to_owned(), source })?;
        serde_json::from_slice(&buf).map_err(|source| Error::Json { path: path.to_owned(), source })
    }

    pub(crate) async fn load(path: Option<&Path>) -> Result<Self, Error> {
        if let Some(path) = path {
            return Self::read(path).await
        }
        let file_name = Environment::default().config_file_name();
        #[cfg(unix)] {
            if let Some(config_path) = BaseDirectories::new().find_config_file(file_name) {
                Self::read(&config_path).await
            } else {
                Err(Error::Missing)
            }
        }
        #[cfg(windows)] {
            let config_path = ProjectDirs::from("", "", "league-engine")
                .map(|dirs| dirs.config_dir().join(file_name))
                .filter(|path| path.exists())
                .unwrap_or_else(|| Path::new("cfg").join(file_name));
            Self::read(&config_path).await
        }
    }

    pub(crate) fn connect_options(&self) -> PgConnectOptions {
        let mut db_options = PgConnectOptions::default()
            .database(Environment::default().database_name())
            .application_name("league-engine")
            .log_slow_statements(log::LevelFilter::Warn, Duration::from_secs(10));
        if let Some(ref host) = self.database.host {
            db_options = db_options.host(host);
        }
        if let Some(port) = self.database.port {
            db_options = db_options.port(port);
        }
        if let Some(ref username) = self.database.username {
            db_options = db_options.username(username);
        }
        if let Some(ref password) = self.database.password {
            db_options = db_options.password(password);
        }
        if let Some(ref database) = self.database.database {
            db_options = db_options.database(database);
        }
        db_options
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConfigDatabase {
    pub(crate) host: Option<String>,
    pub(crate) port: Option<u16>,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) database: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config = serde_json::from_str::<Config>(r#"{"database": {"host": "db.internal"}, "logLevel": "debug"}"#).unwrap();
        assert_eq!(config.max_concurrency_retries, 3);
        assert_eq!(config.schedule_seed, None);
        assert_eq!(config.log_level, Some(log::LevelFilter::Debug));
        assert_eq!(config.database.host.as_deref(), Some("db.internal"));
        assert_eq!(config.connect_options().get_host(), "db.internal");
    }

    #[test]
    fn empty_config_is_valid() {
        let config = serde_json::from_str::<Config>("{}").unwrap();
        assert_eq!(config.max_concurrency_retries, Config::default().max_concurrency_retries);
        assert!(config.database.port.is_none());
    }

    #[tokio::test]
    async fn explicit_path_must_exist() {
        let result = Config::load(Some(Path::new("/nonexistent/league-engine.json"))).await;
        assert!(matches!(result, Err(Error::Io { .. })));
    }
}
