//! Startup configuration layering.
//!
//! Settings are read from the process environment, which an env file can
//! seed before anything else runs.

use std::path::{Path, PathBuf};

use crate::config::{read_config, validate_config, ConfigError, ServerConfig, Settings};

/// Build the server configuration: defaults, then the optional TOML file,
/// then `settings`, then `overrides` (command line flags). The result is
/// validated as a whole.
pub fn assemble_config<F>(
    file: Option<&Path>,
    settings: &Settings,
    overrides: F,
) -> Result<ServerConfig, ConfigError>
where
    F: FnOnce(&mut ServerConfig),
{
    let mut config = match file {
        Some(path) => read_config(path)?,
        None => ServerConfig::default(),
    };
    config.apply_settings(settings);
    overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

/// Export the variables of an env file into the process environment.
/// Variables that are already set keep their value.
///
/// With no explicit `path`, a `.env` in the working directory or one of its
/// parents is used when present. Returns the file that was loaded.
pub fn load_env_file(path: Option<&Path>) -> Result<Option<PathBuf>, dotenvy::Error> {
    match path {
        Some(path) => dotenvy::from_path(path).map(|()| Some(path.to_path_buf())),
        None => match dotenvy::dotenv() {
            Ok(found) => Ok(Some(found)),
            Err(err) if err.not_found() => Ok(None),
            Err(err) => Err(err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::WRITE_TIMEOUT_KEY;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn later_layers_win() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[listener]\nport = 9000\n[timeouts]\nwrite = \"2s\"").unwrap();

        let settings = Settings::from_pairs([(WRITE_TIMEOUT_KEY, "7s")]);
        let config = assemble_config(Some(file.path()), &settings, |config| {
            config.directory = dir.path().to_path_buf();
            config.listener.port = 9100;
        })
        .unwrap();

        assert_eq!(config.listener.port, 9100);
        assert_eq!(config.timeouts.write, Duration::from_secs(7));
    }

    #[test]
    fn env_file_seeds_settings_without_overriding() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "HH_STARTUP_TEST_DELAY=1500ms").unwrap();
        writeln!(file, "HH_STARTUP_TEST_KEPT=from-file").unwrap();
        std::env::set_var("HH_STARTUP_TEST_KEPT", "from-env");

        let loaded = load_env_file(Some(file.path())).unwrap();
        assert_eq!(loaded.as_deref(), Some(file.path()));

        let settings = Settings::from_env();
        assert_eq!(
            settings.duration("HH_STARTUP_TEST_DELAY", Duration::ZERO),
            Duration::from_millis(1500)
        );
        assert_eq!(settings.string("HH_STARTUP_TEST_KEPT", ""), "from-env");
    }

    #[test]
    fn explicit_env_file_must_exist() {
        assert!(load_env_file(Some(Path::new("/definitely/not/here/.env"))).is_err());
    }

    #[test]
    fn overrides_are_validated() {
        let settings = Settings::from_pairs(Vec::<(String, String)>::new());
        let result = assemble_config(None, &settings, |config| {
            config.listener.max_connections = 0;
        });
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }
}
