use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use writer::prelude::*;

#[derive(Parser)]
#[command(name = "reesmo")]
#[command(about = "Reports test results to a reesmo filesystem tree or server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a result read from a JSON file
    Add {
        /// Result JSON file
        #[arg(short, long)]
        result: PathBuf,
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Project key the result belongs to
        #[arg(short, long)]
        project_key: Option<String>,
        /// File or directory to attach, optionally stored as `<path>=<upload path>`
        #[arg(short, long, value_parser = parse_attachment)]
        attachment: Vec<Attachment>,
    },
    /// Print the effective storage settings
    Settings {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let overrides = Overrides::from_env();

    match cli.command {
        Commands::Add {
            result,
            config,
            project_key,
            attachment,
        } => {
            let configuration = load_configuration(config.as_deref())?;
            match add_result(
                &configuration,
                overrides,
                &result,
                project_key.as_deref(),
                &attachment,
            ) {
                Ok(Some(id)) => println!("{}", id),
                Ok(None) => println!("Result reporting is disabled, nothing stored"),
                Err(e) => {
                    error!("Failed to add result from {}: {}", result.display(), e);
                    return Err(e.into());
                }
            }
        }
        Commands::Settings { config } => {
            let configuration = load_configuration(config.as_deref())?;
            for (setting, value) in effective_settings(&configuration, &overrides)? {
                println!("{} = {}", setting, value);
            }
        }
    }

    Ok(())
}

fn load_configuration(path: Option<&Path>) -> StorageResult<Configuration> {
    match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            Configuration::from_file(path)
        }
        None => Ok(Configuration::default()),
    }
}

/// Stores the result in `result_file`, returning the id it was stored under.
fn add_result(
    configuration: &Configuration,
    overrides: Overrides,
    result_file: &Path,
    project_key: Option<&str>,
    attachments: &[Attachment],
) -> StorageResult<Option<String>> {
    let content = std::fs::read_to_string(result_file)?;
    let mut result: TestResult = serde_json::from_str(&content)?;

    let storage = Storage::from_configuration(configuration, overrides)?;
    let sources: [&dyn ConfigurationSource; 1] = [configuration];
    match project_key {
        Some(key) => {
            storage.update_result_from_configurations(&sources, &mut result)?;
            storage.add_result_for_project_with_attachments(Some(key), &mut result, attachments)?;
        }
        None => storage.add_result_with_configurations(&sources, &mut result, attachments)?,
    }

    Ok(result.id().map(str::to_string))
}

const REPORTED_SETTINGS: [Setting; 7] = [
    Setting::Enabled,
    Setting::Storage,
    Setting::BaseDir,
    Setting::Endpoint,
    Setting::Username,
    Setting::ProjectId,
    Setting::ProjectKey,
];

fn effective_settings(
    configuration: &Configuration,
    overrides: &Overrides,
) -> StorageResult<Vec<(Setting, String)>> {
    let resolver = Resolver::new(overrides);
    let sources: [&dyn ConfigurationSource; 1] = [configuration];

    let mut settings = Vec::new();
    for setting in REPORTED_SETTINGS {
        let value = match resolver.resolve(setting, &sources, None)? {
            Some(SettingValue::Bool(flag)) => flag.to_string(),
            Some(SettingValue::Backend(kind)) => kind.to_string(),
            Some(SettingValue::Path(path)) => path.display().to_string(),
            Some(SettingValue::Text(text)) => text,
            Some(other) => format!("{:?}", other),
            None => "-".to_string(),
        };
        settings.push((setting, value));
    }
    Ok(settings)
}

fn parse_attachment(value: &str) -> Result<Attachment, String> {
    match value.split_once('=') {
        Some((file, _)) if file.is_empty() => Err(format!("missing file in '{}'", value)),
        Some((file, path)) => Ok(Attachment::new(file).with_path(path)),
        None if value.is_empty() => Err("attachment path is empty".to_string()),
        None => Ok(Attachment::new(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_attachment() {
        let attachment = parse_attachment("target/logs=run/logs").unwrap();
        assert_eq!(attachment.file(), Path::new("target/logs"));
        assert_eq!(attachment.path(), Some("run/logs"));

        let attachment = parse_attachment("shot.png").unwrap();
        assert_eq!(attachment.path(), None);

        assert!(parse_attachment("=run/logs").is_err());
        assert!(parse_attachment("").is_err());
    }

    #[test]
    fn test_cli_parses_add() {
        let cli = Cli::try_parse_from([
            "reesmo",
            "add",
            "--result",
            "result.json",
            "--project-key",
            "proj1",
            "--attachment",
            "shot.png",
            "--attachment",
            "logs=run/logs",
        ])
        .unwrap();

        match cli.command {
            Commands::Add {
                result,
                project_key,
                attachment,
                config,
            } => {
                assert_eq!(result, PathBuf::from("result.json"));
                assert_eq!(project_key.as_deref(), Some("proj1"));
                assert_eq!(attachment.len(), 2);
                assert!(config.is_none());
            }
            Commands::Settings { .. } => panic!("expected add command"),
        }
    }

    #[test]
    fn test_add_result_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let result_file = dir.path().join("result.json");
        fs::write(
            &result_file,
            r#"{"name":"login test","startedAt":1000,"status":"FAILED"}"#,
        )
        .unwrap();
        let configuration = Configuration::new().with_base_dir(dir.path().join("out"));

        let id = add_result(
            &configuration,
            Overrides::new(),
            &result_file,
            Some("proj1"),
            &[],
        )
        .unwrap()
        .unwrap();

        let stored = dir.path().join("out").join(&id);
        assert!(stored.join("ready").is_file());
        assert_eq!(fs::read_to_string(stored.join("projectkey")).unwrap(), "proj1");
    }

    #[test]
    fn test_add_result_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let result_file = dir.path().join("result.json");
        fs::write(&result_file, r#"{"name":"login test","startedAt":1000}"#).unwrap();
        let configuration = Configuration::new().with_enabled(false);

        let id = add_result(&configuration, Overrides::new(), &result_file, None, &[]).unwrap();
        assert!(id.is_none());
    }

    #[test]
    fn test_effective_settings() {
        let configuration = Configuration::new()
            .with_storage(BackendKind::Restapi)
            .with_endpoint("https://reesmo.example.com");
        let overrides = Overrides::new().with(Setting::Username, "ci");

        let settings = effective_settings(&configuration, &overrides).unwrap();
        let lookup = |wanted: Setting| {
            settings
                .iter()
                .find(|(setting, _)| *setting == wanted)
                .map(|(_, value)| value.clone())
                .unwrap()
        };

        assert_eq!(lookup(Setting::Enabled), "true");
        assert_eq!(lookup(Setting::Storage), "restapi");
        assert_eq!(lookup(Setting::Endpoint), "https://reesmo.example.com");
        assert_eq!(lookup(Setting::Username), "ci");
        assert_eq!(lookup(Setting::ProjectKey), "-");
    }
}
