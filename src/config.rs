use crate::error::{Result, WatchError};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Written to the config file on the first run.
pub const DEFAULT_CONFIG: &str = r#"# journalwatch configuration

# What to do with entries no ignore pattern matched: "print" or "mail"
action = "print"

# Highest syslog priority to read (0 = emerg ... 7 = debug)
priority = 6

# journalctl --since expression used while no cursor has been saved yet.
# Unset means starting from the earliest entry in the journal.
# since = "-1d"

[journal]
command = ["journalctl"]

[mail]
from = "journalwatch"
to = "root"
# Placeholders: {hostname} {count} {since} {until}
subject = "[{hostname}] - {count} journal messages ({since} - {until})"
command = ["sendmail", "-toi"]
"#;

const MAX_PRIORITY: u8 = 7;

#[derive(Parser, Debug, Default)]
#[clap(name = "journalwatch", version, about)]
pub struct Cli {
    /// Directory holding config.toml and the patterns file
    #[clap(long)]
    pub config_dir: Option<PathBuf>,

    /// Directory holding the saved journal cursor
    #[clap(long)]
    pub data_dir: Option<PathBuf>,

    /// Override the configured action
    #[clap(long, value_enum)]
    pub action: Option<Action>,

    /// Override the configured maximum priority
    #[clap(long)]
    pub priority: Option<u8>,

    /// Read from this journalctl --since expression instead of the saved cursor
    #[clap(long, allow_hyphen_values = true)]
    pub since: Option<String>,

    /// Ignore the saved cursor; a successful run replaces it
    #[clap(long)]
    pub reset: bool,

    /// Do not save the cursor after the run
    #[clap(long)]
    pub dry_run: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    Print,
    Mail,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub action: Action,
    pub priority: u8,
    pub since: Option<String>,
    pub journal: JournalConfig,
    pub mail: MailConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            action: Action::Print,
            priority: 6,
            since: None,
            journal: JournalConfig::default(),
            mail: MailConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JournalConfig {
    /// Program and leading arguments used to export the journal
    pub command: Vec<String>,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            command: vec!["journalctl".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MailConfig {
    pub from: String,
    pub to: String,
    pub subject: String,
    /// Program and arguments the message is piped into
    pub command: Vec<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: "journalwatch".to_string(),
            to: "root".to_string(),
            subject: "[{hostname}] - {count} journal messages ({since} - {until})".to_string(),
            command: vec!["sendmail".to_string(), "-toi".to_string()],
        }
    }
}

impl Config {
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.priority > MAX_PRIORITY {
            return Err(WatchError::ConfigError(format!(
                "priority must be between 0 and {}, got {}",
                MAX_PRIORITY, self.priority
            )));
        }
        if self.journal.command.is_empty() {
            return Err(WatchError::ConfigError("journal.command must not be empty".to_string()));
        }
        if self.mail.command.is_empty() {
            return Err(WatchError::ConfigError("mail.command must not be empty".to_string()));
        }
        Ok(())
    }
}

pub fn load_config(path: &Path, cli: &Cli) -> Result<Config> {
    let config_content = fs::read_to_string(path).map_err(|e| {
        WatchError::ConfigError(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    let mut config = Config::parse(&config_content).map_err(|e| match e {
        WatchError::TomlError(e) => {
            WatchError::ConfigError(format!("Failed to parse config file {}: {}", path.display(), e))
        }
        other => other,
    })?;

    // Apply CLI overrides
    if let Some(action) = cli.action {
        config.action = action;
    }

    if let Some(priority) = cli.priority {
        config.priority = priority;
    }

    if let Some(ref since) = cli.since {
        config.since = Some(since.clone());
    }

    config.validate()?;

    Ok(config)
}
