use crate::config::{Cli, DEFAULT_CONFIG};
use crate::error::{Result, WatchError};
use crate::patterns::DEFAULT_PATTERNS;
use crate::types::Cursor;
use log::{debug, info};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const APP_DIR: &str = "journalwatch";
const CONFIG_FILE: &str = "config.toml";
const PATTERN_FILE: &str = "patterns";
const CURSOR_FILE: &str = "cursor";

/// Where journalwatch keeps its files.
#[derive(Debug, Clone, PartialEq)]
pub struct Paths {
    pub config_file: PathBuf,
    pub pattern_file: PathBuf,
    pub cursor_file: PathBuf,
}

impl Paths {
    pub fn new(config_dir: &Path, data_dir: &Path) -> Self {
        Self {
            config_file: config_dir.join(CONFIG_FILE),
            pattern_file: config_dir.join(PATTERN_FILE),
            cursor_file: data_dir.join(CURSOR_FILE),
        }
    }

    /// XDG locations, unless overridden on the command line.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let config_dir = match cli.config_dir {
            Some(ref dir) => dir.clone(),
            None => dirs::config_dir()
                .ok_or_else(|| WatchError::StateError("Cannot determine config directory".to_string()))?
                .join(APP_DIR),
        };

        let data_dir = match cli.data_dir {
            Some(ref dir) => dir.clone(),
            None => dirs::data_dir()
                .ok_or_else(|| WatchError::StateError("Cannot determine data directory".to_string()))?
                .join(APP_DIR),
        };

        Ok(Self::new(&config_dir, &data_dir))
    }
}

/// Write the default config and patterns files where none exist yet.
pub async fn ensure_defaults(paths: &Paths) -> Result<()> {
    write_if_absent(&paths.config_file, DEFAULT_CONFIG).await?;
    write_if_absent(&paths.pattern_file, DEFAULT_PATTERNS).await?;
    Ok(())
}

async fn write_if_absent(path: &Path, content: &str) -> Result<()> {
    if fs::try_exists(path).await? {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    fs::write(path, content).await?;
    info!("Created default {}", path.display());

    Ok(())
}

pub async fn load_cursor(path: &Path) -> Result<Option<Cursor>> {
    match fs::read_to_string(path).await {
        Ok(content) => {
            let cursor = content.trim();
            if cursor.is_empty() {
                Ok(None)
            } else {
                debug!("Loaded cursor {}", cursor);
                Ok(Some(Cursor::new(cursor)))
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(WatchError::StateError(format!(
            "Failed to read cursor file {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Replace the saved cursor. The new content is written to a temporary
/// file next to the cursor file and renamed over it.
pub async fn save_cursor(path: &Path, cursor: &Cursor) -> Result<()> {
    let state_error =
        |e: std::io::Error| WatchError::StateError(format!("Failed to save cursor to {}: {}", path.display(), e));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(state_error)?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path).await.map_err(state_error)?;
    file.write_all(cursor.as_str().as_bytes()).await.map_err(state_error)?;
    file.write_all(b"\n").await.map_err(state_error)?;
    file.sync_all().await.map_err(state_error)?;
    drop(file);

    fs::rename(&temp_path, path).await.map_err(state_error)?;
    debug!("Saved cursor {}", cursor);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn paths(dir: &TempDir) -> Paths {
        Paths::new(&dir.path().join("config"), &dir.path().join("data"))
    }

    #[tokio::test]
    async fn test_new_config_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(&dir);

        ensure_defaults(&paths).await.unwrap();

        assert_eq!(fs::read_to_string(&paths.pattern_file).await.unwrap(), DEFAULT_PATTERNS);
        assert_eq!(fs::read_to_string(&paths.config_file).await.unwrap(), DEFAULT_CONFIG);
        assert!(!fs::try_exists(&paths.cursor_file).await.unwrap());
    }

    #[tokio::test]
    async fn test_existing_files_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(&dir);
        fs::create_dir_all(paths.pattern_file.parent().unwrap()).await.unwrap();
        fs::write(&paths.pattern_file, "PRIORITY = 5\nfoo\n").await.unwrap();

        ensure_defaults(&paths).await.unwrap();

        assert_eq!(
            fs::read_to_string(&paths.pattern_file).await.unwrap(),
            "PRIORITY = 5\nfoo\n"
        );
        assert_eq!(fs::read_to_string(&paths.config_file).await.unwrap(), DEFAULT_CONFIG);
    }

    #[tokio::test]
    async fn test_cursor_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(&dir);

        assert_eq!(load_cursor(&paths.cursor_file).await.unwrap(), None);

        save_cursor(&paths.cursor_file, &Cursor::new("s=1;i=2")).await.unwrap();
        save_cursor(&paths.cursor_file, &Cursor::new("s=1;i=3")).await.unwrap();

        assert_eq!(
            load_cursor(&paths.cursor_file).await.unwrap(),
            Some(Cursor::new("s=1;i=3"))
        );
        assert!(!fs::try_exists(paths.cursor_file.with_extension("tmp")).await.unwrap());
    }

    #[tokio::test]
    async fn test_blank_cursor_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor");
        fs::write(&path, "\n").await.unwrap();

        assert_eq!(load_cursor(&path).await.unwrap(), None);
    }

    #[test]
    fn test_cli_directories() {
        let cli = Cli {
            config_dir: Some(PathBuf::from("/etc/jw")),
            data_dir: Some(PathBuf::from("/var/lib/jw")),
            ..Cli::default()
        };
        let paths = Paths::resolve(&cli).unwrap();

        assert_eq!(paths.config_file, PathBuf::from("/etc/jw/config.toml"));
        assert_eq!(paths.pattern_file, PathBuf::from("/etc/jw/patterns"));
        assert_eq!(paths.cursor_file, PathBuf::from("/var/lib/jw/cursor"));
    }
}
