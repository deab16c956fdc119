use std::env::current_exe;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str;
use std::sync::{Arc, Mutex};
use directories_next::ProjectDirs;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::{info, warn};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::config::types::Config;
use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "scale-link.json";

// scale-link.json next to the executable, so a copy on a usb stick carries its own config
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(path) => match path.parent() {
            Some(dir) => Some(dir.join(CONFIG_FILE_NAME)),
            None => {
                warn!("current exe has no parent directory: {}", path.to_string_lossy());
                None
            },
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// scale-link.json in an os dependent standard directory, such as ~/.config on linux
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "scale-link", "scale-link").map(|dirs| {
        dirs.config_dir().join(CONFIG_FILE_NAME)
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        match std::fs::metadata(&path) {
            Ok(attr) if attr.is_file() => return Ok(path),
            Ok(_) => {},
            Err(err) => {
                info!("No portable config at {}; using local path instead. ({})", path.to_string_lossy(), err);
            },
        }
    }

    get_local_config_path().ok_or(ConfigError::NoConfigPath)
}

pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        self.rw_lock.try_write().map_err(|source| ConfigError::CanNotLock { source })
    }
}

struct ConfigIOInner {
    path: PathBuf,
    file: std::fs::File,
}

/// The config file, shared by everything that reads or saves it.
///
/// Hold the guard from [`ConfigIOLocker::lock`] for as long as the scales are managed; a second
/// instance fails to lock and must not touch the radio.
#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
}

impl ConfigIO {
    /// Opens (creating if needed) the config file at `path`, or at the default location.
    pub fn open(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path,
            None => get_config_path()?,
        };
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(directory)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(&path)?;

        Ok(ConfigIO { inner: Arc::new(Mutex::new(ConfigIOInner { path, file })) })
    }

    pub fn path(&self) -> PathBuf {
        let inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.path.clone()
    }

    pub fn locker(&self) -> Result<ConfigIOLocker, ConfigError> {
        let inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(inner.file.try_clone()?),
        })
    }

    // The File returned from here shares its cursor with the locked handle; never close it.
    fn get_file(&self) -> Result<File, ConfigError> {
        let inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let file = inner.file.try_clone()?;
        Ok(File::from_std(file))
    }

    /// Reads the config. An empty (just created) file yields `None`.
    pub async fn read(&self) -> Result<Option<Config>, ConfigError> {
        let mut file = self.get_file()?;
        info!("Reading config file");

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let content = str::from_utf8(&content)?;
        let config: Config = serde_json::from_str(content)?;
        Ok(Some(config))
    }

    /// Reads and validates the config; a missing config is replaced by the defaults, which are
    /// written back so they can be edited.
    pub async fn load_or_init(&self) -> Result<Config, ConfigError> {
        let config = match self.read().await? {
            Some(config) => config,
            None => {
                let config = Config::default();
                self.save(&config).await?;
                config
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let mut file = self.get_file()?;
        info!("Saving config");

        let content = serde_json::to_string_pretty(config)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
