use crate::adapters::tasks::{DEFAULT_DAYS_BACK, DEFAULT_TODOIST_BASE_URL};
use crate::cache::{CacheStore, DEFAULT_LOCK_TIMEOUT};
use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MIN_LOCK_TIMEOUT_SECONDS: u64 = 1;
const MAX_LOCK_TIMEOUT_SECONDS: u64 = 600;
const MIN_DAYS_BACK: u32 = 1;
const MAX_DAYS_BACK: u32 = 365;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotesConfig {
    pub vault_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksConfig {
    pub api_token: String,
    #[serde(default = "default_days_back")]
    pub days_back: u32,
    #[serde(default = "default_todoist_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticlesConfig {
    pub export_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsConfig {
    /// Display name to iCalendar feed URL.
    #[serde(default)]
    pub calendars: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    pub csv_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub cache_path: PathBuf,
    pub lock_path: PathBuf,
    pub lock_timeout_secs: u64,
    pub log_dir: Option<PathBuf>,
    pub tag_descriptions_path: Option<PathBuf>,
    pub notes: Option<NotesConfig>,
    pub tasks: Option<TasksConfig>,
    pub articles: Option<ArticlesConfig>,
    pub events: Option<EventsConfig>,
    pub health: Option<HealthConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from("cache.json"),
            lock_path: PathBuf::from("cache.lock"),
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT.as_secs(),
            log_dir: None,
            tag_descriptions_path: None,
            notes: None,
            tasks: None,
            articles: None,
            events: None,
            health: None,
        }
    }
}

fn default_days_back() -> u32 {
    DEFAULT_DAYS_BACK
}

fn default_todoist_base_url() -> String {
    DEFAULT_TODOIST_BASE_URL.to_string()
}

impl AppConfig {
    /// File (if any), then process environment, then validation.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> AppResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|error| AppError::Config(format!("cannot read {}: {}", path.display(), error)))?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&text)
            .map_err(|error| AppError::Config(format!("invalid config {}: {}", path.display(), error)))
    }

    /// Applies the environment overrides; blank values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).map(|value| value.trim().to_string()).filter(|value| !value.is_empty());

        if let Some(value) = get("CACHE_FILE_PATH") {
            self.cache_path = PathBuf::from(value);
        }
        if let Some(value) = get("LOCK_FILE_PATH") {
            self.lock_path = PathBuf::from(value);
        }
        if let Some(value) = get("CACHE_LOCK_TIMEOUT_SECS") {
            match value.parse::<u64>() {
                Ok(seconds) => self.lock_timeout_secs = seconds,
                Err(_) => tracing::warn!(value = %value, "ignoring non-numeric CACHE_LOCK_TIMEOUT_SECS"),
            }
        }
        if let Some(value) = get("EVERYTHING2PROMPT_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = get("TAG_DESCRIPTIONS_PATH") {
            self.tag_descriptions_path = Some(PathBuf::from(value));
        }
        if let Some(value) = get("OBSIDIAN_PATH") {
            self.notes = Some(NotesConfig {
                vault_path: PathBuf::from(value),
            });
        }
        if let Some(value) = get("TODOIST_ACCESS_TOKEN") {
            match self.tasks.as_mut() {
                Some(tasks) => tasks.api_token = value,
                None => {
                    self.tasks = Some(TasksConfig {
                        api_token: value,
                        days_back: DEFAULT_DAYS_BACK,
                        base_url: DEFAULT_TODOIST_BASE_URL.to_string(),
                    })
                }
            }
        }
        if let Some(value) = get("INSTAPAPER_EXPORT_PATH") {
            self.articles = Some(ArticlesConfig {
                export_path: PathBuf::from(value),
            });
        }
        if let Some(value) = get("HEALTH_CSV_PATH") {
            self.health = Some(HealthConfig {
                csv_path: PathBuf::from(value),
            });
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if !(MIN_LOCK_TIMEOUT_SECONDS..=MAX_LOCK_TIMEOUT_SECONDS).contains(&self.lock_timeout_secs) {
            return Err(AppError::Config(format!(
                "lockTimeoutSecs must be between {} and {}",
                MIN_LOCK_TIMEOUT_SECONDS, MAX_LOCK_TIMEOUT_SECONDS
            )));
        }
        if self.cache_path.as_os_str().is_empty() || self.lock_path.as_os_str().is_empty() {
            return Err(AppError::Config("cachePath and lockPath cannot be empty".to_string()));
        }
        if self.cache_path == self.lock_path {
            return Err(AppError::Config("cachePath and lockPath must differ".to_string()));
        }
        if let Some(tasks) = &self.tasks {
            if tasks.api_token.trim().is_empty() {
                return Err(AppError::Config("tasks.apiToken cannot be empty".to_string()));
            }
            validate_days_back(tasks.days_back)?;
        }
        if let Some(events) = &self.events {
            for (name, url) in &events.calendars {
                if name.trim().is_empty() {
                    return Err(AppError::Config("calendar names cannot be empty".to_string()));
                }
                let lowered = url.trim().to_ascii_lowercase();
                if !["https://", "http://", "webcal://"]
                    .iter()
                    .any(|scheme| lowered.starts_with(scheme))
                {
                    return Err(AppError::Config(format!(
                        "calendar '{}' must use an http(s) or webcal URL",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn store(&self) -> CacheStore {
        CacheStore::new(&self.cache_path, &self.lock_path)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Overrides the Todoist look-back window, e.g. from the command line.
    pub fn with_days_back(mut self, days_back: Option<u32>) -> AppResult<Self> {
        if let Some(days_back) = days_back {
            validate_days_back(days_back)?;
            if let Some(tasks) = self.tasks.as_mut() {
                tasks.days_back = days_back;
            }
        }
        Ok(self)
    }
}

fn validate_days_back(days_back: u32) -> AppResult<()> {
    if !(MIN_DAYS_BACK..=MAX_DAYS_BACK).contains(&days_back) {
        return Err(AppError::Config(format!(
            "days back must be between {} and {}",
            MIN_DAYS_BACK, MAX_DAYS_BACK
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_documented_paths() {
        let config = AppConfig::default();
        assert_eq!(config.cache_path, PathBuf::from("cache.json"));
        assert_eq!(config.lock_path, PathBuf::from("cache.lock"));
        assert_eq!(config.lock_timeout(), Duration::from_secs(30));
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn yaml_file_configures_sources() {
        let root = tempfile::tempdir().expect("temp root");
        let path = root.path().join("config.yaml");
        fs::write(
            &path,
            "cachePath: /data/cache.json\n\
lockTimeoutSecs: 5\n\
tasks:\n  apiToken: secret\n\
events:\n  calendars:\n    Work: https://cal.example/work.ics\n    Home: webcal://cal.example/home.ics\n",
        )
        .expect("write config");

        let config = AppConfig::from_file(&path).expect("parse config");
        assert_eq!(config.cache_path, PathBuf::from("/data/cache.json"));
        assert_eq!(config.lock_path, PathBuf::from("cache.lock"));
        assert_eq!(config.lock_timeout_secs, 5);
        let tasks = config.tasks.as_ref().expect("tasks configured");
        assert_eq!(tasks.days_back, DEFAULT_DAYS_BACK);
        assert_eq!(tasks.base_url, DEFAULT_TODOIST_BASE_URL);
        assert_eq!(config.events.as_ref().map(|events| events.calendars.len()), Some(2));
        config.validate().expect("valid config");
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = AppConfig::default();
        config.apply_env(env_from(&[
            ("CACHE_FILE_PATH", "/tmp/c.json"),
            ("LOCK_FILE_PATH", "/tmp/c.lock"),
            ("TODOIST_ACCESS_TOKEN", "tok"),
            ("OBSIDIAN_PATH", "/vault"),
            ("HEALTH_CSV_PATH", "  "),
        ]));
        assert_eq!(config.cache_path, PathBuf::from("/tmp/c.json"));
        assert_eq!(config.lock_path, PathBuf::from("/tmp/c.lock"));
        assert_eq!(config.tasks.as_ref().map(|tasks| tasks.api_token.as_str()), Some("tok"));
        assert_eq!(config.notes.as_ref().map(|notes| notes.vault_path.clone()), Some(PathBuf::from("/vault")));
        assert!(config.health.is_none());
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let mut config = AppConfig::default();
        config.lock_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = AppConfig::default();
        config.events = Some(EventsConfig {
            calendars: BTreeMap::from([("Work".to_string(), "ftp://cal.example".to_string())]),
        });
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.lock_path = config.cache_path.clone();
        assert!(config.validate().is_err());

        assert!(AppConfig::default().with_days_back(Some(0)).is_err());
        assert!(AppConfig::default().with_days_back(Some(400)).is_err());
    }

    #[test]
    fn days_back_override_applies_to_tasks() {
        let mut config = AppConfig::default();
        config.apply_env(env_from(&[("TODOIST_ACCESS_TOKEN", "tok")]));
        let config = config.with_days_back(Some(14)).expect("valid override");
        assert_eq!(config.tasks.map(|tasks| tasks.days_back), Some(14));
    }
}
