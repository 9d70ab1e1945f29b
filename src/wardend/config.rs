//! Daemon configuration manager.
//!
//! One INI file, one section per component. Every consumer gets a
//! `watch::Receiver` of its whole section: an update replaces the section
//! value in a single send, so an observer either sees the old section or
//! the new one, never a partial edit. That property is what makes rule
//! reload safe for the ingestion loop.

use std::{
    collections::HashMap,
    fmt::Display,
    fs::File,
    path::PathBuf,
    str::FromStr,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result, bail};
use thiserror::Error;
use tokio::sync::watch;

const DEFAULT_CONFIG_FILE: &str = "/etc/warden/warden.ini";

#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("field {field} is required")]
    RequiredValue { field: String },
    #[error("{value} is not a valid value for field {field}: {err}")]
    InvalidValue {
        field: String,
        value: String,
        err: String,
    },
}

/// One configuration section as raw key/value pairs, with typed accessors.
#[derive(Debug, Clone, Default)]
pub struct SectionConfig {
    inner: HashMap<String, String>,
}

impl SectionConfig {
    pub fn insert(&mut self, key: String, value: String) -> Option<String> {
        self.inner.insert(key, value)
    }

    pub fn get_raw(&self, name: &str) -> Option<&str> {
        self.inner.get(name).map(String::as_str)
    }

    pub fn required<T>(&self, name: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        match self.inner.get(name) {
            None => Err(ConfigError::RequiredValue {
                field: name.to_string(),
            }),
            Some(value) => parse(value, name),
        }
    }

    pub fn optional<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        self.inner
            .get(name)
            .map(|value| parse(value, name))
            .transpose()
    }

    pub fn with_default<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        Ok(self.optional(name)?.unwrap_or(default))
    }
}

fn parse<T>(value: &str, name: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    <T as FromStr>::Err: Display,
{
    T::from_str(value).map_err(|err| ConfigError::InvalidValue {
        field: name.to_string(),
        value: value.to_string(),
        err: err.to_string(),
    })
}

/// Global configuration manager backed by an INI file.
#[derive(Debug, Clone)]
pub struct WardenConfig {
    inner: Arc<Mutex<WardenConfigInternal>>,
}

#[derive(Debug)]
struct WardenConfigInternal {
    config_file: PathBuf,
    sections: HashMap<String, watch::Sender<SectionConfig>>,
}

impl WardenConfig {
    /// Load the default configuration file, creating an empty one on
    /// first run.
    pub fn new() -> Result<Self> {
        let config_file = PathBuf::from(DEFAULT_CONFIG_FILE);
        if !config_file.exists() {
            let prefix = config_file.parent().unwrap(); // never / itself
            std::fs::create_dir_all(prefix)
                .with_context(|| format!("Error creating {}", prefix.display()))?;
            File::create(&config_file)?;
        }
        Self::from_config_file(config_file)
    }

    /// Load a custom configuration file, which must exist.
    pub fn with_custom_file(config_file: &str) -> Result<Self> {
        let config_file = PathBuf::from(config_file);
        if !config_file.exists() {
            bail!("Configuration file {} not found", config_file.display());
        }
        Self::from_config_file(config_file)
    }

    fn from_config_file(config_file: PathBuf) -> Result<Self> {
        let mut sections: HashMap<String, SectionConfig> = HashMap::new();

        let conf = ini::Ini::load_from_file(&config_file)
            .with_context(|| format!("Error loading configuration from {config_file:?}"))?;
        for (section, properties) in &conf {
            if let Some(section) = section {
                let section_config = sections.entry(section.to_string()).or_default();
                for (key, value) in properties.iter() {
                    log::debug!("{section}.{key}={value}");
                    section_config.insert(key.to_string(), value.to_string());
                }
            }
        }

        let sections = sections
            .into_iter()
            .map(|(name, cfg)| {
                let (tx, _) = watch::channel(cfg);
                (name, tx)
            })
            .collect();

        Ok(Self {
            inner: Arc::new(Mutex::new(WardenConfigInternal {
                config_file,
                sections,
            })),
        })
    }

    /// Watch a section for changes. Intended for long-lived consumers
    /// like the rule reloader.
    pub fn watch_section(&self, section: &str) -> watch::Receiver<SectionConfig> {
        self.inner
            .lock()
            .unwrap()
            .sections
            .entry(section.to_string())
            .or_insert_with(|| {
                let (tx, _) = watch::channel(SectionConfig::default());
                tx
            })
            .subscribe()
    }

    /// One-shot section read.
    pub fn get_section(&self, section: &str) -> SectionConfig {
        self.inner
            .lock()
            .unwrap()
            .sections
            .get(section)
            .map(|tx| tx.borrow().clone())
            .unwrap_or_default()
    }

    /// Update one key, persisting to the INI file and notifying watchers
    /// with a whole-section replacement.
    pub fn update(&self, section: &str, key: &str, value: &str) -> Result<()> {
        let mut ctx = self.inner.lock().unwrap();

        let mut conf = ini::Ini::load_from_file(&ctx.config_file)
            .with_context(|| format!("Error loading configuration from {:?}", ctx.config_file))?;
        conf.with_section(Some(section)).set(key, value);
        conf.write_to_file(&ctx.config_file)
            .with_context(|| format!("Error writing to {:?}", ctx.config_file))?;

        let sender = ctx
            .sections
            .entry(section.to_string())
            .or_insert_with(|| {
                let (tx, _) = watch::channel(SectionConfig::default());
                tx
            });
        let mut section_config = sender.borrow().clone();
        section_config.insert(key.to_string(), value.to_string());
        sender.send_replace(section_config);

        Ok(())
    }
}
