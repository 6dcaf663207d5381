// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use plantdesk_api::{Endpoints, JoinSpec};
use plantdesk_app::{ColumnSpec, TableConfig, TablePreset};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "plantdesk";
const CONFIG_VERSION: i64 = 1;
const DEFAULT_TIMEOUT: &str = "10s";
const DEFAULT_LOG_LEVEL: &str = "info";

pub const LISTING_URL_ENV: &str = "PLANTDESK_LISTING_URL";
pub const UPDATE_URL_ENV: &str = "PLANTDESK_UPDATE_URL";
pub const JOIN_URL_ENV: &str = "PLANTDESK_JOIN_URL";
pub const CONFIG_PATH_ENV: &str = "PLANTDESK_CONFIG_PATH";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub version: i64,
    #[serde(default)]
    pub api: Api,
    #[serde(default)]
    pub table: Table,
    #[serde(default)]
    pub log: Log,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            api: Api::default(),
            table: Table::default(),
            log: Log::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Api {
    pub listing_url: Option<String>,
    pub update_url: Option<String>,
    pub timeout: Option<String>,
    pub join: Option<Join>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Join {
    pub url: String,
    pub foreign_key: String,
    pub key: String,
    /// target field -> dotted path into the joined object
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Table {
    pub preset: Option<String>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub id_field: Option<String>,
    pub max_field_len: Option<i64>,
    pub notice_ttl: Option<String>,
    pub bulk_select: Option<bool>,
    pub write_fields: Option<Vec<String>>,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Log {
    pub level: Option<String>,
    pub file: Option<String>,
}

impl Config {
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }

        let config_root = dirs::config_dir().ok_or_else(|| {
            anyhow!("cannot resolve config directory; set {CONFIG_PATH_ENV} to the config file")
        })?;
        Ok(config_root.join(APP_NAME).join("config.toml"))
    }

    /// Read `path` (a missing file means defaults), then layer the
    /// `PLANTDESK_*_URL` environment variables on top.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_env_overrides(|name| env::var(name).ok())?;
        config.validate(path)?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let value: toml::Value = toml::from_str(&raw)
            .with_context(|| format!("parse TOML config {}", path.display()))?;

        let version = value
            .get("version")
            .and_then(toml::Value::as_integer)
            .ok_or_else(|| {
                anyhow!(
                    "config file {} has no version; add `version = 1` at the top",
                    path.display()
                )
            })?;
        if version != CONFIG_VERSION {
            bail!(
                "unsupported config version {} in {}; expected version = 1",
                version,
                path.display()
            );
        }

        value
            .try_into()
            .with_context(|| format!("decode config {}", path.display()))
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(url) = non_empty(LISTING_URL_ENV) {
            self.api.listing_url = Some(url);
        }
        if let Some(url) = non_empty(UPDATE_URL_ENV) {
            self.api.update_url = Some(url);
        }
        if let Some(url) = non_empty(JOIN_URL_ENV) {
            let Some(join) = self.api.join.as_mut() else {
                bail!("{JOIN_URL_ENV} is set but the config has no [api.join] section");
            };
            join.url = url;
        }
        Ok(())
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.version != CONFIG_VERSION {
            bail!(
                "config {} has version {}; expected 1",
                path.display(),
                self.version
            );
        }

        if let Some(timeout) = &self.api.timeout {
            let parsed = parse_duration(timeout)?;
            if parsed.is_zero() {
                bail!(
                    "api.timeout in {} must be positive, got {}",
                    path.display(),
                    timeout
                );
            }
        }

        if let Some(ttl) = &self.table.notice_ttl {
            let parsed = parse_duration(ttl)?;
            if parsed.is_zero() {
                bail!(
                    "table.notice_ttl in {} must be positive, got {}",
                    path.display(),
                    ttl
                );
            }
        }

        if let Some(max) = self.table.max_field_len
            && max <= 0
        {
            bail!(
                "table.max_field_len in {} must be positive, got {}",
                path.display(),
                max
            );
        }

        if let Some(preset) = &self.table.preset
            && TablePreset::parse(preset).is_none()
        {
            bail!(
                "unknown table.preset {:?} in {}; expected one of {}",
                preset,
                path.display(),
                preset_names()
            );
        }

        Ok(())
    }

    pub fn timeout(&self) -> Result<Duration> {
        parse_duration(self.api.timeout.as_deref().unwrap_or(DEFAULT_TIMEOUT))
    }

    pub fn endpoints(&self) -> Result<Endpoints> {
        let listing_url = self.api.listing_url.clone().ok_or_else(|| {
            anyhow!("api.listing_url is not set; add it under [api] or set {LISTING_URL_ENV}")
        })?;
        let update_url = self.api.update_url.clone().ok_or_else(|| {
            anyhow!("api.update_url is not set; add it under [api] or set {UPDATE_URL_ENV}")
        })?;
        let join = self.api.join.as_ref().map(|join| JoinSpec {
            url: join.url.clone(),
            foreign_key: join.foreign_key.clone(),
            key: join.key.clone(),
            fields: join
                .fields
                .iter()
                .map(|(target, path)| (target.clone(), path.clone()))
                .collect(),
        });

        Ok(Endpoints {
            listing_url,
            update_url,
            join,
        })
    }

    /// The effective table: the preset (CLI override first, then
    /// `table.preset`, else `plant-ids` when no columns are configured) with
    /// every explicit `[table]` key laid over it.
    pub fn table_config(&self, preset_override: Option<&str>) -> Result<TableConfig> {
        let preset_name = preset_override.or(self.table.preset.as_deref());
        let mut config = match preset_name {
            Some(name) => TablePreset::parse(name)
                .ok_or_else(|| {
                    anyhow!("unknown preset {name:?}; expected one of {}", preset_names())
                })?
                .config(),
            None if self.table.columns.is_empty() => TablePreset::PlantIds.config(),
            None => TableConfig::default(),
        };

        let table = &self.table;
        if let Some(title) = &table.title {
            config.title = title.clone();
        }
        if let Some(subtitle) = &table.subtitle {
            config.subtitle = subtitle.clone();
        }
        if let Some(id_field) = &table.id_field {
            config.id_field = id_field.clone();
        }
        if let Some(max) = table.max_field_len {
            config.max_field_len = usize::try_from(max)
                .with_context(|| format!("table.max_field_len {max} is out of range"))?;
        }
        if let Some(ttl) = &table.notice_ttl {
            config.notice_ttl = parse_duration(ttl)?;
        }
        if let Some(bulk_select) = table.bulk_select {
            config.bulk_select = bulk_select;
        }
        if let Some(write_fields) = &table.write_fields {
            config.write_fields = write_fields.clone();
        }
        if !table.columns.is_empty() {
            config.columns = table.columns.clone();
        }

        config.validate().context("invalid [table] config")?;
        Ok(config)
    }

    pub fn log_level(&self) -> &str {
        self.log.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn log_file(&self) -> Result<PathBuf> {
        if let Some(file) = &self.log.file {
            return Ok(PathBuf::from(file));
        }
        let data_root = dirs::data_dir().ok_or_else(|| {
            anyhow!("cannot resolve data directory; set [log].file in the config")
        })?;
        Ok(data_root.join(APP_NAME).join(format!("{APP_NAME}.log")))
    }

    pub fn example_config(path: &Path) -> String {
        format!(
            "# plantdesk config\n# Place this file at: {}\n\nversion = 1\n\n[api]\n# Both URLs are required here or via {LISTING_URL_ENV} / {UPDATE_URL_ENV}.\nlisting_url = \"http://localhost:8080/plants\"\nupdate_url = \"http://localhost:8080/plants/update\"\ntimeout = \"{DEFAULT_TIMEOUT}\"\n\n# Optional second listing merged into the first by foreign key.\n# [api.join]\n# url = \"http://localhost:8080/users\"\n# foreign_key = \"userId\"\n# key = \"id\"\n# [api.join.fields]\n# username = \"username\"\n# city = \"address.city\"\n\n[table]\n# One of: {}\npreset = \"plant-ids\"\n# title = \"plant info\"\n# id_field = \"MACHINESN\"\nmax_field_len = 25\nnotice_ttl = \"3s\"\n# bulk_select = false\n# write_fields = [\"CRM_PLANT_ID\", \"CRM_UNIT_ID\"]\n\n# Replaces the preset's columns when present.\n# [[table.columns]]\n# key = \"MACHINESN\"\n# label = \"Serial\"\n# width = 1\n# searchable = true\n# editable = false\n\n[log]\nlevel = \"{DEFAULT_LOG_LEVEL}\"\n# Default is the platform data dir (for example ~/.local/share/plantdesk/plantdesk.log)\n# file = \"/absolute/path/to/plantdesk.log\"\n",
            path.display(),
            preset_names(),
        )
    }
}

fn preset_names() -> String {
    TablePreset::ALL
        .iter()
        .map(|preset| preset.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn parse_duration(raw: &str) -> Result<Duration> {
    if let Some(value) = raw.strip_suffix("ms") {
        let millis: u64 = value
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        return Ok(Duration::from_millis(millis));
    }
    if let Some(value) = raw.strip_suffix('s') {
        let secs: u64 = value
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        return Ok(Duration::from_secs(secs));
    }
    if let Some(value) = raw.strip_suffix('m') {
        let mins: u64 = value
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        return Ok(Duration::from_secs(mins * 60));
    }

    bail!("invalid duration {raw:?}; use one of: <N>ms, <N>s, <N>m (for example 500ms or 5s)")
}
