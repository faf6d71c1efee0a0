//! Repository options and their file/environment loader.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::entity::{EntityMeta, FieldKind};
use crate::error::DataError;
use crate::filter::FilterStrategy;
use crate::load::LoadStrategy;

/// Columns that may be set to null by partial updates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "AllowedNoneRepr", into = "AllowedNoneRepr")]
pub enum AllowedNoneFields {
    /// `"*"`: every column.
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl AllowedNoneFields {
    pub fn only<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AllowedNoneFields::Only(fields.into_iter().map(Into::into).collect())
    }

    pub fn allows(&self, field: &str) -> bool {
        match self {
            AllowedNoneFields::All => true,
            AllowedNoneFields::Only(fields) => fields.contains(field),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum AllowedNoneRepr {
    Star(String),
    List(Vec<String>),
}

impl TryFrom<AllowedNoneRepr> for AllowedNoneFields {
    type Error = String;

    fn try_from(repr: AllowedNoneRepr) -> Result<Self, Self::Error> {
        match repr {
            AllowedNoneRepr::Star(s) if s == "*" => Ok(AllowedNoneFields::All),
            AllowedNoneRepr::Star(s) => Err(format!(
                "update_allowed_none_fields must be \"*\" or a list of fields, got \"{s}\""
            )),
            AllowedNoneRepr::List(fields) => Ok(AllowedNoneFields::Only(fields.into_iter().collect())),
        }
    }
}

impl From<AllowedNoneFields> for AllowedNoneRepr {
    fn from(fields: AllowedNoneFields) -> Self {
        match fields {
            AllowedNoneFields::All => AllowedNoneRepr::Star("*".to_string()),
            AllowedNoneFields::Only(set) => AllowedNoneRepr::List(set.into_iter().collect()),
        }
    }
}

/// Value type of the disable (soft-delete) column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisableFieldType {
    /// Disabled rows hold `true`.
    #[serde(alias = "boolean")]
    Bool,
    /// Disabled rows hold the disable time; enabled rows hold null.
    #[serde(alias = "timestamp")]
    Datetime,
}

impl DisableFieldType {
    fn column_kind(self) -> FieldKind {
        match self {
            DisableFieldType::Bool => FieldKind::Boolean,
            DisableFieldType::Datetime => FieldKind::Timestamp,
        }
    }
}

/// Options parameterizing every operation of a repository.
///
/// Fixed once the repository is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Flush after mutations instead of committing.
    pub use_flush: bool,
    pub update_set_none: bool,
    pub update_allowed_none_fields: AllowedNoneFields,
    /// Exclude already-disabled rows when disabling.
    pub allow_disable_filter_by_value: bool,
    pub disable_field_type: Option<DisableFieldType>,
    pub disable_field: Option<String>,
    pub disable_id_field: Option<String>,
    /// Deduplicate list results by identity.
    pub unique_list_items: bool,
    pub filter_convert_strategy: FilterStrategy,
    pub default_load_strategy: LoadStrategy,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            use_flush: true,
            update_set_none: false,
            update_allowed_none_fields: AllowedNoneFields::All,
            allow_disable_filter_by_value: true,
            disable_field_type: None,
            disable_field: None,
            disable_id_field: None,
            unique_list_items: true,
            filter_convert_strategy: FilterStrategy::Simple,
            default_load_strategy: LoadStrategy::SelectIn,
        }
    }
}

impl RepositoryConfig {
    pub fn with_use_flush(mut self, use_flush: bool) -> Self {
        self.use_flush = use_flush;
        self
    }

    pub fn with_update_set_none(mut self, update_set_none: bool) -> Self {
        self.update_set_none = update_set_none;
        self
    }

    pub fn with_update_allowed_none_fields(mut self, fields: AllowedNoneFields) -> Self {
        self.update_allowed_none_fields = fields;
        self
    }

    pub fn with_allow_disable_filter_by_value(mut self, allow: bool) -> Self {
        self.allow_disable_filter_by_value = allow;
        self
    }

    pub fn with_disable_field_type(mut self, field_type: DisableFieldType) -> Self {
        self.disable_field_type = Some(field_type);
        self
    }

    pub fn with_disable_field(mut self, field: impl Into<String>) -> Self {
        self.disable_field = Some(field.into());
        self
    }

    pub fn with_disable_id_field(mut self, field: impl Into<String>) -> Self {
        self.disable_id_field = Some(field.into());
        self
    }

    /// Set all three disable options at once.
    pub fn with_disable(
        self,
        field: impl Into<String>,
        field_type: DisableFieldType,
        id_field: impl Into<String>,
    ) -> Self {
        self.with_disable_field(field)
            .with_disable_field_type(field_type)
            .with_disable_id_field(id_field)
    }

    pub fn with_unique_list_items(mut self, unique: bool) -> Self {
        self.unique_list_items = unique;
        self
    }

    pub fn with_filter_strategy(mut self, strategy: FilterStrategy) -> Self {
        self.filter_convert_strategy = strategy;
        self
    }

    pub fn with_default_load_strategy(mut self, strategy: LoadStrategy) -> Self {
        self.default_load_strategy = strategy;
        self
    }

    /// Check every option that names a column of `meta`.
    ///
    /// Completeness of the disable options is checked when `disable` runs.
    pub fn validate(&self, meta: &EntityMeta) -> Result<(), DataError> {
        meta.require_primary_key()?;
        if let AllowedNoneFields::Only(fields) = &self.update_allowed_none_fields {
            for field in fields {
                meta.require_field(field)?;
            }
        }
        if let Some(name) = &self.disable_field {
            let field = meta.require_field(name)?;
            if let Some(field_type) = self.disable_field_type {
                if field.kind != field_type.column_kind() {
                    return Err(DataError::configuration(format!(
                        "disable field {}.{} is {:?}, expected {:?}",
                        meta.name,
                        name,
                        field.kind,
                        field_type.column_kind()
                    )));
                }
            }
        }
        if let Some(name) = &self.disable_id_field {
            meta.require_field(name)?;
        }
        Ok(())
    }
}

/// Error type for loading repository settings.
#[derive(Debug)]
pub enum ConfigError {
    /// An I/O or YAML parsing error occurred while reading settings files.
    Load(String),
    /// A section does not describe a valid [`RepositoryConfig`].
    Invalid { section: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Load(msg) => write!(f, "Config load error: {msg}"),
            ConfigError::Invalid { section, message } => {
                write!(f, "Invalid repository settings '{section}': {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for DataError {
    fn from(err: ConfigError) -> Self {
        DataError::Configuration(err.to_string())
    }
}

const DEFAULTS_SECTION: &str = "defaults";
const ENV_PREFIX: &str = "SQLREPO__";

/// Named repository sections loaded from YAML, `.env` files and environment variables.
///
/// Resolution order (lowest to highest priority):
/// 1. `sqlrepo.yaml` (base)
/// 2. `sqlrepo-{profile}.yaml` (profile override)
/// 3. `.env` / `.env.{profile}` (loaded into the process environment)
/// 4. `SQLREPO__<SECTION>__<KEY>=<yaml scalar>` environment variables
///
/// `.env` files never overwrite already-set environment variables. The
/// `defaults` section is merged under every other section.
///
/// Profile is determined by: `SQLREPO_PROFILE` env var > argument.
///
/// ```yaml
/// defaults:
///   use_flush: false
/// authors:
///   disable_field: disabled_at
///   disable_field_type: datetime
///   disable_id_field: id
/// ```
#[derive(Debug, Clone, Default)]
pub struct RepositorySettings {
    profile: String,
    defaults: RepositoryConfig,
    sections: HashMap<String, RepositoryConfig>,
}

impl RepositorySettings {
    /// Load settings for `profile` from the current working directory.
    pub fn load(profile: &str) -> Result<Self, ConfigError> {
        Self::load_from(Path::new("."), profile)
    }

    /// Load settings for `profile` from `dir`.
    pub fn load_from(dir: &Path, profile: &str) -> Result<Self, ConfigError> {
        let active_profile =
            std::env::var("SQLREPO_PROFILE").unwrap_or_else(|_| profile.to_string());

        let mut tree = serde_yaml::Value::Mapping(Default::default());
        load_yaml_file(&dir.join("sqlrepo.yaml"), &mut tree)?;
        load_yaml_file(&dir.join(format!("sqlrepo-{active_profile}.yaml")), &mut tree)?;

        let _ = dotenvy::from_path(dir.join(".env"));
        let _ = dotenvy::from_path(dir.join(format!(".env.{active_profile}")));

        for (key, value) in std::env::vars() {
            if let Some(rest) = key.strip_prefix(ENV_PREFIX) {
                apply_env_override(&mut tree, rest, &value)?;
            }
        }

        Self::from_tree(tree, active_profile)
    }

    /// Parse settings from a YAML string (useful for testing).
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let tree: serde_yaml::Value =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Load(e.to_string()))?;
        Self::from_tree(tree, "test".to_string())
    }

    fn from_tree(tree: serde_yaml::Value, profile: String) -> Result<Self, ConfigError> {
        let mapping = match tree {
            serde_yaml::Value::Mapping(mapping) => mapping,
            serde_yaml::Value::Null => Default::default(),
            _ => return Err(ConfigError::Load("settings root must be a mapping".into())),
        };
        let defaults_tree = mapping
            .get(DEFAULTS_SECTION)
            .cloned()
            .unwrap_or(serde_yaml::Value::Null);
        let defaults = parse_section(DEFAULTS_SECTION, defaults_tree.clone())?;

        let mut sections = HashMap::new();
        for (key, value) in mapping {
            let Some(name) = key.as_str().map(str::to_string) else {
                return Err(ConfigError::Load(format!("section names must be strings, got {key:?}")));
            };
            if name == DEFAULTS_SECTION {
                continue;
            }
            let mut merged = defaults_tree.clone();
            deep_merge(&mut merged, value);
            let config = parse_section(&name, merged)?;
            sections.insert(name, config);
        }
        Ok(Self {
            profile,
            defaults,
            sections,
        })
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn defaults(&self) -> &RepositoryConfig {
        &self.defaults
    }

    pub fn section(&self, name: &str) -> Option<&RepositoryConfig> {
        self.sections.get(name)
    }

    /// The named section, or the defaults when no such section exists.
    pub fn get_or_default(&self, name: &str) -> RepositoryConfig {
        self.sections
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }
}

fn load_yaml_file(path: &Path, tree: &mut serde_yaml::Value) -> Result<(), ConfigError> {
    if path.exists() {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Load(e.to_string()))?;
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Load(e.to_string()))?;
        deep_merge(tree, yaml);
    }
    Ok(())
}

/// Merge `overlay` into `base`; mappings merge key by key, anything else replaces.
fn deep_merge(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (_, serde_yaml::Value::Null) => {}
        (base, overlay) => *base = overlay,
    }
}

/// `AUTHORS__USE_FLUSH=false` sets `authors.use_flush`.
fn apply_env_override(tree: &mut serde_yaml::Value, key: &str, raw: &str) -> Result<(), ConfigError> {
    let Some((section, field)) = key.split_once("__") else {
        return Ok(());
    };
    let value: serde_yaml::Value = serde_yaml::from_str(raw)
        .unwrap_or_else(|_| serde_yaml::Value::String(raw.to_string()));
    let mut field_map = serde_yaml::Mapping::new();
    field_map.insert(serde_yaml::Value::String(field.to_lowercase()), value);
    let mut overlay = serde_yaml::Mapping::new();
    overlay.insert(
        serde_yaml::Value::String(section.to_lowercase()),
        serde_yaml::Value::Mapping(field_map),
    );
    if !tree.is_mapping() {
        return Err(ConfigError::Load("settings root must be a mapping".into()));
    }
    deep_merge(tree, serde_yaml::Value::Mapping(overlay));
    Ok(())
}

fn parse_section(name: &str, tree: serde_yaml::Value) -> Result<RepositoryConfig, ConfigError> {
    if tree.is_null() {
        return Ok(RepositoryConfig::default());
    }
    serde_yaml::from_value(tree).map_err(|e| ConfigError::Invalid {
        section: name.to_string(),
        message: e.to_string(),
    })
}
