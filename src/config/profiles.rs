//! Named override sets activated on top of every other source.

use std::collections::BTreeMap;

use tracing::info;

use super::engine::{Config, State};
use super::error::ConfigError;
use super::flat::flatten;
use super::source::{ConfigSource, MemorySource};
use super::value::{Map, Value};

/// Priority of the synthetic source backing the active profile.
pub const PROFILE_PRIORITY: i32 = i32::MAX;

const SOURCE_PREFIX: &str = "profile:";

/// Registered profiles and the source backing the active one.
///
/// The active source is kept apart from the registered sources and merged
/// after all of them.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProfileSet {
    profiles: BTreeMap<String, Map>,
    active: Option<String>,
    source: Option<MemorySource>,
}

impl ProfileSet {
    pub(crate) fn insert(&mut self, name: String, data: Map) {
        self.profiles.insert(name, flatten(data));
    }

    pub(crate) fn source(&self) -> Option<&(dyn ConfigSource + 'static)> {
        self.source.as_ref().map(|s| s as &(dyn ConfigSource + 'static))
    }
}

impl State {
    /// Swaps the profile source without reloading.
    pub(crate) fn activate_profile(&mut self, name: &str) -> Result<(), ConfigError> {
        let data = self
            .profiles
            .profiles
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::ProfileNotFound(name.to_string()))?;

        self.profiles.source = Some(MemorySource::named(
            format!("{SOURCE_PREFIX}{name}"),
            data,
            PROFILE_PRIORITY,
        ));
        self.profiles.active = Some(name.to_string());
        info!(profile = name, "Activated configuration profile");
        Ok(())
    }
}

impl Config {
    /// Registers (or replaces) a named profile. Nested data is flattened.
    ///
    /// Replacing the active profile does not reapply it; call
    /// [`set_active_profile`](Self::set_active_profile) again for that.
    pub fn add_profile(&self, name: impl Into<String>, data: Map) {
        self.state().write().profiles.insert(name.into(), data);
    }

    /// Activates `name` and reloads.
    ///
    /// The profile's keys override every other source. Keys contributed only
    /// by the previously active profile disappear.
    pub fn set_active_profile(&self, name: &str) -> Result<(), ConfigError> {
        self.state().write().activate_profile(name)?;
        self.load()
    }

    pub fn active_profile(&self) -> Option<String> {
        self.state().read().profiles.active.clone()
    }

    /// Registered profile names, sorted.
    pub fn profile_names(&self) -> Vec<String> {
        self.state().read().profiles.profiles.keys().cloned().collect()
    }

    /// Registers profiles found in the loaded data and activates the one it
    /// names.
    ///
    /// Profiles are read from `profiles.<name>.<key>` entries; the active
    /// profile from `active_profile` (or `activeProfile`). Returns without
    /// activating anything when neither key is set.
    pub fn load_profiles_from_config(&self) -> Result<(), ConfigError> {
        let (found, active) = {
            let state = self.state().read();
            let mut found: BTreeMap<String, Map> = BTreeMap::new();
            for (key, value) in &state.data {
                let Some(rest) = key.strip_prefix("profiles.") else {
                    continue;
                };
                match rest.split_once('.') {
                    Some((name, field)) => {
                        found
                            .entry(name.to_string())
                            .or_default()
                            .insert(field.to_string(), value.clone());
                    }
                    None => {
                        if let Value::Map(map) = value {
                            found
                                .entry(rest.to_string())
                                .or_default()
                                .extend(flatten(map.clone()));
                        }
                    }
                }
            }
            let active = ["active_profile", "activeProfile"]
                .iter()
                .filter_map(|k| state.data.get(*k))
                .map(Value::to_string)
                .find(|s| !s.is_empty());
            (found, active)
        };

        {
            let mut state = self.state().write();
            for (name, data) in found {
                state.profiles.insert(name, data);
            }
        }

        match active {
            Some(name) => self.set_active_profile(&name),
            None => Ok(()),
        }
    }
}
