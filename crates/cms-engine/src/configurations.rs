//! Build configurations of one logical target.
//!
//! Only the active configuration is kept parsed. Activating another one
//! marks every other configuration stale; a stale configuration is reset
//! and reparsed when it becomes active again, never eagerly.

use cms_reader::BuildDirParameters;

use crate::error::EngineError;

/// One build configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfiguration {
    /// Identifier, e.g. `Debug`.
    pub id: String,
    /// Where and how to parse it.
    pub params: BuildDirParameters,
    /// Whether its last model no longer reflects the build directory.
    pub stale: bool,
}

/// What activating a configuration requires of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// It was already active and current; nothing to do.
    Unchanged,
    /// It was never parsed; its parameters apply like any change.
    Fresh,
    /// Its last model is outdated; it has to be reset and reparsed.
    Stale,
}

/// The build configurations of one logical target.
///
/// # Examples
///
/// ```
/// use cms_engine::{Activation, ConfigurationSet};
/// use cms_reader::BuildDirParameters;
///
/// let mut set = ConfigurationSet::new();
/// set.add("Debug", BuildDirParameters::new("/src", "/build/debug"));
/// set.add("Release", BuildDirParameters::new("/src", "/build/release"));
/// assert_eq!(set.active().unwrap().id, "Debug");
///
/// assert_eq!(set.activate("Release").unwrap(), Activation::Fresh);
/// assert!(set.is_stale("Debug"));
/// assert!(!set.is_stale("Release"));
/// assert_eq!(set.activate("Debug").unwrap(), Activation::Stale);
/// assert_eq!(set.activate("Debug").unwrap(), Activation::Unchanged);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigurationSet {
    configurations: Vec<BuildConfiguration>,
    active: Option<usize>,
}

impl ConfigurationSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a configuration. The first one added becomes active.
    pub fn add(&mut self, id: impl Into<String>, params: BuildDirParameters) {
        let id = id.into();
        if let Some(existing) = self.configurations.iter_mut().find(|c| c.id == id) {
            existing.params = params;
            existing.stale = true;
            return;
        }
        self.configurations.push(BuildConfiguration {
            id,
            params,
            stale: false,
        });
        if self.active.is_none() {
            self.active = Some(0);
        }
    }

    /// Makes `id` active and marks all others stale.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownConfiguration`] if `id` was never added.
    pub fn activate(&mut self, id: &str) -> Result<Activation, EngineError> {
        let index = self
            .configurations
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| EngineError::UnknownConfiguration(id.to_owned()))?;
        let activation = if self.configurations[index].stale {
            Activation::Stale
        } else if self.active == Some(index) {
            Activation::Unchanged
        } else {
            Activation::Fresh
        };
        for (i, configuration) in self.configurations.iter_mut().enumerate() {
            configuration.stale = i != index;
        }
        self.active = Some(index);
        tracing::info!(configuration = id, ?activation, "Activated build configuration");
        Ok(activation)
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn active(&self) -> Option<&BuildConfiguration> {
        self.active.map(|i| &self.configurations[i])
    }

    /// Replaces the parameters of the active configuration.
    pub fn update_active(&mut self, params: BuildDirParameters) {
        if let Some(i) = self.active {
            self.configurations[i].params = params;
        }
    }

    /// Returns the configuration `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&BuildConfiguration> {
        self.configurations.iter().find(|c| c.id == id)
    }

    /// Returns `true` if `id` is known and stale.
    #[must_use]
    pub fn is_stale(&self, id: &str) -> bool {
        self.get(id).is_some_and(|c| c.stale)
    }

    /// Returns the configuration ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.configurations.iter().map(|c| c.id.as_str())
    }

    /// Returns the number of configurations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    /// Returns `true` if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> ConfigurationSet {
        let mut set = ConfigurationSet::new();
        set.add("Debug", BuildDirParameters::new("/s", "/b/debug"));
        set.add("Release", BuildDirParameters::new("/s", "/b/release"));
        set.add("MinSizeRel", BuildDirParameters::new("/s", "/b/minsize"));
        set
    }

    #[test]
    fn test_activation_marks_others_stale() {
        let mut set = set();
        assert_eq!(set.activate("Release").unwrap(), Activation::Fresh);
        assert_eq!(set.active().unwrap().params.build_dir, "/b/release");
        assert!(set.is_stale("Debug"));
        assert!(set.is_stale("MinSizeRel"));
        assert!(!set.is_stale("Release"));

        set.activate("Debug").unwrap();
        assert!(!set.is_stale("Debug"));
        assert!(set.is_stale("Release"));
    }

    #[test]
    fn test_activation_reports_what_to_redo() {
        let mut set = set();
        assert_eq!(set.activate("Debug").unwrap(), Activation::Unchanged);
        assert_eq!(set.activate("MinSizeRel").unwrap(), Activation::Fresh);
        assert_eq!(set.activate("Debug").unwrap(), Activation::Stale);
        assert_eq!(set.activate("Debug").unwrap(), Activation::Unchanged);

        set.add("Debug", BuildDirParameters::new("/s", "/b/debug2"));
        assert_eq!(set.activate("Debug").unwrap(), Activation::Stale);
        assert_eq!(set.activate("Release").unwrap(), Activation::Stale);
    }

    #[test]
    fn test_unknown_configuration() {
        let mut set = set();
        let err = set.activate("Profile").unwrap_err();
        assert!(matches!(err, EngineError::UnknownConfiguration(ref id) if id == "Profile"));
        assert_eq!(set.active().unwrap().id, "Debug");
    }

    #[test]
    fn test_readding_replaces_and_marks_stale() {
        let mut set = set();
        set.add("Release", BuildDirParameters::new("/s", "/elsewhere"));
        assert_eq!(set.len(), 3);
        assert!(set.is_stale("Release"));
        assert_eq!(set.get("Release").unwrap().params.build_dir, "/elsewhere");
        assert_eq!(set.ids().collect::<Vec<_>>(), ["Debug", "Release", "MinSizeRel"]);
    }
}
