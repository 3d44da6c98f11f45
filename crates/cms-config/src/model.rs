//! The three-tier configuration model.
//!
//! The model holds two partitions of [`ModelEntry`] values: the *initial*
//! parameters handed to the first configure run and the *current* entries the
//! tool reports from its cache. Kit values shadow initial entries, and every
//! entry carries a pending-edit overlay (`new_value`, `is_user_changed`,
//! `is_user_new`, `is_unset`) that survives refreshes.
//!
//! # Refresh merge
//!
//! A refresh walks the old and new partition in key order:
//!
//! ```text
//! only in new   -> inserted, unless hidden or unset
//! only in old   -> kept if it carries a user edit or is unset
//! in both       -> new entry, old pending value carried over
//!                  (cleared when the tool already reports it)
//! ```

use std::cmp::Ordering;

use serde::Serialize;

use crate::entry::{ConfigEntry, ConfigType};
use crate::error::EntryError;

/// One partition of the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Initial parameters.
    Initial,
    /// Live cache entries.
    Current,
}

impl Tier {
    const fn matches(self, entry: &ModelEntry) -> bool {
        match self {
            Self::Initial => entry.entry.is_initial,
            Self::Current => !entry.entry.is_initial,
        }
    }
}

/// Which entries a reset or change query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Live cache entries only.
    #[default]
    Current,
    /// Initial parameters only.
    Initial,
    /// Both partitions.
    All,
}

impl Scope {
    const fn covers(self, entry: &ModelEntry) -> bool {
        match self {
            Self::Current => !entry.entry.is_initial,
            Self::Initial => entry.entry.is_initial,
            Self::All => true,
        }
    }
}

/// A cache entry plus its pending-edit overlay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelEntry {
    /// The entry as last reported.
    pub entry: ConfigEntry,
    /// `INTERNAL` or `STATIC`.
    pub is_hidden: bool,
    /// The user changed the value and the change is not applied yet.
    pub is_user_changed: bool,
    /// The user added the entry.
    pub is_user_new: bool,
    /// Pending value, empty when there is none.
    pub new_value: String,
    /// Value the kit provides for this key, empty when none.
    pub kit_value: String,
    /// Value of the initial parameter with the same key, empty when none.
    pub initial_value: String,
}

impl ModelEntry {
    /// Wraps an entry without any pending edit.
    #[must_use]
    pub fn new(entry: ConfigEntry) -> Self {
        Self {
            is_hidden: entry.entry_type.is_hidden(),
            entry,
            ..Self::default()
        }
    }

    /// Returns the entry key.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &str {
        &self.entry.key
    }

    /// Returns the value the user sees: the pending value if there is one.
    #[must_use]
    pub fn current_value(&self) -> &str {
        if (self.is_user_changed || self.is_user_new) && !self.new_value.is_empty() {
            &self.new_value
        } else {
            &self.entry.value
        }
    }

    /// Returns `true` if a refresh must not drop this entry.
    #[inline]
    #[must_use]
    pub const fn carries_user_intent(&self) -> bool {
        self.is_user_changed || self.is_user_new || self.entry.is_unset
    }

    /// Returns `true` if the entry differs from what the tool last saw.
    #[inline]
    #[must_use]
    pub const fn has_change(&self) -> bool {
        self.is_user_changed || self.is_user_new || self.entry.is_unset
    }

    /// Returns the entry with the pending value substituted.
    #[must_use]
    pub fn to_effective_entry(&self) -> ConfigEntry {
        let mut entry = self.entry.clone();
        entry.value = self.current_value().to_owned();
        entry
    }

    fn refresh_user_changed(&mut self) {
        self.is_user_changed = !self.new_value.is_empty() && self.new_value != self.entry.value;
    }
}

/// The configuration model of one build configuration.
///
/// Every mutation bumps [`ConfigModel::version`], which in-flight jobs use
/// to detect that they were started against a superseded snapshot.
///
/// # Examples
///
/// ```
/// use cms_config::{ConfigEntry, ConfigModel, ConfigType};
///
/// let mut model = ConfigModel::new();
/// model.set_from_tool(vec![ConfigEntry::new("WITH_GL", ConfigType::Bool, "ON")]);
/// model.apply_user_edit("WITH_GL", "OFF").unwrap();
///
/// let delta = model.configuration_for_tool();
/// assert_eq!(delta[0].to_argument().as_deref(), Some("-DWITH_GL:BOOL=OFF"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigModel {
    entries: Vec<ModelEntry>,
    kit: Vec<ConfigEntry>,
    version: u64,
}

impl ConfigModel {
    /// Creates an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the model version.
    #[inline]
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns all entries: initial partition first, each sorted by key.
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }

    /// Returns the entries of one partition.
    pub fn entries_in(&self, tier: Tier) -> impl Iterator<Item = &ModelEntry> {
        self.entries.iter().filter(move |e| tier.matches(e))
    }

    /// Returns the entry for `key` in `tier`.
    #[must_use]
    pub fn get(&self, tier: Tier, key: &str) -> Option<&ModelEntry> {
        self.entries_in(tier).find(|e| e.key() == key)
    }

    /// Returns the effective value of `key`, looking at the current
    /// partition first.
    #[must_use]
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.get(Tier::Current, key)
            .or_else(|| self.get(Tier::Initial, key))
            .map(ModelEntry::current_value)
    }

    /// Returns the kit entries last installed.
    #[inline]
    #[must_use]
    pub fn kit(&self) -> &[ConfigEntry] {
        &self.kit
    }

    /// Drops every entry.
    pub fn flush(&mut self) {
        self.entries.clear();
        self.bump();
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Refreshes the current partition from the tool's cache.
    ///
    /// The initial partition is untouched.
    pub fn set_from_tool(&mut self, entries: Vec<ConfigEntry>) {
        let fresh = entries
            .into_iter()
            .map(|mut entry| {
                entry.is_initial = false;
                entry.in_tool_cache = true;
                ModelEntry::new(entry)
            })
            .collect();

        let (initial, current) = self.take_partitions();
        let merged = merge_partition(current, fresh);
        tracing::debug!(entries = merged.len(), "Merged tool cache into model");
        self.install(initial, merged);
    }

    /// Installs initial parameters, merged like a refresh.
    pub fn set_initial(&mut self, entries: Vec<ConfigEntry>) {
        let fresh = entries
            .into_iter()
            .map(|mut entry| {
                entry.is_initial = true;
                entry.in_tool_cache = true;
                let mut item = ModelEntry::new(entry);
                item.new_value = item.entry.value.clone();
                item
            })
            .collect();

        let (initial, current) = self.take_partitions();
        let mut merged = merge_partition(initial, fresh);
        self.apply_kit_shadow(&mut merged);
        self.install(merged, current);
    }

    /// Installs the kit configuration.
    ///
    /// Initial entries get the kit value as shadow. Kit keys without an
    /// initial entry are added as user-new initial entries. Initial entries
    /// whose key the kit no longer reports lose their shadow; a pending edit
    /// on them is kept.
    pub fn set_from_kit(&mut self, entries: Vec<ConfigEntry>) {
        self.kit = entries;
        let (mut initial, current) = self.take_partitions();

        self.apply_kit_shadow(&mut initial);
        for kit_entry in &self.kit {
            if initial.iter().any(|e| e.key() == kit_entry.key) {
                continue;
            }
            let mut entry = kit_entry.clone();
            entry.is_initial = true;
            let mut item = ModelEntry::new(entry);
            item.is_user_new = true;
            item.new_value = item.entry.value.clone();
            item.kit_value = item.entry.value.clone();
            initial.push(item);
        }
        initial.sort_by(|a, b| a.key().cmp(b.key()));

        tracing::debug!(kit_entries = self.kit.len(), "Applied kit configuration");
        self.install(initial, current);
    }

    fn apply_kit_shadow(&self, initial: &mut [ModelEntry]) {
        for item in initial {
            match self.kit.iter().find(|k| k.key == item.entry.key) {
                Some(kit_entry) => item.kit_value.clone_from(&kit_entry.value),
                None => item.kit_value.clear(),
            }
        }
    }

    // ========================================================================
    // User edits
    // ========================================================================

    /// Sets a pending value on the current partition.
    ///
    /// Unknown keys become user-new `STRING` entries. Setting the value the
    /// tool already reports clears the edit. Setting a value clears the
    /// unset flag.
    pub fn apply_user_edit(&mut self, key: &str, value: &str) -> Result<(), EntryError> {
        self.apply_user_edit_in(Tier::Current, key, value)
    }

    /// Sets a pending value on `tier`.
    pub fn apply_user_edit_in(
        &mut self,
        tier: Tier,
        key: &str,
        value: &str,
    ) -> Result<(), EntryError> {
        if key.is_empty() {
            return Err(EntryError::not_editable(key, "empty key"));
        }
        match self.find_mut(tier, key) {
            Some(item) if item.is_hidden => {
                return Err(EntryError::not_editable(key, "hidden entry"));
            }
            Some(item) => {
                item.entry.is_unset = false;
                if item.is_user_new {
                    item.entry.value = value.to_owned();
                    item.new_value = value.to_owned();
                } else if item.entry.value == value {
                    item.new_value.clear();
                    item.is_user_changed = false;
                } else {
                    item.new_value = value.to_owned();
                    item.is_user_changed = true;
                }
            }
            None => {
                let mut entry = ConfigEntry::new(key, ConfigType::String, value);
                entry.is_initial = tier == Tier::Initial;
                let mut item = ModelEntry::new(entry);
                item.is_user_new = true;
                item.new_value = value.to_owned();
                self.insert_sorted(item);
            }
        }
        tracing::debug!(key, value, ?tier, "User edit");
        self.bump();
        Ok(())
    }

    /// Flips the unset flag of a current entry and returns the new state.
    pub fn toggle_unset(&mut self, key: &str) -> Result<bool, EntryError> {
        self.toggle_unset_in(Tier::Current, key)
    }

    /// Flips the unset flag of an entry in `tier`.
    pub fn toggle_unset_in(&mut self, tier: Tier, key: &str) -> Result<bool, EntryError> {
        let item = self
            .find_mut(tier, key)
            .ok_or_else(|| EntryError::unknown_key(key))?;
        item.entry.is_unset = !item.entry.is_unset;
        let state = item.entry.is_unset;
        self.bump();
        Ok(state)
    }

    /// Drops every pending edit in `scope`.
    ///
    /// User-new entries are removed; other entries lose their pending value
    /// and unset flag.
    pub fn reset_user_edits(&mut self, scope: Scope) {
        self.entries
            .retain(|e| !(scope.covers(e) && e.is_user_new));
        for item in self.entries.iter_mut().filter(|e| scope.covers(e)) {
            item.new_value.clear();
            item.is_user_changed = false;
            item.entry.is_unset = false;
        }
        self.bump();
    }

    /// Returns the pending current-tier edits with their values substituted,
    /// unset entries included.
    ///
    /// A configure run takes this before it starts; once it succeeds,
    /// [`ConfigModel::clear_applied_edits`] clears exactly these edits.
    #[must_use]
    pub fn pending_edits(&self) -> Vec<ConfigEntry> {
        self.entries_in(Tier::Current)
            .filter(|e| e.has_change())
            .map(ModelEntry::to_effective_entry)
            .collect()
    }

    /// Clears the current-tier edits that still match `applied`.
    ///
    /// An edit made or changed after `applied` was taken stays pending.
    /// Returns `true` if any edit is left.
    pub fn clear_applied_edits(&mut self, applied: &[ConfigEntry]) -> bool {
        let matches = |e: &ModelEntry| {
            Tier::Current.matches(e) && e.has_change() && applied.contains(&e.to_effective_entry())
        };
        self.entries.retain(|e| !(e.is_user_new && matches(e)));
        for item in self.entries.iter_mut() {
            if matches(item) {
                item.new_value.clear();
                item.is_user_changed = false;
                item.entry.is_unset = false;
            }
        }
        self.bump();
        self.has_changes(Scope::Current)
    }

    /// Applies a batch of edits, typically from pasted `-D`/`-U` arguments.
    ///
    /// An entry that already has a pending edit always takes the new value
    /// (which may return it to the tool value). An unedited entry only takes
    /// a value that differs from the tool value.
    pub fn set_batch_edit(&mut self, entries: Vec<ConfigEntry>) {
        for edit in entries {
            let tier = if edit.is_initial {
                Tier::Initial
            } else {
                Tier::Current
            };
            if let Some(item) = self.find_mut(tier, &edit.key) {
                item.entry.is_unset = edit.is_unset;
                let can_set = item.is_user_changed || item.entry.value != edit.value;
                if !edit.is_unset && can_set {
                    item.is_user_changed = item.entry.value != edit.value;
                    item.entry.entry_type = edit.entry_type;
                    item.is_hidden = edit.entry_type.is_hidden();
                    item.new_value = edit.value;
                }
            } else if !edit.is_unset {
                let mut item = ModelEntry::new(edit);
                item.is_user_new = true;
                item.new_value = item.entry.value.clone();
                self.insert_sorted(item);
            }
        }
        self.bump();
    }

    /// Reverts an initial entry to its kit value as a pending edit.
    ///
    /// Returns `false` if nothing changed.
    pub fn apply_kit_value(&mut self, key: &str) -> bool {
        self.apply_shadow_value(Tier::Initial, key, |e| &e.kit_value)
    }

    /// Reverts a current entry to its initial value as a pending edit.
    ///
    /// Returns `false` if nothing changed.
    pub fn apply_initial_value(&mut self, key: &str) -> bool {
        self.apply_shadow_value(Tier::Current, key, |e| &e.initial_value)
    }

    fn apply_shadow_value(
        &mut self,
        tier: Tier,
        key: &str,
        shadow: impl Fn(&ModelEntry) -> &String,
    ) -> bool {
        let Some(item) = self.find_mut(tier, key) else {
            return false;
        };
        let value = shadow(item).clone();
        let can_set = item.is_user_changed || item.entry.value != value;
        if value.is_empty() || !can_set {
            return false;
        }
        item.is_user_changed = item.entry.value != value;
        item.new_value = value;
        self.bump();
        true
    }

    // ========================================================================
    // Outgoing delta
    // ========================================================================

    /// Returns `true` if `scope` holds any pending edit.
    #[must_use]
    pub fn has_changes(&self, scope: Scope) -> bool {
        self.entries
            .iter()
            .any(|e| scope.covers(e) && e.has_change())
    }

    /// Returns the minimal set of current entries to pass back to the tool:
    /// user-new, user-changed, or absent from the tool cache, with pending
    /// values substituted. Unset entries are not part of it; see
    /// [`ConfigModel::unset_arguments`].
    #[must_use]
    pub fn configuration_for_tool(&self) -> Vec<ConfigEntry> {
        self.entries_in(Tier::Current)
            .filter(|e| !e.entry.is_unset)
            .filter(|e| e.is_user_changed || e.is_user_new || !e.entry.in_tool_cache)
            .map(ModelEntry::to_effective_entry)
            .collect()
    }

    /// Returns `-U<key>` for every unset current entry.
    #[must_use]
    pub fn unset_arguments(&self) -> Vec<String> {
        self.entries_in(Tier::Current)
            .filter(|e| e.entry.is_unset)
            .map(|e| format!("-U{}", e.key()))
            .collect()
    }

    /// Returns the arguments for the configuration delta.
    #[must_use]
    pub fn extra_arguments(&self) -> Vec<String> {
        self.configuration_for_tool()
            .iter()
            .filter_map(ConfigEntry::to_argument)
            .chain(self.unset_arguments())
            .collect()
    }

    /// Returns the arguments for the initial parameters, pending values
    /// substituted.
    #[must_use]
    pub fn initial_arguments(&self) -> Vec<String> {
        self.entries_in(Tier::Initial)
            .filter_map(|e| e.to_effective_entry().to_argument())
            .collect()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn find_mut(&mut self, tier: Tier, key: &str) -> Option<&mut ModelEntry> {
        self.entries
            .iter_mut()
            .find(|e| tier.matches(e) && e.key() == key)
    }

    fn insert_sorted(&mut self, item: ModelEntry) {
        let (mut initial, mut current) = self.take_partitions();
        let target = if item.entry.is_initial {
            &mut initial
        } else {
            &mut current
        };
        let at = target.partition_point(|e| e.key() < item.key());
        target.insert(at, item);
        self.entries = initial;
        self.entries.append(&mut current);
    }

    fn take_partitions(&mut self) -> (Vec<ModelEntry>, Vec<ModelEntry>) {
        std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.entry.is_initial)
    }

    fn install(&mut self, initial: Vec<ModelEntry>, mut current: Vec<ModelEntry>) {
        for item in &mut current {
            item.initial_value = initial
                .iter()
                .find(|i| i.key() == item.key())
                .map(|i| i.entry.value.clone())
                .unwrap_or_default();
        }
        self.entries = initial;
        self.entries.append(&mut current);
        self.bump();
    }

    fn bump(&mut self) {
        self.version = self.version.wrapping_add(1);
    }
}

/// Merges one refreshed partition into the old one.
fn merge_partition(mut old: Vec<ModelEntry>, mut new: Vec<ModelEntry>) -> Vec<ModelEntry> {
    old.sort_by(|a, b| a.key().cmp(b.key()));
    new.sort_by(|a, b| a.key().cmp(b.key()));

    let mut result = Vec::with_capacity(new.len().max(old.len()));
    let mut old_iter = old.into_iter().peekable();
    let mut new_iter = new.into_iter().peekable();

    loop {
        // `None` means the next new entry is skipped.
        let order = match (old_iter.peek(), new_iter.peek()) {
            (None, None) => break,
            (_, Some(n)) if n.is_hidden || n.entry.is_unset => None,
            (Some(_), None) => Some(Ordering::Greater),
            (None, Some(_)) => Some(Ordering::Less),
            (Some(o), Some(n)) => Some(n.key().cmp(o.key())),
        };
        let Some(order) = order else {
            new_iter.next();
            continue;
        };

        match order {
            Ordering::Less => result.extend(new_iter.next()),
            Ordering::Greater => {
                if let Some(o) = old_iter.next().filter(ModelEntry::carries_user_intent) {
                    result.push(o);
                }
            }
            Ordering::Equal => {
                let (Some(o), Some(mut item)) = (old_iter.next(), new_iter.next()) else {
                    break;
                };
                item.new_value = if item.entry.value == o.new_value {
                    String::new()
                } else {
                    o.new_value
                };
                item.entry.is_unset = o.entry.is_unset;
                if item.kit_value.is_empty() {
                    item.kit_value = o.kit_value;
                }
                item.refresh_user_changed();
                result.push(item);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(entries: &[(&str, ConfigType, &str)]) -> Vec<ConfigEntry> {
        entries
            .iter()
            .map(|(k, t, v)| ConfigEntry::new(*k, *t, *v))
            .collect()
    }

    #[test]
    fn test_scenario_refresh_keeps_pending_edit() {
        let mut model = ConfigModel::new();
        model.set_from_tool(tool(&[
            ("BUILD_TYPE", ConfigType::String, "Debug"),
            ("size", ConfigType::Bool, "ON"),
        ]));
        model.apply_user_edit("size", "OFF").unwrap();

        model.set_from_tool(tool(&[
            ("BUILD_TYPE", ConfigType::String, "Release"),
            ("size", ConfigType::Bool, "ON"),
        ]));

        let build_type = model.get(Tier::Current, "BUILD_TYPE").unwrap();
        assert_eq!(build_type.current_value(), "Release");
        assert!(!build_type.is_user_changed);

        let size = model.get(Tier::Current, "size").unwrap();
        assert_eq!(size.entry.value, "ON");
        assert_eq!(size.new_value, "OFF");
        assert!(size.is_user_changed);
        assert_eq!(size.current_value(), "OFF");
    }

    #[test]
    fn test_merge_idempotence() {
        let snapshot = tool(&[
            ("A", ConfigType::String, "1"),
            ("B", ConfigType::Bool, "ON"),
            ("HIDDEN", ConfigType::Internal, "x"),
        ]);
        let mut model = ConfigModel::new();
        model.set_from_tool(snapshot.clone());
        model.apply_user_edit("B", "OFF").unwrap();
        model.apply_user_edit("NEW", "v").unwrap();

        model.set_from_tool(snapshot.clone());
        let once = model.entries().to_vec();
        model.set_from_tool(snapshot);
        assert_eq!(model.entries(), once.as_slice());
        assert!(model.get(Tier::Current, "HIDDEN").is_none());
    }

    #[test]
    fn test_edit_survives_key_vanishing_from_tool() {
        let mut model = ConfigModel::new();
        model.set_from_tool(tool(&[("K", ConfigType::String, "a"), ("L", ConfigType::String, "b")]));
        model.apply_user_edit("K", "edited").unwrap();

        model.set_from_tool(tool(&[("L", ConfigType::String, "b")]));
        assert_eq!(model.value_of("K"), Some("edited"));

        model.set_from_tool(tool(&[]));
        assert_eq!(model.value_of("K"), Some("edited"));
        assert!(model.get(Tier::Current, "L").is_none());
    }

    #[test]
    fn test_edit_cleared_when_tool_converges() {
        let mut model = ConfigModel::new();
        model.set_from_tool(tool(&[("K", ConfigType::String, "a")]));
        model.apply_user_edit("K", "b").unwrap();
        model.set_from_tool(tool(&[("K", ConfigType::String, "b")]));

        let k = model.get(Tier::Current, "K").unwrap();
        assert!(!k.is_user_changed);
        assert!(k.new_value.is_empty());
        assert!(model.configuration_for_tool().is_empty());
    }

    #[test]
    fn test_unset_stability() {
        let mut model = ConfigModel::new();
        model.set_from_tool(tool(&[("OLD", ConfigType::Bool, "ON")]));
        assert!(model.toggle_unset("OLD").unwrap());

        for _ in 0..3 {
            model.set_from_tool(tool(&[("OLD", ConfigType::Bool, "ON")]));
            assert!(model.get(Tier::Current, "OLD").unwrap().entry.is_unset);
        }
        model.set_from_tool(tool(&[]));
        assert!(model.get(Tier::Current, "OLD").unwrap().entry.is_unset);
        assert!(model.configuration_for_tool().is_empty());
        assert_eq!(model.unset_arguments(), ["-UOLD"]);

        model.apply_user_edit("OLD", "OFF").unwrap();
        assert!(!model.get(Tier::Current, "OLD").unwrap().entry.is_unset);
    }

    #[test]
    fn test_configuration_for_tool_delta() {
        let mut model = ConfigModel::new();
        model.set_from_tool(tool(&[
            ("A", ConfigType::String, "1"),
            ("B", ConfigType::Bool, "ON"),
        ]));
        model.apply_user_edit("B", "OFF").unwrap();
        model.apply_user_edit("C", "new").unwrap();

        let delta = model.configuration_for_tool();
        let args: Vec<_> = delta.iter().filter_map(ConfigEntry::to_argument).collect();
        assert_eq!(args, ["-DB:BOOL=OFF", "-DC:STRING=new"]);
        assert_eq!(model.extra_arguments(), args);
    }

    #[test]
    fn test_edit_back_to_tool_value_clears() {
        let mut model = ConfigModel::new();
        model.set_from_tool(tool(&[("A", ConfigType::String, "1")]));
        model.apply_user_edit("A", "2").unwrap();
        model.apply_user_edit("A", "1").unwrap();
        assert!(!model.has_changes(Scope::Current));
    }

    #[test]
    fn test_hidden_entries_not_editable() {
        let mut model = ConfigModel::new();
        model.set_from_tool(vec![ConfigEntry::new("H", ConfigType::Internal, "x")]);
        assert!(model.get(Tier::Current, "H").is_none());

        model.set_batch_edit(vec![ConfigEntry::new("H", ConfigType::Internal, "x")]);
        let err = model.apply_user_edit("H", "y").unwrap_err();
        assert!(err.is_recoverable());
        assert!(model.toggle_unset("missing").is_err());
    }

    #[test]
    fn test_kit_absence_clears_shadow_keeps_edit() {
        let mut model = ConfigModel::new();
        model.set_initial(vec![ConfigEntry::new("CMAKE_CXX_COMPILER", ConfigType::FilePath, "/usr/bin/g++")]);
        model.set_from_kit(vec![ConfigEntry::new("CMAKE_CXX_COMPILER", ConfigType::FilePath, "/usr/bin/clang++")]);
        assert_eq!(
            model.get(Tier::Initial, "CMAKE_CXX_COMPILER").unwrap().kit_value,
            "/usr/bin/clang++"
        );

        model
            .apply_user_edit_in(Tier::Initial, "CMAKE_CXX_COMPILER", "/opt/cc")
            .unwrap();

        // The key disappears from kit and tool at the same time.
        model.set_from_kit(vec![]);
        model.set_from_tool(vec![]);

        let entry = model.get(Tier::Initial, "CMAKE_CXX_COMPILER").unwrap();
        assert!(entry.kit_value.is_empty());
        assert_eq!(entry.new_value, "/opt/cc");
        assert!(entry.is_user_changed);
    }

    #[test]
    fn test_kit_adds_missing_initial_keys() {
        let mut model = ConfigModel::new();
        model.set_from_kit(vec![ConfigEntry::new("QT_QMAKE_EXECUTABLE", ConfigType::FilePath, "/qt/bin/qmake")]);
        let entry = model.get(Tier::Initial, "QT_QMAKE_EXECUTABLE").unwrap();
        assert!(entry.is_user_new);
        assert_eq!(entry.kit_value, "/qt/bin/qmake");
        assert_eq!(
            model.initial_arguments(),
            ["-DQT_QMAKE_EXECUTABLE:FILEPATH=/qt/bin/qmake"]
        );
    }

    #[test]
    fn test_apply_kit_and_initial_values() {
        let mut model = ConfigModel::new();
        model.set_initial(vec![ConfigEntry::new("CMAKE_BUILD_TYPE", ConfigType::String, "Debug")]);
        model.set_from_kit(vec![ConfigEntry::new("CMAKE_BUILD_TYPE", ConfigType::String, "Release")]);
        model.set_from_tool(vec![ConfigEntry::new("CMAKE_BUILD_TYPE", ConfigType::String, "MinSizeRel")]);

        assert!(model.apply_kit_value("CMAKE_BUILD_TYPE"));
        assert_eq!(
            model.get(Tier::Initial, "CMAKE_BUILD_TYPE").unwrap().current_value(),
            "Release"
        );

        assert!(model.apply_initial_value("CMAKE_BUILD_TYPE"));
        let current = model.get(Tier::Current, "CMAKE_BUILD_TYPE").unwrap();
        assert_eq!(current.initial_value, "Debug");
        assert_eq!(current.current_value(), "Debug");
    }

    #[test]
    fn test_reset_user_edits_by_scope() {
        let mut model = ConfigModel::new();
        model.set_initial(vec![ConfigEntry::new("I", ConfigType::String, "1")]);
        model.set_from_tool(tool(&[("C", ConfigType::String, "1")]));
        model.apply_user_edit("C", "2").unwrap();
        model.apply_user_edit("NEW", "x").unwrap();
        model.apply_user_edit_in(Tier::Initial, "I", "2").unwrap();

        model.reset_user_edits(Scope::Current);
        assert!(!model.has_changes(Scope::Current));
        assert!(model.get(Tier::Current, "NEW").is_none());
        assert!(model.has_changes(Scope::Initial));

        model.reset_user_edits(Scope::All);
        assert!(!model.has_changes(Scope::All));
    }

    #[test]
    fn test_clear_applied_edits_keeps_later_edits() {
        let mut model = ConfigModel::new();
        model.set_from_tool(tool(&[
            ("A", ConfigType::String, "1"),
            ("B", ConfigType::String, "1"),
            ("C", ConfigType::String, "1"),
        ]));
        model.apply_user_edit("A", "2").unwrap();
        model.apply_user_edit("B", "2").unwrap();
        model.toggle_unset("C").unwrap();
        model.apply_user_edit("SENT_NEW", "x").unwrap();
        let applied = model.pending_edits();
        assert_eq!(applied.len(), 4);

        model.apply_user_edit("B", "3").unwrap();
        model.apply_user_edit("WITH_DOCS", "ON").unwrap();
        model.set_from_tool(tool(&[
            ("A", ConfigType::String, "2"),
            ("B", ConfigType::String, "2"),
            ("SENT_NEW", ConfigType::String, "x"),
        ]));

        assert!(model.clear_applied_edits(&applied));
        assert!(!model.get(Tier::Current, "A").unwrap().has_change());
        assert_eq!(model.get(Tier::Current, "B").unwrap().current_value(), "3");
        assert!(model.get(Tier::Current, "WITH_DOCS").unwrap().is_user_new);
        assert!(!model.get(Tier::Current, "SENT_NEW").unwrap().has_change());

        let left = model.pending_edits();
        assert_eq!(left.len(), 2);
        assert!(!model.clear_applied_edits(&left));
        assert!(model.get(Tier::Current, "WITH_DOCS").is_none());
    }

    #[test]
    fn test_batch_edit() {
        let mut model = ConfigModel::new();
        model.set_from_tool(tool(&[
            ("A", ConfigType::String, "1"),
            ("B", ConfigType::Bool, "ON"),
        ]));
        let parsed = crate::entries_from_arguments(["-DA=1", "-DB:BOOL=OFF", "-DC=3", "-UA"]);
        model.set_batch_edit(parsed.entries);

        assert!(!model.get(Tier::Current, "A").unwrap().is_user_changed);
        assert!(model.get(Tier::Current, "A").unwrap().entry.is_unset);
        assert_eq!(model.value_of("B"), Some("OFF"));
        assert!(model.get(Tier::Current, "C").unwrap().is_user_new);
    }

    #[test]
    fn test_version_bumps() {
        let mut model = ConfigModel::new();
        let v0 = model.version();
        model.set_from_tool(tool(&[("A", ConfigType::String, "1")]));
        assert!(model.version() > v0);
    }

    #[test]
    fn test_model_snapshot() {
        let mut model = ConfigModel::new();
        model.set_from_tool(tool(&[("WITH_DOCS", ConfigType::Bool, "OFF")]));
        model.apply_user_edit("WITH_DOCS", "ON").unwrap();
        insta::assert_json_snapshot!(model.entries(), @r#"
        [
          {
            "entry": {
              "key": "WITH_DOCS",
              "value": "OFF",
              "entry_type": "bool",
              "is_advanced": false,
              "is_initial": false,
              "is_unset": false,
              "in_tool_cache": true,
              "allowed_values": [],
              "documentation": ""
            },
            "is_hidden": false,
            "is_user_changed": true,
            "is_user_new": false,
            "new_value": "ON",
            "kit_value": "",
            "initial_value": ""
          }
        ]
        "#);
    }
}
