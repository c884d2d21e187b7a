//! Profile Registry - built-in vendors plus user-supplied profiles
//!
//! User profiles are stored as `<id>.json` in a directory and are schema-checked
//! on import. Built-in profiles cannot be overwritten or deleted.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::error::{ProfileError, RegistryError, RegistryResult};
use crate::validation::validate_profile;
use crate::vendor::{builtin_profiles, is_builtin, VendorProfile};

/// Directory where user profiles are stored (relative to current dir)
pub const DEFAULT_PROFILE_DIR: &str = ".affnorm/profiles";

/// Environment variable overriding [`DEFAULT_PROFILE_DIR`].
pub const PROFILE_DIR_ENV: &str = "AFFNORM_PROFILE_DIR";

/// Where a profile comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileOrigin {
    Builtin,
    Stored,
}

/// Listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileSummary {
    pub id: String,
    pub table: String,
    pub description: String,
    pub origin: ProfileOrigin,
}

/// Read a profile file, check it against the schema and compile it once.
pub fn read_profile(path: &Path) -> RegistryResult<VendorProfile> {
    let content = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content)?;
    validate_profile(&value).map_err(|errors| ProfileError::Schema { errors })?;
    let profile: VendorProfile = serde_json::from_value(value)?;
    profile.clone().compile()?;
    Ok(profile)
}

/// Registry of vendor profiles
pub struct ProfileRegistry {
    /// Directory where user profiles are stored
    registry_dir: PathBuf,
    /// Stored profiles (id -> profile)
    stored: BTreeMap<String, VendorProfile>,
}

impl ProfileRegistry {
    /// Open the registry at `$AFFNORM_PROFILE_DIR`, or the default directory.
    pub fn new() -> Self {
        let dir = env::var(PROFILE_DIR_ENV).unwrap_or_else(|_| DEFAULT_PROFILE_DIR.to_string());
        Self::with_dir(dir)
    }

    /// Open the registry at a custom directory
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        let mut registry = Self {
            registry_dir: dir.as_ref().to_path_buf(),
            stored: BTreeMap::new(),
        };
        registry.load_all();
        registry
    }

    pub fn dir(&self) -> &Path {
        &self.registry_dir
    }

    /// Load all stored profiles. Unreadable files are skipped.
    fn load_all(&mut self) {
        let entries = match fs::read_dir(&self.registry_dir) {
            Ok(e) => e,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Ok(profile) = read_profile(&path) {
                    if !is_builtin(&profile.id) {
                        self.stored.insert(profile.id.clone(), profile);
                    }
                }
            }
        }
    }

    /// All profiles, built-ins first.
    pub fn list(&self) -> RegistryResult<Vec<ProfileSummary>> {
        let summary = |p: &VendorProfile, origin| ProfileSummary {
            id: p.id.clone(),
            table: p.table.clone(),
            description: p.description.clone(),
            origin,
        };
        let mut out: Vec<ProfileSummary> = builtin_profiles()?
            .iter()
            .map(|p| summary(p, ProfileOrigin::Builtin))
            .collect();
        out.extend(self.stored.values().map(|p| summary(p, ProfileOrigin::Stored)));
        Ok(out)
    }

    /// Get a profile by id
    pub fn get(&self, id: &str) -> RegistryResult<VendorProfile> {
        if let Some(profile) = self.stored.get(id) {
            return Ok(profile.clone());
        }
        VendorProfile::builtin(id).map_err(|e| match e {
            ProfileError::UnknownVendor(id) => RegistryError::NotFound(id),
            other => other.into(),
        })
    }

    /// Import a profile from a JSON file. Returns its id.
    pub fn import(&mut self, path: &Path) -> RegistryResult<String> {
        let profile = read_profile(path)?;
        if is_builtin(&profile.id) {
            return Err(RegistryError::BuiltIn(profile.id));
        }

        fs::create_dir_all(&self.registry_dir)?;
        let target = self.registry_dir.join(format!("{}.json", profile.id));
        fs::write(&target, profile.to_json()?)?;

        let id = profile.id.clone();
        self.stored.insert(id.clone(), profile);
        Ok(id)
    }

    /// Delete a stored profile
    pub fn delete(&mut self, id: &str) -> RegistryResult<()> {
        if is_builtin(id) {
            return Err(RegistryError::BuiltIn(id.to_string()));
        }
        if self.stored.remove(id).is_none() {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        let path = self.registry_dir.join(format!("{}.json", id));
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CUSTOM: &str = r#"{
        "id": "measure_custom",
        "description": "In-house network",
        "table": "measure_custom",
        "header_sentinels": ["ID"],
        "tracking": { "field": 1 },
        "columns": [
            { "column": "order_id", "field": 0 },
            { "column": "measure_id", "tracking": "measure_id" }
        ]
    }"#;

    fn write_profile(dir: &Path, name: &str, json: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn test_builtins_listed_and_gettable() {
        let registry = ProfileRegistry::with_dir(tempdir().unwrap().path());
        let list = registry.list().unwrap();
        assert_eq!(list.len(), 19);
        assert!(list.iter().all(|p| p.origin == ProfileOrigin::Builtin));
        assert_eq!(registry.get("csv_vc").unwrap().table, "csv_vc");
        assert!(matches!(registry.get("nope"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_import_persists_and_reloads() {
        let store = tempdir().unwrap();
        let src = tempdir().unwrap();
        let file = write_profile(src.path(), "custom.json", CUSTOM);

        let mut registry = ProfileRegistry::with_dir(store.path());
        assert_eq!(registry.import(&file).unwrap(), "measure_custom");

        let reopened = ProfileRegistry::with_dir(store.path());
        let profile = reopened.get("measure_custom").unwrap();
        assert_eq!(profile.description, "In-house network");
        assert!(reopened
            .list()
            .unwrap()
            .iter()
            .any(|p| p.id == "measure_custom" && p.origin == ProfileOrigin::Stored));
    }

    #[test]
    fn test_import_rejects_schema_violation() {
        let src = tempdir().unwrap();
        let file = write_profile(src.path(), "bad.json", r#"{ "id": "measure_bad", "columns": [] }"#);
        let mut registry = ProfileRegistry::with_dir(tempdir().unwrap().path());
        let err = registry.import(&file).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidProfile(ProfileError::Schema { .. })));
    }

    #[test]
    fn test_import_rejects_huge_field_index() {
        let src = tempdir().unwrap();
        let json = CUSTOM.replace(r#""field": 0"#, r#""field": 18446744073709551615"#);
        let file = write_profile(src.path(), "huge.json", &json);
        let mut registry = ProfileRegistry::with_dir(tempdir().unwrap().path());

        let err = registry.import(&file).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidProfile(ProfileError::Schema { .. })));
    }

    #[test]
    fn test_builtins_cannot_be_replaced_or_deleted() {
        let src = tempdir().unwrap();
        let json = CUSTOM.replace("measure_custom", "measure_afb");
        let file = write_profile(src.path(), "afb.json", &json);
        let mut registry = ProfileRegistry::with_dir(tempdir().unwrap().path());

        assert!(matches!(registry.import(&file), Err(RegistryError::BuiltIn(_))));
        assert!(matches!(registry.delete("measure_afb"), Err(RegistryError::BuiltIn(_))));
    }

    #[test]
    fn test_delete_stored() {
        let store = tempdir().unwrap();
        let src = tempdir().unwrap();
        let file = write_profile(src.path(), "custom.json", CUSTOM);
        let mut registry = ProfileRegistry::with_dir(store.path());
        registry.import(&file).unwrap();

        registry.delete("measure_custom").unwrap();
        assert!(!store.path().join("measure_custom.json").exists());
        assert!(matches!(registry.delete("measure_custom"), Err(RegistryError::NotFound(_))));
    }
}
