use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::patch::{PatchDescriptor, PatchFile};

/// Settings of the engine, usually read from a JSON file.
///
/// ```json
/// {
///     "cache": true,
///     "verify": true,
///     "fallback_on_error": true,
///     "patch_files": ["patches/player.json"]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeaveConfig {
	/// Remember the outcome for each class and patch set.
	pub cache: bool,
	/// Run the verifier on patched classes before using them.
	pub verify: bool,
	/// Use the unpatched class if a patched class can't even be read. Otherwise the error goes to
	/// the host.
	pub fallback_on_error: bool,
	/// Patch files to register. Relative paths are relative to the configuration file.
	pub patch_files: Vec<PathBuf>,
}

impl Default for WeaveConfig {
	fn default() -> Self {
		WeaveConfig {
			cache: true,
			verify: true,
			fallback_on_error: true,
			patch_files: Vec::new(),
		}
	}
}

impl WeaveConfig {
	pub fn from_json(json: &str) -> Result<WeaveConfig> {
		serde_json::from_str(json)
			.context("failed to parse weave configuration")
	}

	pub fn load(path: &Path) -> Result<WeaveConfig> {
		let json = std::fs::read_to_string(path)
			.with_context(|| format!("failed to read configuration {path:?}"))?;
		let mut config = WeaveConfig::from_json(&json)
			.with_context(|| format!("in configuration {path:?}"))?;

		if let Some(base) = path.parent() {
			for file in &mut config.patch_files {
				if file.is_relative() {
					*file = base.join(&*file);
				}
			}
		}
		Ok(config)
	}

	/// Reads all patch files, in order.
	pub fn load_patches(&self) -> Result<Vec<PatchDescriptor>> {
		let mut patches = Vec::new();
		for path in &self.patch_files {
			patches.extend(read_patch_file(path)?.patches);
		}
		Ok(patches)
	}
}

pub fn read_patch_file(path: &Path) -> Result<PatchFile> {
	let json = std::fs::read_to_string(path)
		.with_context(|| format!("failed to read patch file {path:?}"))?;
	PatchFile::from_json(&json)
		.with_context(|| format!("in patch file {path:?}"))
}

#[cfg(test)]
mod testing {
	use std::path::PathBuf;
	use anyhow::Result;
	use pretty_assertions::assert_eq;
	use crate::config::WeaveConfig;

	#[test]
	fn defaults() -> Result<()> {
		assert_eq!(WeaveConfig::from_json("{}")?, WeaveConfig::default());

		let config = WeaveConfig::from_json(r#"{ "cache": false, "patch_files": ["a.json"] }"#)?;
		assert_eq!(config, WeaveConfig {
			cache: false,
			patch_files: vec![PathBuf::from("a.json")],
			..WeaveConfig::default()
		});
		Ok(())
	}

	#[test]
	fn unknown_keys() {
		assert!(WeaveConfig::from_json(r#"{ "cahce": false }"#).is_err());
	}

	#[test]
	fn relative_patch_files() -> Result<()> {
		let dir = std::env::temp_dir().join(format!("weave-config-{}", std::process::id()));
		std::fs::create_dir_all(&dir)?;
		let path = dir.join("weave.json");
		std::fs::write(&path, r#"{ "patch_files": ["patches/one.json", "/abs/two.json"] }"#)?;

		let config = WeaveConfig::load(&path)?;
		assert_eq!(config.patch_files, [dir.join("patches/one.json"), PathBuf::from("/abs/two.json")]);

		// the files don't exist
		assert!(config.load_patches().is_err());

		std::fs::remove_dir_all(&dir)?;
		Ok(())
	}
}
