use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;
use anyhow::{bail, Context, Result};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

/// A file of a jar or of a directory, named by its path relative to the root, separated with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entry {
	pub(crate) name: String,
	pub(crate) data: Vec<u8>,
}

impl Entry {
	/// The internal class name, if this is a class file.
	pub(crate) fn class_name(&self) -> Option<&str> {
		self.name.strip_suffix(".class")
			.filter(|name| !name.ends_with("module-info") && !name.ends_with("package-info"))
	}
}

pub(crate) fn is_jar(path: &Path) -> bool {
	path.extension().is_some_and(|extension| extension == "jar" || extension == "zip")
}

/// Reads all files of a jar, a directory, or a single class file.
pub(crate) fn read(path: &Path) -> Result<Vec<Entry>> {
	if path.is_dir() {
		read_dir(path)
			.with_context(|| format!("failed to read directory {path:?}"))
	} else if is_jar(path) {
		let file = File::open(path)
			.with_context(|| format!("failed to open jar {path:?}"))?;
		read_jar(file)
			.with_context(|| format!("failed to read jar {path:?}"))
	} else {
		let data = std::fs::read(path)
			.with_context(|| format!("failed to read {path:?}"))?;
		let name = path.file_name()
			.with_context(|| format!("{path:?} has no file name"))?
			.to_string_lossy()
			.into_owned();
		Ok(vec![Entry { name, data }])
	}
}

fn read_dir(root: &Path) -> Result<Vec<Entry>> {
	let mut entries = Vec::new();
	for file in WalkDir::new(root).sort_by_file_name() {
		let file = file?;
		if file.file_type().is_dir() {
			continue;
		}
		let relative = file.path().strip_prefix(root)?;
		let name = relative.components()
			.map(|component| component.as_os_str().to_string_lossy())
			.collect::<Vec<_>>()
			.join("/");
		let data = std::fs::read(file.path())
			.with_context(|| format!("failed to read {:?}", file.path()))?;
		entries.push(Entry { name, data });
	}
	Ok(entries)
}

fn read_jar(reader: impl Read + Seek) -> Result<Vec<Entry>> {
	let mut zip = ZipArchive::new(reader)?;

	let mut entries = Vec::with_capacity(zip.len());
	for index in 0..zip.len() {
		let mut file = zip.by_index(index)?;
		if file.is_dir() {
			continue;
		}
		let mut data = Vec::new();
		file.read_to_end(&mut data)
			.with_context(|| format!("failed to read jar entry {:?}", file.name()))?;
		entries.push(Entry { name: file.name().to_owned(), data });
	}
	Ok(entries)
}

/// Writes the entries as a jar if `path` ends with `.jar` or `.zip`, and into a directory otherwise.
pub(crate) fn write(path: &Path, entries: &[Entry]) -> Result<()> {
	if is_jar(path) {
		let file = File::create(path)
			.with_context(|| format!("failed to create jar {path:?}"))?;
		write_jar(file, entries)
			.with_context(|| format!("failed to write jar {path:?}"))
	} else {
		write_dir(path, entries)
			.with_context(|| format!("failed to write directory {path:?}"))
	}
}

fn write_dir(root: &Path, entries: &[Entry]) -> Result<()> {
	for entry in entries {
		if entry.name.split('/').any(|part| part == ".." || part.is_empty()) {
			bail!("refusing to write entry {:?} outside of the output directory", entry.name);
		}
		let path = root.join(&entry.name);
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(&path, &entry.data)
			.with_context(|| format!("failed to write {path:?}"))?;
	}
	Ok(())
}

fn write_jar(writer: impl Write + Seek, entries: &[Entry]) -> Result<()> {
	let mut zip = ZipWriter::new(writer);
	for entry in entries {
		zip.start_file(entry.name.as_str(), FileOptions::<()>::default())?;
		zip.write_all(&entry.data)?;
	}
	zip.finish()?;
	Ok(())
}

#[cfg(test)]
mod testing {
	use std::io::Cursor;
	use anyhow::Result;
	use pretty_assertions::assert_eq;
	use crate::jar::{read_jar, write_jar, Entry};

	fn entry(name: &str, data: &[u8]) -> Entry {
		Entry { name: name.to_owned(), data: data.to_vec() }
	}

	#[test]
	fn class_names() {
		assert_eq!(entry("a/b/Player.class", b"").class_name(), Some("a/b/Player"));
		assert_eq!(entry("module-info.class", b"").class_name(), None);
		assert_eq!(entry("a/package-info.class", b"").class_name(), None);
		assert_eq!(entry("META-INF/MANIFEST.MF", b"").class_name(), None);
	}

	#[test]
	fn jar_keeps_entries() -> Result<()> {
		let entries = vec![
			entry("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n"),
			entry("a/b/Player.class", &[0xCA, 0xFE, 0xBA, 0xBE]),
		];
		let mut jar = Cursor::new(Vec::new());
		write_jar(&mut jar, &entries)?;
		jar.set_position(0);
		assert_eq!(read_jar(jar)?, entries);
		Ok(())
	}

	#[test]
	fn directories() -> Result<()> {
		let dir = std::env::temp_dir().join(format!("weaver-jar-{}", std::process::id()));
		let entries = vec![
			entry("Enemy.class", b"enemy"),
			entry("a/b/Player.class", b"player"),
		];
		crate::jar::write(&dir, &entries)?;
		assert_eq!(crate::jar::read(&dir)?, entries);

		assert!(crate::jar::write(&dir, &[entry("../escape", b"")]).is_err());
		std::fs::remove_dir_all(&dir)?;
		Ok(())
	}
}
