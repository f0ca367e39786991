//! What happened to the patches of a class.

use std::fmt::{Display, Formatter};
use log::{trace, warn};
use classfile::VerifyError;
use crate::registry::Fingerprint;
use crate::WeaveError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportKind {
	/// The edit was applied. Describes the edit and where it went.
	Applied(String),
	/// The whole patch was left out because one of its edits failed.
	Skipped(WeaveError),
	/// An edit was dropped or overwritten because of another patch. Always a [`WeaveError::StructuralConflict`].
	Conflict(WeaveError),
	/// The patched class failed verification, so none of the patches are used.
	VerificationFailed(VerifyError),
	/// Reading or writing the class failed, so none of the patches are used.
	Failed(WeaveError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
	/// Id of the patch, or `None` for entries about the whole class.
	pub patch: Option<String>,
	pub kind: ReportKind,
}

impl Display for ReportEntry {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let patch = self.patch.as_deref().unwrap_or("*");
		match &self.kind {
			ReportKind::Applied(detail) => write!(f, "[{patch}] applied {detail}"),
			ReportKind::Skipped(e) => write!(f, "[{patch}] skipped: {e}"),
			ReportKind::Conflict(e) => write!(f, "[{patch}] {e}"),
			ReportKind::VerificationFailed(e) => write!(f, "[{patch}] verification failed: {e}"),
			ReportKind::Failed(e) => write!(f, "[{patch}] failed: {e}"),
		}
	}
}

/// The report of transforming one class. Every entry is also logged when it's recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassReport {
	pub class: String,
	pub fingerprint: Option<Fingerprint>,
	pub entries: Vec<ReportEntry>,
}

impl ClassReport {
	pub fn new(class: &str, fingerprint: Option<Fingerprint>) -> ClassReport {
		ClassReport { class: class.to_owned(), fingerprint, entries: Vec::new() }
	}

	pub fn applied(&mut self, patch: &str, detail: String) {
		trace!("{}: [{patch}] applied {detail}", self.class);
		self.push(Some(patch), ReportKind::Applied(detail));
	}

	pub fn skipped(&mut self, patch: &str, error: WeaveError) {
		warn!("{}: [{patch}] skipped: {error}", self.class);
		self.push(Some(patch), ReportKind::Skipped(error));
	}

	pub fn conflict(&mut self, patch: &str, error: WeaveError) {
		warn!("{}: [{patch}] {error}", self.class);
		self.push(Some(patch), ReportKind::Conflict(error));
	}

	/// Records why the patched class can't be used. Verification errors get their own kind.
	pub fn failed(&mut self, error: WeaveError) {
		warn!("{}: falling back to the unpatched class: {error}", self.class);
		let kind = match error {
			WeaveError::VerificationFailed(e) => ReportKind::VerificationFailed(e),
			e => ReportKind::Failed(e),
		};
		self.push(None, kind);
	}

	fn push(&mut self, patch: Option<&str>, kind: ReportKind) {
		self.entries.push(ReportEntry { patch: patch.map(str::to_owned), kind });
	}

	pub fn applied_count(&self) -> usize {
		self.entries.iter().filter(|entry| matches!(entry.kind, ReportKind::Applied(_))).count()
	}

	/// Whether all edits were applied without conflicts, and the result can be used.
	pub fn is_clean(&self) -> bool {
		self.entries.iter().all(|entry| matches!(entry.kind, ReportKind::Applied(_)))
	}

	/// Whether the patched class couldn't be used.
	pub fn has_failed(&self) -> bool {
		self.entries.iter().any(|entry| matches!(entry.kind, ReportKind::VerificationFailed(_) | ReportKind::Failed(_)))
	}

	/// The entries of one patch.
	pub fn of_patch<'a>(&'a self, patch: &'a str) -> impl Iterator<Item=&'a ReportKind> + 'a {
		self.entries.iter()
			.filter(move |entry| entry.patch.as_deref() == Some(patch))
			.map(|entry| &entry.kind)
	}
}

impl Display for ClassReport {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.class)?;
		if let Some(fingerprint) = self.fingerprint {
			write!(f, " ({fingerprint})")?;
		}
		for entry in &self.entries {
			write!(f, "\n  {entry}")?;
		}
		Ok(())
	}
}
