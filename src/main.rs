use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use indexmap::IndexMap;
use log::{debug, error, info, warn, LevelFilter};
use rayon::prelude::*;
use classfile::model::Method;
use classfile::ClassPathHierarchy;
use weave::config::read_patch_file;
use weave::{Engine, Outcome, PatchRegistry, WeaveConfig};
use crate::jar::Entry;

mod dump;
mod jar;

#[derive(Debug, Parser)]
#[command(version, about = "Applies weave patches to class files ahead of time, and inspects class files")]
struct Cli {
	/// Print more. Repeat for even more.
	#[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
	verbose: u8,

	/// Only print errors.
	#[arg(short = 'q', long = "quiet", global = true, conflicts_with = "verbose")]
	quiet: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Patches every class of a jar or directory, and copies all other files
	Apply {
		/// Patch files, registered in the order given
		#[arg(short, long = "patches", num_args = 1..)]
		patches: Vec<PathBuf>,
		/// A configuration file. Its patch files are registered before the ones given with `--patches`
		#[arg(short, long)]
		config: Option<PathBuf>,
		/// A jar, a directory, or a single class file
		#[arg(short, long)]
		input: PathBuf,
		/// A jar if it ends with `.jar` or `.zip`, a directory otherwise
		#[arg(short, long)]
		output: PathBuf,
		/// Don't verify patched classes
		#[arg(long)]
		no_verify: bool,
	},
	/// Reads, recomputes and verifies every class of a jar, a directory or a single class file
	Verify {
		path: PathBuf,
	},
	/// Prints the constant pool, the members and the code of a class file
	Dump {
		class: PathBuf,
	},
	/// Reads patch files and their code templates, without applying them
	CheckPatches {
		#[arg(required = true)]
		files: Vec<PathBuf>,
	},
}

fn setup_logging(verbose: u8, quiet: bool) -> Result<()> {
	let level = match (quiet, verbose) {
		(true, _) => LevelFilter::Error,
		(false, 0) => LevelFilter::Info,
		(false, 1) => LevelFilter::Debug,
		(false, _) => LevelFilter::Trace,
	};
	fern::Dispatch::new()
		.format(|out, message, record| {
			out.finish(format_args!("[{} {}] {}", record.level(), record.target(), message))
		})
		.level(level)
		.chain(std::io::stderr())
		.apply()
		.context("failed to set up logging")
}

fn main() -> Result<()> {
	let Cli { verbose, quiet, command } = Cli::parse();
	setup_logging(verbose, quiet)?;

	match command {
		Command::Apply { patches, config, input, output, no_verify } => {
			let mut config = match config {
				Some(path) => WeaveConfig::load(&path)?,
				None => WeaveConfig::default(),
			};
			config.patch_files.extend(patches);
			if no_verify {
				config.verify = false;
			}
			// every class is transformed once
			config.cache = false;
			apply(&config, &input, &output)
		},
		Command::Verify { path } => verify(&path),
		Command::Dump { class } => {
			let bytes = std::fs::read(&class)
				.with_context(|| format!("failed to read {class:?}"))?;
			let class = classfile::parse(&bytes)
				.with_context(|| format!("failed to parse {class:?}"))?;
			dump::dump(&class, &mut std::io::stdout().lock())
		},
		Command::CheckPatches { files } => check_patches(&files),
	}
}

fn apply(config: &WeaveConfig, input: &Path, output: &Path) -> Result<()> {
	if config.patch_files.is_empty() {
		bail!("no patch files given, use `--patches` or a configuration file");
	}
	let mut registry = PatchRegistry::new();
	registry.register_all(config.load_patches()?)?;
	let entries = jar::read(input)?;
	let hierarchy = class_path_hierarchy(&entries);
	let engine = Engine::with_config(registry.freeze()?, config)
		.with_hierarchy(Arc::new(hierarchy));
	info!("{} patch(es) for {} class(es)", engine.registry().len(), engine.registry().classes().count());

	let results: Vec<_> = entries.into_par_iter()
		.map(|entry| -> Result<(Entry, Option<Outcome>)> {
			let Some(class_name) = entry.class_name() else {
				return Ok((entry, None));
			};
			let outcome = engine.transform(class_name, &entry.data)
				.with_context(|| format!("failed to transform {}", entry.name))?;
			let data = outcome.bytes(&entry.data).to_vec();
			Ok((Entry { name: entry.name, data }, Some(outcome)))
		})
		.collect::<Result<_>>()?;

	let mut patched = 0;
	let mut fell_back = 0;
	for outcome in results.iter().filter_map(|(_, outcome)| outcome.as_ref()) {
		match outcome {
			Outcome::PassThrough => {},
			Outcome::Patched { report, .. } => {
				patched += 1;
				println!("{report}");
			},
			Outcome::FellBack { report } => {
				fell_back += 1;
				println!("{report}");
				warn!("{} is left unpatched", report.class);
			},
		}
	}
	let missing: Vec<&str> = engine.registry().classes()
		.filter(|class| !results.iter().any(|(entry, _)| entry.class_name() == Some(*class)))
		.collect();
	for class in &missing {
		warn!("there are patches for {class}, but it's not in {input:?}");
	}

	let entries: Vec<Entry> = results.into_iter().map(|(entry, _)| entry).collect();
	jar::write(output, &entries)?;
	info!("patched {patched} class(es), {fell_back} left unpatched, wrote {} file(s) to {output:?}", entries.len());
	Ok(())
}

/// The super classes of all readable classes among the entries, used to merge types where the
/// code of a class has no frames to go by.
fn class_path_hierarchy(entries: &[Entry]) -> ClassPathHierarchy {
	let classes: Vec<_> = entries.par_iter()
		.filter(|entry| entry.class_name().is_some())
		.filter_map(|entry| match classfile::parse(&entry.data) {
			Ok(class) => Some((
				class.name()?.to_vec(),
				class.super_name().map(<[u8]>::to_vec),
				class.is_interface(),
			)),
			Err(e) => {
				debug!("leaving {} out of the class hierarchy: {e}", entry.name);
				None
			},
		})
		.collect();

	let mut hierarchy = ClassPathHierarchy::new();
	for (name, super_class, interface) in classes {
		hierarchy.add(name, super_class.as_deref(), interface);
	}
	debug!("{} class(es) in the class hierarchy", hierarchy.len());
	hierarchy
}

fn verify_class(bytes: &[u8], hierarchy: &ClassPathHierarchy) -> Result<()> {
	let mut class = classfile::parse(bytes)?;
	for code in class.methods.iter_mut().filter_map(Method::code_mut) {
		code.mark_modified();
	}
	class.recompute_dirty(hierarchy)?;
	classfile::verify(&class, hierarchy)?;
	classfile::serialize(&class)?;
	Ok(())
}

fn verify(path: &Path) -> Result<()> {
	let entries = jar::read(path)?;
	let hierarchy = class_path_hierarchy(&entries);
	let classes: Vec<&Entry> = entries.iter().filter(|entry| entry.class_name().is_some()).collect();
	let failures: Vec<String> = classes.par_iter()
		.filter_map(|entry| verify_class(&entry.data, &hierarchy).err().map(|e| format!("{}: {e:#}", entry.name)))
		.collect();

	for failure in &failures {
		error!("{failure}");
	}
	if !failures.is_empty() {
		bail!("{} of {} class(es) failed verification", failures.len(), classes.len());
	}
	info!("all {} class(es) are fine", classes.len());
	Ok(())
}

fn check_patches(files: &[PathBuf]) -> Result<()> {
	let mut registry = PatchRegistry::new();
	for path in files {
		let file = read_patch_file(path)?;
		info!("{path:?}: {} patch(es)", file.patches.len());
		registry.register_all(file.patches)
			.with_context(|| format!("in patch file {path:?}"))?;
	}
	let registry = registry.freeze()?;

	let mut classes: IndexMap<&str, usize> = registry.classes()
		.map(|class| (class, registry.lookup(class).len()))
		.collect();
	classes.sort_keys();
	for (class, count) in classes {
		let fingerprint = registry.fingerprint(class).map(|fingerprint| fingerprint.to_string()).unwrap_or_default();
		println!("{class}: {count} patch(es), fingerprint {fingerprint}");
		for patch in registry.lookup(class) {
			let edits: Vec<String> = patch.edits.iter().map(ToString::to_string).collect();
			println!("  [{}] priority {}: {}", patch.id, patch.priority, edits.join(", "));
		}
	}
	Ok(())
}
