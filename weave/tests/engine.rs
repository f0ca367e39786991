use std::sync::Arc;
use std::thread;
use anyhow::Result;
use pretty_assertions::assert_eq;
use weave::patch::{Anchor, Edit, Modifier, PatchDescriptor};
use weave::plugin::{self, ClassLoadingHost};
use weave::report::ReportKind;
use weave::{ClassTransformer, Engine, FrozenRegistry, Outcome, PatchRegistry, WeaveConfig, WeaveError};
use support::Machine;

mod support;

fn registry(patches: impl IntoIterator<Item=PatchDescriptor>) -> Result<Arc<FrozenRegistry>> {
	let mut registry = PatchRegistry::new();
	registry.register_all(patches)?;
	Ok(registry.freeze()?)
}

fn greeting() -> Result<PatchDescriptor> {
	Ok(PatchDescriptor::new("greeting", "Player")
		.method("update", "(I)V")
		.edit(Edit::add_field(&[Modifier::Public, Modifier::Static], "greetings", "I"))
		.edit(Edit::add_method(&[Modifier::Public, Modifier::Static], "sayHello", "()V", "
			getstatic Player.greetings:I
			iconst_1
			iadd
			putstatic Player.greetings:I
			return
		")?)
		.edit(Edit::insert_at(Anchor::MethodEntry, "invokestatic Player.sayHello:()V")?))
}

#[test]
fn say_hello_once() -> Result<()> {
	let original = support::player()?;
	let engine = Engine::new(registry([greeting()?])?);

	let outcome = engine.transform("Player", &original)?;
	assert!(outcome.is_patched());
	let report = outcome.report().map(ToString::to_string).unwrap_or_default();
	assert!(outcome.report().is_some_and(|report| report.is_clean()), "{report}");

	let mut machine = Machine::load(outcome.bytes(&original))?;
	machine.call("update", "(I)V", &[3])?;
	assert_eq!(machine.get("greetings"), 1);
	assert_eq!(machine.get("steps"), 3);
	Ok(())
}

#[test]
fn classes_without_patches_pass_through() -> Result<()> {
	let original = support::player()?;
	let engine = Engine::new(registry([
		PatchDescriptor::new("enemy", "Enemy").edit(Edit::add_field(&[], "health", "I")),
	])?);

	let outcome = engine.transform("Player", &original)?;
	assert_eq!(outcome, Outcome::PassThrough);
	assert_eq!(outcome.bytes(&original), original.as_slice());

	// never even parsed
	assert_eq!(engine.transform("Player", b"not a class")?, Outcome::PassThrough);
	assert_eq!(engine.transform_class("Player", &original), None);
	Ok(())
}

#[test]
fn dangling_jump_falls_back() -> Result<()> {
	let original = support::player()?;
	let engine = Engine::new(registry([
		PatchDescriptor::new("broken", "Player")
			.method("value", "(I)I")
			.edit(Edit::replace_body("
				iload_0
				ifeq nowhere
				iconst_0
				ireturn
			")?),
	])?);

	let outcome = engine.transform("Player", &original)?;
	let Outcome::FellBack { report } = &outcome else {
		panic!("expected a fallback, got {outcome:?}");
	};
	assert!(report.has_failed());
	assert!(matches!(
		report.entries.last().map(|entry| &entry.kind),
		Some(ReportKind::VerificationFailed(_)),
	));
	assert_eq!(outcome.bytes(&original), original.as_slice());
	assert_eq!(engine.transform_class("Player", &original), None);
	Ok(())
}

#[test]
fn nothing_applied_falls_back() -> Result<()> {
	let original = support::player()?;
	let engine = Engine::new(registry([
		PatchDescriptor::new("gone", "Player")
			.method("render", "()V")
			.edit(Edit::insert_at(Anchor::MethodEntry, "nop")?),
	])?);

	let outcome = engine.transform("Player", &original)?;
	let Outcome::FellBack { report } = outcome else {
		panic!("expected a fallback, got {outcome:?}");
	};
	assert_eq!(report.applied_count(), 0);
	assert!(matches!(report.of_patch("gone").next(), Some(ReportKind::Skipped(WeaveError::TargetNotFound(_)))));
	Ok(())
}

#[test]
fn unreadable_classes() -> Result<()> {
	let registry = registry([greeting()?])?;

	let engine = Engine::new(registry.clone());
	let outcome = engine.transform("Player", b"\xCA\xFE\xBA\xBE")?;
	assert!(matches!(
		outcome.report().and_then(|report| report.entries.last()).map(|entry| &entry.kind),
		Some(ReportKind::Failed(WeaveError::Class(_))),
	));

	let engine = Engine::with_config(registry, &WeaveConfig { fallback_on_error: false, ..WeaveConfig::default() });
	assert!(engine.transform("Player", b"\xCA\xFE\xBA\xBE").is_err());
	assert_eq!(engine.transform_class("Player", b"\xCA\xFE\xBA\xBE"), None);
	Ok(())
}

#[test]
fn outcomes_are_cached() -> Result<()> {
	let original = support::player()?;
	let registry = registry([greeting()?])?;
	let engine = Arc::new(Engine::new(registry.clone()));

	let threads: Vec<_> = (0..4)
		.map(|_| {
			let engine = engine.clone();
			let original = original.clone();
			thread::spawn(move || engine.transform("Player", &original))
		})
		.collect();
	let mut outcomes = Vec::new();
	for thread in threads {
		outcomes.push(thread.join().unwrap()?);
	}
	assert!(outcomes.windows(2).all(|pair| pair[0] == pair[1]));
	assert_eq!(engine.cache().map(|cache| cache.len()), Some(1));

	// other bytes are another entry
	let mut other = original.clone();
	other[7] = 51;
	engine.transform("Player", &other)?;
	assert_eq!(engine.cache().map(|cache| cache.len()), Some(2));

	let uncached = Engine::with_config(registry, &WeaveConfig { cache: false, ..WeaveConfig::default() });
	assert!(uncached.cache().is_none());
	assert_eq!(uncached.transform("Player", &original)?, outcomes[0]);
	Ok(())
}

#[derive(Default)]
struct Host {
	transformers: Vec<Arc<dyn ClassTransformer>>,
}

impl ClassLoadingHost for Host {
	fn install_transformer(&mut self, transformer: Arc<dyn ClassTransformer>) {
		self.transformers.push(transformer);
	}
}

impl Host {
	fn load(&self, class_name: &str, bytes: &[u8]) -> Vec<u8> {
		self.transformers.iter().fold(bytes.to_vec(), |bytes, transformer| {
			transformer.transform_class(class_name, &bytes).unwrap_or(bytes)
		})
	}
}

#[test]
fn plugin_installs_the_engine() -> Result<()> {
	let dir = std::env::temp_dir().join(format!("weave-plugin-{}", std::process::id()));
	std::fs::create_dir_all(&dir)?;
	std::fs::write(dir.join("steps.json"), r#"{
		"patches": [
			{
				"id": "double-steps",
				"class": "Player",
				"method": { "name": "step", "descriptor": "()V" },
				"priority": 5,
				"edits": [
					{ "insert_at": { "anchor": "before_return", "code": [
						"getstatic Player.steps:I",
						"iconst_1",
						"iadd",
						"putstatic Player.steps:I"
					] } }
				]
			}
		]
	}"#)?;
	let config = WeaveConfig { patch_files: vec![dir.join("steps.json")], ..WeaveConfig::default() };

	let greeting = greeting()?;
	let mut host = Host::default();
	let engine = plugin::initialize(&mut host, &config, |registry| registry.register(greeting))?;
	assert_eq!(engine.registry().len(), 2);
	assert_eq!(host.transformers.len(), 1);

	let mut machine = Machine::load(&host.load("Player", &support::player()?))?;
	machine.call("update", "(I)V", &[3])?;
	assert_eq!(machine.get("greetings"), 1);
	assert_eq!(machine.get("steps"), 6);

	std::fs::remove_dir_all(&dir)?;
	Ok(())
}

#[test]
fn plugin_rejects_invalid_patches() {
	let mut host = Host::default();
	let result = plugin::initialize(&mut host, &WeaveConfig::default(), |registry| {
		registry.register(PatchDescriptor::new("empty", "Player"))
	});
	assert!(result.is_err());
	assert!(host.transformers.is_empty());
}
