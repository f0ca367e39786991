//! Patching JVM classes while they are loaded.
//!
//! Patches are described by [`PatchDescriptor`]s: edits to a class, like adding a method or
//! inserting code at an [`Anchor`]. They are collected in a [`PatchRegistry`], which is frozen
//! once all patches are known. An [`Engine`] then applies the patches of each class the host
//! loads, and checks the result with the verifier. If anything goes wrong the host gets the
//! unpatched class, and the [`ClassReport`] says why.
//!
//! ```
//! use weave::{Anchor, Edit, Engine, PatchDescriptor, PatchRegistry};
//!
//! # fn main() -> Result<(), weave::WeaveError> {
//! let mut registry = PatchRegistry::new();
//! registry.register(PatchDescriptor::new("count-updates", "game/Player")
//! 	.method("update", "(I)V")
//! 	.edit(Edit::insert_at(Anchor::MethodEntry, "
//! 		getstatic game/Player.updates:I
//! 		iconst_1
//! 		iadd
//! 		putstatic game/Player.updates:I
//! 	")?))?;
//! let engine = Engine::new(registry.freeze()?);
//! assert_eq!(engine.registry().lookup("game/Player").len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod asm;
pub mod cache;
pub mod config;
pub mod engine;
mod error;
pub mod patch;
pub mod pipeline;
pub mod plugin;
pub mod registry;
pub mod report;

pub use error::WeaveError;
pub use config::WeaveConfig;
pub use engine::{ClassTransformer, Engine, Outcome};
pub use patch::{Anchor, CallMatch, Edit, MethodRef, Modifier, PatchDescriptor, PatchFile};
pub use registry::{FrozenRegistry, PatchRegistry};
pub use report::{ClassReport, ReportKind};
