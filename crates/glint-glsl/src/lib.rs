//! Shader-IL to GLSL transpilation.
//!
//! Consumes the decoded method bodies of a shader-defining type (see
//! `glint-il`) and emits Vulkan-dialect GLSL for one pipeline stage at a
//! time. The pipeline is:
//!
//! 1. name resolution with program-scoped caches (`names`),
//! 2. composite-type discovery and dependency tracking (`structs`),
//! 3. linear instruction-to-statement translation over a symbolic
//!    evaluation stack (`translate`),
//! 4. structured-control-flow recovery by retroactive text splicing
//!    (`flow`, `source_map`),
//! 5. dependency-ordered stage assembly (`emit`).
//!
//! A transpilation either produces fully correct source or fails; there is
//! no partial output. Miscompiled shader source is a worse outcome than a
//! build failure, so every error is fatal to the current stage.
//!
//! The emitted source pairs with the fixed entrypoint name
//! [`ENTRY_POINT`]; the caller hands both to the downstream source-to-
//! bytecode compiler together with the stage kind.

use glint_il::{MethodId, Module, Opcode, Stage, TypeId};
use thiserror::Error;

mod cache;
mod emit;
mod flow;
mod names;
mod source_map;
mod structs;
mod translate;

#[cfg(test)]
mod tests;

pub use cache::{CachedStage, StageCache, StageCacheLookup, StageCacheLookupSource};
pub use emit::EmitError;
pub use flow::FlowError;
pub use structs::StructError;
pub use translate::TranslateError;

/// Fixed entrypoint name of every emitted stage.
pub const ENTRY_POINT: &str = "main";

/// Failure classes, kept distinct in diagnostics: authoring errors indicate
/// malformed shader-type definitions, unsupported-construct errors indicate
/// source constructs outside the DSL subset, internal errors indicate a bug
/// in translation itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Authoring,
    Unsupported,
    Internal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ErrorClass::Authoring => "authoring",
            ErrorClass::Unsupported => "unsupported construct",
            ErrorClass::Internal => "internal",
        })
    }
}

/// Emitter options, stable for the lifetime of one [`Transpiler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// GLSL version directive value.
    pub version: u32,
    /// Force `flat` interpolation on integral fragment inputs, which GLSL
    /// requires; disable only when the front end already annotates them.
    pub flat_integral_inputs: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            version: 450,
            flat_integral_inputs: true,
        }
    }
}

/// One successfully transpiled stage.
#[derive(Debug, Clone)]
pub struct TranspiledStage {
    pub stage: Stage,
    pub glsl: String,
    pub entry_point: &'static str,
}

#[derive(Debug, Error)]
pub enum TranspileError {
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error(transparent)]
    Struct(#[from] StructError),
    #[error(transparent)]
    Emit(#[from] EmitError),
}

/// One shader program's transpilation session.
///
/// Owns the name-resolution caches, so identifiers stay consistent across
/// the stages of one program; per-stage scratch state is created and
/// discarded inside [`Transpiler::transpile_stage`]. Independent programs
/// get independent sessions and may be transpiled concurrently.
pub struct Transpiler<'m> {
    module: &'m Module,
    names: names::NameResolver,
    options: Options,
}

impl<'m> Transpiler<'m> {
    pub fn new(module: &'m Module, options: Options) -> Self {
        Self {
            module,
            names: names::NameResolver::new(),
            options,
        }
    }

    pub fn options(&self) -> Options {
        self.options
    }

    /// Transpiles the stage implemented by `entry`, which must carry a
    /// stage-entrypoint marker on the shader-defining type `shader_ty`.
    pub fn transpile_stage(
        &mut self,
        shader_ty: TypeId,
        entry: MethodId,
    ) -> Result<TranspiledStage, TranspileError> {
        let method = self.module.method(entry);
        let stage = method
            .entry
            .ok_or_else(|| {
                TranspileError::Translate(TranslateError {
                    offset: 0,
                    opcode: Opcode::Nop,
                    class: ErrorClass::Authoring,
                    message: format!("method {} is not a stage entrypoint", method.name),
                })
            })?
            .stage;
        let glsl = emit::assemble_stage(
            self.module,
            &mut self.names,
            &self.options,
            shader_ty,
            entry,
            stage,
        )?;
        Ok(TranspiledStage {
            stage,
            glsl,
            entry_point: ENTRY_POINT,
        })
    }
}
