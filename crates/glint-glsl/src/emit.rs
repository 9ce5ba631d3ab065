//! Dependency-ordered assembly of one shader stage's GLSL source.
//!
//! Seeds translation at the stage entrypoint, transitively translates every
//! recorded callee once, then concatenates: version directive, struct
//! definitions, stage IO, compute work-group size, resource declarations,
//! shared variables, and function bodies. Both structs and functions are
//! ordered by a ready-frontier worklist so that mutual dependents interleave
//! correctly; an unsatisfiable frontier is a cycle and fails the stage.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write;

use glint_il::{MethodId, Module, ResourceKind, Stage, TypeId, TypeKind};

use crate::names::NameResolver;
use crate::structs::{ArrayLen, StructRegistry};
use crate::translate::{self, IoDir, ResourceBinding, StageState, TranslatedFunction};
use crate::{Options, TranspileError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitError {
    pub message: String,
}

impl std::fmt::Display for EmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage assembly error: {}", self.message)
    }
}

impl std::error::Error for EmitError {}

fn err(message: impl Into<String>) -> EmitError {
    EmitError {
        message: message.into(),
    }
}

pub fn assemble_stage(
    module: &Module,
    names: &mut NameResolver,
    options: &Options,
    shader_ty: TypeId,
    entry: MethodId,
    stage: Stage,
) -> Result<String, TranspileError> {
    let mut state = StageState::new();

    // Translate the entrypoint, then every reachable callee exactly once.
    let entry_fn =
        translate::translate_function(module, names, &mut state, options, shader_ty, entry, true)?;
    let mut queue: VecDeque<MethodId> = entry_fn.callees.iter().copied().collect();
    let mut functions: HashMap<MethodId, TranslatedFunction> = HashMap::new();
    let mut discovery: Vec<MethodId> = vec![entry];
    functions.insert(entry, entry_fn);
    while let Some(mid) = queue.pop_front() {
        if functions.contains_key(&mid) {
            continue;
        }
        let f = translate::translate_function(
            module, names, &mut state, options, shader_ty, mid, false,
        )?;
        queue.extend(f.callees.iter().copied());
        discovery.push(mid);
        functions.insert(mid, f);
    }

    let struct_order = order_structs(&state.structs)?;
    let fn_order = order_functions(&discovery, &functions)?;

    let mut out = String::new();
    let _ = writeln!(out, "#version {}", options.version);
    out.push('\n');

    for ty in &struct_order {
        let info = state.structs.get(*ty).expect("ordered struct is registered");
        let _ = writeln!(out, "struct {} {{", info.name);
        for f in &info.fields {
            let _ = writeln!(out, "  {} {}{};", f.type_name, f.name, array_suffix(f.len));
        }
        out.push_str("};\n\n");
    }

    if !state.io.is_empty() {
        for io in &state.io {
            let dir = match io.dir {
                IoDir::In => "in",
                IoDir::Out => "out",
            };
            let flat = if io.flat { "flat " } else { "" };
            let _ = writeln!(
                out,
                "layout(location = {}) {}{} {} {};",
                io.location, flat, dir, io.type_name, io.name
            );
        }
        out.push('\n');
    }

    if stage == Stage::Compute {
        let size = module
            .method(entry)
            .entry
            .and_then(|e| e.local_size)
            .ok_or_else(|| err("compute entrypoint requires a declared work-group size"))?;
        let _ = writeln!(
            out,
            "layout(local_size_x = {}, local_size_y = {}, local_size_z = {}) in;",
            size[0], size[1], size[2]
        );
        out.push('\n');
    }

    for (name, binding) in &state.resources {
        emit_resource(&mut out, module, names, shader_ty, &state, name, binding)?;
    }

    for (name, shared) in &state.shared {
        let _ = writeln!(
            out,
            "shared {} {}{};",
            shared.type_name,
            name,
            array_suffix(shared.len)
        );
    }
    if !state.shared.is_empty() {
        out.push('\n');
    }

    for mid in &fn_order {
        out.push_str(&functions[mid].text);
        out.push('\n');
    }

    tracing::debug!(
        stage = ?stage,
        functions = fn_order.len(),
        structs = struct_order.len(),
        resources = state.resources.len(),
        "assembled stage source"
    );

    Ok(out)
}

fn array_suffix(len: ArrayLen) -> String {
    match len {
        ArrayLen::Scalar => String::new(),
        ArrayLen::Fixed(n) => format!("[{n}]"),
        ArrayLen::Runtime => "[]".to_owned(),
    }
}

fn emit_resource(
    out: &mut String,
    module: &Module,
    names: &mut NameResolver,
    shader_ty: TypeId,
    state: &StageState,
    name: &str,
    binding: &ResourceBinding,
) -> Result<(), TranspileError> {
    let buffer_backed = matches!(
        binding.kind,
        ResourceKind::Uniform | ResourceKind::Storage
    );
    if buffer_backed {
        let keyword = match binding.kind {
            ResourceKind::Uniform => "uniform",
            _ => "buffer",
        };
        let _ = writeln!(out, "{} {} {}_block {{", binding.layout, keyword, name);
        match module.ty(binding.backing).kind {
            TypeKind::Struct => {
                let info = state
                    .structs
                    .get(binding.backing)
                    .ok_or_else(|| err(format!("resource {name} has an unregistered body")))?;
                for f in &info.fields {
                    let _ =
                        writeln!(out, "  {} {}{};", f.type_name, f.name, array_suffix(f.len));
                }
                let _ = writeln!(out, "}} {name};");
            }
            _ => {
                // Non-struct backing: a single anonymous-block member keeps
                // the field expression a bare identifier.
                let ty = names
                    .type_name(module, binding.backing, shader_ty)
                    .map_err(|e| err(e.message))?;
                let _ = writeln!(out, "  {ty} {name};");
                out.push_str("};\n");
            }
        }
    } else {
        let ty = names
            .type_name(module, binding.backing, shader_ty)
            .map_err(|e| err(e.message))?;
        let suffix = binding
            .array_len
            .map(|n| format!("[{n}]"))
            .unwrap_or_default();
        let _ = writeln!(out, "{} uniform {} {}{};", binding.layout, ty, name, suffix);
    }
    out.push('\n');
    Ok(())
}

/// Ready-frontier topological order over defined structs. Entries that are
/// referenced but not defined (`define = false`) satisfy dependencies
/// without being emitted.
fn order_structs(registry: &StructRegistry) -> Result<Vec<TypeId>, EmitError> {
    let mut emitted: HashSet<TypeId> = HashSet::new();
    let mut remaining: Vec<TypeId> = Vec::new();
    for &ty in registry.discovered() {
        let info = registry.get(ty).expect("discovered entry");
        if info.define {
            remaining.push(ty);
        } else {
            emitted.insert(ty);
        }
    }

    let mut order = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let ready: Vec<TypeId> = remaining
            .iter()
            .copied()
            .filter(|&ty| {
                registry
                    .get(ty)
                    .expect("discovered entry")
                    .dependencies
                    .iter()
                    .all(|d| emitted.contains(d))
            })
            .collect();
        if ready.is_empty() {
            return Err(err(
                "cyclic struct containment cannot be emitted in declaration order",
            ));
        }
        for ty in &ready {
            emitted.insert(*ty);
            order.push(*ty);
        }
        remaining.retain(|ty| !emitted.contains(ty));
    }
    Ok(order)
}

/// Ready-frontier topological order over translated functions: callees
/// before callers. A cycle means recursion, which shader code may not use.
fn order_functions(
    discovery: &[MethodId],
    functions: &HashMap<MethodId, TranslatedFunction>,
) -> Result<Vec<MethodId>, EmitError> {
    let mut emitted: HashSet<MethodId> = HashSet::new();
    let mut remaining: Vec<MethodId> = discovery.to_vec();
    let mut order = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let ready: Vec<MethodId> = remaining
            .iter()
            .copied()
            .filter(|mid| {
                functions[mid]
                    .callees
                    .iter()
                    .all(|c| emitted.contains(c))
            })
            .collect();
        if ready.is_empty() {
            return Err(err(
                "recursive shader functions cannot be emitted in dependency order",
            ));
        }
        for mid in &ready {
            emitted.insert(*mid);
            order.push(*mid);
        }
        remaining.retain(|mid| !emitted.contains(mid));
    }
    Ok(order)
}
