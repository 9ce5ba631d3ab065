//! Per-function instruction-to-GLSL translation.
//!
//! Translation walks one decoded method body with a symbolic evaluation
//! stack of pending expression strings, mirroring the IL operand stack
//! discipline: one push per value-producing instruction, one or more pops
//! per value-consuming instruction. Statements are appended to a flat
//! buffer; branches are recorded for the control-flow pass instead of being
//! emitted. Stage IO, resource and shared-variable declarations are
//! collected as side effects of field loads/stores, each at most once per
//! resolved name.

use std::collections::HashMap;

use glint_il::{
    Binding, FieldFlags, FieldId, Instruction, IntrinsicKind, MethodDef, MethodFlags, MethodId,
    Module, Opcode, Operand, Primitive, ResourceKind, Stage, TypeId, TypeKind,
};

use crate::flow::{self, BranchCond, BranchRecord};
use crate::names::{primitive_name, NameResolver};
use crate::source_map::SourceMap;
use crate::structs::{ArrayLen, StructRegistry};
use crate::{ErrorClass, Options, TranspileError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslateError {
    pub offset: u32,
    pub opcode: Opcode,
    pub class: ErrorClass,
    pub message: String,
}

impl std::fmt::Display for TranslateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "shader translation error ({}) at offset {} ({}): {}",
            self.class,
            self.offset,
            self.opcode.name(),
            self.message
        )
    }
}

impl std::error::Error for TranslateError {}

/// Placeholder expression pushed for the implicit receiver. Field loads
/// through it collapse to the bare field name.
const RECEIVER: &str = "this";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDir {
    In,
    Out,
}

/// One stage input/output variable, keyed by its synthesized name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoField {
    pub name: String,
    pub dir: IoDir,
    pub location: u32,
    pub type_name: String,
    pub flat: bool,
}

/// One discovered resource binding, keyed by resolved field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBinding {
    /// Pre-rendered layout qualifier (`layout(set = 0, binding = 1)` etc.).
    pub layout: String,
    /// Backing type: block body for buffers, opaque type otherwise.
    pub backing: TypeId,
    pub kind: ResourceKind,
    /// Fixed binding-array length, if the resource is an array of bindings.
    pub array_len: Option<u32>,
}

/// One work-group shared variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedVar {
    pub type_name: String,
    pub len: ArrayLen,
}

/// Scratch tables scoped to one stage's transpilation; discarded once the
/// stage source is finalized.
#[derive(Debug, Default)]
pub struct StageState {
    pub structs: StructRegistry,
    /// Stage IO in registration order.
    pub io: Vec<IoField>,
    pub resources: std::collections::BTreeMap<String, ResourceBinding>,
    pub shared: std::collections::BTreeMap<String, SharedVar>,
}

impl StageState {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_io(&mut self, field: IoField) {
        if self.io.iter().all(|f| f.name != field.name) {
            self.io.push(field);
        }
    }

    fn has_io(&self, name: &str) -> bool {
        self.io.iter().any(|f| f.name == name)
    }
}

/// Result of translating one function.
#[derive(Debug, Clone)]
pub struct TranslatedFunction {
    /// Complete function text, signature through closing brace.
    pub text: String,
    /// Distinct non-builtin callees, in first-call order.
    pub callees: Vec<MethodId>,
}

enum RetTarget {
    /// Copy one field of the popped return value into an output variable.
    Field { source: String, alias: String },
    /// Copy the whole popped return value into an output variable.
    Whole { alias: String },
}

pub fn translate_function(
    module: &Module,
    names: &mut NameResolver,
    state: &mut StageState,
    options: &Options,
    shader_ty: TypeId,
    method_id: MethodId,
    is_entry: bool,
) -> Result<TranslatedFunction, TranspileError> {
    let method = module.method(method_id);
    let mut cx = FuncCx {
        module,
        names,
        state,
        options,
        shader_ty,
        method,
        stage: method.entry.map(|e| e.stage),
        is_entry,
        stack: Vec::new(),
        body: String::new(),
        map: SourceMap::new(),
        branches: Vec::new(),
        callees: Vec::new(),
        arg_alias: HashMap::new(),
        input_alias: HashMap::new(),
        outputs: Vec::new(),
    };
    cx.run(method_id)
}

struct FuncCx<'a> {
    module: &'a Module,
    names: &'a mut NameResolver,
    state: &'a mut StageState,
    options: &'a Options,
    shader_ty: TypeId,
    method: &'a MethodDef,
    stage: Option<Stage>,
    is_entry: bool,
    stack: Vec<String>,
    body: String,
    map: SourceMap,
    branches: Vec<BranchRecord>,
    callees: Vec<MethodId>,
    /// Argument slot -> substituted identifier (entrypoint stage bindings).
    arg_alias: HashMap<u16, String>,
    /// (object expression, field) -> stage-input alias.
    input_alias: HashMap<(String, FieldId), String>,
    /// Output copies performed by an entrypoint `ret`.
    outputs: Vec<RetTarget>,
}

impl<'a> FuncCx<'a> {
    fn authoring(&self, inst: &Instruction, message: impl Into<String>) -> TranspileError {
        self.error(inst, ErrorClass::Authoring, message)
    }

    fn unsupported(&self, inst: &Instruction, message: impl Into<String>) -> TranspileError {
        self.error(inst, ErrorClass::Unsupported, message)
    }

    fn internal(&self, inst: &Instruction, message: impl Into<String>) -> TranspileError {
        self.error(inst, ErrorClass::Internal, message)
    }

    fn error(
        &self,
        inst: &Instruction,
        class: ErrorClass,
        message: impl Into<String>,
    ) -> TranspileError {
        TranspileError::Translate(TranslateError {
            offset: inst.offset,
            opcode: inst.opcode,
            class,
            message: message.into(),
        })
    }

    fn pop(&mut self, inst: &Instruction) -> Result<String, TranspileError> {
        self.stack
            .pop()
            .ok_or_else(|| self.internal(inst, "evaluation stack underflow"))
    }

    fn pop_n(&mut self, inst: &Instruction, n: usize) -> Result<Vec<String>, TranspileError> {
        let mut args = Vec::with_capacity(n);
        for _ in 0..n {
            args.push(self.pop(inst)?);
        }
        args.reverse();
        Ok(args)
    }

    fn stmt(&mut self, text: &str) {
        self.body.push_str("  ");
        self.body.push_str(text);
        self.body.push('\n');
    }

    fn type_name(&mut self, inst: &Instruction, ty: TypeId) -> Result<String, TranspileError> {
        self.names
            .type_name(self.module, ty, self.shader_ty)
            .map_err(|e| self.authoring(inst, e.message))
    }

    fn field_name(&mut self, inst: &Instruction, f: FieldId) -> Result<String, TranspileError> {
        self.names
            .field_name(self.module, f, self.shader_ty)
            .map_err(|e| self.authoring(inst, e.message))
    }

    fn process_struct(
        &mut self,
        ty: TypeId,
        define: bool,
    ) -> Result<(), TranspileError> {
        self.state
            .structs
            .process_type(self.module, self.names, ty, self.shader_ty, define)?;
        Ok(())
    }

    /// Wraps `expr` in a constructor-style cast when the destination's
    /// static type is a primitive, guarding against the source instruction
    /// set's implicit widening rules.
    fn cast_to(&self, ty: TypeId, expr: String) -> String {
        match self.module.primitive_of(ty) {
            Some(Primitive::Void) | None => expr,
            Some(p) => format!("{}({})", primitive_name(p), expr),
        }
    }

    fn local_name(i: u16) -> String {
        format!("l{i}")
    }

    fn run(mut self, method_id: MethodId) -> Result<TranslatedFunction, TranspileError> {
        let probe = Instruction::new(Opcode::Nop, Operand::None, 0);
        for p in &self.method.params {
            self.process_struct(p.ty, true)?;
        }
        self.process_struct(self.method.return_type, true)?;
        for &l in &self.method.locals {
            self.process_struct(l, true)?;
        }
        if self.is_entry {
            self.register_entry_io(&probe)?;
        }

        let body_ref = self.method.body.clone();
        for (index, inst) in body_ref.iter().enumerate() {
            self.map.record(inst.offset, index, self.body.len());
            self.translate_inst(inst)?;
        }

        if !self.stack.is_empty() {
            let last = body_ref.last().cloned().unwrap_or(probe);
            return Err(self.internal(
                &last,
                format!(
                    "evaluation stack holds {} values at end of function",
                    self.stack.len()
                ),
            ));
        }

        flow::reconstruct(&mut self.body, &mut self.map, &self.branches)?;

        let mut text = String::new();
        if self.is_entry {
            text.push_str("void main() {\n");
        } else {
            let ret = self.type_name(&probe, self.method.return_type)?;
            let mut sig = format!("{ret} {}(", self.names
                .method_name(self.module, method_id, self.shader_ty)
                .map_err(|e| self.authoring(&probe, e.message))?);
            for (i, p) in self.method.params.iter().enumerate() {
                if i > 0 {
                    sig.push_str(", ");
                }
                let pty = self.type_name(&probe, p.ty)?;
                sig.push_str(&format!("{pty} {}", p.name));
            }
            sig.push_str(") {\n");
            text.push_str(&sig);
        }
        for (i, &l) in self.method.locals.iter().enumerate() {
            if let TypeKind::Array { .. } = self.module.ty(l).kind {
                return Err(self.unsupported(&probe, "array-typed locals are not supported"));
            }
            let lty = self.type_name(&probe, l)?;
            text.push_str(&format!("  {lty} {};\n", Self::local_name(i as u16)));
        }
        text.push_str(&self.body);
        text.push_str("}\n");

        tracing::trace!(method = %self.method.name, "translated shader function");

        Ok(TranslatedFunction {
            text,
            callees: self.callees,
        })
    }

    /// Registers stage inputs from entrypoint parameters and stage outputs
    /// from the return type. Every field with a binding-location annotation
    /// becomes one entry.
    fn register_entry_io(&mut self, probe: &Instruction) -> Result<(), TranspileError> {
        let instance = !self.method.flags.contains(MethodFlags::STATIC);
        let params = self.method.params.clone();
        for (i, p) in params.iter().enumerate() {
            let slot = (i + usize::from(instance)) as u16;
            match &p.binding {
                Binding::Stage(v) => {
                    self.arg_alias.insert(slot, v.glsl_name().to_owned());
                    continue;
                }
                Binding::Location { location, flat } => {
                    let type_name = self.type_name(probe, p.ty)?;
                    let alias = format!("in_{}", p.name);
                    let flat = *flat || self.force_flat(&type_name);
                    self.state.add_io(IoField {
                        name: alias.clone(),
                        dir: IoDir::In,
                        location: *location,
                        type_name,
                        flat,
                    });
                    self.arg_alias.insert(slot, alias);
                    continue;
                }
                Binding::None => {}
                _ => {
                    return Err(self.authoring(
                        probe,
                        format!("entrypoint parameter {} has an invalid binding", p.name),
                    ));
                }
            }
            // Unannotated parameters must be IO structs.
            if !matches!(self.module.ty(p.ty).kind, TypeKind::Struct) {
                return Err(self.authoring(
                    probe,
                    format!(
                        "entrypoint parameter {} requires a binding annotation or an IO struct type",
                        p.name
                    ),
                ));
            }
            for field_id in self.module.ty(p.ty).fields.clone() {
                let field = self.module.field(field_id);
                if !field.flags.contains(FieldFlags::PUBLIC)
                    || field.flags.contains(FieldFlags::STATIC)
                {
                    continue;
                }
                match field.binding.clone() {
                    Binding::Stage(v) => {
                        self.input_alias
                            .insert((p.name.clone(), field_id), v.glsl_name().to_owned());
                    }
                    Binding::Location { location, flat } => {
                        let fname = self.field_name(probe, field_id)?;
                        let type_name = self.type_name(probe, field.ty)?;
                        let alias = format!("in_{fname}");
                        let flat = flat || self.force_flat(&type_name);
                        self.state.add_io(IoField {
                            name: alias.clone(),
                            dir: IoDir::In,
                            location,
                            type_name,
                            flat,
                        });
                        self.input_alias.insert((p.name.clone(), field_id), alias);
                    }
                    _ => {
                        return Err(self.authoring(
                            probe,
                            format!(
                                "stage input field {} requires a location or builtin annotation",
                                field.name
                            ),
                        ));
                    }
                }
            }
        }

        let ret = self.method.return_type;
        match self.module.ty(ret).kind.clone() {
            TypeKind::Primitive(Primitive::Void) => {}
            TypeKind::Struct => {
                for field_id in self.module.ty(ret).fields.clone() {
                    let field = self.module.field(field_id);
                    if !field.flags.contains(FieldFlags::PUBLIC)
                        || field.flags.contains(FieldFlags::STATIC)
                    {
                        continue;
                    }
                    let source = self.field_name(probe, field_id)?;
                    match field.binding.clone() {
                        Binding::Stage(v) => {
                            self.outputs.push(RetTarget::Field {
                                source,
                                alias: v.glsl_name().to_owned(),
                            });
                        }
                        Binding::Location { location, flat } => {
                            let type_name = self.type_name(probe, field.ty)?;
                            let alias = format!("out_{source}");
                            self.state.add_io(IoField {
                                name: alias.clone(),
                                dir: IoDir::Out,
                                location,
                                type_name,
                                flat,
                            });
                            self.outputs.push(RetTarget::Field { source, alias });
                        }
                        _ => {
                            return Err(self.authoring(
                                probe,
                                format!(
                                    "stage output field {} requires a location or builtin \
                                     annotation",
                                    field.name
                                ),
                            ));
                        }
                    }
                }
            }
            TypeKind::Primitive(_) | TypeKind::Intrinsic { .. } => {
                match self.method.return_binding.clone() {
                    Binding::Stage(v) => {
                        self.outputs.push(RetTarget::Whole {
                            alias: v.glsl_name().to_owned(),
                        });
                    }
                    Binding::Location { location, flat } => {
                        let type_name = self.type_name(probe, ret)?;
                        let alias = format!("out{location}");
                        self.state.add_io(IoField {
                            name: alias.clone(),
                            dir: IoDir::Out,
                            location,
                            type_name,
                            flat,
                        });
                        self.outputs.push(RetTarget::Whole { alias });
                    }
                    _ => {
                        return Err(self.authoring(
                            probe,
                            "entrypoint return value requires a binding annotation",
                        ));
                    }
                }
            }
            _ => {
                return Err(self.authoring(probe, "entrypoint return type is not shader data"));
            }
        }
        Ok(())
    }

    /// Integral inter-stage inputs must not be interpolated; force `flat`
    /// on fragment inputs when the option is set.
    fn force_flat(&self, type_name: &str) -> bool {
        self.options.flat_integral_inputs
            && self.stage == Some(Stage::Fragment)
            && (type_name == "int"
                || type_name == "uint"
                || type_name.starts_with("ivec")
                || type_name.starts_with("uvec"))
    }

    fn translate_inst(&mut self, inst: &Instruction) -> Result<(), TranspileError> {
        match inst.opcode {
            Opcode::Nop => Ok(()),

            Opcode::LdArg | Opcode::LdArgA => {
                let slot = self.operand_local(inst)?;
                let instance = !self.method.flags.contains(MethodFlags::STATIC);
                if instance && slot == 0 {
                    self.stack.push(RECEIVER.to_owned());
                    return Ok(());
                }
                if let Some(alias) = self.arg_alias.get(&slot) {
                    self.stack.push(alias.clone());
                    return Ok(());
                }
                let idx = slot as usize - usize::from(instance);
                let p = self
                    .method
                    .params
                    .get(idx)
                    .ok_or_else(|| self.internal(inst, "argument slot out of range"))?;
                self.stack.push(p.name.clone());
                Ok(())
            }

            Opcode::LdLoc | Opcode::LdLocA => {
                let i = self.operand_local(inst)?;
                if usize::from(i) >= self.method.locals.len() {
                    return Err(self.internal(inst, "local slot out of range"));
                }
                self.stack.push(Self::local_name(i));
                Ok(())
            }

            Opcode::StLoc => {
                let i = self.operand_local(inst)?;
                let ty = *self
                    .method
                    .locals
                    .get(usize::from(i))
                    .ok_or_else(|| self.internal(inst, "local slot out of range"))?;
                let value = self.pop(inst)?;
                let value = self.cast_to(ty, value);
                let name = Self::local_name(i);
                self.stmt(&format!("{name} = {value};"));
                Ok(())
            }

            Opcode::LdFld | Opcode::LdFldA => {
                let field = self.operand_field(inst)?;
                let obj = self.pop(inst)?;
                self.load_field(inst, field, Some(obj))
            }
            Opcode::LdsFld | Opcode::LdsFldA => {
                let field = self.operand_field(inst)?;
                self.load_field(inst, field, None)
            }

            Opcode::StFld => {
                let field = self.operand_field(inst)?;
                let value = self.pop(inst)?;
                let obj = self.pop(inst)?;
                self.store_field(inst, field, Some(obj), value)
            }
            Opcode::StsFld => {
                let field = self.operand_field(inst)?;
                let value = self.pop(inst)?;
                self.store_field(inst, field, None, value)
            }

            Opcode::LdElem => {
                let idx = self.pop(inst)?;
                let arr = self.pop(inst)?;
                self.stack.push(format!("{arr}[{idx}]"));
                Ok(())
            }
            Opcode::StElem => {
                let elem = self.operand_type(inst)?;
                let value = self.pop(inst)?;
                let idx = self.pop(inst)?;
                let arr = self.pop(inst)?;
                let value = self.cast_to(elem, value);
                self.stmt(&format!("{arr}[{idx}] = {value};"));
                Ok(())
            }

            Opcode::LdcI4 => {
                let v = self.operand_int(inst)?;
                self.stack.push(v.to_string());
                Ok(())
            }
            Opcode::LdcR4 => {
                let v = self.operand_float(inst)?;
                self.stack.push(format_f32(v));
                Ok(())
            }
            Opcode::LdStr => {
                Err(self.authoring(inst, "shader code may not contain string literals"))
            }

            Opcode::Dup => {
                let top = self
                    .stack
                    .last()
                    .cloned()
                    .ok_or_else(|| self.internal(inst, "evaluation stack underflow"))?;
                self.stack.push(top);
                Ok(())
            }
            Opcode::Pop => {
                let e = self.pop(inst)?;
                self.stmt(&format!("{e};"));
                Ok(())
            }

            Opcode::Add => self.binary(inst, "+"),
            Opcode::Sub => self.binary(inst, "-"),
            Opcode::Mul => self.binary(inst, "*"),
            Opcode::Div => self.binary(inst, "/"),
            Opcode::Rem => self.binary(inst, "%"),
            Opcode::And => self.binary(inst, "&"),
            Opcode::Or => self.binary(inst, "|"),
            Opcode::Xor => self.binary(inst, "^"),
            Opcode::Shl => self.binary(inst, "<<"),
            Opcode::Shr => self.binary(inst, ">>"),
            Opcode::Cgt => self.binary(inst, ">"),
            Opcode::Clt => self.binary(inst, "<"),

            Opcode::Neg => {
                let e = self.pop(inst)?;
                self.stack.push(format!("(-{e})"));
                Ok(())
            }
            Opcode::Not => {
                let e = self.pop(inst)?;
                self.stack.push(format!("(~{e})"));
                Ok(())
            }

            Opcode::Ceq => {
                let mut b = self.pop(inst)?;
                let mut a = self.pop(inst)?;
                // The source instruction set lowers boolean comparisons to
                // integer compares against 0/1; rewrite the literal back to
                // a boolean when the other side is already relational.
                if let Some(lit) = bool_literal_rewrite(&a, &b) {
                    b = lit.to_owned();
                } else if let Some(lit) = bool_literal_rewrite(&b, &a) {
                    a = lit.to_owned();
                }
                self.stack.push(format!("({a} == {b})"));
                Ok(())
            }

            Opcode::Conv => {
                let ty = self.operand_type(inst)?;
                let p = match self.module.primitive_of(ty) {
                    Some(Primitive::Void) | None => {
                        return Err(
                            self.unsupported(inst, "conversion target is not a primitive type")
                        )
                    }
                    Some(p) => p,
                };
                let e = self.pop(inst)?;
                self.stack.push(format!("{}({e})", primitive_name(p)));
                Ok(())
            }

            Opcode::Br => {
                let target = self.operand_target(inst)?;
                self.branches.push(BranchRecord {
                    offset: inst.offset,
                    target,
                    cond: BranchCond::Always,
                    expr: None,
                });
                Ok(())
            }
            Opcode::BrTrue | Opcode::BrFalse => {
                let target = self.operand_target(inst)?;
                let expr = self.pop(inst)?;
                let cond = if inst.opcode == Opcode::BrTrue {
                    BranchCond::IfTrue
                } else {
                    BranchCond::IfFalse
                };
                self.branches.push(BranchRecord {
                    offset: inst.offset,
                    target,
                    cond,
                    expr: Some(expr),
                });
                Ok(())
            }
            Opcode::Switch => {
                Err(self.unsupported(inst, "multi-way branches are not supported in shader code"))
            }

            Opcode::Call => {
                let callee = self.operand_method(inst)?;
                self.call(inst, callee)
            }
            Opcode::NewObj => {
                let ctor = self.operand_method(inst)?;
                self.construct(inst, ctor)
            }

            Opcode::Ret => self.ret(inst),
        }
    }

    fn binary(&mut self, inst: &Instruction, op: &str) -> Result<(), TranspileError> {
        let b = self.pop(inst)?;
        let a = self.pop(inst)?;
        self.stack.push(format!("({a} {op} {b})"));
        Ok(())
    }

    fn load_field(
        &mut self,
        inst: &Instruction,
        field_id: FieldId,
        obj: Option<String>,
    ) -> Result<(), TranspileError> {
        let field = self.module.field(field_id).clone();

        if let Some(obj_expr) = &obj {
            if let Some(alias) = self.input_alias.get(&(obj_expr.clone(), field_id)) {
                self.stack.push(alias.clone());
                return Ok(());
            }
        }

        let shader_scoped =
            field.declaring_type == self.shader_ty || field.flags.contains(FieldFlags::STATIC);
        if shader_scoped {
            let name = self.field_name(inst, field_id)?;
            match field.binding.clone() {
                Binding::Stage(v) => {
                    self.stack.push(v.glsl_name().to_owned());
                }
                Binding::Shared => {
                    self.ensure_shared(inst, &name, &field)?;
                    self.stack.push(name);
                }
                Binding::Resource {
                    kind,
                    set,
                    binding,
                    array_len,
                    push_constant,
                } => {
                    self.ensure_resource(
                        inst,
                        &name,
                        &field,
                        kind,
                        set,
                        binding,
                        array_len,
                        push_constant,
                    )?;
                    self.stack.push(name);
                }
                Binding::Location { location, flat } => {
                    if !self.state.has_io(&name) {
                        let type_name = self.type_name(inst, field.ty)?;
                        let flat = flat || self.force_flat(&type_name);
                        self.state.add_io(IoField {
                            name: name.clone(),
                            dir: IoDir::In,
                            location,
                            type_name,
                            flat,
                        });
                    }
                    self.stack.push(name);
                }
                Binding::None => {
                    return Err(self.authoring(
                        inst,
                        format!("shader-scoped field {} requires a binding annotation", field.name),
                    ));
                }
            }
            return Ok(());
        }

        // Ordinary structural member access.
        let name = self.field_name(inst, field_id)?;
        match obj {
            Some(o) if o == RECEIVER => self.stack.push(name),
            Some(o) => self.stack.push(format!("{o}.{name}")),
            None => return Err(self.internal(inst, "static load reached member access path")),
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn ensure_resource(
        &mut self,
        inst: &Instruction,
        name: &str,
        field: &glint_il::FieldDef,
        kind: ResourceKind,
        set: u32,
        binding: u32,
        array_len: Option<u32>,
        push_constant: bool,
    ) -> Result<(), TranspileError> {
        if self.state.resources.contains_key(name) {
            return Ok(());
        }
        let backing = match self.module.ty(field.ty).kind {
            TypeKind::Array { element } => {
                if array_len.is_none() {
                    return Err(self.authoring(
                        inst,
                        format!("resource array {} requires an explicit length", field.name),
                    ));
                }
                element
            }
            _ => field.ty,
        };
        let buffer_backed = push_constant
            || matches!(kind, ResourceKind::Uniform | ResourceKind::Storage);
        if buffer_backed {
            // Buffer bodies are expanded inline at the binding; the backing
            // struct is referenced but not locally defined.
            self.process_struct(backing, false)?;
        }
        let layout = if push_constant {
            "layout(push_constant)".to_owned()
        } else {
            match kind {
                ResourceKind::Uniform => {
                    format!("layout(std140, set = {set}, binding = {binding})")
                }
                ResourceKind::Storage => {
                    format!("layout(std430, set = {set}, binding = {binding})")
                }
                // Storage images carry a format qualifier; the engine's
                // image resources are rgba32f.
                ResourceKind::Image => {
                    format!("layout(set = {set}, binding = {binding}, rgba32f)")
                }
                ResourceKind::Sampler | ResourceKind::CombinedImageSampler => {
                    format!("layout(set = {set}, binding = {binding})")
                }
            }
        };
        self.state.resources.insert(
            name.to_owned(),
            ResourceBinding {
                layout,
                backing,
                kind,
                array_len,
            },
        );
        Ok(())
    }

    fn ensure_shared(
        &mut self,
        inst: &Instruction,
        name: &str,
        field: &glint_il::FieldDef,
    ) -> Result<(), TranspileError> {
        if self.state.shared.contains_key(name) {
            return Ok(());
        }
        let (element, len) = if let Some(n) = field.fixed_len {
            (field.ty, ArrayLen::Fixed(n))
        } else if let TypeKind::Array { element } = self.module.ty(field.ty).kind {
            match field.array_len {
                Some(n) => (element, ArrayLen::Fixed(n)),
                None => {
                    return Err(self.authoring(
                        inst,
                        format!("shared array {} requires an explicit length", field.name),
                    ))
                }
            }
        } else {
            (field.ty, ArrayLen::Scalar)
        };
        self.process_struct(element, true)?;
        let type_name = self.type_name(inst, element)?;
        self.state
            .shared
            .insert(name.to_owned(), SharedVar { type_name, len });
        Ok(())
    }

    fn store_field(
        &mut self,
        inst: &Instruction,
        field_id: FieldId,
        obj: Option<String>,
        value: String,
    ) -> Result<(), TranspileError> {
        let field = self.module.field(field_id).clone();

        if let Some(obj_expr) = &obj {
            if self
                .input_alias
                .contains_key(&(obj_expr.clone(), field_id))
            {
                return Err(self.authoring(inst, "cannot assign to a stage input"));
            }
        }

        let shader_scoped =
            field.declaring_type == self.shader_ty || field.flags.contains(FieldFlags::STATIC);
        if shader_scoped {
            let name = self.field_name(inst, field_id)?;
            match field.binding.clone() {
                Binding::Stage(v) => {
                    self.stmt(&format!("{} = {value};", v.glsl_name()));
                }
                Binding::Shared => {
                    self.ensure_shared(inst, &name, &field)?;
                    let value = self.cast_to(field.ty, value);
                    self.stmt(&format!("{name} = {value};"));
                }
                Binding::Location { location, flat } => {
                    if !self.state.has_io(&name) {
                        let type_name = self.type_name(inst, field.ty)?;
                        self.state.add_io(IoField {
                            name: name.clone(),
                            dir: IoDir::Out,
                            location,
                            type_name,
                            flat,
                        });
                    }
                    let value = self.cast_to(field.ty, value);
                    self.stmt(&format!("{name} = {value};"));
                }
                Binding::Resource { .. } => {
                    return Err(self.authoring(
                        inst,
                        format!("cannot assign directly to resource binding {}", field.name),
                    ));
                }
                Binding::None => {
                    return Err(self.authoring(
                        inst,
                        format!("shader-scoped field {} requires a binding annotation", field.name),
                    ));
                }
            }
            return Ok(());
        }

        let name = self.field_name(inst, field_id)?;
        let value = self.cast_to(field.ty, value);
        match obj {
            Some(o) if o == RECEIVER => self.stmt(&format!("{name} = {value};")),
            Some(o) => self.stmt(&format!("{o}.{name} = {value};")),
            None => return Err(self.internal(inst, "static store reached member access path")),
        }
        Ok(())
    }

    fn call(&mut self, inst: &Instruction, callee_id: MethodId) -> Result<(), TranspileError> {
        let callee = self.module.method(callee_id).clone();
        let instance = !callee.flags.contains(MethodFlags::STATIC);
        let argc = callee.params.len();
        let returns_value = self.module.primitive_of(callee.return_type) != Some(Primitive::Void);

        if let Some(intrinsic) = &callee.intrinsic {
            match intrinsic.kind {
                IntrinsicKind::BinaryOp => {
                    let b = self.pop(inst)?;
                    let a = self.pop(inst)?;
                    self.stack.push(format!("({a} {} {b})", intrinsic.name));
                }
                IntrinsicKind::UnaryOp => {
                    let a = self.pop(inst)?;
                    self.stack.push(format!("({}{a})", intrinsic.name));
                }
                IntrinsicKind::Index => {
                    if returns_value {
                        let idx = self.pop(inst)?;
                        let recv = self.pop(inst)?;
                        self.stack.push(format!("{recv}[{idx}]"));
                    } else {
                        // Indexer used as an assignment target.
                        let value = self.pop(inst)?;
                        let idx = self.pop(inst)?;
                        let recv = self.pop(inst)?;
                        self.stmt(&format!("{recv}[{idx}] = {value};"));
                    }
                }
                IntrinsicKind::Keyword => {
                    self.stmt(&format!("{};", intrinsic.name));
                }
                IntrinsicKind::Call => {
                    let mut args = self.pop_n(inst, argc)?;
                    if instance {
                        // Builtin instance methods take the receiver as
                        // their first argument.
                        let recv = self.pop(inst)?;
                        args.insert(0, recv);
                    }
                    let expr = format!("{}({})", intrinsic.name, args.join(", "));
                    if returns_value {
                        self.stack.push(expr);
                    } else {
                        self.stmt(&format!("{expr};"));
                    }
                }
            }
            return Ok(());
        }

        let args = self.pop_n(inst, argc)?;
        if instance {
            let recv = self.pop(inst)?;
            if recv != RECEIVER || callee.declaring_type != self.shader_ty {
                return Err(self.authoring(
                    inst,
                    format!(
                        "instance method {} called outside the shader type's own method set",
                        callee.name
                    ),
                ));
            }
        }
        if !self.callees.contains(&callee_id) {
            self.callees.push(callee_id);
        }
        let name = self
            .names
            .method_name(self.module, callee_id, self.shader_ty)
            .map_err(|e| self.authoring(inst, e.message))?;
        let expr = format!("{name}({})", args.join(", "));
        if returns_value {
            self.stack.push(expr);
        } else {
            self.stmt(&format!("{expr};"));
        }
        Ok(())
    }

    fn construct(&mut self, inst: &Instruction, ctor_id: MethodId) -> Result<(), TranspileError> {
        let ctor = self.module.method(ctor_id).clone();
        let target = ctor.declaring_type;
        if !self.module.is_value_type(target) {
            return Err(self.authoring(
                inst,
                format!(
                    "non-instantiable type {} used as a constructor target",
                    self.module.ty(target).name
                ),
            ));
        }
        if matches!(self.module.ty(target).kind, TypeKind::Struct) {
            self.process_struct(target, true)?;
        }
        let args = self.pop_n(inst, ctor.params.len())?;
        let name = self.type_name(inst, target)?;
        self.stack.push(format!("{name}({})", args.join(", ")));
        Ok(())
    }

    fn ret(&mut self, inst: &Instruction) -> Result<(), TranspileError> {
        let returns_value =
            self.module.primitive_of(self.method.return_type) != Some(Primitive::Void);
        if self.is_entry {
            if !returns_value {
                return Ok(());
            }
            let value = self.pop(inst)?;
            let copies: Vec<String> = self
                .outputs
                .iter()
                .map(|t| match t {
                    RetTarget::Field { source, alias } => {
                        format!("{alias} = {value}.{source};")
                    }
                    RetTarget::Whole { alias } => format!("{alias} = {value};"),
                })
                .collect();
            for c in copies {
                self.stmt(&c);
            }
            return Ok(());
        }
        if returns_value {
            let value = self.pop(inst)?;
            self.stmt(&format!("return {value};"));
        } else {
            self.stmt("return;");
        }
        Ok(())
    }

    fn operand_local(&self, inst: &Instruction) -> Result<u16, TranspileError> {
        match inst.operand {
            Operand::Local(i) => Ok(i),
            _ => Err(self.internal(inst, "expected a slot-index operand")),
        }
    }

    fn operand_field(&self, inst: &Instruction) -> Result<FieldId, TranspileError> {
        match inst.operand {
            Operand::Field(f) => Ok(f),
            _ => Err(self.internal(inst, "expected a field operand")),
        }
    }

    fn operand_method(&self, inst: &Instruction) -> Result<MethodId, TranspileError> {
        match inst.operand {
            Operand::Method(m) => Ok(m),
            _ => Err(self.internal(inst, "expected a method operand")),
        }
    }

    fn operand_type(&self, inst: &Instruction) -> Result<TypeId, TranspileError> {
        match inst.operand {
            Operand::Type(t) => Ok(t),
            _ => Err(self.internal(inst, "expected a type operand")),
        }
    }

    fn operand_target(&self, inst: &Instruction) -> Result<u32, TranspileError> {
        match inst.operand {
            Operand::Target(t) => Ok(t),
            _ => Err(self.internal(inst, "expected a branch-target operand")),
        }
    }

    fn operand_int(&self, inst: &Instruction) -> Result<i64, TranspileError> {
        match inst.operand {
            Operand::Int(v) => Ok(v),
            _ => Err(self.internal(inst, "expected an integer operand")),
        }
    }

    fn operand_float(&self, inst: &Instruction) -> Result<f32, TranspileError> {
        match inst.operand {
            Operand::Float(v) => Ok(v),
            _ => Err(self.internal(inst, "expected a float operand")),
        }
    }
}

/// Rewrites a `0`/`1` literal compared against an already-relational
/// expression into `false`/`true`.
fn bool_literal_rewrite(other: &str, lit: &str) -> Option<&'static str> {
    if lit != "0" && lit != "1" {
        return None;
    }
    let relational = ["<", ">", "==", "!="].iter().any(|op| other.contains(op));
    if !relational {
        return None;
    }
    Some(if lit == "0" { "false" } else { "true" })
}

/// Formats a float with an explicit decimal point so generated code is
/// unambiguous and stable for tests.
pub(crate) fn format_f32(v: f32) -> String {
    let mut s = format!("{v:.8}");
    if let Some(dot) = s.find('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.len() == dot + 1 {
            s.push('0');
        }
    }
    s
}
