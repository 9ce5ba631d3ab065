//! Deterministic mapping from IL types/fields/methods to GLSL identifiers.
//!
//! Resolution is cached per handle for the lifetime of one shader-program
//! transpilation, so every occurrence of a handle within a program resolves
//! to the same string. Caches are never invalidated; a fresh resolver is
//! built per program.

use std::collections::HashMap;

use glint_il::{FieldFlags, FieldId, MethodId, Module, Primitive, TypeId, TypeKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameError {
    pub message: String,
}

impl std::fmt::Display for NameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "name resolution error: {}", self.message)
    }
}

impl std::error::Error for NameError {}

fn err(message: impl Into<String>) -> NameError {
    NameError {
        message: message.into(),
    }
}

pub fn primitive_name(p: Primitive) -> &'static str {
    match p {
        Primitive::Void => "void",
        Primitive::Bool => "bool",
        Primitive::Int32 => "int",
        Primitive::UInt32 => "uint",
        Primitive::Float32 => "float",
        Primitive::Float64 => "double",
    }
}

/// Element-type prefix for intrinsic vector/matrix names (`ivec4`, `dmat3`).
/// `float` is the default element and adds nothing.
fn element_prefix(p: Primitive) -> Result<&'static str, NameError> {
    match p {
        Primitive::Float32 => Ok(""),
        Primitive::Bool => Ok("b"),
        Primitive::Int32 => Ok("i"),
        Primitive::UInt32 => Ok("u"),
        Primitive::Float64 => Ok("d"),
        Primitive::Void => Err(err("void is not a valid element type")),
    }
}

#[derive(Debug, Default)]
pub struct NameResolver {
    types: HashMap<TypeId, String>,
    fields: HashMap<FieldId, String>,
    methods: HashMap<MethodId, String>,
}

impl NameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the GLSL name of `ty` in the context of `shader_ty`.
    pub fn type_name(
        &mut self,
        module: &Module,
        ty: TypeId,
        shader_ty: TypeId,
    ) -> Result<String, NameError> {
        if let Some(name) = self.types.get(&ty) {
            return Ok(name.clone());
        }
        let name = self.resolve_type(module, ty, shader_ty)?;
        self.types.insert(ty, name.clone());
        Ok(name)
    }

    fn resolve_type(
        &mut self,
        module: &Module,
        ty: TypeId,
        shader_ty: TypeId,
    ) -> Result<String, NameError> {
        let def = module.ty(ty);
        match &def.kind {
            TypeKind::Primitive(p) => Ok(primitive_name(*p).to_owned()),
            TypeKind::Intrinsic { glsl } => {
                // A single generic argument selects the element type; the
                // element's one-letter prefix is prepended when it is not the
                // default `float`.
                match def.generic_args.first() {
                    None => Ok(glsl.clone()),
                    Some(&elem) => {
                        let p = module.primitive_of(elem).ok_or_else(|| {
                            err(format!(
                                "intrinsic type {} has a non-primitive element type",
                                def.name
                            ))
                        })?;
                        Ok(format!("{}{}", element_prefix(p)?, glsl))
                    }
                }
            }
            TypeKind::Array { .. } => Err(err(format!(
                "array type {} has no direct target-language name",
                def.name
            ))),
            TypeKind::GenericParam { .. } => Err(err(format!(
                "unsubstituted generic parameter {} reached name resolution",
                def.name
            ))),
            TypeKind::Struct | TypeKind::Class => {
                // Nested-type chain, innermost first, stopping at (and
                // excluding) the shader type. Types not enclosed by the
                // shader type carry their namespace path as a prefix.
                let mut parts = vec![def.name.clone()];
                let mut cursor = def.declaring_type;
                let mut inside_shader = false;
                while let Some(decl) = cursor {
                    if decl == shader_ty {
                        inside_shader = true;
                        break;
                    }
                    let decl_def = module.ty(decl);
                    parts.push(decl_def.name.clone());
                    cursor = decl_def.declaring_type;
                }
                let mut name = if inside_shader || def.namespace.is_empty() {
                    parts.join("_")
                } else {
                    let ns = def.namespace.replace('.', "_");
                    format!("{}_{}", ns, parts.join("_"))
                };
                for &arg in &def.generic_args {
                    let arg_name = self.type_name(module, arg, shader_ty)?;
                    name.push('_');
                    name.push_str(&arg_name);
                }
                Ok(name)
            }
        }
    }

    /// Resolves the GLSL name of `field` in the context of `shader_ty`.
    pub fn field_name(
        &mut self,
        module: &Module,
        field: FieldId,
        shader_ty: TypeId,
    ) -> Result<String, NameError> {
        if let Some(name) = self.fields.get(&field) {
            return Ok(name.clone());
        }
        let def = module.field(field);
        let base = def.name_override.clone().unwrap_or_else(|| def.name.clone());
        let name = if def.flags.contains(FieldFlags::STATIC)
            && def.declaring_type != shader_ty
            && !def.flags.contains(FieldFlags::NO_CLASS_PREFIX)
        {
            let owner = self.type_name(module, def.declaring_type, shader_ty)?;
            format!("{owner}_{base}")
        } else {
            base
        };
        self.fields.insert(field, name.clone());
        Ok(name)
    }

    /// Resolves the GLSL name of `method` in the context of `shader_ty`.
    /// Builtin intrinsics resolve to their fixed target name and are never
    /// mangled.
    pub fn method_name(
        &mut self,
        module: &Module,
        method: MethodId,
        shader_ty: TypeId,
    ) -> Result<String, NameError> {
        if let Some(name) = self.methods.get(&method) {
            return Ok(name.clone());
        }
        let def = module.method(method);
        let name = if let Some(intrinsic) = &def.intrinsic {
            intrinsic.name.clone()
        } else {
            let mut parts = Vec::new();
            if def.declaring_type != shader_ty {
                parts.push(self.type_name(module, def.declaring_type, shader_ty)?);
            }
            parts.push(def.name.clone());
            for &arg in &def.generic_args {
                parts.push(self.type_name(module, arg, shader_ty)?);
            }
            parts.join("_")
        };
        self.methods.insert(method, name.clone());
        Ok(name)
    }
}
