//! Discovery of composite types reachable from a stage and their dependency
//! graph, used later for dependency-ordered struct emission.

use std::collections::{BTreeSet, HashMap};

use glint_il::{FieldFlags, Module, TypeId, TypeKind};

use crate::names::NameResolver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructError {
    pub type_name: String,
    pub message: String,
}

impl std::fmt::Display for StructError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "shader type error (authoring) in {}: {}",
            self.type_name, self.message
        )
    }
}

impl std::error::Error for StructError {}

fn err(type_name: impl Into<String>, message: impl Into<String>) -> StructError {
    StructError {
        type_name: type_name.into(),
        message: message.into(),
    }
}

/// Array dimension of a recorded field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayLen {
    Scalar,
    Fixed(u32),
    /// Runtime-sized; legal only as the trailing field of a buffer resource.
    Runtime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructField {
    pub name: String,
    pub type_name: String,
    pub len: ArrayLen,
}

#[derive(Debug, Clone)]
pub struct StructInfo {
    pub name: String,
    /// Fields in declaration order.
    pub fields: Vec<StructField>,
    /// Composite types this struct contains.
    pub dependencies: BTreeSet<TypeId>,
    /// Composite types containing this struct.
    pub dependents: BTreeSet<TypeId>,
    /// False for types that are referenced but not locally defined
    /// (buffer-resource backing bodies expanded inline at the binding).
    pub define: bool,
}

/// Registry of every composite type discovered while translating one stage.
#[derive(Debug, Default)]
pub struct StructRegistry {
    entries: HashMap<TypeId, StructInfo>,
    /// Discovery order; keeps emission deterministic.
    order: Vec<TypeId>,
}

impl StructRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ty: TypeId) -> Option<&StructInfo> {
        self.entries.get(&ty)
    }

    /// Discovered type ids in discovery order.
    pub fn discovered(&self) -> &[TypeId] {
        &self.order
    }

    /// Registers `ty` and every composite type reachable from its fields.
    ///
    /// Idempotent: once an entry exists the call is a no-op, which also
    /// terminates recursion for self-referential and mutually-referential
    /// structs (the entry is reserved before field recursion).
    pub fn process_type(
        &mut self,
        module: &Module,
        names: &mut NameResolver,
        ty: TypeId,
        shader_ty: TypeId,
        define: bool,
    ) -> Result<(), StructError> {
        let def = module.ty(ty);
        match &def.kind {
            // Primitives and intrinsic shader types are never defined as
            // target-language structs.
            TypeKind::Primitive(_) | TypeKind::Intrinsic { .. } => return Ok(()),
            // Reference types are never struct definitions either; a class
            // used *inside* shader data is rejected at the field below.
            TypeKind::Class => return Ok(()),
            TypeKind::Array { element } => {
                let element = *element;
                return self.process_type(module, names, element, shader_ty, define);
            }
            TypeKind::GenericParam { .. } => {
                return Err(err(
                    def.name.clone(),
                    "unsubstituted generic parameter in shader data",
                ));
            }
            TypeKind::Struct => {}
        }

        if self.entries.contains_key(&ty) {
            return Ok(());
        }

        let struct_name = names
            .type_name(module, ty, shader_ty)
            .map_err(|e| err(def.name.clone(), e.message))?;

        // Reserve the identity before recursing into field types so that
        // containment cycles terminate.
        self.entries.insert(
            ty,
            StructInfo {
                name: struct_name.clone(),
                fields: Vec::new(),
                dependencies: BTreeSet::new(),
                dependents: BTreeSet::new(),
                define,
            },
        );
        self.order.push(ty);

        let field_ids: Vec<_> = def.fields.clone();
        let field_count = field_ids
            .iter()
            .filter(|&&f| {
                let fd = module.field(f);
                fd.flags.contains(FieldFlags::PUBLIC) && !fd.flags.contains(FieldFlags::STATIC)
            })
            .count();

        let mut fields = Vec::new();
        let mut deps = BTreeSet::new();
        for field_id in field_ids {
            let field = module.field(field_id);
            // Only public instance fields participate in layout.
            if !field.flags.contains(FieldFlags::PUBLIC)
                || field.flags.contains(FieldFlags::STATIC)
            {
                continue;
            }

            let (element, len) = if let Some(n) = field.fixed_len {
                // Inline fixed buffers always carry a known positive length;
                // the field type is the element type.
                (field.ty, ArrayLen::Fixed(n))
            } else if let TypeKind::Array { element } = module.ty(field.ty).kind {
                match field.array_len {
                    Some(n) => (element, ArrayLen::Fixed(n)),
                    None => (element, ArrayLen::Runtime),
                }
            } else {
                (field.ty, ArrayLen::Scalar)
            };

            if len == ArrayLen::Runtime {
                // Runtime sizing is a buffer-resource affordance: only the
                // trailing field of a non-defined (inline-expanded) backing
                // body may use it.
                let is_last = fields.len() + 1 == field_count;
                if define || !is_last {
                    return Err(err(
                        struct_name.clone(),
                        format!(
                            "field {} is a dynamically sized array outside the trailing \
                             position of a buffer resource",
                            field.name
                        ),
                    ));
                }
            }

            let element_def = module.ty(element);
            match &element_def.kind {
                TypeKind::GenericParam { .. } => {
                    return Err(err(
                        struct_name.clone(),
                        format!(
                            "array field {} does not resolve to a single concrete element type",
                            field.name
                        ),
                    ));
                }
                TypeKind::Class => {
                    return Err(err(
                        struct_name.clone(),
                        format!(
                            "field {} has reference type {}; shader structures are value types",
                            field.name, element_def.name
                        ),
                    ));
                }
                TypeKind::Array { .. } => {
                    return Err(err(
                        struct_name.clone(),
                        format!("field {} is an array of arrays", field.name),
                    ));
                }
                TypeKind::Struct => {
                    self.process_type(module, names, element, shader_ty, true)?;
                    deps.insert(element);
                }
                TypeKind::Primitive(_) | TypeKind::Intrinsic { .. } => {}
            }

            let type_name = names
                .type_name(module, element, shader_ty)
                .map_err(|e| err(struct_name.clone(), e.message))?;
            let field_name = names
                .field_name(module, field_id, shader_ty)
                .map_err(|e| err(struct_name.clone(), e.message))?;
            fields.push(StructField {
                name: field_name,
                type_name,
                len,
            });
        }

        for &dep in &deps {
            if let Some(dep_entry) = self.entries.get_mut(&dep) {
                dep_entry.dependents.insert(ty);
            }
        }
        let entry = self.entries.get_mut(&ty).expect("entry reserved above");
        entry.fields = fields;
        entry.dependencies = deps;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glint_il::dsl;
    use glint_il::{Binding, FieldDef, TypeDef};

    struct Fixture {
        module: Module,
        core: dsl::CoreTypes,
        shader: TypeId,
    }

    fn fixture() -> Fixture {
        let mut module = Module::new();
        let core = dsl::register(&mut module);
        let shader = module.add_type(TypeDef {
            name: "TestShader".into(),
            namespace: "Glint.Tests".into(),
            declaring_type: None,
            kind: TypeKind::Class,
            generic_args: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        });
        Fixture {
            module,
            core,
            shader,
        }
    }

    fn plain_field(fx: &mut Fixture, owner: TypeId, name: &str, ty: TypeId) {
        fx.module.add_field(FieldDef {
            name: name.into(),
            declaring_type: owner,
            ty,
            flags: FieldFlags::PUBLIC,
            name_override: None,
            fixed_len: None,
            array_len: None,
            binding: Binding::None,
        });
    }

    #[test]
    fn nested_struct_fields_create_dependency_edges() {
        let mut fx = fixture();
        let inner = fx.module.add_type(TypeDef::new_struct("Inner"));
        let vec3 = fx.core.vec3;
        plain_field(&mut fx, inner, "v", vec3);
        let outer = fx.module.add_type(TypeDef::new_struct("Outer"));
        let float_ = fx.core.float_;
        plain_field(&mut fx, outer, "first", float_);
        plain_field(&mut fx, outer, "nested", inner);

        let mut names = NameResolver::new();
        let mut reg = StructRegistry::new();
        reg.process_type(&fx.module, &mut names, outer, fx.shader, true)
            .unwrap();

        let outer_info = reg.get(outer).unwrap();
        assert!(outer_info.dependencies.contains(&inner));
        assert!(reg.get(inner).unwrap().dependents.contains(&outer));
        assert_eq!(outer_info.fields.len(), 2);
        assert_eq!(outer_info.fields[1].type_name, "Inner");
    }

    #[test]
    fn reprocessing_is_a_no_op_and_cycles_terminate() {
        let mut fx = fixture();
        let a = fx.module.add_type(TypeDef::new_struct("A"));
        let b = fx.module.add_type(TypeDef::new_struct("B"));
        plain_field(&mut fx, a, "b", b);
        plain_field(&mut fx, b, "a", a);

        let mut names = NameResolver::new();
        let mut reg = StructRegistry::new();
        reg.process_type(&fx.module, &mut names, a, fx.shader, true)
            .unwrap();
        reg.process_type(&fx.module, &mut names, a, fx.shader, true)
            .unwrap();

        assert_eq!(reg.discovered().len(), 2);
        assert!(reg.get(a).unwrap().dependencies.contains(&b));
        assert!(reg.get(b).unwrap().dependencies.contains(&a));
    }

    #[test]
    fn fixed_buffers_record_their_repetition_count() {
        let mut fx = fixture();
        let s = fx.module.add_type(TypeDef::new_struct("Kernel"));
        fx.module.add_field(FieldDef {
            name: "taps".into(),
            declaring_type: s,
            ty: fx.core.float_,
            flags: FieldFlags::PUBLIC,
            name_override: None,
            fixed_len: Some(9),
            array_len: None,
            binding: Binding::None,
        });

        let mut names = NameResolver::new();
        let mut reg = StructRegistry::new();
        reg.process_type(&fx.module, &mut names, s, fx.shader, true)
            .unwrap();
        assert_eq!(reg.get(s).unwrap().fields[0].len, ArrayLen::Fixed(9));
    }

    #[test]
    fn runtime_arrays_are_rejected_in_plain_structs() {
        let mut fx = fixture();
        let float_array = fx.module.add_type(TypeDef {
            name: "Single[]".into(),
            namespace: String::new(),
            declaring_type: None,
            kind: TypeKind::Array {
                element: fx.core.float_,
            },
            generic_args: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        });
        let s = fx.module.add_type(TypeDef::new_struct("Bad"));
        plain_field(&mut fx, s, "values", float_array);

        let mut names = NameResolver::new();
        let mut reg = StructRegistry::new();
        let e = reg
            .process_type(&fx.module, &mut names, s, fx.shader, true)
            .unwrap_err();
        assert!(e.message.contains("dynamically sized"));
    }

    #[test]
    fn runtime_trailing_array_is_allowed_for_buffer_bodies() {
        let mut fx = fixture();
        let float_array = fx.module.add_type(TypeDef {
            name: "Single[]".into(),
            namespace: String::new(),
            declaring_type: None,
            kind: TypeKind::Array {
                element: fx.core.float_,
            },
            generic_args: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        });
        let s = fx.module.add_type(TypeDef::new_struct("Particles"));
        let uint_ = fx.core.uint_;
        plain_field(&mut fx, s, "count", uint_);
        plain_field(&mut fx, s, "data", float_array);

        let mut names = NameResolver::new();
        let mut reg = StructRegistry::new();
        reg.process_type(&fx.module, &mut names, s, fx.shader, false)
            .unwrap();
        let info = reg.get(s).unwrap();
        assert!(!info.define);
        assert_eq!(info.fields[1].len, ArrayLen::Runtime);
    }

    #[test]
    fn class_typed_fields_are_authoring_errors() {
        let mut fx = fixture();
        let class = fx.module.add_type(TypeDef {
            name: "Texture".into(),
            namespace: "Glint.Render".into(),
            declaring_type: None,
            kind: TypeKind::Class,
            generic_args: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        });
        let s = fx.module.add_type(TypeDef::new_struct("Bad"));
        plain_field(&mut fx, s, "tex", class);

        let mut names = NameResolver::new();
        let mut reg = StructRegistry::new();
        let e = reg
            .process_type(&fx.module, &mut names, s, fx.shader, true)
            .unwrap_err();
        assert!(e.message.contains("reference type"));
    }
}
