//! Registration of the shader-authoring DSL core library.
//!
//! Every embedder sees the same fixed set of primitive shader types
//! (vectors, matrices, samplers, images) and builtin methods, so the model
//! for them is built here rather than decoded from metadata. Builtin methods
//! carry an [`Intrinsic`] marker and no body; their emitted names come from
//! the target dialect and are never mangled.

use crate::model::{
    Binding, FieldDef, FieldFlags, FieldId, Intrinsic, IntrinsicKind, MethodDef, MethodFlags,
    MethodId, Module, ParamDef, Primitive, TypeDef, TypeId, TypeKind,
};

/// Well-known ids of the DSL core library inside a [`Module`].
#[derive(Debug, Clone, Copy)]
pub struct CoreTypes {
    /// `System.Void`.
    pub void_: TypeId,
    /// `System.Boolean`.
    pub bool_: TypeId,
    /// `System.Int32`.
    pub int_: TypeId,
    /// `System.UInt32`.
    pub uint_: TypeId,
    /// `System.Single`.
    pub float_: TypeId,
    /// `System.Double`.
    pub double_: TypeId,
    /// Two-component float vector.
    pub vec2: TypeId,
    /// Three-component float vector.
    pub vec3: TypeId,
    /// Four-component float vector.
    pub vec4: TypeId,
    /// Two-component signed-integer vector.
    pub ivec2: TypeId,
    /// Three-component unsigned-integer vector.
    pub uvec3: TypeId,
    /// 2x2 float matrix.
    pub mat2: TypeId,
    /// 3x3 float matrix.
    pub mat3: TypeId,
    /// 4x4 float matrix.
    pub mat4: TypeId,
    /// Combined 2D image/sampler.
    pub sampler2d: TypeId,
    /// Combined cube image/sampler.
    pub sampler_cube: TypeId,
    /// 2D storage image.
    pub image2d: TypeId,
    /// Static class carrying free-standing intrinsics (`Min`, `Barrier`, ...).
    pub intrinsics: TypeId,
}

const DSL_NAMESPACE: &str = "Glint.Shading";

fn primitive(module: &mut Module, name: &str, p: Primitive) -> TypeId {
    module.add_type(TypeDef {
        name: name.into(),
        namespace: "System".into(),
        declaring_type: None,
        kind: TypeKind::Primitive(p),
        generic_args: Vec::new(),
        fields: Vec::new(),
        methods: Vec::new(),
    })
}

fn intrinsic_type(module: &mut Module, name: &str, glsl: &str) -> TypeId {
    module.add_type(TypeDef {
        name: name.into(),
        namespace: DSL_NAMESPACE.into(),
        declaring_type: None,
        kind: TypeKind::Intrinsic { glsl: glsl.into() },
        generic_args: Vec::new(),
        fields: Vec::new(),
        methods: Vec::new(),
    })
}

#[allow(clippy::too_many_arguments)]
fn builtin(
    module: &mut Module,
    declaring: TypeId,
    name: &str,
    flags: MethodFlags,
    params: &[TypeId],
    ret: TypeId,
    glsl: &str,
    kind: IntrinsicKind,
) {
    const PARAM_NAMES: [&str; 4] = ["a", "b", "c", "d"];
    let params = params
        .iter()
        .enumerate()
        .map(|(i, &ty)| ParamDef {
            name: PARAM_NAMES[i].into(),
            ty,
            binding: Binding::None,
        })
        .collect();
    module.add_method(MethodDef {
        name: name.into(),
        declaring_type: declaring,
        flags,
        params,
        return_type: ret,
        return_binding: Binding::None,
        locals: Vec::new(),
        generic_args: Vec::new(),
        intrinsic: Some(Intrinsic {
            name: glsl.into(),
            kind,
        }),
        entry: None,
        body: Vec::new(),
    });
}

/// Registers the DSL core library into `module` and returns the well-known
/// ids. Expected to run once, before any user declarations, so that core ids
/// are stable.
pub fn register(module: &mut Module) -> CoreTypes {
    use IntrinsicKind::{BinaryOp, Call, Index, Keyword};

    let void_ = primitive(module, "Void", Primitive::Void);
    let bool_ = primitive(module, "Boolean", Primitive::Bool);
    let int_ = primitive(module, "Int32", Primitive::Int32);
    let uint_ = primitive(module, "UInt32", Primitive::UInt32);
    let float_ = primitive(module, "Single", Primitive::Float32);
    let double_ = primitive(module, "Double", Primitive::Float64);

    let vec2 = intrinsic_type(module, "Vec2", "vec2");
    let vec3 = intrinsic_type(module, "Vec3", "vec3");
    let vec4 = intrinsic_type(module, "Vec4", "vec4");
    let ivec2 = module.instantiate(vec2, vec![int_]);
    let uvec3 = module.instantiate(vec3, vec![uint_]);
    let mat2 = intrinsic_type(module, "Mat2", "mat2");
    let mat3 = intrinsic_type(module, "Mat3", "mat3");
    let mat4 = intrinsic_type(module, "Mat4", "mat4");
    let sampler2d = intrinsic_type(module, "Sampler2D", "sampler2D");
    let sampler_cube = intrinsic_type(module, "SamplerCube", "samplerCube");
    let image2d = intrinsic_type(module, "Image2D", "image2D");

    let stat = MethodFlags::STATIC;
    let inst = MethodFlags::empty();

    // Component accessors are modeled as plain instance fields; translation
    // renders them as member accesses.
    for (vec, lanes) in [(vec2, 2usize), (vec3, 3), (vec4, 4)] {
        for component in ["x", "y", "z", "w"].iter().take(lanes) {
            module.add_field(FieldDef {
                name: (*component).into(),
                declaring_type: vec,
                ty: float_,
                flags: FieldFlags::PUBLIC,
                name_override: None,
                fixed_len: None,
                array_len: None,
                binding: Binding::None,
            });
        }
    }

    for (vec, lanes) in [(vec2, 2usize), (vec3, 3), (vec4, 4)] {
        builtin(module, vec, "op_Addition", stat, &[vec, vec], vec, "+", BinaryOp);
        builtin(module, vec, "op_Subtraction", stat, &[vec, vec], vec, "-", BinaryOp);
        builtin(module, vec, "op_Multiply", stat, &[vec, vec], vec, "*", BinaryOp);
        builtin(module, vec, "op_Division", stat, &[vec, vec], vec, "/", BinaryOp);
        builtin(module, vec, "get_Item", inst, &[int_], float_, "", Index);
        builtin(module, vec, "set_Item", inst, &[int_, float_], void_, "", Index);
        let ctor_params = vec![float_; lanes];
        builtin(module, vec, ".ctor", inst, &ctor_params, void_, "", Call);
        builtin(module, vec, "Dot", inst, &[vec], float_, "dot", Call);
        builtin(module, vec, "Normalized", inst, &[], vec, "normalize", Call);
        builtin(module, vec, "Length", inst, &[], float_, "length", Call);
    }
    builtin(module, vec3, "Cross", inst, &[vec3], vec3, "cross", Call);
    // The signed-integer instantiation gets its own constructor; it predates
    // the float builtins above, so its cloned method list starts empty.
    builtin(module, ivec2, ".ctor", inst, &[int_, int_], void_, "", Call);

    for (mat, vec) in [(mat2, vec2), (mat3, vec3), (mat4, vec4)] {
        builtin(module, mat, "op_Multiply", stat, &[mat, vec], vec, "*", BinaryOp);
    }

    builtin(module, sampler2d, "Sample", inst, &[vec2], vec4, "texture", Call);
    builtin(
        module,
        sampler2d,
        "SampleLod",
        inst,
        &[vec2, float_],
        vec4,
        "textureLod",
        Call,
    );
    builtin(module, sampler_cube, "Sample", inst, &[vec3], vec4, "texture", Call);
    builtin(module, image2d, "Load", inst, &[ivec2], vec4, "imageLoad", Call);
    builtin(
        module,
        image2d,
        "Store",
        inst,
        &[ivec2, vec4],
        void_,
        "imageStore",
        Call,
    );

    // Free-standing intrinsics live on a static class; its name never leaks
    // into emitted source because intrinsic names are used verbatim.
    let ops = module.add_type(TypeDef {
        name: "ShaderIntrinsics".into(),
        namespace: DSL_NAMESPACE.into(),
        declaring_type: None,
        kind: TypeKind::Class,
        generic_args: Vec::new(),
        fields: Vec::new(),
        methods: Vec::new(),
    });
    for (name, glsl, arity) in [
        ("Min", "min", 2usize),
        ("Max", "max", 2),
        ("Clamp", "clamp", 3),
        ("Mix", "mix", 3),
        ("Pow", "pow", 2),
        ("Sqrt", "sqrt", 1),
        ("Abs", "abs", 1),
        ("Floor", "floor", 1),
        ("Fract", "fract", 1),
        ("Sin", "sin", 1),
        ("Cos", "cos", 1),
    ] {
        let params = vec![float_; arity];
        builtin(module, ops, name, stat, &params, float_, glsl, Call);
    }
    builtin(module, ops, "Barrier", stat, &[], void_, "barrier", Call);
    builtin(module, ops, "Discard", stat, &[], void_, "discard", Keyword);

    CoreTypes {
        intrinsics: ops,
        void_,
        bool_,
        int_,
        uint_,
        float_,
        double_,
        vec2,
        vec3,
        vec4,
        ivec2,
        uvec3,
        mat2,
        mat3,
        mat4,
        sampler2d,
        sampler_cube,
        image2d,
    }
}

impl Module {
    /// Finds a declared method of `ty` by name. Builtin registration keeps
    /// one method per name per type, so a name is unambiguous here.
    pub fn find_method(&self, ty: TypeId, name: &str) -> Option<MethodId> {
        self.ty(ty)
            .methods
            .iter()
            .copied()
            .find(|&m| self.method(m).name == name)
    }

    /// Finds a declared field of `ty` by name.
    pub fn find_field(&self, ty: TypeId, name: &str) -> Option<FieldId> {
        self.ty(ty)
            .fields
            .iter()
            .copied()
            .find(|&f| self.field(f).name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IntrinsicKind;

    #[test]
    fn core_registration_is_self_consistent() {
        let mut m = Module::new();
        let core = register(&mut m);

        assert_eq!(m.primitive_of(core.float_), Some(Primitive::Float32));
        assert_eq!(m.ty(core.ivec2).generic_args, vec![core.int_]);

        let add = m.find_method(core.vec4, "op_Addition").unwrap();
        let add = m.method(add);
        assert_eq!(add.params.len(), 2);
        assert_eq!(add.intrinsic.as_ref().unwrap().name, "+");
        assert_eq!(add.intrinsic.as_ref().unwrap().kind, IntrinsicKind::BinaryOp);

        let dot = m.find_method(core.vec3, "Dot").unwrap();
        assert!(!m.method(dot).flags.contains(MethodFlags::STATIC));

        let ctor = m.find_method(core.vec4, ".ctor").unwrap();
        assert_eq!(m.method(ctor).params.len(), 4);
    }
}
