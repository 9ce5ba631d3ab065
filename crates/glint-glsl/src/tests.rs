use pretty_assertions::assert_eq;

use glint_il::dsl::{self, CoreTypes};
use glint_il::{
    Binding, FieldDef, FieldFlags, FieldId, Instruction, MethodDef, MethodFlags, MethodId, Module,
    Opcode, Operand, ParamDef, ResourceKind, Stage, StageEntry, StageVar, TypeDef, TypeId,
    TypeKind,
};

use crate::{ErrorClass, Options, TranspileError, Transpiler, ENTRY_POINT};

/// Builds a shader-defining class plus the DSL core library, mirroring what
/// the metadata front end hands the transpiler.
struct ShaderBuilder {
    module: Module,
    core: CoreTypes,
    shader: TypeId,
}

impl ShaderBuilder {
    fn new() -> Self {
        let mut module = Module::new();
        let core = dsl::register(&mut module);
        let shader = module.add_type(TypeDef {
            name: "SpriteShader".into(),
            namespace: "Glint.Render".into(),
            declaring_type: None,
            kind: TypeKind::Class,
            generic_args: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        });
        Self {
            module,
            core,
            shader,
        }
    }

    fn nested_struct(&mut self, name: &str, fields: &[(&str, TypeId, Binding)]) -> TypeId {
        let mut def = TypeDef::new_struct(name);
        def.declaring_type = Some(self.shader);
        let ty = self.module.add_type(def);
        for (fname, fty, binding) in fields {
            self.module.add_field(FieldDef {
                name: (*fname).into(),
                declaring_type: ty,
                ty: *fty,
                flags: FieldFlags::PUBLIC,
                name_override: None,
                fixed_len: None,
                array_len: None,
                binding: binding.clone(),
            });
        }
        ty
    }

    fn static_field(&mut self, name: &str, ty: TypeId, binding: Binding) -> FieldId {
        self.module.add_field(FieldDef {
            name: name.into(),
            declaring_type: self.shader,
            ty,
            flags: FieldFlags::STATIC | FieldFlags::PUBLIC,
            name_override: None,
            fixed_len: None,
            array_len: None,
            binding,
        })
    }

    fn method(
        &mut self,
        name: &str,
        params: Vec<ParamDef>,
        return_type: TypeId,
        return_binding: Binding,
        locals: Vec<TypeId>,
        entry: Option<StageEntry>,
        body: Vec<Instruction>,
    ) -> MethodId {
        self.module.add_method(MethodDef {
            name: name.into(),
            declaring_type: self.shader,
            flags: MethodFlags::STATIC,
            params,
            return_type,
            return_binding,
            locals,
            generic_args: Vec::new(),
            intrinsic: None,
            entry,
            body,
        })
    }

    fn transpile(&self, entry: MethodId) -> Result<crate::TranspiledStage, TranspileError> {
        Transpiler::new(&self.module, Options::default()).transpile_stage(self.shader, entry)
    }

    fn array_of(&mut self, element: TypeId) -> TypeId {
        self.module.add_type(TypeDef {
            name: format!("{}[]", self.module.ty(element).name),
            namespace: String::new(),
            declaring_type: None,
            kind: TypeKind::Array { element },
            generic_args: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        })
    }
}

fn param(name: &str, ty: TypeId) -> ParamDef {
    ParamDef {
        name: name.into(),
        ty,
        binding: Binding::None,
    }
}

fn body(insts: Vec<(Opcode, Operand)>) -> Vec<Instruction> {
    insts
        .into_iter()
        .enumerate()
        .map(|(i, (opcode, operand))| Instruction::new(opcode, operand, i as u32))
        .collect()
}

fn location(location: u32) -> Binding {
    Binding::Location {
        location,
        flat: false,
    }
}

fn uniform(set: u32, binding: u32) -> Binding {
    Binding::Resource {
        kind: ResourceKind::Uniform,
        set,
        binding,
        array_len: None,
        push_constant: false,
    }
}

fn vertex_entry() -> Option<StageEntry> {
    Some(StageEntry {
        stage: Stage::Vertex,
        local_size: None,
    })
}

fn fragment_entry() -> Option<StageEntry> {
    Some(StageEntry {
        stage: Stage::Fragment,
        local_size: None,
    })
}

fn compute_entry(size: [u32; 3]) -> Option<StageEntry> {
    Some(StageEntry {
        stage: Stage::Compute,
        local_size: Some(size),
    })
}

/// Vertex passthrough: transformed position into `gl_Position`, one varying,
/// one uniform block.
fn build_vertex_shader(b: &mut ShaderBuilder) -> MethodId {
    let vs_in = b.nested_struct(
        "VsIn",
        &[
            ("pos", b.core.vec3, location(0)),
            ("uv", b.core.vec2, location(1)),
        ],
    );
    let vs_out = b.nested_struct(
        "VsOut",
        &[
            ("clip", b.core.vec4, Binding::Stage(StageVar::Position)),
            ("uv", b.core.vec2, location(0)),
        ],
    );
    let globals = b.nested_struct(
        "GlobalData",
        &[
            ("mvp", b.core.mat4, Binding::None),
            ("tint", b.core.vec4, Binding::None),
        ],
    );
    let globals_field = b.static_field("Globals", globals, uniform(0, 0));

    let m = &b.module;
    let pos = m.find_field(vs_in, "pos").unwrap();
    let uv_in = m.find_field(vs_in, "uv").unwrap();
    let clip = m.find_field(vs_out, "clip").unwrap();
    let uv_out = m.find_field(vs_out, "uv").unwrap();
    let mvp = m.find_field(globals, "mvp").unwrap();
    let x = m.find_field(b.core.vec3, "x").unwrap();
    let y = m.find_field(b.core.vec3, "y").unwrap();
    let z = m.find_field(b.core.vec3, "z").unwrap();
    let vec4_ctor = m.find_method(b.core.vec4, ".ctor").unwrap();
    let mat_mul = m.find_method(b.core.mat4, "op_Multiply").unwrap();

    let code = body(vec![
        (Opcode::LdLocA, Operand::Local(0)),
        (Opcode::LdsFld, Operand::Field(globals_field)),
        (Opcode::LdFld, Operand::Field(mvp)),
        (Opcode::LdArg, Operand::Local(0)),
        (Opcode::LdFld, Operand::Field(pos)),
        (Opcode::LdFld, Operand::Field(x)),
        (Opcode::LdArg, Operand::Local(0)),
        (Opcode::LdFld, Operand::Field(pos)),
        (Opcode::LdFld, Operand::Field(y)),
        (Opcode::LdArg, Operand::Local(0)),
        (Opcode::LdFld, Operand::Field(pos)),
        (Opcode::LdFld, Operand::Field(z)),
        (Opcode::LdcR4, Operand::Float(1.0)),
        (Opcode::NewObj, Operand::Method(vec4_ctor)),
        (Opcode::Call, Operand::Method(mat_mul)),
        (Opcode::StFld, Operand::Field(clip)),
        (Opcode::LdLocA, Operand::Local(0)),
        (Opcode::LdArg, Operand::Local(0)),
        (Opcode::LdFld, Operand::Field(uv_in)),
        (Opcode::StFld, Operand::Field(uv_out)),
        (Opcode::LdLoc, Operand::Local(0)),
        (Opcode::Ret, Operand::None),
    ]);
    b.method(
        "VsMain",
        vec![param("input", vs_in)],
        vs_out,
        Binding::None,
        vec![vs_out],
        vertex_entry(),
        code,
    )
}

#[test]
fn vertex_stage_emits_io_uniforms_and_main() {
    let mut b = ShaderBuilder::new();
    let entry = build_vertex_shader(&mut b);
    let out = b.transpile(entry).unwrap();

    assert_eq!(out.stage, Stage::Vertex);
    assert_eq!(out.entry_point, ENTRY_POINT);
    let glsl = &out.glsl;

    assert!(glsl.starts_with("#version 450\n"), "{glsl}");
    assert!(glsl.contains("struct VsOut {"), "{glsl}");
    assert!(glsl.contains("layout(location = 0) in vec3 in_pos;"), "{glsl}");
    assert!(glsl.contains("layout(location = 1) in vec2 in_uv;"), "{glsl}");
    assert!(glsl.contains("layout(location = 0) out vec2 out_uv;"), "{glsl}");
    assert!(
        glsl.contains("layout(std140, set = 0, binding = 0) uniform Globals_block {"),
        "{glsl}"
    );
    assert!(glsl.contains("  mat4 mvp;"), "{glsl}");
    assert!(glsl.contains("} Globals;"), "{glsl}");
    assert!(glsl.contains("void main() {"), "{glsl}");
    assert!(glsl.contains("  VsOut l0;"), "{glsl}");
    assert!(
        glsl.contains(
            "l0.clip = (Globals.mvp * vec4(in_pos.x, in_pos.y, in_pos.z, 1.0));"
        ),
        "{glsl}"
    );
    assert!(glsl.contains("l0.uv = in_uv;"), "{glsl}");
    assert!(glsl.contains("gl_Position = l0.clip;"), "{glsl}");
    assert!(glsl.contains("out_uv = l0.uv;"), "{glsl}");
}

#[test]
fn transpilation_is_deterministic_across_fresh_sessions() {
    let mut b = ShaderBuilder::new();
    let entry = build_vertex_shader(&mut b);
    let first = b.transpile(entry).unwrap();
    let second = b.transpile(entry).unwrap();
    assert_eq!(first.glsl, second.glsl);
}

#[test]
fn helper_functions_are_emitted_before_their_callers() {
    let mut b = ShaderBuilder::new();
    let vec4_add = b.module.find_method(b.core.vec4, "op_Addition").unwrap();
    let helper_code = body(vec![
        (Opcode::LdArg, Operand::Local(0)),
        (Opcode::LdArg, Operand::Local(1)),
        (Opcode::Call, Operand::Method(vec4_add)),
        (Opcode::Ret, Operand::None),
    ]);
    let helper = b.method(
        "Add2",
        vec![param("a", b.core.vec4), param("b", b.core.vec4)],
        b.core.vec4,
        Binding::None,
        Vec::new(),
        None,
        helper_code,
    );

    let vs_out = b.nested_struct(
        "VsOut",
        &[("clip", b.core.vec4, Binding::Stage(StageVar::Position))],
    );
    let clip = b.module.find_field(vs_out, "clip").unwrap();
    let vec4_ctor = b.module.find_method(b.core.vec4, ".ctor").unwrap();
    let entry_code = body(vec![
        (Opcode::LdLocA, Operand::Local(0)),
        (Opcode::LdcR4, Operand::Float(1.0)),
        (Opcode::LdcR4, Operand::Float(1.0)),
        (Opcode::LdcR4, Operand::Float(1.0)),
        (Opcode::LdcR4, Operand::Float(1.0)),
        (Opcode::NewObj, Operand::Method(vec4_ctor)),
        (Opcode::LdcR4, Operand::Float(2.0)),
        (Opcode::LdcR4, Operand::Float(2.0)),
        (Opcode::LdcR4, Operand::Float(2.0)),
        (Opcode::LdcR4, Operand::Float(2.0)),
        (Opcode::NewObj, Operand::Method(vec4_ctor)),
        (Opcode::Call, Operand::Method(helper)),
        (Opcode::StFld, Operand::Field(clip)),
        (Opcode::LdLoc, Operand::Local(0)),
        (Opcode::Ret, Operand::None),
    ]);
    let entry = b.method(
        "VsMain",
        Vec::new(),
        vs_out,
        Binding::None,
        vec![vs_out],
        vertex_entry(),
        entry_code,
    );

    let glsl = b.transpile(entry).unwrap().glsl;

    // The helper keeps its own (single-statement) body and registers no
    // further dependencies.
    assert!(glsl.contains("vec4 Add2(vec4 a, vec4 b) {"), "{glsl}");
    assert!(glsl.contains("  return (a + b);"), "{glsl}");
    assert!(
        glsl.contains("l0.clip = Add2(vec4(1.0, 1.0, 1.0, 1.0), vec4(2.0, 2.0, 2.0, 2.0));"),
        "{glsl}"
    );
    let helper_at = glsl.find("vec4 Add2(").unwrap();
    let main_at = glsl.find("void main()").unwrap();
    assert!(helper_at < main_at, "{glsl}");
}

#[test]
fn struct_definitions_come_out_in_dependency_order() {
    let mut b = ShaderBuilder::new();
    let inner = b.nested_struct("Inner", &[("v", b.core.vec3, Binding::None)]);
    let outer = b.nested_struct(
        "Outer",
        &[("first", b.core.float_, Binding::None), ("nested", inner, Binding::None)],
    );
    let entry = b.method(
        "CsMain",
        Vec::new(),
        b.core.void_,
        Binding::None,
        vec![outer],
        compute_entry([1, 1, 1]),
        body(vec![(Opcode::Ret, Operand::None)]),
    );

    let glsl = b.transpile(entry).unwrap().glsl;
    let inner_at = glsl.find("struct Inner {").unwrap();
    let outer_at = glsl.find("struct Outer {").unwrap();
    assert!(inner_at < outer_at, "{glsl}");
}

#[test]
fn resource_bindings_are_recorded_once_per_name() {
    let mut b = ShaderBuilder::new();
    let ps_in = b.nested_struct("PsIn", &[("uv", b.core.vec2, location(0))]);
    let tex = b.static_field(
        "Tex",
        b.core.sampler2d,
        Binding::Resource {
            kind: ResourceKind::CombinedImageSampler,
            set: 0,
            binding: 1,
            array_len: None,
            push_constant: false,
        },
    );
    let uv = b.module.find_field(ps_in, "uv").unwrap();
    let sample = b.module.find_method(b.core.sampler2d, "Sample").unwrap();
    let add = b.module.find_method(b.core.vec4, "op_Addition").unwrap();

    // The same sampler is loaded at three distinct call sites.
    let code = body(vec![
        (Opcode::LdsFld, Operand::Field(tex)),
        (Opcode::LdArg, Operand::Local(0)),
        (Opcode::LdFld, Operand::Field(uv)),
        (Opcode::Call, Operand::Method(sample)),
        (Opcode::LdsFld, Operand::Field(tex)),
        (Opcode::LdArg, Operand::Local(0)),
        (Opcode::LdFld, Operand::Field(uv)),
        (Opcode::Call, Operand::Method(sample)),
        (Opcode::Call, Operand::Method(add)),
        (Opcode::LdsFld, Operand::Field(tex)),
        (Opcode::LdArg, Operand::Local(0)),
        (Opcode::LdFld, Operand::Field(uv)),
        (Opcode::Call, Operand::Method(sample)),
        (Opcode::Call, Operand::Method(add)),
        (Opcode::Ret, Operand::None),
    ]);
    let entry = b.method(
        "PsMain",
        vec![param("input", ps_in)],
        b.core.vec4,
        location(0),
        Vec::new(),
        fragment_entry(),
        code,
    );

    let glsl = b.transpile(entry).unwrap().glsl;
    assert_eq!(
        glsl.matches("layout(set = 0, binding = 1) uniform sampler2D Tex;")
            .count(),
        1,
        "{glsl}"
    );
    assert!(glsl.contains("layout(location = 0) out vec4 out0;"), "{glsl}");
    assert!(
        glsl.contains("out0 = ((texture(Tex, in_uv) + texture(Tex, in_uv)) + texture(Tex, in_uv));"),
        "{glsl}"
    );
}

#[test]
fn do_while_loop_is_reconstructed_from_a_backward_branch() {
    let mut b = ShaderBuilder::new();
    let values_array = b.array_of(b.core.float_);
    let particles = {
        let ty = b.nested_struct("ParticleData", &[]);
        b.module.add_field(FieldDef {
            name: "values".into(),
            declaring_type: ty,
            ty: values_array,
            flags: FieldFlags::PUBLIC,
            name_override: None,
            fixed_len: None,
            array_len: None,
            binding: Binding::None,
        });
        ty
    };
    let data = b.static_field(
        "Data",
        particles,
        Binding::Resource {
            kind: ResourceKind::Storage,
            set: 0,
            binding: 2,
            array_len: None,
            push_constant: false,
        },
    );
    let total = b.static_field("Total", b.core.float_, Binding::Shared);
    let values = b.module.find_field(particles, "values").unwrap();

    let code = body(vec![
        (Opcode::LdcR4, Operand::Float(0.0)),
        (Opcode::StLoc, Operand::Local(0)),
        (Opcode::LdcI4, Operand::Int(0)),
        (Opcode::StLoc, Operand::Local(1)),
        // loop body starts at offset 4
        (Opcode::LdLoc, Operand::Local(0)),
        (Opcode::LdsFld, Operand::Field(data)),
        (Opcode::LdFld, Operand::Field(values)),
        (Opcode::LdLoc, Operand::Local(1)),
        (Opcode::LdElem, Operand::Type(b.core.float_)),
        (Opcode::Add, Operand::None),
        (Opcode::StLoc, Operand::Local(0)),
        (Opcode::LdLoc, Operand::Local(1)),
        (Opcode::LdcI4, Operand::Int(1)),
        (Opcode::Add, Operand::None),
        (Opcode::StLoc, Operand::Local(1)),
        (Opcode::LdLoc, Operand::Local(1)),
        (Opcode::LdcI4, Operand::Int(8)),
        (Opcode::Clt, Operand::None),
        (Opcode::BrTrue, Operand::Target(4)),
        (Opcode::LdLoc, Operand::Local(0)),
        (Opcode::StsFld, Operand::Field(total)),
        (Opcode::Ret, Operand::None),
    ]);
    let entry = b.method(
        "CsMain",
        Vec::new(),
        b.core.void_,
        Binding::None,
        vec![b.core.float_, b.core.int_],
        compute_entry([64, 1, 1]),
        code,
    );

    let glsl = b.transpile(entry).unwrap().glsl;
    assert!(
        glsl.contains("layout(local_size_x = 64, local_size_y = 1, local_size_z = 1) in;"),
        "{glsl}"
    );
    assert!(
        glsl.contains("layout(std430, set = 0, binding = 2) buffer Data_block {"),
        "{glsl}"
    );
    assert!(glsl.contains("  float values[];"), "{glsl}");
    assert!(glsl.contains("} Data;"), "{glsl}");
    assert!(glsl.contains("shared float Total;"), "{glsl}");

    let expected_body = "  do {\n  l0 = float((l0 + Data.values[l1]));\n  l1 = int((l1 + 1));\n  } while ((l1 < 8));\n";
    assert!(glsl.contains(expected_body), "{glsl}");
    assert!(glsl.contains("Total = float(l0);"), "{glsl}");
}

#[test]
fn forward_branch_pair_reconstructs_one_if_else() {
    let mut b = ShaderBuilder::new();
    let ps_in = b.nested_struct("PsIn", &[("uv", b.core.vec2, location(0))]);
    let uv = b.module.find_field(ps_in, "uv").unwrap();
    let x = b.module.find_field(b.core.vec2, "x").unwrap();
    let vec4_ctor = b.module.find_method(b.core.vec4, ".ctor").unwrap();

    let code = body(vec![
        (Opcode::LdArg, Operand::Local(0)),
        (Opcode::LdFld, Operand::Field(uv)),
        (Opcode::LdFld, Operand::Field(x)),
        (Opcode::LdcR4, Operand::Float(0.5)),
        (Opcode::Clt, Operand::None),
        (Opcode::BrFalse, Operand::Target(9)),
        (Opcode::LdcR4, Operand::Float(1.0)),
        (Opcode::StLoc, Operand::Local(0)),
        (Opcode::Br, Operand::Target(11)),
        (Opcode::LdcR4, Operand::Float(0.25)),
        (Opcode::StLoc, Operand::Local(0)),
        (Opcode::LdLoc, Operand::Local(0)),
        (Opcode::LdLoc, Operand::Local(0)),
        (Opcode::LdLoc, Operand::Local(0)),
        (Opcode::LdcR4, Operand::Float(1.0)),
        (Opcode::NewObj, Operand::Method(vec4_ctor)),
        (Opcode::Ret, Operand::None),
    ]);
    let entry = b.method(
        "PsMain",
        vec![param("input", ps_in)],
        b.core.vec4,
        location(0),
        vec![b.core.float_],
        fragment_entry(),
        code,
    );

    let glsl = b.transpile(entry).unwrap().glsl;
    let expected = "  if ((in_uv.x < 0.5)) {\n  l0 = float(1.0);\n  }\n  else {\n  l0 = float(0.25);\n  }\n";
    assert!(glsl.contains(expected), "{glsl}");
    assert_eq!(glsl.matches("if (").count(), 1, "{glsl}");
    assert!(glsl.contains("out0 = vec4(l0, l0, l0, 1.0);"), "{glsl}");
}

#[test]
fn boolean_literal_compare_is_rewritten_next_to_relational_operands() {
    let mut b = ShaderBuilder::new();
    let ps_in = b.nested_struct("PsIn", &[("uv", b.core.vec2, location(0))]);
    let uv = b.module.find_field(ps_in, "uv").unwrap();
    let x = b.module.find_field(b.core.vec2, "x").unwrap();
    let vec4_ctor = b.module.find_method(b.core.vec4, ".ctor").unwrap();

    // `!(uv.x < 0.5)` lowers to clt; ldc.i4 0; ceq.
    let code = body(vec![
        (Opcode::LdArg, Operand::Local(0)),
        (Opcode::LdFld, Operand::Field(uv)),
        (Opcode::LdFld, Operand::Field(x)),
        (Opcode::LdcR4, Operand::Float(0.5)),
        (Opcode::Clt, Operand::None),
        (Opcode::LdcI4, Operand::Int(0)),
        (Opcode::Ceq, Operand::None),
        (Opcode::BrFalse, Operand::Target(10)),
        (Opcode::LdcR4, Operand::Float(1.0)),
        (Opcode::StLoc, Operand::Local(0)),
        (Opcode::LdLoc, Operand::Local(0)),
        (Opcode::LdLoc, Operand::Local(0)),
        (Opcode::LdLoc, Operand::Local(0)),
        (Opcode::LdcR4, Operand::Float(1.0)),
        (Opcode::NewObj, Operand::Method(vec4_ctor)),
        (Opcode::Ret, Operand::None),
    ]);
    let entry = b.method(
        "PsMain",
        vec![param("input", ps_in)],
        b.core.vec4,
        location(0),
        vec![b.core.float_],
        fragment_entry(),
        code,
    );

    let glsl = b.transpile(entry).unwrap().glsl;
    assert!(
        glsl.contains("if (((in_uv.x < 0.5) == false)) {"),
        "{glsl}"
    );
}

#[test]
fn compute_stage_images_builtin_indices_and_keywords() {
    let mut b = ShaderBuilder::new();
    let img = b.static_field(
        "Img",
        b.core.image2d,
        Binding::Resource {
            kind: ResourceKind::Image,
            set: 0,
            binding: 0,
            array_len: None,
            push_constant: false,
        },
    );
    let x = b.module.find_field(b.core.vec3, "x").unwrap();
    let y = b.module.find_field(b.core.vec3, "y").unwrap();
    let ivec2_ctor = b.module.find_method(b.core.ivec2, ".ctor").unwrap();
    let vec4_ctor = b.module.find_method(b.core.vec4, ".ctor").unwrap();
    let store = b.module.find_method(b.core.image2d, "Store").unwrap();
    let barrier = b.module.find_method(b.core.intrinsics, "Barrier").unwrap();

    let code = body(vec![
        (Opcode::LdsFld, Operand::Field(img)),
        (Opcode::LdArg, Operand::Local(0)),
        (Opcode::LdFld, Operand::Field(x)),
        (Opcode::Conv, Operand::Type(b.core.int_)),
        (Opcode::LdArg, Operand::Local(0)),
        (Opcode::LdFld, Operand::Field(y)),
        (Opcode::Conv, Operand::Type(b.core.int_)),
        (Opcode::NewObj, Operand::Method(ivec2_ctor)),
        (Opcode::LdcR4, Operand::Float(0.0)),
        (Opcode::LdcR4, Operand::Float(0.0)),
        (Opcode::LdcR4, Operand::Float(0.0)),
        (Opcode::LdcR4, Operand::Float(1.0)),
        (Opcode::NewObj, Operand::Method(vec4_ctor)),
        (Opcode::Call, Operand::Method(store)),
        (Opcode::Call, Operand::Method(barrier)),
        (Opcode::Ret, Operand::None),
    ]);
    let entry = b.method(
        "CsMain",
        vec![ParamDef {
            name: "id".into(),
            ty: b.core.uvec3,
            binding: Binding::Stage(StageVar::GlobalInvocationId),
        }],
        b.core.void_,
        Binding::None,
        Vec::new(),
        compute_entry([8, 8, 1]),
        code,
    );

    let glsl = b.transpile(entry).unwrap().glsl;
    assert!(
        glsl.contains("layout(set = 0, binding = 0, rgba32f) uniform image2D Img;"),
        "{glsl}"
    );
    assert!(
        glsl.contains(
            "imageStore(Img, ivec2(int(gl_GlobalInvocationID.x), int(gl_GlobalInvocationID.y)), \
             vec4(0.0, 0.0, 0.0, 1.0));"
        ),
        "{glsl}"
    );
    assert!(glsl.contains("barrier();"), "{glsl}");
}

#[test]
fn name_resolution_is_stable_across_stages_of_one_program() {
    let mut b = ShaderBuilder::new();
    let util = b.module.add_type(TypeDef {
        name: "ColorUtil".into(),
        namespace: "Glint.Render".into(),
        declaring_type: None,
        kind: TypeKind::Class,
        generic_args: Vec::new(),
        fields: Vec::new(),
        methods: Vec::new(),
    });
    let dot = b.module.find_method(b.core.vec4, "Dot").unwrap();
    let lum_code = body(vec![
        (Opcode::LdArg, Operand::Local(0)),
        (Opcode::LdArg, Operand::Local(0)),
        (Opcode::Call, Operand::Method(dot)),
        (Opcode::Ret, Operand::None),
    ]);
    let lum = b.module.add_method(MethodDef {
        name: "Lum".into(),
        declaring_type: util,
        flags: MethodFlags::STATIC,
        params: vec![param("v", b.core.vec4)],
        return_type: b.core.float_,
        return_binding: Binding::None,
        locals: Vec::new(),
        generic_args: Vec::new(),
        intrinsic: None,
        entry: None,
        body: lum_code,
    });

    let vs_out = b.nested_struct(
        "VsOut",
        &[("clip", b.core.vec4, Binding::Stage(StageVar::Position))],
    );
    let clip = b.module.find_field(vs_out, "clip").unwrap();
    let vec4_ctor = b.module.find_method(b.core.vec4, ".ctor").unwrap();

    let make_stage_code = |target_field: Option<FieldId>| {
        let mut insts = vec![
            (Opcode::LdcR4, Operand::Float(1.0)),
            (Opcode::LdcR4, Operand::Float(1.0)),
            (Opcode::LdcR4, Operand::Float(1.0)),
            (Opcode::LdcR4, Operand::Float(1.0)),
            (Opcode::NewObj, Operand::Method(vec4_ctor)),
            (Opcode::Call, Operand::Method(lum)),
            (Opcode::Pop, Operand::None),
        ];
        match target_field {
            Some(f) => {
                insts.insert(0, (Opcode::LdLocA, Operand::Local(0)));
                insts.push((Opcode::LdcR4, Operand::Float(0.0)));
                insts.push((Opcode::LdcR4, Operand::Float(0.0)));
                insts.push((Opcode::LdcR4, Operand::Float(0.0)));
                insts.push((Opcode::LdcR4, Operand::Float(1.0)));
                insts.push((Opcode::NewObj, Operand::Method(vec4_ctor)));
                insts.push((Opcode::StFld, Operand::Field(f)));
                insts.push((Opcode::LdLoc, Operand::Local(0)));
                insts.push((Opcode::Ret, Operand::None));
            }
            None => {
                insts.push((Opcode::LdcR4, Operand::Float(1.0)));
                insts.push((Opcode::LdcR4, Operand::Float(1.0)));
                insts.push((Opcode::LdcR4, Operand::Float(1.0)));
                insts.push((Opcode::LdcR4, Operand::Float(1.0)));
                insts.push((Opcode::NewObj, Operand::Method(vec4_ctor)));
                insts.push((Opcode::Ret, Operand::None));
            }
        }
        body(insts)
    };

    let vs = b.method(
        "VsMain",
        Vec::new(),
        vs_out,
        Binding::None,
        vec![vs_out],
        vertex_entry(),
        make_stage_code(Some(clip)),
    );
    let ps = b.method(
        "PsMain",
        Vec::new(),
        b.core.vec4,
        location(0),
        Vec::new(),
        fragment_entry(),
        make_stage_code(None),
    );

    let mut session = Transpiler::new(&b.module, Options::default());
    let vs_out_text = session.transpile_stage(b.shader, vs).unwrap().glsl;
    let ps_out_text = session.transpile_stage(b.shader, ps).unwrap().glsl;

    let mangled = "Glint_Render_ColorUtil_Lum";
    assert!(vs_out_text.contains(&format!("float {mangled}(vec4 v) {{")), "{vs_out_text}");
    assert!(ps_out_text.contains(&format!("float {mangled}(vec4 v) {{")), "{ps_out_text}");
    assert!(vs_out_text.contains("return dot(v, v);"), "{vs_out_text}");
}

#[test]
fn indexer_calls_become_subscripts_and_subscript_stores() {
    let mut b = ShaderBuilder::new();
    let set_item = b.module.find_method(b.core.vec4, "set_Item").unwrap();
    let get_item = b.module.find_method(b.core.vec4, "get_Item").unwrap();

    let code = body(vec![
        (Opcode::LdLocA, Operand::Local(0)),
        (Opcode::LdcI4, Operand::Int(0)),
        (Opcode::LdcR4, Operand::Float(2.0)),
        (Opcode::Call, Operand::Method(set_item)),
        (Opcode::LdLocA, Operand::Local(0)),
        (Opcode::LdcI4, Operand::Int(1)),
        (Opcode::Call, Operand::Method(get_item)),
        (Opcode::StLoc, Operand::Local(1)),
        (Opcode::Ret, Operand::None),
    ]);
    let entry = b.method(
        "CsMain",
        Vec::new(),
        b.core.void_,
        Binding::None,
        vec![b.core.vec4, b.core.float_],
        compute_entry([1, 1, 1]),
        code,
    );

    let glsl = b.transpile(entry).unwrap().glsl;
    assert!(glsl.contains("l0[0] = 2.0;"), "{glsl}");
    assert!(glsl.contains("l1 = float(l0[1]);"), "{glsl}");
}

#[test]
fn push_constant_resources_use_the_push_constant_layout() {
    let mut b = ShaderBuilder::new();
    let push_data = b.nested_struct("PushData", &[("tint", b.core.vec4, Binding::None)]);
    let push = b.static_field(
        "Push",
        push_data,
        Binding::Resource {
            kind: ResourceKind::Uniform,
            set: 0,
            binding: 0,
            array_len: None,
            push_constant: true,
        },
    );
    let tint = b.module.find_field(push_data, "tint").unwrap();

    let code = body(vec![
        (Opcode::LdsFld, Operand::Field(push)),
        (Opcode::LdFld, Operand::Field(tint)),
        (Opcode::StLoc, Operand::Local(0)),
        (Opcode::Ret, Operand::None),
    ]);
    let entry = b.method(
        "CsMain",
        Vec::new(),
        b.core.void_,
        Binding::None,
        vec![b.core.vec4],
        compute_entry([1, 1, 1]),
        code,
    );

    let glsl = b.transpile(entry).unwrap().glsl;
    assert!(
        glsl.contains("layout(push_constant) uniform Push_block {"),
        "{glsl}"
    );
    assert!(glsl.contains("  vec4 tint;"), "{glsl}");
    assert!(glsl.contains("} Push;"), "{glsl}");
    assert!(glsl.contains("l0 = Push.tint;"), "{glsl}");
}

#[test]
fn string_literals_abort_with_an_authoring_error() {
    let mut b = ShaderBuilder::new();
    let code = body(vec![
        (Opcode::LdStr, Operand::Str("oops".into())),
        (Opcode::Pop, Operand::None),
        (Opcode::Ret, Operand::None),
    ]);
    let entry = b.method(
        "CsMain",
        Vec::new(),
        b.core.void_,
        Binding::None,
        Vec::new(),
        compute_entry([1, 1, 1]),
        code,
    );
    let err = b.transpile(entry).unwrap_err();
    match err {
        TranspileError::Translate(t) => {
            assert_eq!(t.class, ErrorClass::Authoring);
            assert_eq!(t.opcode, Opcode::LdStr);
            assert!(t.to_string().contains("string literals"), "{t}");
        }
        other => panic!("expected a translation error, got {other}"),
    }
}

#[test]
fn switch_is_an_unsupported_construct() {
    let mut b = ShaderBuilder::new();
    let code = body(vec![
        (Opcode::LdcI4, Operand::Int(0)),
        (Opcode::Switch, Operand::Targets(vec![2, 3])),
        (Opcode::Ret, Operand::None),
    ]);
    let entry = b.method(
        "CsMain",
        Vec::new(),
        b.core.void_,
        Binding::None,
        Vec::new(),
        compute_entry([1, 1, 1]),
        code,
    );
    let err = b.transpile(entry).unwrap_err();
    match err {
        TranspileError::Translate(t) => assert_eq!(t.class, ErrorClass::Unsupported),
        other => panic!("expected a translation error, got {other}"),
    }
}

#[test]
fn leftover_stack_values_are_internal_errors() {
    let mut b = ShaderBuilder::new();
    let code = body(vec![
        (Opcode::LdcR4, Operand::Float(1.0)),
        (Opcode::Ret, Operand::None),
    ]);
    let entry = b.method(
        "CsMain",
        Vec::new(),
        b.core.void_,
        Binding::None,
        Vec::new(),
        compute_entry([1, 1, 1]),
        code,
    );
    let err = b.transpile(entry).unwrap_err();
    match err {
        TranspileError::Translate(t) => {
            assert_eq!(t.class, ErrorClass::Internal);
            assert!(t.message.contains("evaluation stack"), "{t}");
        }
        other => panic!("expected a translation error, got {other}"),
    }
}

#[test]
fn unclassifiable_forward_jump_is_a_flow_error() {
    let mut b = ShaderBuilder::new();
    let code = body(vec![
        (Opcode::Br, Operand::Target(2)),
        (Opcode::Nop, Operand::None),
        (Opcode::Ret, Operand::None),
    ]);
    let entry = b.method(
        "CsMain",
        Vec::new(),
        b.core.void_,
        Binding::None,
        Vec::new(),
        compute_entry([1, 1, 1]),
        code,
    );
    let err = b.transpile(entry).unwrap_err();
    match err {
        TranspileError::Flow(f) => {
            assert_eq!(f.class, ErrorClass::Unsupported);
            assert!(f.message.contains("cannot reconstruct"), "{f}");
        }
        other => panic!("expected a flow error, got {other}"),
    }
}

#[test]
fn unannotated_shader_scoped_fields_are_authoring_errors() {
    let mut b = ShaderBuilder::new();
    let bare = b.static_field("Bare", b.core.float_, Binding::None);
    let code = body(vec![
        (Opcode::LdsFld, Operand::Field(bare)),
        (Opcode::Pop, Operand::None),
        (Opcode::Ret, Operand::None),
    ]);
    let entry = b.method(
        "CsMain",
        Vec::new(),
        b.core.void_,
        Binding::None,
        Vec::new(),
        compute_entry([1, 1, 1]),
        code,
    );
    let err = b.transpile(entry).unwrap_err();
    match err {
        TranspileError::Translate(t) => {
            assert_eq!(t.class, ErrorClass::Authoring);
            assert!(t.message.contains("binding annotation"), "{t}");
        }
        other => panic!("expected a translation error, got {other}"),
    }
}
