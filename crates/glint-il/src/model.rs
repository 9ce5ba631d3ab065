//! The decoded shader-IL object model.
//!
//! Instances of these types are produced by the engine's method-body decoder
//! (out of scope here) with every token already resolved: field, method and
//! type operands reference arena ids, branch operands carry absolute byte
//! offsets.

use bitflags::bitflags;

/// Index of a [`TypeDef`] inside a [`Module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// Index of a [`FieldDef`] inside a [`Module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub u32);

/// Index of a [`MethodDef`] inside a [`Module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u32);

/// Primitive numeric/boolean/void types of the embedding language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// No value (method return position only).
    Void,
    /// Boolean.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 32-bit unsigned integer.
    UInt32,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
}

/// Classification of a [`TypeDef`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    /// A primitive numeric/boolean/void type.
    Primitive(Primitive),
    /// A user value type; becomes a struct definition in emitted source.
    Struct,
    /// A reference type. Only the shader-defining type itself may be a class;
    /// class-typed fields inside shader data are authoring errors.
    Class,
    /// A "primitive shader type": a vector/matrix/sampler/image wrapper that
    /// maps directly onto a target-language type and is never defined as a
    /// struct. The element type, when generic, is generic argument 0 and
    /// defaults to `float`.
    Intrinsic {
        /// Target-language name (`vec4`, `mat3`, `sampler2D`, ...).
        glsl: String,
    },
    /// An array of `element`. Arrays appear as field/parameter types only.
    Array {
        /// Element type of the array.
        element: TypeId,
    },
    /// An unsubstituted generic parameter. Reaching one during translation is
    /// an authoring error (the front end substitutes arguments beforehand).
    GenericParam {
        /// Position in the declaring type's generic parameter list.
        index: u32,
    },
}

/// A type declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    /// Simple (unqualified) type name.
    pub name: String,
    /// Dot-separated namespace; empty for nested or global types.
    pub namespace: String,
    /// Enclosing type for nested declarations.
    pub declaring_type: Option<TypeId>,
    /// Classification.
    pub kind: TypeKind,
    /// Substituted generic arguments, in declaration order.
    pub generic_args: Vec<TypeId>,
    /// Declared fields, in declaration order.
    pub fields: Vec<FieldId>,
    /// Declared methods, in declaration order.
    pub methods: Vec<MethodId>,
}

impl TypeDef {
    /// A bare struct definition with no namespace, fields or methods.
    pub fn new_struct(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
            declaring_type: None,
            kind: TypeKind::Struct,
            generic_args: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }
}

bitflags! {
    /// Field attribute bits carried over from the source metadata.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldFlags: u32 {
        /// Static (shader-scoped) field.
        const STATIC = 1 << 0;
        /// Publicly visible; only public instance fields participate in
        /// struct layout.
        const PUBLIC = 1 << 1;
        /// The field's naming policy opts out of declaring-class prefixing.
        const NO_CLASS_PREFIX = 1 << 2;
    }
}

bitflags! {
    /// Method attribute bits carried over from the source metadata.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodFlags: u32 {
        /// Static method (no receiver).
        const STATIC = 1 << 0;
    }
}

/// Builtin stage variables the target dialect supplies under fixed names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageVar {
    /// Clip-space output position (vertex).
    Position,
    /// Point size output (vertex).
    PointSize,
    /// Window-space fragment coordinate (fragment input).
    FragCoord,
    /// Fragment depth output.
    FragDepth,
    /// Index of the current vertex (vertex input).
    VertexIndex,
    /// Index of the current instance (vertex input).
    InstanceIndex,
    /// Front-facing flag (fragment input).
    FrontFacing,
    /// Global dispatch coordinates (compute input).
    GlobalInvocationId,
    /// Coordinates within the work group (compute input).
    LocalInvocationId,
    /// Flattened index within the work group (compute input).
    LocalInvocationIndex,
    /// Work-group coordinates (compute input).
    WorkGroupId,
}

impl StageVar {
    /// Fixed target-language identifier; never mangled.
    pub fn glsl_name(self) -> &'static str {
        match self {
            StageVar::Position => "gl_Position",
            StageVar::PointSize => "gl_PointSize",
            StageVar::FragCoord => "gl_FragCoord",
            StageVar::FragDepth => "gl_FragDepth",
            StageVar::VertexIndex => "gl_VertexIndex",
            StageVar::InstanceIndex => "gl_InstanceIndex",
            StageVar::FrontFacing => "gl_FrontFacing",
            StageVar::GlobalInvocationId => "gl_GlobalInvocationID",
            StageVar::LocalInvocationId => "gl_LocalInvocationID",
            StageVar::LocalInvocationIndex => "gl_LocalInvocationIndex",
            StageVar::WorkGroupId => "gl_WorkGroupID",
        }
    }
}

/// Resource binding classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Uniform buffer.
    Uniform,
    /// Storage buffer.
    Storage,
    /// Storage image.
    Image,
    /// Standalone sampler.
    Sampler,
    /// Combined image/sampler.
    CombinedImageSampler,
}

/// Closed binding-annotation union attached to fields, parameters and method
/// returns by the metadata front end. The translator switches on the tag;
/// there is no open-ended attribute inspection at translation time.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// Implicit structural member; no declaration is synthesized.
    None,
    /// Alias for a builtin stage variable.
    Stage(StageVar),
    /// Explicit location-bound stage input/output.
    Location {
        /// Location index.
        location: u32,
        /// Disable interpolation across the primitive.
        flat: bool,
    },
    /// Cross-invocation (work-group shared) variable.
    Shared,
    /// Buffer/image/sampler resource binding.
    Resource {
        /// Resource class.
        kind: ResourceKind,
        /// Descriptor set index; ignored for push constants.
        set: u32,
        /// Binding index within the set; ignored for push constants.
        binding: u32,
        /// Fixed resource-array length, if the field is an array of bindings.
        array_len: Option<u32>,
        /// Bind through the push-constant region instead of a descriptor.
        push_constant: bool,
    },
}

/// A field declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Declared field name.
    pub name: String,
    /// Declaring type.
    pub declaring_type: TypeId,
    /// Field type.
    pub ty: TypeId,
    /// Attribute bits.
    pub flags: FieldFlags,
    /// Explicit emitted-name override, if the field declares one.
    pub name_override: Option<String>,
    /// Inline fixed-buffer repetition count. Fixed buffers always have a
    /// known positive length.
    pub fixed_len: Option<u32>,
    /// Explicit length annotation for an array-typed field. An array-typed
    /// plain struct field without one is an authoring error; a trailing
    /// buffer-resource field without one is runtime-sized.
    pub array_len: Option<u32>,
    /// Binding annotation.
    pub binding: Binding,
}

/// A method parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    /// Declared parameter name.
    pub name: String,
    /// Parameter type.
    pub ty: TypeId,
    /// Binding annotation (stage entrypoints only).
    pub binding: Binding,
}

/// How a builtin method is rendered in target source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrinsicKind {
    /// Ordinary call syntax; for instance methods the receiver becomes the
    /// first argument.
    Call,
    /// Emitted as a bare statement keyword, not a call.
    Keyword,
    /// Two-operand infix operator; the intrinsic name is the operator text.
    BinaryOp,
    /// One-operand prefix operator; the intrinsic name is the operator text.
    UnaryOp,
    /// Array-style indexer (`get`/`set` pair on the declaring type).
    Index,
}

/// Builtin-method marker: the method maps to a target-language intrinsic and
/// its name is emitted verbatim, never mangled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intrinsic {
    /// Intrinsic name, or operator text for operator kinds.
    pub name: String,
    /// Rendering rule.
    pub kind: IntrinsicKind,
}

/// Pipeline stages a shader program may provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Vertex stage.
    Vertex,
    /// Fragment stage.
    Fragment,
    /// Geometry stage.
    Geometry,
    /// Compute stage.
    Compute,
}

/// Stage-entrypoint marker attached to one method per provided stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageEntry {
    /// Stage this method implements.
    pub stage: Stage,
    /// Work-group size; required for compute entrypoints.
    pub local_size: Option<[u32; 3]>,
}

/// A method declaration together with its decoded body.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// Declared method name.
    pub name: String,
    /// Declaring type.
    pub declaring_type: TypeId,
    /// Attribute bits.
    pub flags: MethodFlags,
    /// Parameters, in declaration order. The implicit receiver is not listed.
    pub params: Vec<ParamDef>,
    /// Return type (`void` for none).
    pub return_type: TypeId,
    /// Binding annotation on the return value (stage entrypoints only).
    pub return_binding: Binding,
    /// Local-variable slot types from the body's local signature.
    pub locals: Vec<TypeId>,
    /// Substituted generic arguments, in declaration order.
    pub generic_args: Vec<TypeId>,
    /// Builtin-intrinsic marker; intrinsic methods carry no body.
    pub intrinsic: Option<Intrinsic>,
    /// Stage-entrypoint marker.
    pub entry: Option<StageEntry>,
    /// Decoded instruction stream; empty for intrinsics.
    pub body: Vec<Instruction>,
}

/// Opcodes of the decoded instruction stream.
///
/// Address-of loads are normalized to plain value loads by the decoder, so
/// `LdArgA`/`LdLocA`/`LdFldA`/`LdsFldA` translate identically to their value
/// counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Opcode {
    Nop,
    LdArg,
    LdArgA,
    LdLoc,
    LdLocA,
    StLoc,
    LdFld,
    LdFldA,
    LdsFld,
    LdsFldA,
    StFld,
    StsFld,
    LdElem,
    StElem,
    LdcI4,
    LdcR4,
    LdStr,
    Dup,
    Pop,
    Call,
    NewObj,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Neg,
    Not,
    Ceq,
    Cgt,
    Clt,
    Conv,
    Br,
    BrTrue,
    BrFalse,
    Switch,
    Ret,
}

impl Opcode {
    /// Lower-case mnemonic for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::LdArg => "ldarg",
            Opcode::LdArgA => "ldarga",
            Opcode::LdLoc => "ldloc",
            Opcode::LdLocA => "ldloca",
            Opcode::StLoc => "stloc",
            Opcode::LdFld => "ldfld",
            Opcode::LdFldA => "ldflda",
            Opcode::LdsFld => "ldsfld",
            Opcode::LdsFldA => "ldsflda",
            Opcode::StFld => "stfld",
            Opcode::StsFld => "stsfld",
            Opcode::LdElem => "ldelem",
            Opcode::StElem => "stelem",
            Opcode::LdcI4 => "ldc.i4",
            Opcode::LdcR4 => "ldc.r4",
            Opcode::LdStr => "ldstr",
            Opcode::Dup => "dup",
            Opcode::Pop => "pop",
            Opcode::Call => "call",
            Opcode::NewObj => "newobj",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Rem => "rem",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Shl => "shl",
            Opcode::Shr => "shr",
            Opcode::Neg => "neg",
            Opcode::Not => "not",
            Opcode::Ceq => "ceq",
            Opcode::Cgt => "cgt",
            Opcode::Clt => "clt",
            Opcode::Conv => "conv",
            Opcode::Br => "br",
            Opcode::BrTrue => "brtrue",
            Opcode::BrFalse => "brfalse",
            Opcode::Switch => "switch",
            Opcode::Ret => "ret",
        }
    }
}

/// A resolved instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand.
    None,
    /// Integer constant (`ldc.i4`, `ldarg`/`ldloc` slot shortcuts resolved
    /// to [`Operand::Local`] by the decoder).
    Int(i64),
    /// Float constant.
    Float(f32),
    /// String constant. Shader code may not contain string data; the
    /// translator rejects it.
    Str(String),
    /// Resolved field token.
    Field(FieldId),
    /// Resolved method token.
    Method(MethodId),
    /// Resolved type token.
    Type(TypeId),
    /// Argument or local-variable slot index.
    Local(u16),
    /// Absolute byte offset of a branch destination.
    Target(u32),
    /// Branch-destination table (`switch`).
    Targets(Vec<u32>),
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Operation.
    pub opcode: Opcode,
    /// Resolved operand.
    pub operand: Operand,
    /// Byte offset of this instruction within the method body.
    pub offset: u32,
}

impl Instruction {
    /// Convenience constructor.
    pub fn new(opcode: Opcode, operand: Operand, offset: u32) -> Self {
        Self {
            opcode,
            operand,
            offset,
        }
    }
}

/// Arena of all type/field/method declarations reachable by a shader program.
#[derive(Debug, Clone, Default)]
pub struct Module {
    types: Vec<TypeDef>,
    fields: Vec<FieldDef>,
    methods: Vec<MethodDef>,
}

impl Module {
    /// An empty module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a type declaration and returns its id. The declaring type's
    /// nested list is not maintained; nesting is expressed through
    /// [`TypeDef::declaring_type`] only.
    pub fn add_type(&mut self, def: TypeDef) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(def);
        id
    }

    /// Adds a field and appends it to its declaring type's field list.
    pub fn add_field(&mut self, def: FieldDef) -> FieldId {
        let id = FieldId(self.fields.len() as u32);
        let declaring = def.declaring_type;
        self.fields.push(def);
        self.types[declaring.0 as usize].fields.push(id);
        id
    }

    /// Adds a method and appends it to its declaring type's method list.
    pub fn add_method(&mut self, def: MethodDef) -> MethodId {
        let id = MethodId(self.methods.len() as u32);
        let declaring = def.declaring_type;
        self.methods.push(def);
        self.types[declaring.0 as usize].methods.push(id);
        id
    }

    /// Replaces a method's decoded body. Front ends declare methods first
    /// and attach bodies once all referenced tokens can be resolved.
    pub fn set_method_body(&mut self, id: MethodId, body: Vec<Instruction>) {
        self.methods[id.0 as usize].body = body;
    }

    /// Clones `ty` with `args` substituted as its generic arguments and
    /// returns the id of the instantiation.
    pub fn instantiate(&mut self, ty: TypeId, args: Vec<TypeId>) -> TypeId {
        let mut def = self.ty(ty).clone();
        def.generic_args = args;
        self.add_type(def)
    }

    /// Looks up a type declaration.
    pub fn ty(&self, id: TypeId) -> &TypeDef {
        &self.types[id.0 as usize]
    }

    /// Looks up a field declaration.
    pub fn field(&self, id: FieldId) -> &FieldDef {
        &self.fields[id.0 as usize]
    }

    /// Looks up a method declaration.
    pub fn method(&self, id: MethodId) -> &MethodDef {
        &self.methods[id.0 as usize]
    }

    /// Number of declared types.
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// The primitive classification of `id`, if it is a primitive type.
    pub fn primitive_of(&self, id: TypeId) -> Option<Primitive> {
        match self.ty(id).kind {
            TypeKind::Primitive(p) => Some(p),
            _ => None,
        }
    }

    /// True for struct, primitive and intrinsic types; false for classes,
    /// arrays and generic parameters.
    pub fn is_value_type(&self, id: TypeId) -> bool {
        matches!(
            self.ty(id).kind,
            TypeKind::Primitive(_) | TypeKind::Struct | TypeKind::Intrinsic { .. }
        )
    }
}
