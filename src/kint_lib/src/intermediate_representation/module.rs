use std::collections::BTreeMap;

use fnv::FnvHashMap;

use super::*;

/// A function parameter.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct Parameter {
    /// The parameter name.
    pub name: String,
    /// The parameter type.
    pub ty: Type,
}

/// A basic block: a list of instructions ended by exactly one terminator.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct Blk {
    /// The instructions of the block in source order.
    pub defs: Vec<Term<Def>>,
    /// The terminator of the block.
    pub jmp: Term<Jmp>,
}

/// A function. Functions without blocks are declarations.
///
/// Functions are single-entry: the first block is the entry point.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct Function {
    /// The symbol name of the function.
    pub name: String,
    /// The function parameters.
    #[serde(default)]
    pub params: Vec<Term<Parameter>>,
    /// Whether the function takes a variable number of arguments.
    #[serde(default)]
    pub variadic: bool,
    /// The return type.
    pub return_ty: Type,
    /// The basic blocks. The first block is the entry point.
    pub blocks: Vec<Term<Blk>>,
}

impl Function {
    /// Whether this function is a declaration without a body.
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The entry block of the function, if it has a body.
    pub fn entry_block(&self) -> Option<&Term<Blk>> {
        self.blocks.first()
    }

    /// Find a block by its term ID.
    pub fn block(&self, tid: &Tid) -> Option<&Term<Blk>> {
        self.blocks.iter().find(|blk| blk.tid == *tid)
    }

    /// Iterate over all instructions of the function in source order.
    pub fn defs(&self) -> impl Iterator<Item = &Term<Def>> {
        self.blocks.iter().flat_map(|blk| blk.term.defs.iter())
    }
}

/// A global variable.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct Global {
    /// The name of the global variable.
    pub name: String,
    /// The type of the variable (not of the pointer to it).
    pub ty: Type,
    /// The static initializer, if any.
    #[serde(default)]
    pub init: Option<Constant>,
    /// Whether the global has internal linkage.
    /// Internal globals are scoped with the module name when generating identifiers.
    #[serde(default)]
    pub internal: bool,
}

/// A single IR module.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Module {
    /// The module name. The stem (without directories and extension)
    /// scopes internal-linkage identifiers.
    pub name: String,
    /// The data layout of the target.
    #[serde(default)]
    pub layout: DataLayout,
    /// The named struct types of the module.
    #[serde(default)]
    pub types: BTreeMap<String, StructDef>,
    /// The global variables of the module.
    #[serde(default)]
    pub globals: Vec<Term<Global>>,
    /// The functions of the module.
    pub functions: Vec<Function>,
    /// Per-term metadata, keyed by term ID and then by metadata key.
    #[serde(default)]
    pub metadata: BTreeMap<Tid, BTreeMap<String, MetadataValue>>,
}

impl Module {
    /// The module name stripped of directories and a file extension.
    pub fn stem(&self) -> &str {
        let name = self.name.rsplit('/').next().unwrap_or(&self.name);
        name.split('.').next().unwrap_or(name)
    }

    /// Look up a metadata entry of a term.
    pub fn get_metadata(&self, tid: &Tid, key: &str) -> Option<&MetadataValue> {
        self.metadata.get(tid)?.get(key)
    }

    /// Look up a string-valued metadata entry of a term.
    pub fn get_metadata_str(&self, tid: &Tid, key: &str) -> Option<&str> {
        self.get_metadata(tid, key)?.as_str()
    }

    /// Attach a metadata entry to a term, replacing any previous value under the key.
    pub fn set_metadata(&mut self, tid: &Tid, key: &str, value: MetadataValue) {
        self.metadata
            .entry(tid.clone())
            .or_default()
            .insert(key.to_string(), value);
    }

    /// Remove a metadata entry from a term.
    pub fn clear_metadata(&mut self, tid: &Tid, key: &str) {
        if let Some(entries) = self.metadata.get_mut(tid) {
            entries.remove(key);
            if entries.is_empty() {
                self.metadata.remove(tid);
            }
        }
    }

    /// Find a function by name.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|func| func.name == name)
    }

    /// Find a global variable by name.
    pub fn global(&self, name: &str) -> Option<&Term<Global>> {
        self.globals.iter().find(|global| global.term.name == name)
    }
}

/// An ordered collection of IR modules forming the analyzed program.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Project {
    /// The modules of the project.
    pub modules: Vec<Module>,
}

/// An index over the values of one function,
/// mapping term IDs to their defining instruction or parameter
/// and resolving operand types.
pub struct ValueIndex<'a> {
    module: &'a Module,
    defs: FnvHashMap<&'a Tid, &'a Term<Def>>,
    params: FnvHashMap<&'a Tid, &'a Term<Parameter>>,
}

impl<'a> ValueIndex<'a> {
    /// Build the index for the given function.
    pub fn new(module: &'a Module, function: &'a Function) -> ValueIndex<'a> {
        let mut defs = FnvHashMap::default();
        for blk in &function.blocks {
            for def in &blk.term.defs {
                defs.insert(&def.tid, def);
            }
        }
        let mut params = FnvHashMap::default();
        for param in &function.params {
            params.insert(&param.tid, param);
        }
        ValueIndex {
            module,
            defs,
            params,
        }
    }

    /// The module the indexed function belongs to.
    pub fn module(&self) -> &'a Module {
        self.module
    }

    /// Look up the instruction defining the given value.
    pub fn def(&self, tid: &Tid) -> Option<&'a Term<Def>> {
        self.defs.get(tid).copied()
    }

    /// Look up the parameter with the given term ID.
    pub fn param(&self, tid: &Tid) -> Option<&'a Term<Parameter>> {
        self.params.get(tid).copied()
    }

    /// Compute the type of an operand.
    ///
    /// Returns `None` for values without a register type
    /// (e.g. the aggregate result of a trapping-arithmetic intrinsic).
    pub fn operand_type(&self, operand: &Operand) -> Option<Type> {
        match operand {
            Operand::Const(constant) => self.constant_type(constant),
            Operand::Value(tid) => self.value_type(tid),
        }
    }

    fn constant_type(&self, constant: &Constant) -> Option<Type> {
        match constant {
            Constant::Int(value) => Some(Type::Int(value.bitsize())),
            Constant::NullPtr => Some(Type::pointer(Type::Void)),
            Constant::Function(name) => {
                // The precise signature is irrelevant for the analyses;
                // only pointer-ness matters.
                let _ = name;
                Some(Type::pointer(Type::Function {
                    ret: Box::new(Type::Void),
                    params: Vec::new(),
                    variadic: false,
                }))
            }
            Constant::GlobalAddress(name) => {
                let global = self.module.global(name)?;
                Some(Type::pointer(global.term.ty.clone()))
            }
            Constant::Str(_) => Some(Type::pointer(Type::int(8))),
            Constant::Struct(_) | Constant::Array(_) => None,
            Constant::Undef(ty) => Some(ty.clone()),
        }
    }

    fn value_type(&self, tid: &Tid) -> Option<Type> {
        if let Some(param) = self.param(tid) {
            return Some(param.term.ty.clone());
        }
        let def = self.def(tid)?;
        match &def.term {
            Def::BinOp { lhs, .. } => self.operand_type(lhs),
            Def::Cmp { .. } => Some(Type::int(1)),
            Def::Cast { to_ty, .. } => Some(to_ty.clone()),
            Def::Select { true_value, .. } => self.operand_type(true_value),
            Def::Phi { ty, .. } => Some(ty.clone()),
            Def::Load { ty, .. } => Some(ty.clone()),
            Def::Store { .. } => None,
            Def::Call { return_ty, .. } => match return_ty {
                Type::Void => None,
                ty => Some(ty.clone()),
            },
            Def::GetElementPtr {
                pointee_ty,
                indices,
                ..
            } => {
                // The first index steps over the base pointer and leaves the type unchanged.
                let rest = indices.get(1..).unwrap_or(&[]);
                Some(Type::pointer(
                    self.indexed_type(pointee_ty, rest).unwrap_or(Type::Void),
                ))
            }
            Def::ExtractValue { aggregate, index } => {
                let agg_tid = aggregate.value_tid()?;
                let agg_def = self.def(agg_tid)?;
                if let Def::Call {
                    target: Callee::Direct(name),
                    args,
                    ..
                } = &agg_def.term
                {
                    if name.contains(".with.overflow.") {
                        return match index {
                            0 => self.operand_type(args.first()?),
                            1 => Some(Type::int(1)),
                            _ => None,
                        };
                    }
                }
                None
            }
            Def::Alloca { allocated_ty } => Some(Type::pointer(allocated_ty.clone())),
        }
    }

    /// Walk an aggregate type along a list of member indices.
    ///
    /// Non-constant indices are only allowed while the current type is an array.
    pub fn indexed_type(&self, base: &Type, indices: &[Operand]) -> Option<Type> {
        let mut current = base.clone();
        for index in indices {
            current = match current {
                Type::Struct(name) => {
                    let def = self.module.types.get(&name)?;
                    let field = index.constant_int()?.try_to_u64().ok()? as usize;
                    def.fields.get(field)?.clone()
                }
                Type::Array { elem, .. } => *elem,
                _ => return None,
            };
        }
        Some(current)
    }

    /// The register bit width of an operand: the declared width for integers,
    /// the pointer width for pointers and function values.
    pub fn bit_width(&self, operand: &Operand) -> Option<BitSize> {
        let ty = self.operand_type(operand)?;
        self.module.layout.bit_size(&ty)
    }
}
