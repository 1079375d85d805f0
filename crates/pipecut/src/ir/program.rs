use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::ir::attr::AttrValue;

/// Scalar element types carried by dense variable declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    I1,
    Si8,
    Ui8,
    Si32,
    Si64,
    Bf16,
    F16,
    F32,
    F64,
}

/// Non-tensor control object kinds.
///
/// Declarations of these kinds carry no shape or dtype semantics; the
/// re-materializer copies them as kind-only declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpaqueKind {
    Reader,
    StepScopes,
    TensorArray,
    FeedMinibatch,
    FetchList,
}

/// Training metadata carried only by parameter declarations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParamAttrs {
    pub trainable: bool,
    pub optimize_attrs: BTreeMap<String, AttrValue>,
    pub regularizer: Option<String>,
    pub need_clip: bool,
    pub do_model_average: bool,
}

/// Declared kind of a variable: ordinary dense tensor, trainable parameter,
/// or opaque control object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VarKind {
    Dense {
        shape: Vec<i64>,
        dtype: DType,
        lod_level: u32,
    },
    Parameter {
        shape: Vec<i64>,
        dtype: DType,
        lod_level: u32,
        attrs: ParamAttrs,
    },
    Opaque(OpaqueKind),
}

/// A variable declaration within one block.
///
/// Kind and persistence are fixed at creation; the same name may appear as a
/// distinct declaration in a different program after splitting, referring to
/// the same logical data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDesc {
    pub name: String,
    pub kind: VarKind,
    pub persistable: bool,
}

impl VarDesc {
    pub fn dense(name: impl Into<String>, shape: Vec<i64>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            kind: VarKind::Dense {
                shape,
                dtype,
                lod_level: 0,
            },
            persistable: false,
        }
    }

    pub fn parameter(name: impl Into<String>, shape: Vec<i64>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            kind: VarKind::Parameter {
                shape,
                dtype,
                lod_level: 0,
                attrs: ParamAttrs {
                    trainable: true,
                    ..ParamAttrs::default()
                },
            },
            persistable: true,
        }
    }

    pub fn opaque(name: impl Into<String>, kind: OpaqueKind) -> Self {
        Self {
            name: name.into(),
            kind: VarKind::Opaque(kind),
            persistable: false,
        }
    }

    pub fn persistable(mut self, persistable: bool) -> Self {
        self.persistable = persistable;
        self
    }

    pub fn is_parameter(&self) -> bool {
        matches!(self.kind, VarKind::Parameter { .. })
    }
}

/// Role tag classifying an operator's place in the training step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpRole {
    Forward,
    Backward,
    Optimize,
    Other,
}

/// One named input or output slot: an ordered list of variable names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub name: String,
    pub args: SmallVec<[String; 2]>,
}

impl Slot {
    pub fn new(name: impl Into<String>, args: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.into(),
            args: args.into_iter().collect(),
        }
    }
}

/// Scheduling annotations consumed by the external executor when building
/// hardware stream dependency graphs. Pure hints; no ownership semantics.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionAttrs {
    /// Logical stream the operator should run on (`None` means the default
    /// compute stream).
    pub execution_stream: Option<String>,
    pub stream_priority: i32,
    /// When set, the executor records a completion event after this operator.
    pub force_record_event: bool,
    /// Name of the completion event this operator records, if any.
    pub event_to_record: Option<String>,
    /// Events that must complete before this operator may run.
    pub events_to_wait: Vec<String>,
}

/// One operation over named variables.
///
/// Operators are positioned by dense index within their block; index order is
/// execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    pub op_type: String,
    pub role: OpRole,
    pub inputs: Vec<Slot>,
    pub outputs: Vec<Slot>,
    pub attrs: BTreeMap<String, AttrValue>,
    pub exec: ExecutionAttrs,
}

impl Operator {
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            role: OpRole::Other,
            inputs: Vec::new(),
            outputs: Vec::new(),
            attrs: BTreeMap::new(),
            exec: ExecutionAttrs::default(),
        }
    }

    pub fn with_role(mut self, role: OpRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_input(mut self, slot: impl Into<String>, args: &[&str]) -> Self {
        self.inputs
            .push(Slot::new(slot, args.iter().map(|a| a.to_string())));
        self
    }

    pub fn with_output(mut self, slot: impl Into<String>, args: &[&str]) -> Self {
        self.outputs
            .push(Slot::new(slot, args.iter().map(|a| a.to_string())));
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: AttrValue) {
        self.attrs.insert(name.into(), value);
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    /// Argument names of the named input slot, if present.
    pub fn input(&self, slot: &str) -> Option<&[String]> {
        self.inputs
            .iter()
            .find(|s| s.name == slot)
            .map(|s| s.args.as_slice())
    }

    /// Argument names of the named output slot, if present.
    pub fn output(&self, slot: &str) -> Option<&[String]> {
        self.outputs
            .iter()
            .find(|s| s.name == slot)
            .map(|s| s.args.as_slice())
    }

    /// All input variable names in slot order.
    pub fn input_arg_names(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .flat_map(|slot| slot.args.iter().map(String::as_str))
    }

    /// All output variable names in slot order.
    pub fn output_arg_names(&self) -> impl Iterator<Item = &str> {
        self.outputs
            .iter()
            .flat_map(|slot| slot.args.iter().map(String::as_str))
    }
}

/// An ordered sequence of operators plus the variable declarations they
/// reference. Blocks form an arena inside [`Program`]; `parent_idx` gives the
/// lexical nesting for control-flow bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub idx: usize,
    pub parent_idx: Option<usize>,
    pub vars: BTreeMap<String, VarDesc>,
    pub ops: Vec<Operator>,
}

impl Block {
    pub fn var(&self, name: &str) -> Option<&VarDesc> {
        self.vars.get(name)
    }

    pub fn has_var(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Declares a variable, keeping any existing declaration of the same name.
    pub fn declare_var(&mut self, desc: VarDesc) -> &VarDesc {
        self.vars.entry(desc.name.clone()).or_insert(desc)
    }

    pub fn append_op(&mut self, op: Operator) {
        self.ops.push(op);
    }
}

/// An ordered sequence of blocks; block 0 is the global entry block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub blocks: Vec<Block>,
}

impl Program {
    /// Creates a program with an empty global block.
    pub fn new() -> Self {
        Self {
            blocks: vec![Block {
                idx: 0,
                parent_idx: None,
                vars: BTreeMap::new(),
                ops: Vec::new(),
            }],
        }
    }

    pub fn global_block(&self) -> &Block {
        &self.blocks[0]
    }

    pub fn global_block_mut(&mut self) -> &mut Block {
        &mut self.blocks[0]
    }

    pub fn block(&self, idx: usize) -> Option<&Block> {
        self.blocks.get(idx)
    }

    pub fn block_mut(&mut self, idx: usize) -> Option<&mut Block> {
        self.blocks.get_mut(idx)
    }

    /// Appends a fresh block with the given parent and returns its index.
    pub fn create_block(&mut self, parent_idx: Option<usize>) -> usize {
        let idx = self.blocks.len();
        self.blocks.push(Block {
            idx,
            parent_idx,
            vars: BTreeMap::new(),
            ops: Vec::new(),
        });
        idx
    }

    /// Resolves a variable name in the given block, walking the parent chain
    /// when the block does not declare it directly.
    pub fn find_var_recursive(&self, block_idx: usize, name: &str) -> Option<&VarDesc> {
        let mut cursor = self.blocks.get(block_idx);
        while let Some(block) = cursor {
            if let Some(var) = block.var(name) {
                return Some(var);
            }
            cursor = block.parent_idx.and_then(|parent| self.blocks.get(parent));
        }
        None
    }
}
