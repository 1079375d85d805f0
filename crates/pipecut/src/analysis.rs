//! Per-operator buffer liveness analysis.
//!
//! An operator type may declare some of its input/output slots as
//! "no-need-buffer": the operator never dereferences the underlying storage
//! of names in those slots (a gradient op that only needs shapes, for
//! example). Every other name it touches is load-bearing. With no
//! no-need-buffer information at all, everything is conservatively
//! load-bearing.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::ir::{op_types, Operator, Program};

/// Read-only capability answering which slots of an operator are
/// no-need-buffer. Passed in explicitly so tests can substitute
/// deterministic fixtures.
pub trait NoNeedBufferInference {
    /// Slot names (input or output) whose storage `op` does not dereference.
    /// An empty set means no information: treat every name as load-bearing.
    fn no_need_buffer_slots(&self, op: &Operator) -> HashSet<String>;
}

/// Static slot table keyed by operator type.
#[derive(Debug, Default)]
pub struct StaticNoNeedBufferTable {
    slots: HashMap<String, HashSet<String>>,
}

impl StaticNoNeedBufferTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        op_type: impl Into<String>,
        slots: impl IntoIterator<Item = String>,
    ) {
        self.slots
            .entry(op_type.into())
            .or_default()
            .extend(slots);
    }
}

impl NoNeedBufferInference for StaticNoNeedBufferTable {
    fn no_need_buffer_slots(&self, op: &Operator) -> HashSet<String> {
        self.slots.get(&op.op_type).cloned().unwrap_or_default()
    }
}

/// Which of one operator's variable names are load-bearing.
///
/// Built once per operator instance; the slot lookup is pure given the
/// operator's type, slots, and attributes, so the result is cached here.
#[derive(Debug, Default)]
pub struct OpInOutInfo {
    built: bool,
    no_need_buffer_slots: HashSet<String>,
    load_bearing_names: HashSet<String>,
}

impl OpInOutInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Queries the slot table and records which names are load-bearing.
    /// Re-invoking on an already-built info is a no-op.
    pub fn build_info(&mut self, op: &Operator, table: &dyn NoNeedBufferInference) {
        if self.built {
            return;
        }
        self.built = true;
        self.no_need_buffer_slots = table.no_need_buffer_slots(op);
        if self.no_need_buffer_slots.is_empty() {
            return;
        }

        for slot in op.inputs.iter().chain(op.outputs.iter()) {
            if !self.no_need_buffer_slots.contains(&slot.name) {
                self.load_bearing_names
                    .extend(slot.args.iter().cloned());
            }
        }
    }

    /// Whether `name`'s storage must be retained for this operator.
    pub fn is_needed(&self, name: &str) -> bool {
        self.no_need_buffer_slots.is_empty() || self.load_bearing_names.contains(name)
    }
}

/// Whether the named variable is eligible for collection: declared (possibly
/// in an ancestor block) and not persistable.
pub fn var_can_be_deleted(program: &Program, block_idx: usize, name: &str) -> bool {
    program
        .find_var_recursive(block_idx, name)
        .is_some_and(|var| !var.persistable)
}

/// Operator types whose buffers are not real data dependencies; skipped when
/// collecting a program's required variables.
const CONTROL_OP_TYPES: [&str; 4] = [
    op_types::SYNC_COMM_STREAM,
    op_types::CONDITIONAL_BLOCK,
    op_types::NOP,
    op_types::WHILE,
];

/// Every variable name a program reads or writes that is deletable and
/// load-bearing. This is the per-job-type required-variable set consumed by
/// the skip-GC sweep.
pub fn program_required_vars(
    program: &Program,
    table: &dyn NoNeedBufferInference,
) -> BTreeSet<String> {
    let mut required = BTreeSet::new();
    for block in &program.blocks {
        for op in &block.ops {
            if CONTROL_OP_TYPES.contains(&op.op_type.as_str()) {
                continue;
            }

            let mut op_info = OpInOutInfo::new();
            op_info.build_info(op, table);
            for name in op.input_arg_names().chain(op.output_arg_names()) {
                if var_can_be_deleted(program, block.idx, name) && op_info.is_needed(name) {
                    required.insert(name.to_string());
                }
            }
        }
    }
    required
}
