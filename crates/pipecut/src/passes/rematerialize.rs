//! Copying operators and their transitive variable declarations across
//! program boundaries.

use thiserror::Error;

use crate::ir::{Operator, Program, VarDesc, VarKind};

/// Errors surfaced while re-materializing declarations. A broken source
/// program is a precondition violation, not something this pass repairs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RematerializeError {
    #[error("variable '{name}' is not declared in block {block_idx} or any ancestor")]
    UnresolvedVariable { name: String, block_idx: usize },
}

/// Copies a declaration into the destination block, preserving declaration
/// semantics: parameters keep their training metadata, dense variables keep
/// shape/dtype/lod-level, opaque control kinds get kind-only declarations.
/// A name the destination already declares is left untouched.
fn create_var(dst: &mut Program, dst_block_idx: usize, src_var: &VarDesc) {
    let copied = match &src_var.kind {
        VarKind::Opaque(kind) => VarDesc {
            name: src_var.name.clone(),
            kind: VarKind::Opaque(*kind),
            persistable: src_var.persistable,
        },
        VarKind::Dense { .. } | VarKind::Parameter { .. } => src_var.clone(),
    };
    if let Some(block) = dst.block_mut(dst_block_idx) {
        block.declare_var(copied);
    }
}

/// Appends a structural copy of `op` to the destination block and declares
/// every input/output variable it references that the destination block does
/// not yet declare.
///
/// Without `force_create`, only names the source block declares directly are
/// copied (names resolved through an ancestor stay references). With
/// `force_create`, declarations are resolved through the source's ancestor
/// chain, and a name with no reachable declaration is an
/// [`RematerializeError::UnresolvedVariable`].
///
/// Idempotent: re-invoking on an operator whose variables are already
/// declared in the destination appends another operator copy only when the
/// caller does so, and never duplicates declarations.
pub fn clone_op_into(
    src: &Program,
    src_block_idx: usize,
    dst: &mut Program,
    dst_block_idx: usize,
    op: &Operator,
    force_create: bool,
) -> Result<(), RematerializeError> {
    let arg_names: Vec<String> = op
        .input_arg_names()
        .chain(op.output_arg_names())
        .map(str::to_string)
        .collect();

    for name in &arg_names {
        let already_declared = dst
            .block(dst_block_idx)
            .is_some_and(|block| block.has_var(name));
        if already_declared {
            continue;
        }

        let src_block = src.block(src_block_idx);
        let direct = src_block.and_then(|block| block.var(name));
        let resolved = if force_create {
            match direct.or_else(|| src.find_var_recursive(src_block_idx, name)) {
                Some(var) => Some(var),
                None => {
                    return Err(RematerializeError::UnresolvedVariable {
                        name: name.clone(),
                        block_idx: src_block_idx,
                    })
                }
            }
        } else {
            direct
        };

        if let Some(src_var) = resolved {
            create_var(dst, dst_block_idx, src_var);
        }
    }

    if let Some(block) = dst.block_mut(dst_block_idx) {
        block.append_op(op.clone());
    }
    Ok(())
}
