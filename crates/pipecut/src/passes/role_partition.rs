//! Three-way split of a training program into forward, backward, and
//! optimize sub-programs, the units a pipeline schedule runs as jobs.

use anyhow::{bail, Context, Result};

use crate::ir::{op_types, OpRole, Operator, Program};
use crate::passes::rematerialize::clone_op_into;
use crate::passes::sync::{apply_sync_strategy, SyncStrategy};

/// Splits `program` by operator role into `[forward, backward, optimize]`
/// sub-programs after applying the chosen sync strategy.
///
/// The result is always returned in that order, even when a sub-program is
/// empty. Fetch operators carry no role and are routed afterwards to
/// whichever sub-program declares their input. Nested source blocks map to
/// freshly created blocks preserving the parent index. An operator whose
/// role is not forward/backward/optimize is a fatal configuration error.
pub fn program_for_pipeline(
    program: &mut Program,
    strategy: SyncStrategy,
) -> Result<[Program; 3]> {
    apply_sync_strategy(program, strategy)
        .with_context(|| format!("applying {strategy:?} before role partition"))?;

    let mut fwd = Program::new();
    let mut bwd = Program::new();
    let mut opt = Program::new();

    for block_idx in 0..program.blocks.len() {
        let (fwd_ops, bwd_ops, opt_ops) = split_ops_by_role(program, block_idx)?;

        let parent_idx = program.blocks[block_idx].parent_idx;
        let fwd_block = target_block(&mut fwd, block_idx, parent_idx, &fwd_ops);
        let bwd_block = target_block(&mut bwd, block_idx, parent_idx, &bwd_ops);
        let opt_block = target_block(&mut opt, block_idx, parent_idx, &opt_ops);

        for op in &fwd_ops {
            clone_op_into(program, block_idx, &mut fwd, fwd_block, op, false)?;
        }
        for op in &bwd_ops {
            clone_op_into(program, block_idx, &mut bwd, bwd_block, op, false)?;
        }
        for op in &opt_ops {
            clone_op_into(program, block_idx, &mut opt, opt_block, op, false)?;
        }

        route_fetch_ops(
            program,
            block_idx,
            [
                (&mut fwd, fwd_block),
                (&mut bwd, bwd_block),
                (&mut opt, opt_block),
            ],
        )?;
    }

    // The executor contract fixes this order.
    Ok([fwd, bwd, opt])
}

fn is_fetch_op(op: &Operator) -> bool {
    op.op_type == op_types::FETCH
}

/// Classifies one block's operators by role, skipping fetches.
fn split_ops_by_role(
    program: &Program,
    block_idx: usize,
) -> Result<(Vec<Operator>, Vec<Operator>, Vec<Operator>)> {
    let mut fwd_ops = Vec::new();
    let mut bwd_ops = Vec::new();
    let mut opt_ops = Vec::new();
    for op in &program.blocks[block_idx].ops {
        if is_fetch_op(op) {
            continue;
        }
        match op.role {
            OpRole::Forward => fwd_ops.push(op.clone()),
            OpRole::Backward => bwd_ops.push(op.clone()),
            OpRole::Optimize => opt_ops.push(op.clone()),
            OpRole::Other => bail!(
                "op '{}' in block {} has role {:?}, which is not forward, backward, or optimize",
                op.op_type,
                block_idx,
                op.role
            ),
        }
    }
    Ok((fwd_ops, bwd_ops, opt_ops))
}

/// Picks the destination block index for one source block: the global block
/// for block 0, otherwise a fresh child block when the role has any
/// operators (empty roles add no block and fall back to the global block).
fn target_block(
    dst: &mut Program,
    src_block_idx: usize,
    parent_idx: Option<usize>,
    ops: &[Operator],
) -> usize {
    if src_block_idx == 0 || ops.is_empty() {
        0
    } else {
        dst.create_block(parent_idx)
    }
}

/// Routes each fetch operator of the source block to the first sub-program
/// (in forward/backward/optimize order) that can resolve its input
/// variable. A fetch whose input no sub-program declares is dropped.
fn route_fetch_ops(
    program: &Program,
    block_idx: usize,
    targets: [(&mut Program, usize); 3],
) -> Result<()> {
    let fetch_ops: Vec<Operator> = program.blocks[block_idx]
        .ops
        .iter()
        .filter(|op| is_fetch_op(op))
        .cloned()
        .collect();
    if fetch_ops.is_empty() {
        return Ok(());
    }

    let mut targets = targets;
    for fetch_op in &fetch_ops {
        let Some(in_name) = fetch_op.input_arg_names().next() else {
            continue;
        };
        for (dst, dst_block) in targets.iter_mut() {
            if dst.find_var_recursive(*dst_block, in_name).is_some() {
                clone_op_into(program, block_idx, dst, *dst_block, fetch_op, false)?;
                break;
            }
        }
    }
    Ok(())
}
