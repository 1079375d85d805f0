//! Cross-stream ordering for pipeline communication operators.
//!
//! Send/receive operators run on communication streams; without explicit
//! ordering against the default compute stream they can race with the
//! producers and consumers of their buffers. Two mutually exclusive
//! strategies prepare a program: conservative barrier insertion, or tagging
//! the communication ops with their own execution streams and delegating
//! ordering to the executor's stream guarantees.

use thiserror::Error;

use crate::ir::{op_types, AttrError, AttrValue, OpRole, Operator, Program};

/// Attribute keys consumed by the executor on communication operators.
pub const USE_CALC_STREAM: &str = "use_calc_stream";
pub const RING_ID: &str = "ring_id";
pub const DYNAMIC_SHAPE: &str = "dynamic_shape";
/// Marks a comm-stream sync inserted for a forward-role send so the
/// compaction step can later replace it with a `nop`.
pub const PIPELINE_FLAG: &str = "pipeline_flag";

/// Shared stream every receive runs on under the overlap strategy.
pub const RECV_STREAM: &str = "recv_stream";
const SEND_STREAM_PREFIX: &str = "send_stream_";

/// Logical stream names; the executor creates the concrete streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Calc,
    Mp,
    Sharding,
}

impl StreamType {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamType::Calc => "default",
            StreamType::Mp => "auto_parallel_mp",
            StreamType::Sharding => "auto_parallel_sharding",
        }
    }
}

/// How communication operators are ordered against computation. Exactly one
/// strategy is applied per program compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Insert explicit calc-stream and comm-stream barriers around sends.
    ExplicitBarrier,
    /// Tag sends/recvs with their own streams; no barrier operators.
    Overlap,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Attr(#[from] AttrError),
    #[error("send operator at block {block_idx} index {index} is missing the ring_id attribute")]
    MissingRingId { block_idx: usize, index: usize },
    #[error("send operator at block {block_idx} index {index} has no input variable")]
    SendWithoutInput { block_idx: usize, index: usize },
    #[error(
        "backward send at block {block_idx} index {index} has no downstream optimize operator \
         to anchor its comm-stream sync"
    )]
    MissingOptimizeAnchor { block_idx: usize, index: usize },
}

/// Applies the selected strategy to the program.
pub fn apply_sync_strategy(program: &mut Program, strategy: SyncStrategy) -> Result<(), SyncError> {
    match strategy {
        SyncStrategy::ExplicitBarrier => insert_pipeline_sync(program),
        SyncStrategy::Overlap => overlap_send_recv(program),
    }
}

/// Explicit-barrier strategy.
///
/// Every send is made asynchronous relative to the compute stream, preceded
/// by a `sync_calc_stream` barrier and followed by a `sync_comm_stream`
/// barrier. Forward-role sends get their comm sync immediately after, tagged
/// for later compaction; backward-role sends defer it to just before the
/// first optimize-role operator, since their outputs are only needed once
/// optimization begins. Once the first backward-role receive is identified,
/// tagged comm syncs before it collapse to `nop` operators anchored at the
/// receive (keeping their variables alive for GC purposes without a
/// barrier).
pub fn insert_pipeline_sync(program: &mut Program) -> Result<(), SyncError> {
    for block_idx in 0..program.blocks.len() {
        let block = &mut program.blocks[block_idx];
        let first_optimize = block.ops.iter().position(|op| op.role == OpRole::Optimize);

        let ops = std::mem::take(&mut block.ops);
        let mut rebuilt: Vec<Operator> = Vec::with_capacity(ops.len());
        let mut deferred: Vec<Operator> = Vec::new();

        for (index, mut op) in ops.into_iter().enumerate() {
            if op.op_type == op_types::SEND || op.op_type == op_types::RECV {
                // Pipelines can hang when comm ops infer shapes dynamically.
                op.set_attr(DYNAMIC_SHAPE, AttrValue::Bool(false));
            }

            if Some(index) == first_optimize {
                rebuilt.append(&mut deferred);
            }

            if op.op_type != op_types::SEND {
                rebuilt.push(op);
                continue;
            }

            op.set_attr(USE_CALC_STREAM, AttrValue::Bool(false));
            let role = op.role;
            let ring_id = op
                .attr(RING_ID)
                .ok_or(SyncError::MissingRingId { block_idx, index })?
                .as_int()?;
            let var = op
                .input_arg_names()
                .next()
                .map(str::to_string)
                .ok_or(SyncError::SendWithoutInput { block_idx, index })?;

            rebuilt.push(barrier_op(op_types::SYNC_CALC_STREAM, &var, role));
            rebuilt.push(op);

            let mut sync_comm = barrier_op(
                op_types::SYNC_COMM_STREAM,
                &var,
                if role == OpRole::Backward {
                    OpRole::Optimize
                } else {
                    OpRole::Backward
                },
            )
            .with_attr(RING_ID, AttrValue::Int(ring_id));

            if role == OpRole::Backward {
                if first_optimize.is_none() {
                    return Err(SyncError::MissingOptimizeAnchor { block_idx, index });
                }
                deferred.push(sync_comm);
            } else {
                if role == OpRole::Forward {
                    sync_comm.set_attr(PIPELINE_FLAG, AttrValue::Bool(true));
                }
                rebuilt.push(sync_comm);
            }
        }
        rebuilt.append(&mut deferred);

        block.ops = compact_forward_syncs(block_idx, rebuilt);
    }
    Ok(())
}

/// Replaces tagged forward comm syncs ahead of the first backward receive
/// with `nop` anchors placed immediately before that receive.
fn compact_forward_syncs(block_idx: usize, ops: Vec<Operator>) -> Vec<Operator> {
    let backward_recv = ops
        .iter()
        .position(|op| op.op_type == op_types::RECV && op.role == OpRole::Backward);
    let Some(recv_idx) = backward_recv else {
        log::debug!("block {block_idx}: no backward recv, keeping forward comm-stream syncs");
        return ops;
    };

    let mut compacted = Vec::with_capacity(ops.len());
    let mut anchors: Vec<Operator> = Vec::new();
    for (index, op) in ops.into_iter().enumerate() {
        if index == recv_idx {
            compacted.append(&mut anchors);
        }
        if index < recv_idx
            && op.op_type == op_types::SYNC_COMM_STREAM
            && op.has_attr(PIPELINE_FLAG)
        {
            if let Some(var) = op.output_arg_names().next().map(str::to_string) {
                anchors.push(barrier_op(op_types::NOP, &var, OpRole::Backward));
            }
            continue;
        }
        compacted.push(op);
    }
    compacted
}

fn barrier_op(op_type: &str, var: &str, role: OpRole) -> Operator {
    Operator::new(op_type)
        .with_role(role)
        .with_input("X", &[var])
        .with_output("Out", &[var])
}

/// Overlap strategy: no barriers; each send runs on a per-ring stream and
/// every receive shares one stream. Correctness is delegated to the
/// executor's stream-ordering guarantees. Tags are a pure function of the
/// operator, so re-running the pass yields identical annotations.
pub fn overlap_send_recv(program: &mut Program) -> Result<(), SyncError> {
    for (block_idx, block) in program.blocks.iter_mut().enumerate() {
        for (index, op) in block.ops.iter_mut().enumerate() {
            match op.op_type.as_str() {
                op_types::SEND => {
                    op.set_attr(DYNAMIC_SHAPE, AttrValue::Bool(false));
                    op.set_attr(USE_CALC_STREAM, AttrValue::Bool(true));
                    let ring_id = op
                        .attr(RING_ID)
                        .ok_or(SyncError::MissingRingId { block_idx, index })?
                        .as_int()?;
                    op.exec.execution_stream = Some(format!("{SEND_STREAM_PREFIX}{ring_id}"));
                    op.exec.stream_priority = 0;
                }
                op_types::RECV => {
                    op.set_attr(DYNAMIC_SHAPE, AttrValue::Bool(false));
                    op.set_attr(USE_CALC_STREAM, AttrValue::Bool(true));
                    op.exec.execution_stream = Some(RECV_STREAM.to_string());
                    op.exec.stream_priority = 0;
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Marks `recorder` to emit its completion event and makes `waiter` wait on
/// it. Setting the record flag twice is a no-op; the waiter's existing
/// wait-list order is preserved and the event is appended only when absent.
/// Recorders without an assigned event name leave the waiter unchanged.
pub fn add_event_dependency(recorder: &mut Operator, waiter: &mut Operator) {
    if !recorder.exec.force_record_event {
        recorder.exec.force_record_event = true;
    }
    if let Some(event) = &recorder.exec.event_to_record {
        if !waiter.exec.events_to_wait.contains(event) {
            waiter.exec.events_to_wait.push(event.clone());
        }
    }
}
