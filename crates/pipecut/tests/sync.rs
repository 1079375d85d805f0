use pipecut::ir::{op_types, AttrValue, DType, OpRole, Operator, Program, VarDesc};
use pipecut::passes::sync::{
    insert_pipeline_sync, overlap_send_recv, SyncError, DYNAMIC_SHAPE, PIPELINE_FLAG, RING_ID,
    USE_CALC_STREAM,
};

fn assign(from: &str, to: &str, role: OpRole) -> Operator {
    Operator::new("assign")
        .with_role(role)
        .with_input("X", &[from])
        .with_output("Out", &[to])
}

fn send(var: &str, ring_id: i64, role: OpRole) -> Operator {
    Operator::new(op_types::SEND)
        .with_role(role)
        .with_input("X", &[var])
        .with_attr(RING_ID, AttrValue::Int(ring_id))
}

fn recv(var: &str, ring_id: i64, role: OpRole) -> Operator {
    Operator::new(op_types::RECV)
        .with_role(role)
        .with_attr(RING_ID, AttrValue::Int(ring_id))
        .with_output("Out", &[var])
}

/// One pipeline stage: forward compute + send, backward recv + compute +
/// send, one optimize op.
fn stage_program() -> Program {
    let mut program = Program::new();
    let block = program.global_block_mut();
    for name in ["in", "h", "g", "w"] {
        block.declare_var(VarDesc::dense(name, vec![4], DType::F32));
    }
    block.append_op(assign("in", "h", OpRole::Forward));
    block.append_op(send("h", 0, OpRole::Forward));
    block.append_op(recv("g", 1, OpRole::Backward));
    block.append_op(assign("g", "g", OpRole::Backward));
    block.append_op(send("g", 1, OpRole::Backward));
    block.append_op(assign("w", "w", OpRole::Optimize));
    program
}

fn op_types_of(program: &Program) -> Vec<&str> {
    program
        .global_block()
        .ops
        .iter()
        .map(|op| op.op_type.as_str())
        .collect()
}

#[test]
fn barriers_bracket_sends_and_defer_backward_comm_sync() {
    let mut program = stage_program();
    insert_pipeline_sync(&mut program).unwrap();

    // The forward send's comm sync collapsed to a nop anchored at the
    // backward recv; the backward send's comm sync deferred to just before
    // the optimize op.
    assert_eq!(
        op_types_of(&program),
        [
            "assign",
            op_types::SYNC_CALC_STREAM,
            op_types::SEND,
            op_types::NOP,
            op_types::RECV,
            "assign",
            op_types::SYNC_CALC_STREAM,
            op_types::SEND,
            op_types::SYNC_COMM_STREAM,
            "assign",
        ]
    );

    let ops = &program.global_block().ops;
    for op in ops {
        if op.op_type == op_types::SEND || op.op_type == op_types::RECV {
            assert_eq!(op.attr(DYNAMIC_SHAPE).unwrap().as_bool(), Ok(false));
        }
        if op.op_type == op_types::SEND {
            assert_eq!(op.attr(USE_CALC_STREAM).unwrap().as_bool(), Ok(false));
        }
    }

    // The nop keeps the sent variable anchored for GC.
    let nop = &ops[3];
    assert_eq!(nop.input("X").unwrap(), ["h"]);
    assert_eq!(nop.role, OpRole::Backward);

    // The deferred comm sync runs with optimize role on the send's ring.
    let comm = &ops[8];
    assert_eq!(comm.role, OpRole::Optimize);
    assert_eq!(comm.attr(RING_ID).unwrap().as_int(), Ok(1));
    assert!(!comm.has_attr(PIPELINE_FLAG));
}

#[test]
fn forward_comm_sync_is_kept_without_a_backward_recv() {
    let mut program = Program::new();
    {
        let block = program.global_block_mut();
        block.declare_var(VarDesc::dense("h", vec![4], DType::F32));
        block.append_op(assign("h", "h", OpRole::Forward));
        block.append_op(send("h", 0, OpRole::Forward));
    }
    insert_pipeline_sync(&mut program).unwrap();

    assert_eq!(
        op_types_of(&program),
        [
            "assign",
            op_types::SYNC_CALC_STREAM,
            op_types::SEND,
            op_types::SYNC_COMM_STREAM,
        ]
    );
    let comm = program.global_block().ops.last().unwrap();
    assert!(comm.has_attr(PIPELINE_FLAG));
    assert_eq!(comm.role, OpRole::Backward);
}

#[test]
fn backward_send_without_an_optimize_anchor_fails() {
    let mut program = Program::new();
    {
        let block = program.global_block_mut();
        block.declare_var(VarDesc::dense("g", vec![4], DType::F32));
        block.append_op(assign("g", "g", OpRole::Backward));
        block.append_op(send("g", 1, OpRole::Backward));
    }
    let err = insert_pipeline_sync(&mut program).unwrap_err();
    assert_eq!(
        err,
        SyncError::MissingOptimizeAnchor {
            block_idx: 0,
            index: 1,
        }
    );
}

#[test]
fn send_without_ring_id_fails() {
    let mut program = Program::new();
    {
        let block = program.global_block_mut();
        block.declare_var(VarDesc::dense("h", vec![4], DType::F32));
        let mut op = send("h", 0, OpRole::Forward);
        op.attrs.remove(RING_ID);
        block.append_op(op);
    }
    assert_eq!(
        insert_pipeline_sync(&mut program).unwrap_err(),
        SyncError::MissingRingId {
            block_idx: 0,
            index: 0,
        }
    );
}

#[test]
fn overlap_tags_streams_instead_of_inserting_barriers() {
    let mut program = stage_program();
    overlap_send_recv(&mut program).unwrap();

    // No operators inserted.
    assert_eq!(program.global_block().ops.len(), 6);

    let ops = &program.global_block().ops;
    assert_eq!(ops[1].exec.execution_stream.as_deref(), Some("send_stream_0"));
    assert_eq!(ops[2].exec.execution_stream.as_deref(), Some("recv_stream"));
    assert_eq!(ops[4].exec.execution_stream.as_deref(), Some("send_stream_1"));
    for op in ops {
        if op.op_type == op_types::SEND || op.op_type == op_types::RECV {
            assert_eq!(op.attr(USE_CALC_STREAM).unwrap().as_bool(), Ok(true));
            assert_eq!(op.attr(DYNAMIC_SHAPE).unwrap().as_bool(), Ok(false));
            assert_eq!(op.exec.stream_priority, 0);
        } else {
            assert!(op.exec.execution_stream.is_none());
        }
    }
}

#[test]
fn overlap_tags_are_stable_across_reruns() {
    let mut program = stage_program();
    overlap_send_recv(&mut program).unwrap();
    let first = program.clone();
    overlap_send_recv(&mut program).unwrap();
    assert_eq!(program, first);
}
