use pipecut::ir::{DType, OpRole, Operator, Program, VarDesc};
use pipecut::passes::{prune_program, split_program, PartitionError};

fn assign(from: &[&str], to: &str) -> Operator {
    Operator::new("assign")
        .with_role(OpRole::Forward)
        .with_input("X", from)
        .with_output("Out", &[to])
}

/// Ten operators in three future sub-programs:
///   [0,4): in -> a -> b -> c, plus c -> x
///   [4,7): c -> d -> e -> f
///   [7,10): (x, f) -> g -> h -> out
/// `x` is written in the first range and read only in the third.
fn ten_op_program() -> Program {
    let mut program = Program::new();
    let block = program.global_block_mut();
    for name in ["in", "a", "b", "c", "x", "d", "e", "f", "g", "h", "out"] {
        block.declare_var(VarDesc::dense(name, vec![4], DType::F32));
    }
    block.append_op(assign(&["in"], "a"));
    block.append_op(assign(&["a"], "b"));
    block.append_op(assign(&["b"], "c"));
    block.append_op(assign(&["c"], "x"));
    block.append_op(assign(&["c"], "d"));
    block.append_op(assign(&["d"], "e"));
    block.append_op(assign(&["e"], "f"));
    block.append_op(assign(&["x", "f"], "g"));
    block.append_op(assign(&["g"], "h"));
    block.append_op(assign(&["h"], "out"));
    program
}

#[test]
fn split_concatenation_round_trips() {
    let program = ten_op_program();
    let split = split_program(&program, &[4, 7]).unwrap();
    assert_eq!(split.programs.len(), 3);
    assert_eq!(split.programs[0].global_block().ops.len(), 4);
    assert_eq!(split.programs[1].global_block().ops.len(), 3);
    assert_eq!(split.programs[2].global_block().ops.len(), 3);

    let concatenated: Vec<Operator> = split
        .programs
        .iter()
        .flat_map(|p| p.global_block().ops.iter().cloned())
        .collect();
    let full = prune_program(&program, 0, 10).unwrap();
    assert_eq!(concatenated, full.global_block().ops);
}

#[test]
fn cross_gap_variable_is_attributed_to_its_producer_only() {
    let program = ten_op_program();
    let split = split_program(&program, &[4, 7]).unwrap();

    assert_eq!(split.inputs[0], ["in"]);
    assert_eq!(split.inputs[1], ["c"]);
    assert_eq!(split.inputs[2], ["x", "f"]);

    // `x` belongs to sub-program 0's valid outputs and must not leak into
    // sub-program 1 on either side.
    assert_eq!(split.outputs[0], ["c", "x"]);
    assert_eq!(split.outputs[1], ["f"]);
    assert!(!split.inputs[1].contains(&"x".to_string()));
    assert!(!split.outputs[1].contains(&"x".to_string()));

    // The last sub-program reports everything it writes.
    assert_eq!(split.outputs[2], ["g", "h", "out"]);
}

#[test]
fn valid_outputs_are_minimal() {
    let program = ten_op_program();
    let split = split_program(&program, &[4, 7]).unwrap();
    let last = split.programs.len() - 1;
    for i in 0..last {
        for name in &split.outputs[i] {
            let consumed = (i + 1..split.programs.len()).any(|j| split.inputs[j].contains(name));
            assert!(consumed, "output '{name}' of sub-program {i} has no consumer");
        }
    }
}

#[test]
fn prune_drops_unreferenced_variables() {
    let program = ten_op_program();
    let pruned = prune_program(&program, 4, 7).unwrap();
    let block = pruned.global_block();
    assert_eq!(block.ops.len(), 3);
    for name in ["c", "d", "e", "f"] {
        assert!(block.var(name).is_some(), "'{name}' should survive");
    }
    for name in ["in", "a", "x", "out"] {
        assert!(block.var(name).is_none(), "'{name}' should be dropped");
    }
}

#[test]
fn negative_indices_resolve_against_the_op_count() {
    let program = ten_op_program();
    let pruned = prune_program(&program, -3, -1).unwrap();
    assert_eq!(pruned.global_block().ops.len(), 2);

    let split = split_program(&program, &[-6, 7]).unwrap();
    assert_eq!(split.programs[0].global_block().ops.len(), 4);
}

#[test]
fn malformed_ranges_are_rejected() {
    let program = ten_op_program();
    assert!(matches!(
        prune_program(&program, 7, 4),
        Err(PartitionError::InvalidRange { .. })
    ));
    assert!(matches!(
        prune_program(&program, 0, 11),
        Err(PartitionError::InvalidRange { .. })
    ));
    assert!(matches!(
        prune_program(&program, -11, 4),
        Err(PartitionError::InvalidRange { .. })
    ));
}

#[test]
fn non_increasing_boundaries_are_rejected() {
    let program = ten_op_program();
    assert!(matches!(
        split_program(&program, &[7, 4]),
        Err(PartitionError::InvalidBoundary { .. })
    ));
    assert!(matches!(
        split_program(&program, &[4, 4]),
        Err(PartitionError::InvalidBoundary { .. })
    ));
    // An empty boundary list is a caller bug, not "no cuts".
    assert_eq!(
        split_program(&program, &[]).unwrap_err(),
        PartitionError::EmptyBoundaries
    );
}

#[test]
fn splitting_an_empty_program_fails() {
    let program = Program::new();
    assert_eq!(
        split_program(&program, &[0]).unwrap_err(),
        PartitionError::EmptyProgram
    );
}
