//! Structural slicing of a program into index ranges and ordered
//! sub-programs.

use std::collections::HashSet;

use thiserror::Error;

use crate::ir::Program;

/// Errors surfaced by malformed slice or split arguments. Always a caller
/// bug; never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("invalid op range [{start}, {end}) for a program with {op_count} ops")]
    InvalidRange {
        start: isize,
        end: isize,
        op_count: usize,
    },
    #[error("split boundaries must be strictly increasing, got {prev} before {next}")]
    InvalidBoundary { prev: isize, next: isize },
    #[error("split boundaries cannot be empty")]
    EmptyBoundaries,
    #[error("cannot split an empty program")]
    EmptyProgram,
}

/// The result of [`split_program`]: ordered sub-programs plus, per
/// sub-program, its external input names and its valid output names.
#[derive(Debug)]
pub struct SplitPrograms {
    pub programs: Vec<Program>,
    /// Per sub-program, names whose first occurrence is a read.
    pub inputs: Vec<Vec<String>>,
    /// Per sub-program, written names some later sub-program still reads
    /// (the last sub-program keeps every written name).
    pub outputs: Vec<Vec<String>>,
}

/// Variable names a program reads before writing, in first-use order.
pub fn program_inputs(program: &Program) -> Vec<String> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut inputs = Vec::new();
    for op in &program.global_block().ops {
        for in_name in op.input_arg_names() {
            if visited.insert(in_name) {
                inputs.push(in_name.to_string());
            }
        }
        for out_name in op.output_arg_names() {
            visited.insert(out_name);
        }
    }
    inputs
}

/// Variable names a program writes, in first-write order.
pub fn program_outputs(program: &Program) -> Vec<String> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut outputs = Vec::new();
    for op in &program.global_block().ops {
        for out_name in op.output_arg_names() {
            if visited.insert(out_name) {
                outputs.push(out_name.to_string());
            }
        }
    }
    outputs
}

/// Structural copy of `program` keeping only global-block operators in
/// `[start, end)`. Negative indices count from the end. Variable
/// declarations no remaining operator references are dropped.
pub fn prune_program(
    program: &Program,
    start: isize,
    end: isize,
) -> Result<Program, PartitionError> {
    let op_count = program.global_block().ops.len();
    let invalid = |start, end| PartitionError::InvalidRange {
        start,
        end,
        op_count,
    };

    let resolve = |idx: isize| if idx < 0 { idx + op_count as isize } else { idx };
    let start = resolve(start);
    let end = resolve(end);
    if start < 0 || start as usize >= op_count {
        return Err(invalid(start, end));
    }
    if end < 0 || end as usize > op_count {
        return Err(invalid(start, end));
    }
    if start >= end {
        return Err(invalid(start, end));
    }

    let mut pruned = program.clone();
    let block = pruned.global_block_mut();
    block.ops.drain(end as usize..);
    block.ops.drain(..start as usize);

    let mut referenced: HashSet<String> = HashSet::new();
    for op in &block.ops {
        referenced.extend(op.input_arg_names().map(str::to_string));
        referenced.extend(op.output_arg_names().map(str::to_string));
    }
    block.vars.retain(|name, _| referenced.contains(name));

    Ok(pruned)
}

/// Splits `program` at the given global-block operator indices.
///
/// Negative boundaries are resolved against the op count; `0` and the op
/// count are implicitly added when absent. Boundaries must be strictly
/// increasing after normalization. Concatenating the resulting sub-programs'
/// operators in order reproduces the source operator sequence.
pub fn split_program(
    program: &Program,
    boundaries: &[isize],
) -> Result<SplitPrograms, PartitionError> {
    if boundaries.is_empty() {
        return Err(PartitionError::EmptyBoundaries);
    }
    let op_count = program.global_block().ops.len();
    if op_count == 0 {
        return Err(PartitionError::EmptyProgram);
    }

    let mut cuts: Vec<isize> = boundaries
        .iter()
        .map(|&idx| if idx < 0 { idx + op_count as isize } else { idx })
        .collect();
    if cuts.first() != Some(&0) {
        cuts.insert(0, 0);
    }
    if cuts.last() != Some(&(op_count as isize)) {
        cuts.push(op_count as isize);
    }
    for window in cuts.windows(2) {
        if window[0] >= window[1] {
            return Err(PartitionError::InvalidBoundary {
                prev: window[0],
                next: window[1],
            });
        }
    }

    let mut programs = Vec::with_capacity(cuts.len() - 1);
    for window in cuts.windows(2) {
        programs.push(prune_program(program, window[0], window[1])?);
    }

    let inputs: Vec<Vec<String>> = programs.iter().map(program_inputs).collect();
    let raw_outputs: Vec<Vec<String>> = programs.iter().map(program_outputs).collect();
    let outputs = valid_outputs(&inputs, &raw_outputs);

    Ok(SplitPrograms {
        programs,
        inputs,
        outputs,
    })
}

/// Keeps, for each sub-program, only the written names some later
/// sub-program reads as an input. Each later input is attributed to the
/// first earlier sub-program found scanning j = i-1 down to 0 whose raw
/// outputs contain it; this exact attribution order is load-bearing for
/// existing schedules and must not be replaced with a different
/// "nearest producer" notion.
fn valid_outputs(inputs: &[Vec<String>], raw_outputs: &[Vec<String>]) -> Vec<Vec<String>> {
    let num_split = raw_outputs.len();
    let output_sets: Vec<HashSet<&str>> = raw_outputs
        .iter()
        .map(|names| names.iter().map(String::as_str).collect())
        .collect();

    let mut valid: Vec<Vec<String>> = vec![Vec::new(); num_split];
    let mut claimed: Vec<HashSet<&str>> = vec![HashSet::new(); num_split];
    if let Some(last) = raw_outputs.last() {
        valid[num_split - 1] = last.clone();
    }

    for i in 1..num_split {
        for in_name in &inputs[i] {
            for j in (0..i).rev() {
                if output_sets[j].contains(in_name.as_str()) {
                    if claimed[j].insert(in_name.as_str()) {
                        valid[j].push(in_name.clone());
                    }
                    break;
                }
            }
        }
    }
    valid
}
