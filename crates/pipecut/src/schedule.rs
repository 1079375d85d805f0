//! Job instances and the cross-stage skip-GC liveness sweep.
//!
//! A split program runs as a totally ordered sequence of job instances, one
//! per (job type, micro-batch). Variables a later instance on the same
//! micro-batch still needs must survive the earlier instance's completion;
//! everything else may be collected. Under-computing the skip-GC sets lets
//! the executor free storage still in use; over-computing grows memory
//! without bound across in-flight micro-batches.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::analysis::{program_required_vars, var_can_be_deleted, NoNeedBufferInference};
use crate::ir::{op_types, AttrValue, Operator, Program};

/// Job type label for the forward sub-program.
pub const FORWARD: &str = "forward";
/// Job type label for the backward sub-program.
pub const BACKWARD: &str = "backward";
/// Job type label for the optimize sub-program.
pub const OPTIMIZE: &str = "optimize";

/// One scheduled (job type, micro-batch) execution unit in the pipeline.
///
/// The skip-GC set is computed once by [`set_skip_gc_vars`] and read-only
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    job_type: String,
    micro_batch_id: usize,
    skip_gc_vars: BTreeSet<String>,
}

impl Job {
    pub fn new(job_type: impl Into<String>, micro_batch_id: usize) -> Self {
        Self {
            job_type: job_type.into(),
            micro_batch_id,
            skip_gc_vars: BTreeSet::new(),
        }
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn micro_batch_id(&self) -> usize {
        self.micro_batch_id
    }

    /// Variable names the executor must keep alive past this instance.
    pub fn skip_gc_vars(&self) -> &BTreeSet<String> {
        &self.skip_gc_vars
    }
}

/// Fatal schedule configuration errors; never retried or auto-corrected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("num_micro_batches must be >= 1")]
    NoMicroBatches,
    #[error("{job_types} job types were given for {programs} sub-programs")]
    JobTypeProgramMismatch { job_types: usize, programs: usize },
    #[error("job type '{job_type}' has no matching sub-program")]
    UnknownJobType { job_type: String },
    #[error("job micro-batch {micro_batch} is out of range for {num_micro_batches} micro-batches")]
    MicroBatchOutOfRange {
        micro_batch: usize,
        num_micro_batches: usize,
    },
    #[error(
        "backward job on micro-batch {micro_batch} must have an empty skip-gc set, got {vars:?}; \
         the partition and schedule disagree about who consumes backward intermediates"
    )]
    InconsistentSchedule {
        micro_batch: usize,
        vars: BTreeSet<String>,
    },
}

/// Computes the skip-GC set of every job in `jobs`.
///
/// Single backward sweep over the instance sequence with one accumulator per
/// micro-batch: an instance keeps alive exactly the variables its
/// sub-program touches that some later instance on the same micro-batch
/// also requires. The backward stage is by definition the final consumer of
/// its own intermediates within a micro-batch, so a backward job with a
/// non-empty set is a fatal partition/schedule mismatch.
///
/// When `link_programs` is set, adjacent sub-programs (in `job_types` order)
/// are additionally bridged with shadow-output/data operators, see
/// [`link_adjacent_programs`].
pub fn set_skip_gc_vars(
    num_micro_batches: usize,
    job_types: &[&str],
    programs: &mut [Program],
    mut jobs: Vec<Job>,
    link_programs: bool,
    table: &dyn NoNeedBufferInference,
) -> Result<Vec<Job>, ScheduleError> {
    if num_micro_batches < 1 {
        return Err(ScheduleError::NoMicroBatches);
    }
    if job_types.len() != programs.len() {
        return Err(ScheduleError::JobTypeProgramMismatch {
            job_types: job_types.len(),
            programs: programs.len(),
        });
    }

    let type_to_required_vars: HashMap<&str, BTreeSet<String>> = job_types
        .iter()
        .zip(programs.iter())
        .map(|(&job_type, program)| (job_type, program_required_vars(program, table)))
        .collect();

    let mut suffix_required: Vec<BTreeSet<String>> = vec![BTreeSet::new(); num_micro_batches];
    for job in jobs.iter_mut().rev() {
        let required = type_to_required_vars.get(job.job_type()).ok_or_else(|| {
            ScheduleError::UnknownJobType {
                job_type: job.job_type.clone(),
            }
        })?;
        let micro_batch = job.micro_batch_id;
        if micro_batch >= num_micro_batches {
            return Err(ScheduleError::MicroBatchOutOfRange {
                micro_batch,
                num_micro_batches,
            });
        }

        let skip_gc_vars: BTreeSet<String> = required & &suffix_required[micro_batch];
        log::debug!(
            "skip gc vars for {}-({micro_batch}): {skip_gc_vars:?}",
            job.job_type
        );

        if job.job_type == BACKWARD && !skip_gc_vars.is_empty() {
            return Err(ScheduleError::InconsistentSchedule {
                micro_batch,
                vars: skip_gc_vars,
            });
        }

        job.skip_gc_vars = skip_gc_vars;
        suffix_required[micro_batch].extend(required.iter().cloned());
    }

    if link_programs {
        for i in 1..programs.len() {
            let (head, tail) = programs.split_at_mut(i);
            link_adjacent_programs(&mut head[i - 1], &mut tail[0]);
        }
    }

    Ok(jobs)
}

/// Output slot placeholder on shadow-output bridge operators.
const EMPTY_VAR: &str = "@EMPTY@";
/// Attribute naming the bridged variable on shadow-output/data operators.
const NAME_ATTR: &str = "name";

/// Bridges two adjacent sub-programs: every deletable variable the current
/// program writes and the next program reads gets a `shadow_output` operator
/// appended to the current program and a `data` operator prepended to the
/// next, so the executor hands the value across the job boundary explicitly.
pub fn link_adjacent_programs(cur: &mut Program, next: &mut Program) {
    let mut output_names: BTreeSet<String> = BTreeSet::new();
    for op in &cur.global_block().ops {
        for name in op.output_arg_names() {
            if var_can_be_deleted(cur, 0, name) {
                output_names.insert(name.to_string());
            }
        }
    }

    let mut input_names: BTreeSet<String> = BTreeSet::new();
    for op in &next.global_block().ops {
        for name in op.input_arg_names() {
            if var_can_be_deleted(next, 0, name) {
                input_names.insert(name.to_string());
            }
        }
    }

    // BTreeSet intersection is already name-sorted, which keeps the
    // inserted bridge operators deterministic.
    for name in output_names.intersection(&input_names) {
        cur.global_block_mut().append_op(
            Operator::new(op_types::SHADOW_OUTPUT)
                .with_input("x", &[name.as_str()])
                .with_output("out", &[EMPTY_VAR])
                .with_attr(NAME_ATTR, AttrValue::Str(name.clone())),
        );
        next.global_block_mut().ops.insert(
            0,
            Operator::new(op_types::DATA)
                .with_output("out", &[name.as_str()])
                .with_attr(NAME_ATTR, AttrValue::Str(name.clone()))
                .with_attr("shape", AttrValue::Ints(Vec::new())),
        );
    }
}
