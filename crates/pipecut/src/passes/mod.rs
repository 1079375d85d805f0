pub mod rematerialize;
pub mod role_partition;
pub mod split;
pub mod sync;

pub use rematerialize::{clone_op_into, RematerializeError};
pub use role_partition::program_for_pipeline;
pub use split::{
    program_inputs, program_outputs, prune_program, split_program, PartitionError, SplitPrograms,
};
pub use sync::{
    add_event_dependency, apply_sync_strategy, insert_pipeline_sync, overlap_send_recv,
    StreamType, SyncError, SyncStrategy,
};
