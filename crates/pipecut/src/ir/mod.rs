pub mod attr;
pub mod program;

pub use attr::{AttrError, AttrValue};
pub use program::{
    Block, DType, ExecutionAttrs, OpRole, OpaqueKind, Operator, ParamAttrs, Program, Slot, VarDesc,
    VarKind,
};

/// Well-known operator type names this subsystem inserts or special-cases.
pub mod op_types {
    pub const SEND: &str = "send";
    pub const RECV: &str = "recv";
    pub const SYNC_CALC_STREAM: &str = "sync_calc_stream";
    pub const SYNC_COMM_STREAM: &str = "sync_comm_stream";
    pub const NOP: &str = "nop";
    pub const FEED: &str = "feed";
    pub const FETCH: &str = "fetch";
    pub const WHILE: &str = "while";
    pub const CONDITIONAL_BLOCK: &str = "conditional_block";
    pub const SHADOW_OUTPUT: &str = "shadow_output";
    pub const DATA: &str = "data";
}
