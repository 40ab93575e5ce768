//! Front end side: Debug Adapter Protocol framing, envelopes and process arguments.

pub mod args;
pub mod io;
pub mod protocol;
pub mod tracer;
