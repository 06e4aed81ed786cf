mod process_info;
mod system_snapshot;

pub use process_info::{ProcessInfo, ProcessSample};
pub use system_snapshot::*;
