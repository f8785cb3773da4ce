//! Scanner isolation boundary: stop signal, result channel, process/task handles

mod channel;
mod process;
mod signal;

pub use channel::{BatchReceiver, BatchSender, RecvOutcome, SendOutcome, result_channel};
pub use process::{
    ScannerHandle, ScannerProcess, WORKER_SUBCOMMAND, parse_batch_line, run_scan_worker,
    worker_args,
};
pub use signal::StopSignal;
