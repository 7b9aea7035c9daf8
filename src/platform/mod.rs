//! Platform-specific process control

mod unix;

pub use unix::{current_pid, prepare_command, process_alive, send_signal, SignalDelivery};
