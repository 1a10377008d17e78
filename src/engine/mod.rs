pub mod probe_loop;
pub mod scheduler;

pub use probe_loop::*;
pub use scheduler::*;
