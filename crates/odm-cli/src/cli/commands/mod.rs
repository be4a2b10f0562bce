mod checksum;
mod completions;
mod probe;
mod run;

pub use checksum::run_checksum;
pub use completions::run_completions;
pub use probe::run_probe;
pub use run::run_plan_command;
