mod channel;
mod process;
mod profiler;
mod supervisor;
mod wire;
mod worker;

pub use {
  channel::{ChannelError, RunnerChannel},
  process::{ChildProcessRunner, ProcessError, RunnerProcess, SpawnedRunner},
  profiler::NodeProfiler,
  supervisor::{RunnerSupervisor, SupervisorError},
  wire::RunnerFrame,
  worker::Worker,
};
