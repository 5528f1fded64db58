mod step;
pub use step::{BuiltCommand, StepSpec};

mod job;
pub use job::{CliStep, DockerAuth, DockerAuthConfig, DockerStep, Job, JobFile};
