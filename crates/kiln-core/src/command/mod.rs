use async_trait::async_trait;
use kiln_log::ExecutionLogger;
use kiln_model::BuiltCommand;
use tokio_util::sync::CancellationToken;

use crate::error::ExecError;

/// Executes a built command and records it as one execution log entry.
///
/// Implemented by the process supervisor; runners and the workspace only see this seam.
#[async_trait]
pub trait CommandRunner: Send + Sync + 'static {
    async fn run(
        &self,
        cancel: &CancellationToken,
        logger: &ExecutionLogger,
        cmd: BuiltCommand,
    ) -> Result<(), ExecError>;
}
