use kiln_core::ExecError;
use kiln_log::ExecutionHandle;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;

/// Copy `reader` line by line into `handle` as `<stream>: <line>`.
///
/// Returns on EOF or cancellation; dropping the reader closes our end of the pipe.
/// Bytes that are not UTF-8 are replaced rather than failing the read.
pub(crate) async fn drain<R>(
    reader: Option<R>,
    stream: &'static str,
    handle: &ExecutionHandle,
    cancel: &CancellationToken,
) -> Result<(), ExecError>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(());
    };
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);

    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            r = reader.read_until(b'\n', &mut buf) => r,
        };
        match read {
            Ok(0) => return Ok(()),
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                handle.write_line(stream, line.trim_end_matches(['\n', '\r']));
            }
            Err(_) if cancel.is_cancelled() => return Ok(()),
            Err(e) => {
                return Err(ExecError::Pipe {
                    stream,
                    reason: e.to_string(),
                });
            }
        }
    }
}
