use std::ffi::OsStr;
use std::io;
use std::process::{Command, Output, Stdio};

use tracing::debug;

use crate::pipeline::error::ConfigurationError;

// Fragments yt-dlp and ffmpeg print when the failure happened on the network
// rather than inside the tool.
const NETWORK_FAILURE_MARKERS: [&str; 14] = [
    "http error",
    "urlopen error",
    "unable to download webpage",
    "failed to resolve",
    "name or service not known",
    "temporary failure in name resolution",
    "nodename nor servname provided",
    "no address associated with hostname",
    "connection refused",
    "connection reset",
    "network is unreachable",
    "timed out",
    "server returned 4",
    "server returned 5",
];

const STDERR_TAIL_LINES: usize = 5;

/// Runs an external tool to completion with stdin closed and both output streams captured.
///
/// No timeout is enforced, a hanging tool blocks the caller.
pub fn run<I, S>(program: &str, args: I) -> io::Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    debug!("Running {:?}", command);
    let output = command.output()?;
    if !output.status.success() {
        debug!(
            program,
            status = %output.status,
            stderr = %stderr_tail(&output.stderr),
            "External tool failed"
        );
    }
    Ok(output)
}

/// Verifies that `program` is reachable by asking it for its version.
pub fn probe(program: &str, version_flag: &str, guidance: &str) -> Result<(), ConfigurationError> {
    match run(program, [version_flag]) {
        Ok(output) if output.status.success() => Ok(()),
        _ => Err(ConfigurationError {
            tool: program.to_string(),
            guidance: guidance.to_string(),
        }),
    }
}

pub fn is_network_failure(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    NETWORK_FAILURE_MARKERS
        .iter()
        .any(|marker| stderr.contains(marker))
}

/// Last few non-empty lines of a captured stream, joined for an error message.
pub fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}

pub fn status_text(output: &Output) -> String {
    match output.status.code() {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}
