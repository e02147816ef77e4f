//! Subprocess execution with combined output capture.

use std::process::Stdio;
use std::time::Instant;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Result of a completed subprocess.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    /// Exit code (0 = success, -1 when terminated by a signal).
    pub exit_code: i32,

    /// Stdout and stderr bytes interleaved in the order they were read.
    pub output: Vec<u8>,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl CapturedOutput {
    /// Whether the process exited with code 0.
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// Output decoded for messages and logs. Invalid UTF-8 is replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Run `program` with `args` to completion, capturing both output streams
/// into a single text blob.
///
/// Returns `Err` only when the process cannot be spawned or its pipes fail;
/// a nonzero exit is a successful capture. The child is killed if the
/// returned future is dropped before it resolves.
pub async fn run_captured(program: &str, args: &[String]) -> std::io::Result<CapturedOutput> {
    let start = Instant::now();

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("stdout pipe missing"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("stderr pipe missing"))?;

    let mut combined = Vec::new();
    let mut out_buf = [0u8; 8192];
    let mut err_buf = [0u8; 8192];
    let mut out_done = false;
    let mut err_done = false;

    while !(out_done && err_done) {
        tokio::select! {
            read = stdout.read(&mut out_buf), if !out_done => {
                match read? {
                    0 => out_done = true,
                    n => combined.extend_from_slice(&out_buf[..n]),
                }
            }
            read = stderr.read(&mut err_buf), if !err_done => {
                match read? {
                    0 => err_done = true,
                    n => combined.extend_from_slice(&err_buf[..n]),
                }
            }
        }
    }

    let status = child.wait().await?;

    Ok(CapturedOutput {
        exit_code: status.code().unwrap_or(-1),
        output: combined,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Render an argv for logging, quoting arguments that contain whitespace.
pub fn render_command(program: &str, args: &[String]) -> String {
    std::iter::once(program.to_string())
        .chain(args.iter().map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("'{}'", arg)
            } else {
                arg.clone()
            }
        }))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let result = run_captured("echo", &["hello".to_string()])
            .await
            .expect("spawn failed");
        assert!(result.succeeded());
        assert_eq!(result.output, b"hello\n");
    }

    #[tokio::test]
    async fn test_combines_stdout_and_stderr() {
        let result = run_captured("sh", &sh("echo out; echo err 1>&2"))
            .await
            .expect("spawn failed");
        let text = result.text();
        assert!(text.contains("out\n"));
        assert!(text.contains("err\n"));
        assert_eq!(result.output.len(), "out\nerr\n".len());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_captured_not_an_error() {
        let result = run_captured("sh", &sh("echo 'Assertion failed' 1>&2; exit 3"))
            .await
            .expect("spawn failed");
        assert!(!result.succeeded());
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.text(), "Assertion failed\n");
    }

    #[tokio::test]
    async fn test_silent_success_has_empty_output() {
        let result = run_captured("true", &[]).await.expect("spawn failed");
        assert!(result.succeeded());
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn test_output_bytes_are_kept_verbatim() {
        let result = run_captured("sh", &sh("printf 'a\\377b'; printf '\\376' 1>&2"))
            .await
            .expect("spawn failed");
        assert!(result.succeeded());
        let mut sorted = result.output.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![b'a', b'b', 0xFE, 0xFF]);
        assert!(result.output.windows(3).any(|w| w == [b'a', 0xFF, b'b']));
        assert!(result.text().contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn test_missing_executable_fails_to_spawn() {
        let err = run_captured("definitely-not-a-real-binary-4711", &[])
            .await
            .expect_err("spawn should fail");
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_render_command_quotes_whitespace() {
        let rendered = render_command(
            "docker",
            &["run".to_string(), "a b".to_string(), String::new()],
        );
        assert_eq!(rendered, "docker run 'a b' ''");
    }
}
