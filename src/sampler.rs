//! Out-of-process pointer shape sampler.
//!
//! The sampler is any program that prints one shape token per line on stdout
//! for as long as it runs. `ShapeSampler` spawns it with `tokio::process`,
//! forwards each line as `SamplerEvent::Token`, and reports
//! `SamplerEvent::Stopped` once when the program exits, fails to read, or
//! is killed. The child is killed when the sampler is dropped.
//!
//! Deduplication happens downstream in `ShapeFeed`.

use std::io;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamplerEvent {
    Token(String),
    Stopped,
}

pub struct ShapeSampler {
    kill_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ShapeSampler {
    /// Spawns `command` (program followed by its arguments).
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        command: &[String],
        sink: impl Fn(SamplerEvent) + Send + 'static,
    ) -> io::Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty sampler command"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "sampler stdout not captured"))?;

        log::info!("sampler: started {program} (pid {:?})", child.id());

        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = &mut kill_rx => {
                        if let Err(e) = child.kill().await {
                            log::debug!("sampler: kill failed: {e}");
                        }
                        break;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => sink(SamplerEvent::Token(line)),
                        Ok(None) => {
                            match child.wait().await {
                                Ok(status) => log::warn!("sampler: exited ({status}), shape frozen"),
                                Err(e) => log::warn!("sampler: exited, status unknown: {e}"),
                            }
                            break;
                        }
                        Err(e) => {
                            log::warn!("sampler: read failed, shape frozen: {e}");
                            break;
                        }
                    },
                }
            }
            sink(SamplerEvent::Stopped);
        });

        Ok(Self {
            kill_tx: Some(kill_tx),
            task: Some(task),
        })
    }

    /// Asks the sampler task to kill the child. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
            log::info!("sampler: stopping");
        }
    }
}

impl Drop for ShapeSampler {
    fn drop(&mut self) {
        self.stop();
        // Aborting drops the child, which `kill_on_drop` terminates.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Sampler used when the configured command is empty.
#[cfg(target_os = "windows")]
pub fn default_command() -> Vec<String> {
    vec![
        "powershell.exe".into(),
        "-NoProfile".into(),
        "-NonInteractive".into(),
        "-Command".into(),
        WINDOWS_SAMPLER_SCRIPT.into(),
    ]
}

/// Sampler used when the configured command is empty. No built-in sampler
/// exists here; shapes stay at `Arrow` unless one is configured.
#[cfg(not(target_os = "windows"))]
pub fn default_command() -> Vec<String> {
    Vec::new()
}

/// Polls `GetCursorInfo` and prints the matching system cursor id name.
#[cfg(target_os = "windows")]
const WINDOWS_SAMPLER_SCRIPT: &str = r#"
$ErrorActionPreference = 'Stop'
Add-Type -Namespace MultiCursor -Name Native -MemberDefinition @'
[StructLayout(LayoutKind.Sequential)]
public struct CURSORINFO { public int cbSize; public int flags; public IntPtr hCursor; public int x; public int y; }
[DllImport("user32.dll")] public static extern bool GetCursorInfo(ref CURSORINFO pci);
[DllImport("user32.dll")] public static extern IntPtr LoadCursor(IntPtr hInstance, int id);
'@
$ids = [ordered]@{
  Arrow = 32512; IBeam = 32513; Wait = 32514; Cross = 32515; UpArrow = 32516
  Pen = 32631; SizeNWSE = 32642; SizeNESW = 32643; SizeWE = 32644; SizeNS = 32645
  SizeAll = 32646; No = 32648; Hand = 32649; AppStarting = 32650; Help = 32651
  Pin = 32671; Person = 32672
}
$byHandle = @{}
foreach ($name in $ids.Keys) {
  $h = [MultiCursor.Native]::LoadCursor([IntPtr]::Zero, $ids[$name])
  if ($h -ne [IntPtr]::Zero) { $byHandle[$h] = $name }
}
while ($true) {
  $info = New-Object MultiCursor.Native+CURSORINFO
  $info.cbSize = [Runtime.InteropServices.Marshal]::SizeOf($info)
  if (-not [MultiCursor.Native]::GetCursorInfo([ref]$info)) { $token = 'Error' }
  elseif (($info.flags -band 1) -eq 0) { $token = 'Hidden' }
  elseif ($byHandle.ContainsKey($info.hCursor)) { $token = $byHandle[$info.hCursor] }
  else { $token = 'Custom' }
  [Console]::Out.WriteLine($token)
  [Console]::Out.Flush()
  Start-Sleep -Milliseconds 16
}
"#;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn empty_command_is_rejected() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let err = ShapeSampler::spawn(&[], |_| {}).err().unwrap();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        });
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let cmd = vec!["multicursor-no-such-sampler-binary".to_owned()];
            assert!(ShapeSampler::spawn(&cmd, |_| {}).is_err());
        });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tokens_then_stopped_on_exit() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = oneshot::channel();
        let done_tx = Mutex::new(Some(done_tx));
        let sink_events = Arc::clone(&events);

        let cmd: Vec<String> = ["sh", "-c", "printf 'Hand\\nHand\\nIBeam\\n'"]
            .iter()
            .map(|s| (*s).to_owned())
            .collect();
        let _sampler = ShapeSampler::spawn(&cmd, move |e| {
            let stopped = e == SamplerEvent::Stopped;
            sink_events.lock().unwrap().push(e);
            if stopped {
                if let Some(tx) = done_tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
            }
        })
        .unwrap();

        done_rx.await.unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                SamplerEvent::Token("Hand".into()),
                SamplerEvent::Token("Hand".into()),
                SamplerEvent::Token("IBeam".into()),
                SamplerEvent::Stopped,
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_kills_long_running_sampler() {
        let (done_tx, done_rx) = oneshot::channel();
        let done_tx = Mutex::new(Some(done_tx));
        let cmd: Vec<String> = ["sh", "-c", "while true; do echo Arrow; sleep 1; done"]
            .iter()
            .map(|s| (*s).to_owned())
            .collect();
        let mut sampler = ShapeSampler::spawn(&cmd, move |e| {
            if e == SamplerEvent::Stopped {
                if let Some(tx) = done_tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
            }
        })
        .unwrap();

        sampler.stop();
        sampler.stop();
        done_rx.await.unwrap();
    }
}
