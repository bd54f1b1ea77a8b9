//! Remote display of headful matches.

use std::{
    io,
    path::PathBuf,
    process::{Command, Stdio},
};

use tracing::{debug, info};

use crate::{configuration::DEFAULT_VNC_HOST, error::ArenaError};

pub const VIEWER_PROGRAM: &str = "vnc-viewer";

/// Shows the screen of a running instance. Fire and forget.
pub trait Viewer {
    fn open(&self, host: &str, port: u16) -> io::Result<()>;
}

/// Spawns `vnc-viewer host:port` in the background.
#[derive(Debug, Clone)]
pub struct VncViewer {
    program: PathBuf,
}

impl VncViewer {
    /// Locate the viewer on `PATH`.
    pub fn locate() -> Result<Self, ArenaError> {
        check_viewer_available().map(|program| VncViewer { program })
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        VncViewer {
            program: program.into(),
        }
    }
}

impl Viewer for VncViewer {
    fn open(&self, host: &str, port: u16) -> io::Result<()> {
        let child = Command::new(&self.program)
            .arg(format!("{host}:{port}"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        info!(pid = child.id(), "VNC viewer launched for {host}:{port}");
        Ok(())
    }
}

/// Path of the viewer executable, a [`ArenaError::Configuration`] if it is not installed.
pub fn check_viewer_available() -> Result<PathBuf, ArenaError> {
    which::which(VIEWER_PROGRAM).map_err(|e| {
        ArenaError::Configuration(format!(
            "{VIEWER_PROGRAM} not found ({e}), install it or run with --headless"
        ))
    })
}

/// The host viewers connect to.
///
/// An empty `host` means "wherever the runtime publishes ports": the docker-machine address
/// when there is one, `localhost` otherwise.
pub fn resolve_vnc_host(host: &str) -> String {
    if !host.is_empty() {
        return host.to_string();
    }
    let resolved = docker_machine_ip().unwrap_or_else(|| DEFAULT_VNC_HOST.to_string());
    debug!("using vnc host '{resolved}'");
    resolved
}

fn docker_machine_ip() -> Option<String> {
    let output = Command::new("docker-machine")
        .arg("ip")
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        debug!("docker machine not present");
        return None;
    }
    let ip = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!ip.is_empty()).then_some(ip)
}
