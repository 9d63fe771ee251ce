//! Capabilities backed by the local operating system

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tower_lsp::lsp_types::Url;
use tracing::debug;

use crate::capability::{FileSystem, HomeDirectory, Process};
use crate::error::BridgeError;

/// Scratch file name handed to external executables
const SCRATCH_FILE_NAME: &str = ".command-bridge";

pub struct NativeHomeDirectory;

impl HomeDirectory for NativeHomeDirectory {
    fn home_dir(&self) -> Result<Url, BridgeError> {
        let home = dirs::home_dir().ok_or_else(|| {
            BridgeError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                "home directory is not available",
            ))
        })?;

        Url::from_directory_path(&home).map_err(|_| {
            BridgeError::Malformed(format!("home directory {:?} is not absolute", home))
        })
    }
}

pub struct NativeFileSystem;

fn local_path(uri: &Url) -> Result<PathBuf, BridgeError> {
    uri.to_file_path()
        .map_err(|_| BridgeError::InvalidResource(uri.clone()))
}

#[async_trait]
impl FileSystem for NativeFileSystem {
    async fn read_to_string(&self, uri: &Url) -> Result<String, BridgeError> {
        let path = local_path(uri)?;

        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{:?} does not exist, reading as empty", path);
                Ok(String::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, uri: &Url, text: &str) -> Result<(), BridgeError> {
        let path = local_path(uri)?;
        tokio::fs::write(&path, text).await?;
        Ok(())
    }
}

pub struct NativeProcess;

#[async_trait]
impl Process for NativeProcess {
    async fn execute(&self, executable: &str, text: &str) -> Result<String, BridgeError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(SCRATCH_FILE_NAME);

        tokio::fs::write(&path, text).await?;

        debug!("Executing {} on {:?}", executable, path);
        let output = tokio::process::Command::new(executable)
            .arg(&path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(BridgeError::Command(format!(
                "{} exited with {}: {}",
                executable,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
