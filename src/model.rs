use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::ModelError;


/// One run of the detector over a single image.
pub struct DetectionJob<'a> {
    pub source: &'a Path,
    /// Receives the annotated image and `labels/<stem>.txt`.
    pub output_dir: &'a Path,
}


/// The detection model as a black box: image in, annotated image and label file out.
#[async_trait]
pub trait DetectionModel: Send + Sync {
    async fn detect(&self, job: &DetectionJob<'_>) -> Result<(), ModelError>;
}


/// Runs YOLOv5's `detect.py` as a child process.
#[derive(Clone, Debug)]
pub struct YoloCommand {
    pub python: PathBuf,
    pub script: PathBuf,
    pub weights: PathBuf,
    pub data: PathBuf,
    pub timeout: Duration,
}

impl YoloCommand {
    fn args(&self, job: &DetectionJob<'_>) -> Vec<std::ffi::OsString> {
        let project = job.output_dir.parent().unwrap_or_else(|| Path::new("."));
        let name = job
            .output_dir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "predicted".into());

        vec![
            self.script.clone().into_os_string(),
            "--weights".into(),
            self.weights.clone().into_os_string(),
            "--data".into(),
            self.data.clone().into_os_string(),
            "--source".into(),
            job.source.as_os_str().to_os_string(),
            "--project".into(),
            project.as_os_str().to_os_string(),
            "--name".into(),
            name,
            // write into exactly the directory we named
            "--exist-ok".into(),
            "--save-txt".into(),
        ]
    }
}

#[async_trait]
impl DetectionModel for YoloCommand {
    async fn detect(&self, job: &DetectionJob<'_>) -> Result<(), ModelError> {
        let mut command = Command::new(&self.python);
        command
            .args(self.args(job))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("running {:?}", command);
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ModelError::Timeout(self.timeout))?
            .map_err(ModelError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // the tail of a python traceback is the useful part
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(ModelError::Exit {
                status: output.status.to_string(),
                stderr: tail.into_iter().rev().collect::<Vec<_>>().join("\n"),
            });
        }
        Ok(())
    }
}
