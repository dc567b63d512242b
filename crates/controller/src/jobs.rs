//! Deployment job submission
//!
//! The controller never executes anything on a router. A realization is
//! packaged as a [`DeploymentJob`] and handed to a [`JobRunner`], which
//! accepts it and returns immediately.

use crate::config::{ControllerConfig, JobRunnerKind};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use meshplane_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Inventory, playbook and file bundle for one router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentJob {
    pub name: String,
    pub inventory: String,
    pub playbook: String,
    /// Relative path -> content
    pub files: BTreeMap<String, Vec<u8>>,
}

impl DeploymentJob {
    /// Content hash over inventory, playbook and files, independent of
    /// insertion order
    pub fn manifest_hash(&self) -> String {
        let mut entries: Vec<(String, String)> = vec![
            ("inventory".to_string(), sha256_hex(self.inventory.as_bytes())),
            ("playbook.yml".to_string(), sha256_hex(self.playbook.as_bytes())),
        ];
        entries.extend(
            self.files
                .iter()
                .map(|(path, content)| (format!("files/{}", path), sha256_hex(content))),
        );
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hasher = Sha256::new();
        for (path, hash) in &entries {
            hasher.update(path.as_bytes());
            hasher.update(b":");
            hasher.update(hash.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Lay the bundle out under `dir` as `inventory`, `playbook.yml` and
    /// `files/<path>`. Key files are readable by the owner only.
    pub async fn write_bundle(&self, dir: &Path) -> Result<()> {
        for path in self.files.keys() {
            check_relative(path)?;
        }

        tokio::fs::create_dir_all(dir.join("files")).await?;
        tokio::fs::write(dir.join("inventory"), &self.inventory).await?;
        tokio::fs::write(dir.join("playbook.yml"), &self.playbook).await?;

        for (rel, content) in &self.files {
            let path = dir.join("files").join(rel);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, content).await?;
            if rel.ends_with(".key") {
                restrict_permissions(&path).await?;
            }
        }
        debug!("Wrote bundle {} to {:?}", self.name, dir);
        Ok(())
    }
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Accepted submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
    pub name: String,
    pub manifest_hash: String,
    pub submitted_at: i64,
}

/// External deployment job runner
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Submit a job. Errors cover the submission only, never its execution.
    async fn submit(&self, job: DeploymentJob) -> Result<JobHandle>;
}

/// Build the runner selected in the config
pub fn runner_from_config(config: &ControllerConfig) -> Result<Arc<dyn JobRunner>> {
    match config.jobs.runner {
        JobRunnerKind::Spool => Ok(Arc::new(SpoolJobRunner::new(config.spool_dir()))),
        JobRunnerKind::Http => {
            let endpoint = config.jobs.endpoint.clone().ok_or_else(|| {
                Error::Validation("jobs.endpoint is required for the http runner".to_string())
            })?;
            Ok(Arc::new(HttpJobRunner::new(endpoint)?))
        }
    }
}

// ============================================================================
// Spool directory runner
// ============================================================================

/// Writes each job to `<spool>/<job-id>/` for an out-of-band executor
pub struct SpoolJobRunner {
    spool_dir: PathBuf,
}

#[derive(Serialize)]
struct SpoolManifest<'a> {
    id: &'a str,
    name: &'a str,
    manifest_hash: &'a str,
    submitted_at: i64,
    files: Vec<&'a str>,
}

impl SpoolJobRunner {
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
        }
    }

    pub fn spool_dir(&self) -> &Path {
        &self.spool_dir
    }

    async fn write_job(&self, dir: &Path, job: &DeploymentJob, handle: &JobHandle) -> Result<()> {
        job.write_bundle(dir).await?;

        let manifest = SpoolManifest {
            id: &handle.id,
            name: &handle.name,
            manifest_hash: &handle.manifest_hash,
            submitted_at: handle.submitted_at,
            files: job.files.keys().map(String::as_str).collect(),
        };
        let manifest = serde_json::to_vec_pretty(&manifest)?;
        tokio::fs::write(dir.join("manifest.json"), manifest).await?;
        Ok(())
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn check_relative(path: &str) -> Result<()> {
    let p = Path::new(path);
    if p.is_absolute()
        || p
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
    {
        return Err(Error::JobSubmission(format!("invalid bundle path {:?}", path)));
    }
    Ok(())
}

#[async_trait]
impl JobRunner for SpoolJobRunner {
    async fn submit(&self, job: DeploymentJob) -> Result<JobHandle> {
        for path in job.files.keys() {
            check_relative(path)?;
        }
        let handle = JobHandle {
            id: uuid::Uuid::new_v4().to_string(),
            name: job.name.clone(),
            manifest_hash: job.manifest_hash(),
            submitted_at: chrono::Utc::now().timestamp(),
        };
        let dir = self.spool_dir.join(&handle.id);
        self.write_job(&dir, &job, &handle)
            .await
            .map_err(|e| Error::JobSubmission(format!("spool {}: {}", dir.display(), e)))?;

        info!("Spooled job {} ({}) to {:?}", handle.name, handle.id, dir);
        Ok(handle)
    }
}

// ============================================================================
// HTTP runner
// ============================================================================

/// Posts jobs as JSON to a runner service that answers with `{"id": ...}`
pub struct HttpJobRunner {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    name: &'a str,
    inventory: &'a str,
    playbook: &'a str,
    manifest_hash: &'a str,
    /// base64 contents
    files: BTreeMap<&'a str, String>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: String,
}

impl HttpJobRunner {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::JobSubmission(format!("http client: {}", e)))?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl JobRunner for HttpJobRunner {
    async fn submit(&self, job: DeploymentJob) -> Result<JobHandle> {
        let manifest_hash = job.manifest_hash();
        let body = SubmitRequest {
            name: &job.name,
            inventory: &job.inventory,
            playbook: &job.playbook,
            manifest_hash: &manifest_hash,
            files: job
                .files
                .iter()
                .map(|(k, v)| (k.as_str(), STANDARD.encode(v)))
                .collect(),
        };

        debug!("POST {} job {}", self.endpoint, job.name);
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::JobSubmission(format!("submit {}: {}", job.name, e)))?;

        if !resp.status().is_success() {
            return Err(Error::JobSubmission(format!(
                "submit {}: runner returned {}",
                job.name,
                resp.status()
            )));
        }

        let accepted: SubmitResponse = resp
            .json()
            .await
            .map_err(|e| Error::JobSubmission(format!("submit {}: bad response: {}", job.name, e)))?;

        info!("Submitted job {} ({})", job.name, accepted.id);
        Ok(JobHandle {
            id: accepted.id,
            name: job.name,
            manifest_hash,
            submitted_at: chrono::Utc::now().timestamp(),
        })
    }
}
