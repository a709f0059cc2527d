use anyhow::{
    Context,
    Result,
    anyhow,
};
use chrono::Utc;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
const DEPLOYMENTS_FILE: &str = "vercel.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployed_at: String,
    pub project_id: String,
    pub domain: String,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub fid: Option<u64>,
    #[serde(default)]
    pub manifest_signed: bool,
    #[serde(default)]
    pub redeployed: bool,
}

impl DeploymentRecord {
    pub fn new(project_id: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            deployed_at: Utc::now().to_rfc3339(),
            project_id: project_id.into(),
            domain: domain.into(),
            project_name: None,
            fid: None,
            manifest_signed: false,
            redeployed: false,
        }
    }

    pub fn url(&self) -> String {
        format!("https://{}", self.domain)
    }
}

/// Append-only log of Vercel deployments kept under `.deployments/`.
#[derive(Debug)]
pub struct DeploymentStore {
    path: PathBuf,
}

impl DeploymentStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let dir = root.as_ref().join(DEPLOYMENTS_ROOT);
        if !dir.exists() {
            fs::create_dir_all(&dir).with_context(|| {
                format!("Failed to create {} directory", dir.display())
            })?;
        }
        Ok(Self {
            path: dir.join(DEPLOYMENTS_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<DeploymentRecord>> {
        read_records(&self.path)
    }

    pub fn latest(&self) -> Result<Option<DeploymentRecord>> {
        Ok(self.load()?.pop())
    }

    pub fn append(&self, record: DeploymentRecord) -> Result<()> {
        let mut records = self.load()?;
        records.push(record);
        let json = serde_json::to_vec_pretty(&records)
            .context("Failed to serialize deployment records")?;
        fs::write(&self.path, json).context("Failed to write deployment records")
    }
}

fn read_records(path: &Path) -> Result<Vec<DeploymentRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = fs::read(path).context("Failed to read deployment records")?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    if let Ok(records) = serde_json::from_slice::<Vec<DeploymentRecord>>(&data) {
        return Ok(records);
    }
    if let Ok(record) = serde_json::from_slice::<DeploymentRecord>(&data) {
        return Ok(vec![record]);
    }
    Err(anyhow!(
        "Failed to parse deployment record JSON at {}",
        path.display()
    ))
}
