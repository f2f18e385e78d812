use failure::{Error, ResultExt};
use log::{debug, info, warn};
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::config::{Config, SnapshotConfig};
use crate::errors::{DownloadFailure, UnsafePath};
use crate::hub::{Hub, HttpHub, RepoInfo, RepoType};
use crate::patterns::{self, Pattern};

#[derive(Debug, Clone, PartialEq)]
pub struct Driver {
    config: Config,
    force: bool,
    dry_run: bool,
}

impl Driver {
    pub fn with_config(config: Config) -> Driver {
        Driver {
            config,
            force: false,
            dry_run: false,
        }
    }

    /// Download files even when an up-to-date copy already exists.
    pub fn force(mut self, force: bool) -> Driver {
        self.force = force;
        self
    }

    /// Only report what would be downloaded.
    pub fn dry_run(mut self, dry_run: bool) -> Driver {
        self.dry_run = dry_run;
        self
    }

    pub fn request(&self) -> Result<SnapshotRequest, Error> {
        let mut request = SnapshotRequest::from_config(&self.config.snapshot)?;
        request.force = self.force;
        request.dry_run = self.dry_run;

        Ok(request)
    }

    pub fn run(&self) -> Result<Snapshot, Error> {
        let hub = HttpHub::with_config(&self.config.hub)?;
        let request = self.request()?;

        snapshot_download(&hub, &request)
    }
}

/// Everything needed to download a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRequest {
    pub repo_id: String,
    pub repo_type: RepoType,
    pub revision: String,
    pub local_dir: PathBuf,
    /// `None` selects every file in the repository.
    pub allow_patterns: Option<Vec<Pattern>>,
    pub ignore_patterns: Vec<Pattern>,
    pub force: bool,
    pub dry_run: bool,
}

impl SnapshotRequest {
    pub fn new<S, P>(repo_id: S, local_dir: P) -> SnapshotRequest
    where
        S: Into<String>,
        P: Into<PathBuf>,
    {
        SnapshotRequest {
            repo_id: repo_id.into(),
            repo_type: RepoType::default(),
            revision: SnapshotConfig::DEFAULT_REVISION.to_string(),
            local_dir: local_dir.into(),
            allow_patterns: None,
            ignore_patterns: Vec::new(),
            force: false,
            dry_run: false,
        }
    }

    pub fn from_config(cfg: &SnapshotConfig) -> Result<SnapshotRequest, Error> {
        let local_dir = cfg.expanded_local_dir()?;

        Ok(SnapshotRequest {
            repo_id: cfg.repo_id.clone(),
            repo_type: cfg.repo_type,
            revision: cfg.revision.clone(),
            local_dir,
            allow_patterns: cfg
                .allow_patterns
                .as_ref()
                .map(|raw| raw.iter().map(|p| Pattern::new(p)).collect()),
            ignore_patterns: cfg.ignore_patterns.iter().map(|p| Pattern::new(p)).collect(),
            force: false,
            dry_run: false,
        })
    }
}

/// The outcome of a successful snapshot download.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub local_dir: PathBuf,
    /// The commit the requested revision resolved to, if the hub told us.
    pub sha: Option<String>,
    /// Every remote file selected by the patterns.
    pub planned: Vec<String>,
    pub downloaded: Vec<PathBuf>,
    /// Files which were already present locally.
    pub skipped: Vec<PathBuf>,
}

/// Download every file from a repository which is selected by the
/// request's patterns, mirroring the repository's layout under
/// `request.local_dir`.
///
/// A file which fails to download won't stop the others. Instead, all
/// failures are reported together as a [`DownloadFailure`].
pub fn snapshot_download<H>(hub: &H, request: &SnapshotRequest) -> Result<Snapshot, Error>
where
    H: Hub + ?Sized,
{
    info!(
        "Fetching the file list for {} ({})",
        request.repo_id, request.revision
    );
    let info = hub
        .repo_info(&request.repo_id, request.repo_type, &request.revision)
        .context("Unable to fetch the repository's file list")?;

    let selected = select_files(&info, request);
    info!(
        "Selected {} of {} files from {}",
        selected.len(),
        info.siblings.len(),
        request.repo_id
    );

    let mut snapshot = Snapshot {
        local_dir: request.local_dir.clone(),
        sha: info.sha.clone(),
        planned: selected.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    };

    if request.dry_run {
        for filename in &selected {
            info!(
                "Would download {} to {}",
                filename,
                request.local_dir.join(filename).display()
            );
        }
        return Ok(snapshot);
    }

    // pin every download to the same commit so a push halfway through can't
    // leave us with a mix of old and new files
    let revision = info.sha.as_ref().unwrap_or(&request.revision);
    let mut errors = Vec::new();

    for filename in &selected {
        match fetch_file(hub, request, revision, &info, filename) {
            Ok(Fetched::Downloaded(path)) => snapshot.downloaded.push(path),
            Ok(Fetched::UpToDate(path)) => snapshot.skipped.push(path),
            Err(e) => {
                warn!("Downloading {} failed, {}", filename, e);
                errors.push((filename.to_string(), e));
            }
        }
    }

    if !errors.is_empty() {
        return Err(DownloadFailure { errors }.into());
    }

    info!(
        "{} files downloaded and {} already up to date in {}",
        snapshot.downloaded.len(),
        snapshot.skipped.len(),
        snapshot.local_dir.display()
    );
    Ok(snapshot)
}

fn select_files<'a>(info: &'a RepoInfo, request: &SnapshotRequest) -> Vec<&'a str> {
    if let Some(ref allow) = request.allow_patterns {
        for pattern in patterns::unmatched(allow, info.filenames()) {
            warn!(
                "The pattern \"{}\" didn't match anything in {}",
                pattern, request.repo_id
            );
        }
    }

    patterns::filter_files(
        info.filenames(),
        request.allow_patterns.as_ref().map(|p| p.as_slice()),
        &request.ignore_patterns,
    )
}

#[derive(Debug, Clone, PartialEq)]
enum Fetched {
    Downloaded(PathBuf),
    UpToDate(PathBuf),
}

fn fetch_file<H>(
    hub: &H,
    request: &SnapshotRequest,
    revision: &str,
    info: &RepoInfo,
    filename: &str,
) -> Result<Fetched, Error>
where
    H: Hub + ?Sized,
{
    let dest = request.local_dir.join(safe_relative_path(filename)?);
    let expected_size = info.file(filename).and_then(|f| f.size);

    if !request.force && is_up_to_date(&dest, expected_size) {
        debug!("{} is already up to date", dest.display());
        return Ok(Fetched::UpToDate(dest));
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|_| format!("Couldn't create the directory ({})", parent.display()))?;
    }

    let staging = incomplete_path(&dest);
    debug!("Downloading {} into {}", filename, staging.display());

    let bytes = match hub.download(
        &request.repo_id,
        request.repo_type,
        revision,
        filename,
        &staging,
    ) {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }
    };

    fs::rename(&staging, &dest)
        .with_context(|_| format!("Unable to move the download to {}", dest.display()))?;

    info!("Downloaded {} ({} bytes)", filename, bytes);
    Ok(Fetched::Downloaded(dest))
}

/// Files are only trusted when the hub told us how big they should be.
fn is_up_to_date(dest: &Path, expected_size: Option<u64>) -> bool {
    match (fs::metadata(dest), expected_size) {
        (Ok(meta), Some(size)) => meta.is_file() && meta.len() == size,
        _ => false,
    }
}

/// Turn a `/`-separated repository path into a relative path which can't
/// escape the destination directory.
fn safe_relative_path(filename: &str) -> Result<PathBuf, UnsafePath> {
    let mut path = PathBuf::new();

    for part in filename.split('/') {
        let mut components = Path::new(part).components();

        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => path.push(name),
            _ => {
                return Err(UnsafePath {
                    path: PathBuf::from(filename),
                })
            }
        }
    }

    Ok(path)
}

fn incomplete_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".incomplete");

    dest.with_file_name(name)
}
