//! Resource fetching: bring referenced figures next to the `.tex` file.
//!
//! The doclet builder turns every image reference into a
//! [`ResourceRequest`]: remote figures are downloaded, local ones copied
//! from the Markdown file's directory. Requests run one at a time, each
//! attempted exactly once with its own timeout. A failure does not stop the
//! remaining requests; it is recorded so the author gets the full list.

use crate::error::{Diagnostic, Diagnostics};
use crate::pipeline::doclet::{ResourceRequest, ResourceSource};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Fetch every request. Returns the paths this run created, for later
/// cleanup; files that already existed at their destination are left out.
pub async fn fetch_all(
    requests: &[ResourceRequest],
    timeout_secs: u64,
    diagnostics: &mut Diagnostics,
) -> Vec<PathBuf> {
    let mut written = Vec::with_capacity(requests.len());
    let mut client: Option<reqwest::Client> = None;

    for request in requests {
        if let Some(parent) = request.dest.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                diagnostics.error(failure(request, format!("cannot create {}: {}", parent.display(), e)));
                continue;
            }
        }

        // Only files this run creates are handed back for cleanup.
        let existed = tokio::fs::try_exists(&request.dest).await.unwrap_or(false);
        let result = match &request.source {
            ResourceSource::Download { url } => match http_client(&mut client, timeout_secs) {
                Ok(c) => download(c, url, &request.dest, timeout_secs).await.map(|()| true),
                Err(reason) => Err(reason),
            },
            ResourceSource::Copy { path } => copy(path, &request.dest).await,
        };

        match result {
            Ok(true) if !existed => written.push(request.dest.clone()),
            Ok(true) => debug!("Replaced existing {}, keeping it after cleanup", request.dest.display()),
            Ok(false) => debug!("{} is already in place", request.dest.display()),
            Err(reason) => diagnostics.error(failure(request, reason)),
        }
    }

    debug!("fetched {}/{} resources", written.len(), requests.len());
    written
}

/// Build the shared client on first use.
fn http_client(slot: &mut Option<reqwest::Client>, timeout_secs: u64) -> Result<&reqwest::Client, String> {
    if slot.is_none() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| e.to_string())?;
        *slot = Some(client);
    }
    slot.as_ref().ok_or_else(|| "http client unavailable".to_string())
}

fn failure(request: &ResourceRequest, reason: String) -> Diagnostic {
    match &request.source {
        ResourceSource::Download { url } => Diagnostic::DownloadFailed {
            url: url.clone(),
            reason,
        },
        ResourceSource::Copy { path } => Diagnostic::CopyFailed {
            path: path.display().to_string(),
            reason,
        },
    }
}

async fn download(client: &reqwest::Client, url: &str, dest: &Path, timeout_secs: u64) -> Result<(), String> {
    info!("Downloading figure from: {}", url);

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            format!("timed out after {timeout_secs}s")
        } else {
            e.to_string()
        }
    })?;

    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status()));
    }

    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            format!("timed out after {timeout_secs}s")
        } else {
            e.to_string()
        }
    })?;

    tokio::fs::write(dest, &bytes)
        .await
        .map_err(|e| format!("cannot write {}: {}", dest.display(), e))?;

    info!("Downloaded to: {}", dest.display());
    Ok(())
}

/// Copy `source` to `dest`. Returns `false` without touching anything when
/// both name the same file.
async fn copy(source: &Path, dest: &Path) -> Result<bool, String> {
    if !tokio::fs::try_exists(source).await.unwrap_or(false) {
        return Err("file not found".to_string());
    }
    if same_file(source, dest).await {
        return Ok(false);
    }
    tokio::fs::copy(source, dest)
        .await
        .map_err(|e| e.to_string())?;
    debug!("Copied {} -> {}", source.display(), dest.display());
    Ok(true)
}

/// Whether two paths resolve to the same existing file (`./x.png` and
/// `x.png`, symlinked directories, absolute vs relative spellings).
async fn same_file(a: &Path, b: &Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn copy_request(path: PathBuf, dest: PathBuf) -> ResourceRequest {
        ResourceRequest {
            source: ResourceSource::Copy { path },
            dest,
            line: 1,
        }
    }

    #[tokio::test]
    async fn copies_into_nested_destination() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("plot.png");
        std::fs::write(&source, b"png").unwrap();
        let dest = dir.path().join("out/figures/plot.png");

        let mut diags = Diagnostics::new();
        let written = fetch_all(&[copy_request(source, dest.clone())], 5, &mut diags).await;

        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(written, vec![dest.clone()]);
        assert_eq!(std::fs::read(dest).unwrap(), b"png");
    }

    #[tokio::test]
    async fn figure_already_in_place_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let figure = dir.path().join("x.png");
        std::fs::write(&figure, b"png").unwrap();

        let mut diags = Diagnostics::new();
        let request = copy_request(dir.path().join(".").join("x.png"), figure.clone());
        let written = fetch_all(&[request], 5, &mut diags).await;

        assert!(diags.is_empty(), "{diags:?}");
        assert!(written.is_empty());
        assert_eq!(std::fs::read(&figure).unwrap(), b"png");

        crate::pipeline::compile::clean_up(dir.path(), "doc", &written).await;
        assert_eq!(std::fs::read(&figure).unwrap(), b"png");
    }

    #[tokio::test]
    async fn existing_destination_is_not_handed_to_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("plot.png");
        std::fs::write(&source, b"new").unwrap();
        let dest = dir.path().join("out/plot.png");
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, b"old").unwrap();

        let mut diags = Diagnostics::new();
        let written = fetch_all(&[copy_request(source, dest.clone())], 5, &mut diags).await;

        assert!(diags.is_empty(), "{diags:?}");
        assert!(written.is_empty());
        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
    }

    #[tokio::test]
    async fn failures_are_collected_and_the_rest_still_run() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        std::fs::write(&good, b"ok").unwrap();

        let requests = vec![
            copy_request(dir.path().join("missing.png"), dir.path().join("out/missing.png")),
            ResourceRequest {
                source: ResourceSource::Download {
                    url: "http://127.0.0.1:9/unreachable.png".into(),
                },
                dest: dir.path().join("out/unreachable.png"),
                line: 2,
            },
            copy_request(good, dir.path().join("out/good.png")),
        ];

        let mut diags = Diagnostics::new();
        let written = fetch_all(&requests, 2, &mut diags).await;

        assert_eq!(written, vec![dir.path().join("out/good.png")]);
        assert_eq!(diags.errors.len(), 2);
        assert!(matches!(diags.errors[0], Diagnostic::CopyFailed { .. }));
        assert!(matches!(diags.errors[1], Diagnostic::DownloadFailed { .. }));
    }
}
