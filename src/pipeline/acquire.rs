use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::Output;

use tracing::{debug, info};
use url::Url;

use crate::pipeline::assets::{self, MediaAsset};
use crate::pipeline::error::AcquisitionError;
use crate::pipeline::tool;

/// Turns a source URL into a local media file.
pub trait MediaAcquirer: Send {
    fn acquire(&self, url: &Url) -> Result<MediaAsset, AcquisitionError>;
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Strategy {
    /// Known video-sharing platform, fetched with the dedicated downloader
    Platform,
    /// Anything else is treated as a media stream ffmpeg can read directly
    DirectStream,
}

/// Picks the download strategy by matching the URL host against `platform_domains`.
///
/// A domain matches its own host and every subdomain of it, so `youtube.com`
/// covers `www.youtube.com` and `m.youtube.com` but not `notyoutube.com`.
pub fn strategy_for(url: &Url, platform_domains: &[String]) -> Strategy {
    let Some(host) = url.host_str() else {
        return Strategy::DirectStream;
    };
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let is_platform = platform_domains.iter().any(|domain| {
        let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
        !domain.is_empty()
            && (host == domain
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.')))
    });
    if is_platform {
        Strategy::Platform
    } else {
        Strategy::DirectStream
    }
}

#[derive(Debug, Clone)]
pub struct ToolAcquirer {
    pub downloader: String,
    pub ffmpeg: String,
    pub platform_domains: Vec<String>,
    pub user_agent: String,
    pub work_dir: PathBuf,
    pub retain_assets: bool,
}

impl MediaAcquirer for ToolAcquirer {
    #[tracing::instrument(level = "info", skip_all, fields(url = %url))]
    fn acquire(&self, url: &Url) -> Result<MediaAsset, AcquisitionError> {
        fs::create_dir_all(&self.work_dir).map_err(|err| {
            AcquisitionError::Unknown(format!(
                "cannot create work directory {}: {}",
                self.work_dir.display(),
                err
            ))
        })?;

        let strategy = strategy_for(url, &self.platform_domains);
        debug!(?strategy, "Selected download strategy");
        let asset = match strategy {
            Strategy::Platform => self.download_from_platform(url)?,
            Strategy::DirectStream => self.copy_stream(url)?,
        };
        info!(path = %asset.path().display(), "Media downloaded");
        Ok(asset)
    }
}

impl ToolAcquirer {
    fn download_from_platform(&self, url: &Url) -> Result<MediaAsset, AcquisitionError> {
        // Owned before the downloader starts so its partial files go on every exit path
        let scratch = assets::scratch_dir(&self.work_dir, self.retain_assets).map_err(|err| {
            AcquisitionError::Unknown(format!("cannot create download directory: {}", err))
        })?;
        let args: Vec<OsString> = vec![
            "--format".into(),
            "bestaudio/best".into(),
            "--output".into(),
            "%(id)s.%(ext)s".into(),
            "--paths".into(),
            scratch.path().as_os_str().to_os_string(),
            "--quiet".into(),
            "--no-warnings".into(),
            "--no-playlist".into(),
            "--user-agent".into(),
            self.user_agent.clone().into(),
            "--print".into(),
            "after_move:filepath".into(),
            "--no-simulate".into(),
            url.as_str().into(),
        ];
        let output = tool::run(&self.downloader, &args)
            .map_err(|err| spawn_failure(&self.downloader, err))?;
        check_status(&self.downloader, &output)?;

        // The downloader resolves the final name itself, it is the last line it prints
        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .ok_or_else(|| {
                AcquisitionError::Unknown(format!(
                    "{} did not report the downloaded file",
                    self.downloader
                ))
            })?;
        Ok(MediaAsset::in_scratch_dir(
            path,
            scratch,
            self.retain_assets,
        ))
    }

    fn copy_stream(&self, url: &Url) -> Result<MediaAsset, AcquisitionError> {
        let path = tempfile::Builder::new()
            .prefix("accent-probe-")
            .suffix(".mp4")
            .tempfile_in(&self.work_dir)
            .and_then(|file| file.into_temp_path().keep().map_err(|err| err.error))
            .map_err(|err| {
                AcquisitionError::Unknown(format!("cannot create temporary file: {}", err))
            })?;
        // Guard first so a failed copy does not leave the placeholder behind
        let asset = MediaAsset::new(path, self.retain_assets);

        let args: Vec<OsString> = vec![
            "-y".into(),
            "-nostdin".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            url.as_str().into(),
            "-c".into(),
            "copy".into(),
            asset.path().as_os_str().to_os_string(),
        ];
        let output =
            tool::run(&self.ffmpeg, &args).map_err(|err| spawn_failure(&self.ffmpeg, err))?;
        check_status(&self.ffmpeg, &output)?;
        Ok(asset)
    }
}

fn spawn_failure(program: &str, err: io::Error) -> AcquisitionError {
    if err.kind() == io::ErrorKind::NotFound {
        AcquisitionError::ToolFailure {
            tool: program.to_string(),
            status: "not found".to_string(),
            detail: format!("`{}` is not installed or not on PATH", program),
        }
    } else {
        AcquisitionError::Unknown(format!("cannot run {}: {}", program, err))
    }
}

fn check_status(program: &str, output: &Output) -> Result<(), AcquisitionError> {
    if output.status.success() {
        return Ok(());
    }
    let detail = tool::stderr_tail(&output.stderr);
    if tool::is_network_failure(&detail) {
        return Err(AcquisitionError::Transient(detail));
    }
    Err(AcquisitionError::ToolFailure {
        tool: program.to_string(),
        status: tool::status_text(output),
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains() -> Vec<String> {
        vec!["youtube.com".to_string(), "youtu.be".to_string()]
    }

    fn strategy(url: &str) -> Strategy {
        strategy_for(&Url::parse(url).unwrap(), &domains())
    }

    #[test]
    fn platform_hosts_use_the_downloader() {
        assert_eq!(strategy("https://www.youtube.com/watch?v=abc"), Strategy::Platform);
        assert_eq!(strategy("https://youtu.be/abc"), Strategy::Platform);
        assert_eq!(strategy("https://M.YouTube.com/watch?v=abc"), Strategy::Platform);
    }

    #[test]
    fn other_hosts_are_direct_streams() {
        assert_eq!(
            strategy("https://cdn.example.com/talk.mp4"),
            Strategy::DirectStream
        );
        assert_eq!(
            strategy("https://notyoutube.com/watch?v=abc"),
            Strategy::DirectStream
        );
        // The domain list is only matched against the host
        assert_eq!(
            strategy("https://example.com/youtube.com/video.mp4"),
            Strategy::DirectStream
        );
    }

    #[test]
    fn domain_list_is_configurable() {
        let url = Url::parse("https://www.loom.com/share/123").unwrap();
        assert_eq!(strategy_for(&url, &domains()), Strategy::DirectStream);
        let extended = vec!["loom.com".to_string()];
        assert_eq!(strategy_for(&url, &extended), Strategy::Platform);
        assert_eq!(strategy_for(&url, &[]), Strategy::DirectStream);
    }

    #[test]
    fn missing_tool_is_a_tool_failure() {
        let err = spawn_failure("yt-dlp", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, AcquisitionError::ToolFailure { .. }));
        let err = spawn_failure("yt-dlp", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, AcquisitionError::Unknown(_)));
    }

    #[test]
    fn unreachable_source_fails_without_leaving_files() {
        let dir = tempfile::tempdir().unwrap();
        let acquirer = ToolAcquirer {
            downloader: "definitely-not-yt-dlp-7f3a".to_string(),
            ffmpeg: "definitely-not-ffmpeg-7f3a".to_string(),
            platform_domains: domains(),
            user_agent: "test".to_string(),
            work_dir: dir.path().to_path_buf(),
            retain_assets: false,
        };

        let url = Url::parse("https://cdn.example.com/talk.mp4").unwrap();
        assert!(acquirer.acquire(&url).is_err());
        let url = Url::parse("https://youtu.be/abc").unwrap();
        assert!(acquirer.acquire(&url).is_err());

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    fn fake_downloader(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-yt-dlp");
        let script = format!(
            "#!/bin/sh\nwhile [ $# -gt 0 ]; do\n  [ \"$1\" = --paths ] && out=\"$2\"\n  shift\ndone\n{}\n",
            body
        );
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    fn platform_acquirer(downloader: String, work_dir: &std::path::Path) -> ToolAcquirer {
        ToolAcquirer {
            downloader,
            ffmpeg: "ffmpeg".to_string(),
            platform_domains: domains(),
            user_agent: "test".to_string(),
            work_dir: work_dir.to_path_buf(),
            retain_assets: false,
        }
    }

    #[cfg(unix)]
    #[test]
    fn failed_download_removes_partial_files() {
        let bin = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let downloader = fake_downloader(
            bin.path(),
            "echo partial > \"$out/abc.webm.part\"\n\
             echo 'ERROR: unable to download video data: HTTP Error 403: Forbidden' >&2\n\
             exit 1",
        );
        let acquirer = platform_acquirer(downloader, work_dir.path());

        let url = Url::parse("https://www.youtube.com/watch?v=abc").unwrap();
        let err = acquirer.acquire(&url).unwrap_err();
        assert!(matches!(err, AcquisitionError::Transient(_)), "{err}");
        assert_eq!(fs::read_dir(work_dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn downloaded_media_lives_in_its_own_directory() {
        let bin = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let downloader = fake_downloader(
            bin.path(),
            "echo media > \"$out/abc.webm\"\n\
             echo leftover > \"$out/abc.webm.ytdl\"\n\
             echo \"$out/abc.webm\"",
        );
        let acquirer = platform_acquirer(downloader, work_dir.path());

        let url = Url::parse("https://youtu.be/abc").unwrap();
        let asset = acquirer.acquire(&url).unwrap();
        assert!(asset.path().ends_with("abc.webm"));
        assert_eq!(asset.size_on_disk().unwrap(), 6);
        assert_eq!(asset.scratch_path().unwrap().parent(), Some(work_dir.path()));

        drop(asset);
        assert_eq!(fs::read_dir(work_dir.path()).unwrap().count(), 0);
    }
}
