//! Fetching model repositories from `HuggingFace` into the local cache
//!
//! Files are streamed into a staging directory next to the cache and moved into
//! place with a single rename, so a half-finished download is never picked up
//! as a cached model.

use crate::cache::ModelCache;
use crate::error::{BgRemovalError, Result};
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::HeaderMap;
use reqwest::{redirect, Client};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

const HUGGINGFACE_PREFIX: &str = "https://huggingface.co/";

/// Files every model repository must provide
const REQUIRED_FILES: &[&str] = &["config.json", "preprocessor_config.json"];

/// ONNX weights to try; at least one has to succeed
const ONNX_FILES: &[(&str, &str)] = &[
    ("onnx/model.onnx", "fp32"),
    ("onnx/model_fp16.onnx", "fp16"),
];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Set by `HuggingFace` on the redirect for LFS files; holds the content SHA-256
const LINKED_ETAG: &str = "x-linked-etag";

/// Progress reporting that degrades to a no-op without the terminal UI
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    fn new(show_progress: bool) -> Self {
        #[cfg(feature = "cli")]
        {
            if show_progress {
                let pb = ProgressBar::new(0);
                if let Ok(style) = ProgressStyle::default_bar().template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                ) {
                    pb.set_style(style.progress_chars("#>-"));
                }
                return Self::Indicatif(pb);
            }
        }
        #[cfg(not(feature = "cli"))]
        let _ = show_progress;
        Self::NoOp
    }

    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }

    pub fn update(&self, downloaded: u64, total: Option<u64>) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => {
                if let Some(total) = total {
                    pb.set_length(total);
                }
                pb.set_position(downloaded);
            },
            Self::NoOp => {
                let _ = (downloaded, total);
            },
        }
    }

    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }
}

/// Model downloader writing into a [`ModelCache`]
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    /// Does not follow redirects, so the LFS headers stay visible
    metadata_client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BgRemovalError::network_error("Failed to create HTTP client", e))?;
        let metadata_client = Client::builder()
            .timeout(METADATA_TIMEOUT)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| BgRemovalError::network_error("Failed to create HTTP client", e))?;
        Ok(Self {
            client,
            metadata_client,
            cache,
        })
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Download a model repository unless it is already cached, returning its model id
    ///
    /// # Errors
    /// - Unsupported URL
    /// - Network errors or missing required files
    /// - No ONNX variant could be downloaded
    /// - File system errors while staging or moving the model
    pub async fn download_model(&self, url: &str, show_progress: bool) -> Result<String> {
        validate_model_url(url)?;
        let model_id = ModelCache::url_to_model_id(url);

        if self.cache.is_model_cached(&model_id) {
            log::info!("Model already cached: {model_id}");
            return Ok(model_id);
        }

        log::info!("Downloading model {model_id} from {url}");
        let staging_dir = self.create_staging_dir(&model_id)?;
        let final_dir = self.cache.get_model_path(&model_id);
        let progress = ProgressIndicator::new(show_progress);

        if let Err(e) = self
            .download_model_files(url.trim_end_matches('/'), &staging_dir, &progress)
            .await
        {
            if let Err(cleanup_err) = fs::remove_dir_all(&staging_dir) {
                log::warn!(
                    "Failed to clean up {}: {cleanup_err}",
                    staging_dir.display()
                );
            }
            progress.finish_with_message("Download failed".to_string());
            return Err(e);
        }

        if final_dir.exists() {
            fs::remove_dir_all(&final_dir).map_err(|e| {
                BgRemovalError::file_io_error("remove incomplete model directory", &final_dir, &e)
            })?;
        }
        fs::rename(&staging_dir, &final_dir).map_err(|e| {
            BgRemovalError::file_io_error("move downloaded model into cache", &final_dir, &e)
        })?;

        progress.finish_with_message(format!("Downloaded {model_id}"));
        log::info!("Model cached at {}", final_dir.display());
        Ok(model_id)
    }

    /// Staging lives inside the cache root so the final rename stays on one filesystem
    fn create_staging_dir(&self, model_id: &str) -> Result<PathBuf> {
        let staging_dir = self.cache.cache_dir().join(format!(".download-{model_id}"));
        if staging_dir.exists() {
            fs::remove_dir_all(&staging_dir).map_err(|e| {
                BgRemovalError::file_io_error("remove stale staging directory", &staging_dir, &e)
            })?;
        }
        fs::create_dir_all(&staging_dir).map_err(|e| {
            BgRemovalError::file_io_error("create staging directory", &staging_dir, &e)
        })?;
        Ok(staging_dir)
    }

    async fn download_model_files(
        &self,
        repo_url: &str,
        target_dir: &Path,
        progress: &ProgressIndicator,
    ) -> Result<()> {
        let raw_base = format!("{repo_url}/resolve/main/");

        for file_name in REQUIRED_FILES {
            progress.set_message(format!("Downloading {file_name}"));
            self.download_file(&format!("{raw_base}{file_name}"), &target_dir.join(file_name), progress)
                .await?;
        }

        let mut downloaded_variants = 0_usize;
        for (file_path, variant) in ONNX_FILES {
            progress.set_message(format!("Downloading {variant} weights"));
            let local_path = target_dir.join(file_path);
            match self
                .download_file(&format!("{raw_base}{file_path}"), &local_path, progress)
                .await
            {
                Ok(()) => {
                    downloaded_variants += 1;
                    log::info!("Downloaded {variant} variant");
                },
                Err(e) => {
                    log::warn!("Skipping {variant} variant: {e}");
                    // Leave no partial file behind for variant discovery
                    let _ = fs::remove_file(&local_path);
                },
            }
        }

        if downloaded_variants == 0 {
            return Err(BgRemovalError::model(format!(
                "No ONNX model variants available at {repo_url}"
            )));
        }
        Ok(())
    }

    async fn download_file(
        &self,
        url: &str,
        local_path: &Path,
        progress: &ProgressIndicator,
    ) -> Result<()> {
        log::debug!("GET {url} -> {}", local_path.display());

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BgRemovalError::file_io_error("create directory", parent, &e))?;
        }

        let expected_hash = self.expected_sha256(url).await;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BgRemovalError::network_error(format!("Failed to request {url}"), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BgRemovalError::network_error(
                format!("Failed to download {url}"),
                format!("HTTP {status}"),
            ));
        }

        let total = response.content_length();
        let mut reader = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );
        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("create file", local_path, &e))?;

        let mut downloaded = 0_u64;
        let mut buffer = vec![0_u8; 64 * 1024];
        loop {
            let read = reader
                .read(&mut buffer)
                .await
                .map_err(|e| BgRemovalError::network_error(format!("Failed to read {url}"), e))?;
            if read == 0 {
                break;
            }
            file.write_all(buffer.get(..read).unwrap_or_default())
                .await
                .map_err(|e| BgRemovalError::file_io_error("write file", local_path, &e))?;
            downloaded += read as u64;
            progress.update(downloaded, total);
        }

        file.flush()
            .await
            .map_err(|e| BgRemovalError::file_io_error("flush file", local_path, &e))?;
        log::debug!("Wrote {downloaded} bytes to {}", local_path.display());

        if !self.verify_file_integrity(local_path, expected_hash.as_deref())? {
            let _ = fs::remove_file(local_path);
            return Err(BgRemovalError::network_error(
                format!("Failed to download {url}"),
                "SHA-256 mismatch",
            ));
        }
        Ok(())
    }

    /// Published SHA-256 of an LFS file, if the repository exposes one
    async fn expected_sha256(&self, url: &str) -> Option<String> {
        match self.metadata_client.head(url).send().await {
            Ok(response) => sha256_from_headers(response.headers()),
            Err(e) => {
                log::debug!("No checksum for {url}: {e}");
                None
            },
        }
    }

    /// Compare a file's SHA-256 against an expected hex digest; `None` skips the check
    ///
    /// # Errors
    /// - File unreadable
    pub fn verify_file_integrity(&self, file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
        let Some(expected) = expected_hash else {
            return Ok(true);
        };

        let contents = fs::read(file_path)
            .map_err(|e| BgRemovalError::file_io_error("read file for verification", file_path, &e))?;
        let actual = format!("{:x}", Sha256::digest(&contents));

        if actual.eq_ignore_ascii_case(expected) {
            Ok(true)
        } else {
            log::warn!(
                "Integrity check failed for {}: expected {expected}, got {actual}",
                file_path.display()
            );
            Ok(false)
        }
    }
}

/// Pull a SHA-256 out of the linked etag; git blob etags and weak etags are ignored
fn sha256_from_headers(headers: &HeaderMap) -> Option<String> {
    let etag = headers.get(LINKED_ETAG)?.to_str().ok()?;
    let value = etag.trim().trim_matches('"');
    (value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit()))
        .then(|| value.to_ascii_lowercase())
}

/// Only `https://huggingface.co/<owner>/<repo>` URLs are accepted
///
/// # Errors
/// - Empty URL, foreign host, or missing owner/repository segment
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(BgRemovalError::invalid_config("Model URL cannot be empty"));
    }

    let Some(repo_path) = url.strip_prefix(HUGGINGFACE_PREFIX) else {
        return Err(BgRemovalError::invalid_config(format!(
            "Unsupported URL: {url}. Only HuggingFace repositories ({HUGGINGFACE_PREFIX}...) are supported"
        )));
    };

    let mut segments = repo_path.trim_end_matches('/').split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty() => Ok(()),
        _ => Err(BgRemovalError::invalid_config(format!(
            "Invalid HuggingFace repository URL: {url}. Expected {HUGGINGFACE_PREFIX}owner/repo"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn downloader(temp: &TempDir) -> ModelDownloader {
        ModelDownloader::new(ModelCache::with_dir(temp.path()).unwrap()).unwrap()
    }

    #[test]
    fn test_validate_model_url() {
        assert!(validate_model_url("https://huggingface.co/imgly/isnet-general-onnx").is_ok());
        assert!(validate_model_url("https://huggingface.co/briaai/RMBG-1.4/").is_ok());

        for url in [
            "",
            "http://huggingface.co/user/repo",
            "https://github.com/user/repo",
            "https://huggingface.co/",
            "https://huggingface.co/onlyuser",
            "https://huggingface.co/user/repo/tree/main",
        ] {
            assert!(validate_model_url(url).is_err(), "{url} should be rejected");
        }

        let err = validate_model_url("").unwrap_err();
        assert!(err.to_string().contains("cannot be empty"));
    }

    #[tokio::test]
    async fn test_cached_model_skips_network() {
        let temp = TempDir::new().unwrap();
        let downloader = downloader(&temp);
        let model_dir = downloader.cache().get_model_path("imgly--isnet-general-onnx");
        fs::create_dir_all(model_dir.join("onnx")).unwrap();
        fs::write(model_dir.join("preprocessor_config.json"), "{}").unwrap();
        fs::write(model_dir.join("onnx/model.onnx"), b"weights").unwrap();

        let model_id = downloader
            .download_model("https://huggingface.co/imgly/isnet-general-onnx", false)
            .await
            .unwrap();
        assert_eq!(model_id, "imgly--isnet-general-onnx");
    }

    #[tokio::test]
    async fn test_rejects_unsupported_url_before_downloading() {
        let temp = TempDir::new().unwrap();
        let downloader = downloader(&temp);
        let err = downloader
            .download_model("https://example.com/model.onnx", false)
            .await
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::InvalidConfig(_)));
    }

    #[test]
    fn test_staging_dir_is_recreated_empty() {
        let temp = TempDir::new().unwrap();
        let downloader = downloader(&temp);

        let first = downloader.create_staging_dir("org--model").unwrap();
        fs::write(first.join("leftover"), b"x").unwrap();

        let second = downloader.create_staging_dir("org--model").unwrap();
        assert_eq!(first, second);
        assert!(second.starts_with(downloader.cache().cache_dir()));
        assert!(!second.join("leftover").exists());
        assert!(!downloader.cache().is_model_cached("org--model"));
    }

    #[test]
    fn test_sha256_from_linked_etag() {
        let digest = "B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9";
        let mut headers = HeaderMap::new();
        headers.insert(LINKED_ETAG, format!("\"{digest}\"").parse().unwrap());
        assert_eq!(
            sha256_from_headers(&headers).as_deref(),
            Some("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9")
        );

        // Plain git files carry a 40-character blob id
        headers.insert(
            LINKED_ETAG,
            "\"2c3f8b3e4a8d1e6c1b3a5f7d9e0c2b4a6d8f0e1c\"".parse().unwrap(),
        );
        assert_eq!(sha256_from_headers(&headers), None);

        headers.insert(LINKED_ETAG, format!("W/\"{digest}\"").parse().unwrap());
        assert_eq!(sha256_from_headers(&headers), None);

        assert_eq!(sha256_from_headers(&HeaderMap::new()), None);
    }

    #[test]
    fn test_verify_file_integrity() {
        let temp = TempDir::new().unwrap();
        let downloader = downloader(&temp);
        let file = temp.path().join("payload.bin");
        fs::write(&file, b"hello world").unwrap();

        let expected = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
        assert!(downloader.verify_file_integrity(&file, Some(expected)).unwrap());
        assert!(downloader.verify_file_integrity(&file, None).unwrap());
        assert!(!downloader
            .verify_file_integrity(&file, Some("0000000000000000"))
            .unwrap());
        assert!(downloader
            .verify_file_integrity(&temp.path().join("missing"), Some(expected))
            .is_err());
    }
}
