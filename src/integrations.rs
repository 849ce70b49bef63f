use super::*;
use regex::Regex;

const YTDLP_TAIL_CHARS: usize = 2000;
const HTTP_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct PixelDrainInfo {
    name: Option<String>,
    #[serde(default)]
    size: u64,
}

/// What a retrieval produced: one file, or a directory when the source was a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Retrieved {
    File(PathBuf),
    Directory(PathBuf),
}

const PIXELDRAIN_PATTERN: &str = r"(?:https?://)?pixeldrain\.com/u/([A-Za-z0-9]+)";
const YOUTUBE_PATTERN: &str = r"(?i)(?:https?://)?(?:www\.|m\.)?(?:youtube\.com|youtu\.be)/";
const GDRIVE_PATTERN: &str = r"(?:https?://)?drive\.google\.com/";
const GDRIVE_ID_PATTERN: &str = r"(?:/file/d/|/d/|[?&]id=)([A-Za-z0-9_-]{10,})";
const MEGA_PATTERN: &str = r"(?:https?://)?mega\.nz/";

fn pattern_matches(pattern: &str, text: &str) -> Result<bool> {
    let re = Regex::new(pattern).with_context(|| format!("compile pattern {}", pattern))?;
    Ok(re.is_match(text))
}

fn first_capture(pattern: &str, text: &str) -> Result<Option<String>> {
    let re = Regex::new(pattern).with_context(|| format!("compile pattern {}", pattern))?;
    Ok(re
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string()))
}

pub(super) fn classify(url: &str) -> Service {
    let u = url.trim().to_lowercase();
    if u.contains("pixeldrain.com") {
        Service::PixelDrain
    } else if u.contains("drive.google.com") {
        Service::GoogleDrive
    } else if u.contains("mega.nz") {
        Service::Mega
    } else if u.contains("youtu") || u.contains("youtube.com") {
        Service::Youtube
    } else {
        Service::Unrecognized
    }
}

pub(super) fn service_label(service: Service) -> &'static str {
    match service {
        Service::Youtube => "YouTube",
        Service::GoogleDrive => "Google Drive",
        Service::Mega => "MEGA",
        Service::PixelDrain => "PixelDrain",
        Service::Unrecognized => "Unknown",
    }
}

pub(super) fn is_playlist_url(url: &str) -> bool {
    url.contains("list=") || url.to_lowercase().contains("playlist")
}

pub(super) fn retrieve(
    service: Service,
    url: &str,
    downloads: &Path,
    proxy: Option<&str>,
    limits: &Limits,
) -> Result<Retrieved> {
    let retrieved = match service {
        Service::PixelDrain => Retrieved::File(download_pixeldrain(url, downloads, proxy, limits)?),
        Service::GoogleDrive => Retrieved::File(download_gdrive(url, downloads, proxy)?),
        Service::Mega => Retrieved::File(download_mega(url, downloads, proxy)?),
        Service::Youtube => download_youtube(url, downloads, proxy, limits)?,
        Service::Unrecognized => {
            return Err(FlowError::InvalidLink("I couldn't detect that link type.").into())
        }
    };
    if limits.restricted {
        if let Retrieved::File(path) = &retrieved {
            let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            if size > limits.max_document_bytes {
                remove_path(path);
                return Err(FlowError::TooLarge {
                    limit: human_mb(limits.max_document_bytes),
                }
                .into());
            }
        }
    }
    Ok(retrieved)
}

fn http_client(proxy: Option<&str>) -> Result<reqwest::blocking::Client> {
    let mut builder = reqwest::blocking::Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .user_agent(concat!("filebot/", env!("CARGO_PKG_VERSION")));
    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy).context("parse proxy")?);
    }
    builder.build().context("build http client")
}

pub(super) fn pixeldrain_id(url: &str) -> Result<Option<String>> {
    first_capture(PIXELDRAIN_PATTERN, url.trim())
}

pub(super) fn download_pixeldrain(
    url: &str,
    out_dir: &Path,
    proxy: Option<&str>,
    limits: &Limits,
) -> Result<PathBuf> {
    let file_id =
        pixeldrain_id(url)?.ok_or(FlowError::InvalidLink("Not a valid PixelDrain link."))?;
    let client = http_client(proxy)?;

    let body = client
        .get(format!("https://pixeldrain.com/api/file/{}", file_id))
        .send()
        .context("request PixelDrain file info")?
        .error_for_status()
        .context("PixelDrain file info")?
        .text()
        .context("read PixelDrain file info")?;
    let info: PixelDrainInfo =
        serde_json::from_str(&body).context("parse PixelDrain file info")?;
    if limits.restricted && info.size > limits.max_document_bytes {
        return Err(FlowError::TooLarge {
            limit: human_mb(limits.max_document_bytes),
        }
        .into());
    }

    let name = sanitize(info.name.as_deref().unwrap_or(""));
    let name = if name.is_empty() {
        format!("{}.bin", file_id)
    } else {
        name
    };
    fs::create_dir_all(out_dir).with_context(|| format!("create dir {}", out_dir.display()))?;
    let out_path = out_dir.join(name);

    let mut response = client
        .get(format!("https://pixeldrain.com/api/file/{}/download", file_id))
        .send()
        .context("request PixelDrain download")?
        .error_for_status()
        .context("PixelDrain download")?;
    write_response(&mut response, &out_path)?;
    Ok(out_path)
}

pub(super) fn gdrive_id(url: &str) -> Result<Option<String>> {
    first_capture(GDRIVE_ID_PATTERN, url.trim())
}

pub(super) fn download_gdrive(url: &str, out_dir: &Path, proxy: Option<&str>) -> Result<PathBuf> {
    if !pattern_matches(GDRIVE_PATTERN, url.trim())? {
        return Err(FlowError::InvalidLink("Not a valid Google Drive link.").into());
    }
    let file_id = gdrive_id(url)?.ok_or(FlowError::InvalidLink(
        "Google Drive link has no file id. Send a file share link.",
    ))?;
    let client = http_client(proxy)?;

    let mut response = client
        .get("https://drive.usercontent.google.com/download")
        .query(&[("id", file_id.as_str()), ("export", "download"), ("confirm", "t")])
        .send()
        .context("request Google Drive download")?
        .error_for_status()
        .context("Google Drive download")?;

    let is_html = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("text/html"))
        .unwrap_or(false);
    if is_html {
        return Err(anyhow!(
            "Google Drive download failed (link may require permission)."
        ));
    }

    let name = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_disposition)
        .map(|name| sanitize(&name))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("{}.bin", file_id));
    fs::create_dir_all(out_dir).with_context(|| format!("create dir {}", out_dir.display()))?;
    let out_path = out_dir.join(name);
    write_response(&mut response, &out_path)?;
    Ok(out_path)
}

pub(super) fn filename_from_disposition(header: &str) -> Option<String> {
    for part in header.split(';') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("filename*=") {
            let value = value.trim_matches('"');
            let encoded = value.rsplit("''").next().unwrap_or(value);
            return Some(percent_decode(encoded));
        }
    }
    header.split(';').find_map(|part| {
        part.trim()
            .strip_prefix("filename=")
            .map(|value| value.trim_matches('"').to_string())
    })
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|hex| u8::from_str_radix(hex, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

fn write_response(response: &mut reqwest::blocking::Response, out_path: &Path) -> Result<()> {
    let mut file = fs::File::create(out_path)
        .with_context(|| format!("create {}", out_path.display()))?;
    if let Err(err) = response.copy_to(&mut file) {
        drop(file);
        remove_path(out_path);
        return Err(err).with_context(|| format!("write {}", out_path.display()));
    }
    Ok(())
}

pub(super) fn download_youtube(
    url: &str,
    downloads: &Path,
    proxy: Option<&str>,
    limits: &Limits,
) -> Result<Retrieved> {
    let url = url.trim();
    if !pattern_matches(YOUTUBE_PATTERN, url)? {
        return Err(FlowError::InvalidLink("Not a valid YouTube link.").into());
    }
    if limits.restricted && is_playlist_url(url) {
        return Err(FlowError::PlaylistBlocked.into());
    }

    let target_dir = downloads.join(format!("youtube-{}", short_id()));
    fs::create_dir_all(&target_dir)
        .with_context(|| format!("create dir {}", target_dir.display()))?;
    let template = target_dir.join("%(title).150s [%(id)s].%(ext)s");

    let mut cmd = Command::new("yt-dlp");
    if let Some(proxy) = proxy {
        cmd.arg("--proxy").arg(proxy);
    }
    cmd.arg("--no-mtime");
    if limits.restricted {
        cmd.arg("--no-playlist");
    }
    cmd.args(["--retries", "5", "--fragment-retries", "5"])
        .args(["-f", "bv*+ba/best"])
        .args(["--merge-output-format", "mp4"])
        .arg("-o")
        .arg(template.to_string_lossy().to_string())
        .arg(url);

    let output = cmd.output().context("run yt-dlp")?;
    if !output.status.success() {
        return Err(anyhow!(format_ytdlp_error(&output)));
    }

    let mut files: Vec<PathBuf> = fs::read_dir(&target_dir)
        .with_context(|| format!("read {}", target_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    match files.len() {
        0 => Err(anyhow!("No output from yt-dlp")),
        1 => Ok(Retrieved::File(files.remove(0))),
        _ => Ok(Retrieved::Directory(target_dir)),
    }
}

pub(super) fn format_ytdlp_error(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!(
        "yt-dlp failed ({}):\n{}",
        output.status,
        summarize_process_output(&stdout, &stderr, YTDLP_TAIL_CHARS)
    )
}

pub(super) fn download_mega(url: &str, out_dir: &Path, proxy: Option<&str>) -> Result<PathBuf> {
    let url = url.trim();
    if !pattern_matches(MEGA_PATTERN, url)? {
        return Err(FlowError::InvalidLink("Not a valid MEGA link.").into());
    }
    fs::create_dir_all(out_dir).with_context(|| format!("create dir {}", out_dir.display()))?;

    let mut cmd = Command::new("megadl");
    if let Some(proxy) = proxy {
        cmd.arg("--proxy").arg(proxy);
    }
    cmd.arg("--no-progress")
        .arg("--print-names")
        .arg("--path")
        .arg(out_dir)
        .arg(url);
    let output = cmd.output().context("run megadl")?;
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "MEGA download failed ({}):\n{}",
            output.status,
            summarize_process_output(&stdout, &stderr, YTDLP_TAIL_CHARS)
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let printed = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| out_dir.join(Path::new(line).file_name().unwrap_or_default()))
        .filter(|path| path.is_file());
    match printed {
        Some(path) => Ok(path),
        None => newest_file(out_dir)?.ok_or_else(|| anyhow!("MEGA download returned nothing.")),
    }
}

fn newest_file(dir: &Path) -> Result<Option<PathBuf>> {
    let newest = fs::read_dir(dir)
        .with_context(|| format!("read {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            if !metadata.is_file() {
                return None;
            }
            Some((metadata.modified().ok()?, entry.path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path);
    Ok(newest)
}
