use super::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ContentKind {
    Pdf,
    Zip,
    Image,
    Text,
    Unknown,
}

/// Makes user-supplied text safe to use as a single path component.
pub(super) fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_space = false;
    for c in name.trim().chars() {
        let c = if c == '\n' {
            ' '
        } else if is_illegal_filename_char(c) {
            '_'
        } else {
            c
        };
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    let truncated: String = out.chars().take(MAX_FILENAME_CHARS).collect();
    truncated.trim_end().to_string()
}

pub(super) fn is_illegal_filename_char(c: char) -> bool {
    matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || c.is_control()
}

pub(super) fn content_kind(name: &str) -> ContentKind {
    let lower = name.trim().to_lowercase();
    let ext = Path::new(&lower)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("");
    match ext {
        "pdf" => ContentKind::Pdf,
        "zip" => ContentKind::Zip,
        "jpg" | "jpeg" | "png" | "webp" | "bmp" | "tiff" => ContentKind::Image,
        "txt" | "log" | "md" | "csv" => ContentKind::Text,
        _ => ContentKind::Unknown,
    }
}

pub(super) fn human_mb(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}

pub(super) fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("file")
        .to_string()
}

pub(super) fn is_valid_proxy(value: &str) -> bool {
    let lower = value.trim().to_ascii_lowercase();
    ["http://", "https://", "socks5://"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

pub(super) fn parse_command(text: &str) -> Option<&str> {
    let first = text.split_whitespace().next()?;
    if !first.starts_with('/') {
        return None;
    }
    let cmd = first.trim_start_matches('/');
    Some(cmd.split('@').next().unwrap_or(cmd))
}

pub(super) fn short_id() -> String {
    let id = Uuid::new_v4().to_string();
    id.split('-').next().unwrap_or(&id).to_string()
}

pub(super) fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_file = match path {
        Some(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            toml::from_str(&contents).context("parse config")?
        }
        None => ConfigFile::default(),
    };
    let env: HashMap<String, String> = std::env::vars().collect();
    resolve_config(config_file, &env)
}

/// Applies environment overrides on top of the file values and fills defaults.
pub(super) fn resolve_config(config_file: ConfigFile, env: &HashMap<String, String>) -> Result<Config> {
    let token = env_value(env, "BOT_TOKEN")
        .map(|s| s.to_string())
        .or(config_file.token.map(|t| t.trim().to_string()))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| anyhow!("BOT_TOKEN is missing. Set it before running."))?;

    let storage_dir = env_value(env, "BOT_STORAGE_DIR")
        .map(PathBuf::from)
        .or(config_file.storage_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));

    let max_file_mb = match env_value(env, "MAX_TG_FILE_MB") {
        Some(raw) => raw.parse().context("parse MAX_TG_FILE_MB")?,
        None => config_file.max_file_mb.unwrap_or(DEFAULT_MAX_FILE_MB),
    };
    let max_text_len = match env_value(env, "MAX_TEXT_LEN") {
        Some(raw) => raw.parse().context("parse MAX_TEXT_LEN")?,
        None => config_file.max_text_len.unwrap_or(DEFAULT_MAX_TEXT_LEN),
    };
    let restricted_mode = match env_value(env, "RESTRICTED_MODE").or(env_value(env, "FREE_MODE")) {
        Some(raw) => parse_flag(raw).context("parse RESTRICTED_MODE")?,
        None => config_file.restricted_mode.unwrap_or(false),
    };
    let retention_hours = match env_value(env, "RETENTION_HOURS") {
        Some(raw) => raw.parse().context("parse RETENTION_HOURS")?,
        None => config_file.retention_hours.unwrap_or(DEFAULT_RETENTION_HOURS),
    };
    let workers = match env_value(env, "BOT_WORKERS") {
        Some(raw) => raw.parse().context("parse BOT_WORKERS")?,
        None => config_file.workers.unwrap_or(DEFAULT_WORKERS),
    };
    let merge_cap = match env_value(env, "MAX_MERGE_PDFS") {
        Some(raw) => Some(raw.parse().context("parse MAX_MERGE_PDFS")?),
        None => config_file.merge_cap,
    };
    let image_cap = match env_value(env, "MAX_IMAGES") {
        Some(raw) => Some(raw.parse().context("parse MAX_IMAGES")?),
        None => config_file.image_cap,
    };

    Ok(Config {
        token,
        storage_dir,
        max_file_mb,
        max_text_len,
        restricted_mode,
        retention_hours,
        workers: workers.max(1),
        merge_cap: merge_cap.or(restricted_mode.then_some(RESTRICTED_MERGE_CAP)),
        image_cap: image_cap.or(restricted_mode.then_some(RESTRICTED_IMAGE_CAP)),
    })
}

fn env_value<'a>(env: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

pub(super) fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("expected a boolean flag, got {:?}", other)),
    }
}

pub(super) fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("no parent dir for {}", path.display()))?;
    fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    tmp.write_all(data).context("write temp file")?;
    tmp.flush().context("flush temp file")?;
    tmp.persist(path)
        .map_err(|e| anyhow!("persist temp file: {}", e))?;
    Ok(())
}

/// `dir/name`, or `dir/stem (n).ext` with the first free `n` when that is taken.
pub(super) fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let stem = file_stem(name);
    let ext = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default();
    (1..)
        .map(|n| dir.join(format!("{} ({}){}", stem, n, ext)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

pub(super) fn remove_path(path: &Path) {
    if path.is_dir() {
        let _ = fs::remove_dir_all(path);
    } else if path.exists() {
        let _ = fs::remove_file(path);
    }
}

pub(super) fn summarize_process_output(stdout: &str, stderr: &str, max_chars: usize) -> String {
    let stderr_trimmed = stderr.trim();
    if !stderr_trimmed.is_empty() {
        return trim_tail(stderr_trimmed, max_chars);
    }
    let stdout_trimmed = stdout.trim();
    if !stdout_trimmed.is_empty() {
        return trim_tail(stdout_trimmed, max_chars);
    }
    "No output captured.".to_string()
}

pub(super) fn trim_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - max_chars).collect();
    format!("...{}", tail)
}

pub(super) fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

pub(super) fn menu_text(menu: Menu) -> &'static str {
    match menu {
        Menu::Main => "Choose an option:",
        Menu::File => "File management:",
        Menu::Download => "Downloader:",
        Menu::Proxy => "Proxies (optional):",
    }
}

pub(super) fn menu_keyboard(menu: Menu) -> Keyboard {
    match menu {
        Menu::Main => Keyboard::Main,
        Menu::File => Keyboard::File,
        Menu::Download => Keyboard::Download,
        Menu::Proxy => Keyboard::Proxy,
    }
}

pub(super) fn build_keyboard(kind: Keyboard) -> InlineKeyboardMarkup {
    let button = |label: &str, data: &str| InlineKeyboardButton::callback(label.to_string(), data.to_string());
    let back = || vec![button("⬅ Back", "menu:back")];
    let rows = match kind {
        Keyboard::Main => vec![
            vec![button("File management", "menu:file")],
            vec![button("Downloader", "menu:dl")],
            vec![button("Proxies", "menu:proxy")],
        ],
        Keyboard::File => vec![
            vec![button("Zip", "file:zip"), button("Unzip", "file:unzip")],
            vec![button("Rename", "file:rename"), button("Text → PDF", "file:text2pdf")],
            vec![button("Image → PDF", "file:img2pdf"), button("Merge PDFs", "file:mergepdf")],
            back(),
        ],
        Keyboard::Download => vec![
            vec![button("Auto-detect link", "dl:auto")],
            vec![button("YouTube (video/playlist)", "dl:yt")],
            vec![button("Google Drive", "dl:gdrive")],
            vec![button("MEGA", "dl:mega")],
            vec![button("PixelDrain", "dl:pixeldrain")],
            back(),
        ],
        Keyboard::Proxy => vec![
            vec![button("Set proxy", "proxy:set")],
            vec![button("Clear proxy", "proxy:clear")],
            vec![button("Show current", "proxy:show")],
            back(),
        ],
        Keyboard::MergeControls => vec![
            vec![button("✅ Done (merge now)", "merge:done")],
            vec![button("🧹 Clear list", "merge:clear")],
            vec![button("❌ Cancel", "merge:cancel")],
        ],
        Keyboard::ImageControls => vec![
            vec![button("✅ Done (convert now)", "imgpdf:done")],
            vec![button("🧹 Clear list", "imgpdf:clear")],
            vec![button("❌ Cancel", "imgpdf:cancel")],
        ],
    };
    InlineKeyboardMarkup::new(rows)
}
