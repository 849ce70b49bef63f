use super::*;

/// Per-user directories under `<base>/<user_id>/`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) struct UserArea {
    pub(super) root: PathBuf,
    pub(super) work: PathBuf,
    pub(super) downloads: PathBuf,
    pub(super) output: PathBuf,
}

pub(super) fn ensure_user_area(base: &Path, user_id: u64) -> Result<UserArea> {
    let root = base.join(user_id.to_string());
    let area = UserArea {
        work: root.join("work"),
        downloads: root.join("downloads"),
        output: root.join("output"),
        root,
    };
    for dir in [&area.work, &area.downloads, &area.output] {
        fs::create_dir_all(dir).with_context(|| format!("create user dir {}", dir.display()))?;
    }
    Ok(area)
}

/// Removes per-user trees older than `max_age`. Best effort: never fails.
pub(super) fn sweep(base: &Path, max_age: Duration) -> usize {
    sweep_at(base, max_age, SystemTime::now())
}

pub(super) fn sweep_at(base: &Path, max_age: Duration, now: SystemTime) -> usize {
    let entries = match fs::read_dir(base) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("sweep skipped {}: {}", base.display(), err);
            return 0;
        }
    };
    let now: chrono::DateTime<chrono::Local> = now.into();
    // A retention beyond the representable range keeps everything.
    let Some(cutoff) = chrono::Duration::from_std(max_age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
    else {
        debug!("sweep skipped: retention {:?} is out of range", max_age);
        return 0;
    };

    let mut deleted = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_dir() {
            continue;
        }
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let modified: chrono::DateTime<chrono::Local> = modified.into();
        if modified < cutoff {
            if let Err(err) = fs::remove_dir_all(&path) {
                warn!("sweep could not remove {}: {}", path.display(), err);
            }
            deleted += 1;
        }
    }
    deleted
}
