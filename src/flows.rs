use super::*;

/// Applies one inbound event for a user, holding that user's session lock
/// until every follow-up event and job it caused has finished.
pub(super) async fn dispatch(
    transport: &dyn Transport,
    state: &AppState,
    ctx: &FlowContext,
    event: Event,
) -> Result<()> {
    let mut session = state.sessions.lock(ctx.user_id).await;
    let mut pending = Some(event);
    while let Some(event) = pending.take() {
        let Transition { next, effect } = step(&session, event, &state.limits);
        if next != *session {
            debug!(
                "user {} session {:?}/{:?} -> {:?}/{:?}",
                ctx.user_id,
                session.menu,
                session.action.as_ref().map(action_name),
                next.menu,
                next.action.as_ref().map(action_name)
            );
        }
        *session = next;
        pending = apply(transport, state, ctx, effect).await?;
    }
    Ok(())
}

fn action_name(action: &Action) -> &'static str {
    match action {
        Action::ZipWaitFile => "zip_wait_file",
        Action::UnzipWaitZip => "unzip_wait_zip",
        Action::RenameWaitFile => "rename_wait_file",
        Action::RenameWaitNewName { .. } => "rename_wait_new_name",
        Action::TextToPdfWaitText => "text_to_pdf_wait_text",
        Action::ImagesCollect { .. } => "images_collect",
        Action::MergeCollect { .. } => "merge_collect",
        Action::ProxyWaitValue => "proxy_wait_value",
        Action::AwaitLink(_) => "await_link",
    }
}

async fn apply(
    transport: &dyn Transport,
    state: &AppState,
    ctx: &FlowContext,
    effect: Effect,
) -> Result<Option<Event>> {
    match effect {
        Effect::Nothing => Ok(None),
        Effect::Reply(reply) => {
            transport
                .send_text(ctx.chat_id, &reply.text, reply.keyboard)
                .await?;
            Ok(None)
        }
        Effect::ShowMenu(menu) => {
            show_menu(transport, ctx, menu).await?;
            Ok(None)
        }
        Effect::Restart => {
            let base = state.config.storage_dir.clone();
            let retention = state.config.retention();
            let removed = state
                .workers
                .run(move || Ok(sweep(&base, retention)))
                .await
                .unwrap_or_else(|err| {
                    error!("storage sweep failed: {:#}", err);
                    0
                });
            if removed > 0 {
                info!("sweep removed {} user area(s)", removed);
            }
            transport
                .send_text(ctx.chat_id, menu_text(Menu::Main), Some(Keyboard::Main))
                .await?;
            Ok(None)
        }
        Effect::Fetch(meta) => fetch(transport, state, ctx, meta).await.map(Some),
        Effect::Run(job) => {
            run_job(transport, state, ctx, job).await?;
            Ok(None)
        }
    }
}

async fn show_menu(transport: &dyn Transport, ctx: &FlowContext, menu: Menu) -> Result<()> {
    let text = menu_text(menu);
    let keyboard = Some(menu_keyboard(menu));
    if let Some(message_id) = ctx.origin {
        match transport
            .edit_text(ctx.chat_id, message_id, text, keyboard)
            .await
        {
            Ok(()) => return Ok(()),
            Err(err) => {
                error!("menu edit failed; sending a new message instead: {:#}", err);
            }
        }
    }
    transport.send_text(ctx.chat_id, text, keyboard).await
}

/// Pulls a document into the user's work directory. Download problems become a
/// `FetchFailed` event so the state machine decides what happens next.
async fn fetch(
    transport: &dyn Transport,
    state: &AppState,
    ctx: &FlowContext,
    meta: DocumentMeta,
) -> Result<Event> {
    let area = ensure_user_area(&state.config.storage_dir, ctx.user_id)?;
    let name = sanitize(meta.name.as_deref().unwrap_or("file.bin"));
    let name = if name.is_empty() || name == "." || name == ".." {
        "file.bin".to_string()
    } else {
        name
    };
    let dest = unique_path(&area.work, &name);

    transport
        .send_text(ctx.chat_id, "Downloading file…", None)
        .await?;
    match transport.fetch_document(&meta.file_id, &dest).await {
        Ok(()) => {
            info!(
                "user {} fetched {} ({})",
                ctx.user_id,
                dest.display(),
                human_mb(meta.size)
            );
            Ok(Event::Fetched(dest))
        }
        Err(err) => {
            warn!("user {} fetch of {} failed: {:#}", ctx.user_id, meta.file_id, err);
            remove_path(&dest);
            Ok(Event::FetchFailed(format!("{:#}", err)))
        }
    }
}

fn job_notice(job: &Job) -> &'static str {
    match job {
        Job::Zip { .. } => "Zipping…",
        Job::Unzip { .. } => "Unzipping…",
        Job::Rename { .. } => "Renaming…",
        Job::TextToPdf { .. } => "Creating PDF…",
        Job::ImagesToPdf { .. } => "Converting images to PDF…",
        Job::MergePdfs { .. } => "Merging PDFs…",
        Job::Retrieve { .. } => "Working on it…",
    }
}

fn job_label(job: &Job) -> &'static str {
    match job {
        Job::Zip { .. } => "zip",
        Job::Unzip { .. } => "unzip",
        Job::Rename { .. } => "rename",
        Job::TextToPdf { .. } => "text_to_pdf",
        Job::ImagesToPdf { .. } => "images_to_pdf",
        Job::MergePdfs { .. } => "merge_pdfs",
        Job::Retrieve { .. } => "retrieve",
    }
}

/// Runs a job and reports its outcome. Job failures are relayed to the user;
/// only transport failures propagate.
pub(super) async fn run_job(
    transport: &dyn Transport,
    state: &AppState,
    ctx: &FlowContext,
    job: Job,
) -> Result<()> {
    let label = job_label(&job);
    let is_retrieve = matches!(job, Job::Retrieve { .. });
    transport
        .send_text(ctx.chat_id, job_notice(&job), None)
        .await?;
    info!("user {} started {}", ctx.user_id, label);

    let outcome = match ensure_user_area(&state.config.storage_dir, ctx.user_id) {
        Ok(area) => execute(transport, state, ctx, job, area).await,
        Err(err) => Err(err),
    };
    match outcome {
        Ok((path, caption)) => {
            if !path.exists() {
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string());
                let text = FlowError::MissingOutput(name).to_string();
                warn!("user {} {} produced no output", ctx.user_id, label);
                return transport.send_text(ctx.chat_id, &text, None).await;
            }
            transport
                .send_document(ctx.chat_id, &path, &caption)
                .await?;
            info!("user {} finished {} -> {}", ctx.user_id, label, path.display());
            Ok(())
        }
        Err(err) => {
            warn!("user {} {} failed: {:#}", ctx.user_id, label, err);
            let text = failure_text(&err, is_retrieve);
            transport.send_text(ctx.chat_id, &text, None).await
        }
    }
}

pub(super) fn failure_text(err: &anyhow::Error, is_retrieve: bool) -> String {
    if let Some(flow) = err.downcast_ref::<FlowError>() {
        if is_retrieve {
            return format!("Download failed:\n{}", flow);
        }
        return flow.to_string();
    }
    let detail = truncate_chars(&format!("{:#}", err), ERROR_TAIL_CHARS);
    if is_retrieve {
        format!("Download failed:\n{}", detail)
    } else {
        format!("Operation failed:\n{}", detail)
    }
}

async fn execute(
    transport: &dyn Transport,
    state: &AppState,
    ctx: &FlowContext,
    job: Job,
    area: UserArea,
) -> Result<(PathBuf, String)> {
    match job {
        Job::Zip { source } => {
            let name = source
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            let out = area.output.join(sanitize(&format!("{}.zip", file_stem(&name))));
            let path = state
                .workers
                .run(move || zip_paths(&[source], &out))
                .await?;
            Ok((path, "Zipped ✅".to_string()))
        }
        Job::Unzip { archive } => {
            let check = archive.clone();
            if !state.workers.run(move || Ok(is_zip(&check))).await? {
                return Err(FlowError::NotZip.into());
            }
            let name = archive
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            let out = area
                .output
                .join(sanitize(&format!("{}_unzipped.zip", file_stem(&name))));
            let extracted = area.work.join("unzipped");
            let path = state
                .workers
                .run(move || {
                    remove_path(&extracted);
                    unzip_to_dir(&archive, &extracted)?;
                    zip_paths(&[extracted], &out)
                })
                .await?;
            Ok((path, "Unzipped + rezipped ✅".to_string()))
        }
        Job::Rename { source, new_name } => {
            let path = state
                .workers
                .run(move || {
                    if !source.is_file() {
                        return Err(FlowError::SessionExpired.into());
                    }
                    rename_file(&source, &new_name)
                })
                .await?;
            Ok((path, "Renamed ✅".to_string()))
        }
        Job::TextToPdf { text } => {
            let out = area.output.join("text.pdf");
            let path = state
                .workers
                .run(move || text_to_pdf(&text, &out))
                .await?;
            Ok((path, "Text → PDF ✅".to_string()))
        }
        Job::ImagesToPdf { images } => {
            let out = area.output.join("images.pdf");
            let path = state
                .workers
                .run(move || images_to_pdf(&images, &out))
                .await?;
            Ok((path, "Image → PDF ✅".to_string()))
        }
        Job::MergePdfs { pdfs } => {
            let out = area.output.join("merged.pdf");
            let path = state
                .workers
                .run(move || merge_pdfs(&pdfs, &out))
                .await?;
            Ok((path, "Merged PDF ✅".to_string()))
        }
        Job::Retrieve {
            service,
            url,
            proxy,
        } => {
            let downloads = area.downloads.clone();
            let limits = state.limits.clone();
            let retrieved = state
                .workers
                .run(move || retrieve(service, &url, &downloads, proxy.as_deref(), &limits))
                .await?;
            match retrieved {
                Retrieved::File(path) => {
                    Ok((path, format!("{} download ✅", service_label(service))))
                }
                Retrieved::Directory(dir) => {
                    transport
                        .send_text(ctx.chat_id, "Playlist detected → zipping…", None)
                        .await?;
                    let out = area.output.join("youtube_playlist.zip");
                    let path = state
                        .workers
                        .run(move || zip_paths(&[dir], &out))
                        .await?;
                    Ok((path, "YouTube playlist ZIP ✅".to_string()))
                }
            }
        }
    }
}
