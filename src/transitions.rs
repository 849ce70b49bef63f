use super::*;

const PROXY_PROMPT: &str = "Send your proxy in one line.\n\nExamples:\nhttp://ip:port\nhttp://user:pass@ip:port\nsocks5://ip:port";
const RENAME_NAME_PROMPT: &str = "Now send the NEW filename (example: newname.pdf)";
const PICK_TASK_FIRST: &str = "Use the buttons to pick a task first.";
const EXPECTS_FILE: &str = "This step expects a file. Send a file first.";
const EXPECTS_TEXT: &str = "This step expects text, not a file.";
const NOTHING_TO_FINISH: &str = "Nothing to finish here. Pick a task from the menu.";

/// Computes the next session and the effect to run. Pure: no I/O happens here.
pub(super) fn step(session: &Session, event: Event, limits: &Limits) -> Transition {
    match event {
        Event::Restart => Transition {
            next: with_state(session, Menu::Main, None),
            effect: Effect::Restart,
        },
        Event::Button(button) => on_button(session, button, limits),
        Event::Text(text) => on_text(session, text, limits),
        Event::Document(meta) => on_document(session, meta, limits),
        Event::Fetched(path) => on_fetched(session, path),
        Event::FetchFailed(err) => on_fetch_failed(session, err),
    }
}

fn with_state(session: &Session, menu: Menu, action: Option<Action>) -> Session {
    Session {
        menu,
        action,
        proxy: session.proxy.clone(),
    }
}

fn stay(session: &Session, effect: Effect) -> Transition {
    Transition {
        next: session.clone(),
        effect,
    }
}

fn reply(text: impl Into<String>) -> Effect {
    Effect::Reply(Reply {
        text: text.into(),
        keyboard: None,
    })
}

fn reply_with(text: impl Into<String>, keyboard: Keyboard) -> Effect {
    Effect::Reply(Reply {
        text: text.into(),
        keyboard: Some(keyboard),
    })
}

fn on_button(session: &Session, button: Button, limits: &Limits) -> Transition {
    match button {
        Button::Menu(menu) => Transition {
            next: with_state(session, menu, None),
            effect: Effect::ShowMenu(menu),
        },
        Button::File(task) => {
            let (action, prompt, keyboard) = match task {
                FileTask::Zip => (
                    Action::ZipWaitFile,
                    "Send ONE file (or a ZIP). I will zip it (or re-zip after unzip).",
                    None,
                ),
                FileTask::Unzip => (
                    Action::UnzipWaitZip,
                    "Send a .zip file to unzip (I will return a new .zip of extracted contents).",
                    None,
                ),
                FileTask::Rename => (
                    Action::RenameWaitFile,
                    "Send the file you want to rename.",
                    None,
                ),
                FileTask::TextToPdf => (
                    Action::TextToPdfWaitText,
                    "Send the text (message) to convert into PDF.",
                    None,
                ),
                FileTask::ImagesToPdf => (
                    Action::ImagesCollect { images: Vec::new() },
                    "Send image files (jpg/png/etc). When done, press ✅ Done.",
                    Some(Keyboard::ImageControls),
                ),
                FileTask::MergePdfs => (
                    Action::MergeCollect { pdfs: Vec::new() },
                    "Send PDF files to merge. When done, press ✅ Done.",
                    Some(Keyboard::MergeControls),
                ),
            };
            Transition {
                next: with_state(session, Menu::File, Some(action)),
                effect: Effect::Reply(Reply {
                    text: prompt.to_string(),
                    keyboard,
                }),
            }
        }
        Button::Link(target) => Transition {
            next: with_state(session, Menu::Download, Some(Action::AwaitLink(target))),
            effect: reply(link_prompt(target, limits)),
        },
        Button::Proxy(ProxyCommand::Set) => Transition {
            next: with_state(session, Menu::Proxy, Some(Action::ProxyWaitValue)),
            effect: reply(PROXY_PROMPT),
        },
        Button::Proxy(ProxyCommand::Clear) => Transition {
            next: Session {
                proxy: None,
                ..session.clone()
            },
            effect: reply("Proxy cleared."),
        },
        Button::Proxy(ProxyCommand::Show) => stay(
            session,
            reply(format!(
                "Current proxy: {}",
                session.proxy.as_deref().unwrap_or("None")
            )),
        ),
        Button::Merge(control) => on_merge_control(session, control, limits),
        Button::Images(control) => on_images_control(session, control, limits),
    }
}

fn link_prompt(target: LinkTarget, limits: &Limits) -> &'static str {
    match target {
        LinkTarget::Auto => {
            "Send a link (MEGA / Google Drive / YouTube / PixelDrain). I will auto-detect."
        }
        LinkTarget::Fixed(Service::Youtube) if limits.restricted => {
            "Send a YouTube single video link (no playlists in restricted mode)."
        }
        LinkTarget::Fixed(Service::Youtube) => "Send a YouTube video or playlist link.",
        LinkTarget::Fixed(Service::GoogleDrive) => "Send a Google Drive share link.",
        LinkTarget::Fixed(Service::Mega) => "Send a MEGA link.",
        LinkTarget::Fixed(Service::PixelDrain) => "Send a PixelDrain link.",
        LinkTarget::Fixed(Service::Unrecognized) => "Send a link.",
    }
}

fn on_merge_control(session: &Session, control: Control, limits: &Limits) -> Transition {
    let Some(Action::MergeCollect { pdfs }) = &session.action else {
        return stay(session, reply(NOTHING_TO_FINISH));
    };
    match control {
        Control::Clear => Transition {
            next: with_state(
                session,
                Menu::File,
                Some(Action::MergeCollect { pdfs: Vec::new() }),
            ),
            effect: reply("Merge list cleared. Send PDFs again."),
        },
        Control::Cancel => Transition {
            next: with_state(session, Menu::File, None),
            effect: reply_with("Merge cancelled.", Keyboard::File),
        },
        Control::Done => {
            if pdfs.len() < 2 {
                return stay(session, reply("Send at least 2 PDFs before merging."));
            }
            if let Some(cap) = limits.merge_cap.filter(|cap| pdfs.len() > *cap) {
                return stay(
                    session,
                    reply(format!(
                        "Limit: max {} PDFs per merge. Clear the list and send fewer.",
                        cap
                    )),
                );
            }
            Transition {
                next: with_state(session, Menu::File, None),
                effect: Effect::Run(Job::MergePdfs { pdfs: pdfs.clone() }),
            }
        }
    }
}

fn on_images_control(session: &Session, control: Control, limits: &Limits) -> Transition {
    let Some(Action::ImagesCollect { images }) = &session.action else {
        return stay(session, reply(NOTHING_TO_FINISH));
    };
    match control {
        Control::Clear => Transition {
            next: with_state(
                session,
                Menu::File,
                Some(Action::ImagesCollect { images: Vec::new() }),
            ),
            effect: reply("Image list cleared. Send images again."),
        },
        Control::Cancel => Transition {
            next: with_state(session, Menu::File, None),
            effect: reply_with("Image→PDF cancelled.", Keyboard::File),
        },
        Control::Done => {
            if images.is_empty() {
                return stay(session, reply("Send at least 1 image first."));
            }
            if let Some(cap) = limits.image_cap.filter(|cap| images.len() > *cap) {
                return stay(
                    session,
                    reply(format!(
                        "Limit: max {} images per PDF. Clear the list and send fewer.",
                        cap
                    )),
                );
            }
            Transition {
                next: with_state(session, Menu::File, None),
                effect: Effect::Run(Job::ImagesToPdf {
                    images: images.clone(),
                }),
            }
        }
    }
}

fn on_text(session: &Session, text: String, limits: &Limits) -> Transition {
    let Some(action) = &session.action else {
        return stay(
            session,
            reply_with("Use the buttons to choose a task.", Keyboard::Main),
        );
    };
    match action {
        Action::ZipWaitFile
        | Action::UnzipWaitZip
        | Action::RenameWaitFile
        | Action::ImagesCollect { .. }
        | Action::MergeCollect { .. } => stay(session, reply(EXPECTS_FILE)),
        Action::RenameWaitNewName { source } => {
            let new_name = sanitize(&text);
            if new_name.is_empty() || new_name == "." || new_name == ".." {
                return stay(session, reply("Send a valid filename (example: myfile.pdf)"));
            }
            Transition {
                next: with_state(session, Menu::File, None),
                effect: Effect::Run(Job::Rename {
                    source: source.clone(),
                    new_name,
                }),
            }
        }
        Action::TextToPdfWaitText => {
            if text.trim().is_empty() {
                return stay(session, reply("Send some text (not empty)."));
            }
            if text.chars().count() > limits.max_text_chars {
                return stay(
                    session,
                    reply(format!(
                        "Text too long (limit {} characters).",
                        limits.max_text_chars
                    )),
                );
            }
            Transition {
                next: with_state(session, Menu::File, None),
                effect: Effect::Run(Job::TextToPdf { text }),
            }
        }
        Action::ProxyWaitValue => {
            let value = text.trim();
            if !is_valid_proxy(value) {
                return stay(
                    session,
                    reply("Proxy must start with http://, https://, or socks5://"),
                );
            }
            Transition {
                next: Session {
                    menu: Menu::Proxy,
                    action: None,
                    proxy: Some(value.to_string()),
                },
                effect: reply("Proxy saved ✅"),
            }
        }
        Action::AwaitLink(target) => {
            let url = text.trim();
            if url.is_empty() {
                return stay(session, reply("Send a valid link."));
            }
            let service = match target {
                LinkTarget::Auto => classify(url),
                LinkTarget::Fixed(service) => *service,
            };
            let next = with_state(session, Menu::Download, None);
            if service == Service::Unrecognized {
                return Transition {
                    next,
                    effect: reply(
                        "I couldn't detect that link type. Use the Downloader menu to choose one.",
                    ),
                };
            }
            Transition {
                next,
                effect: Effect::Run(Job::Retrieve {
                    service,
                    url: url.to_string(),
                    proxy: session.proxy.clone(),
                }),
            }
        }
    }
}

fn on_document(session: &Session, meta: DocumentMeta, limits: &Limits) -> Transition {
    let Some(action) = &session.action else {
        return stay(session, reply_with(PICK_TASK_FIRST, Keyboard::Main));
    };
    let name = meta.name.clone().unwrap_or_else(|| "file.bin".to_string());
    let too_large = meta.size > limits.max_document_bytes;
    let too_large_text = || {
        format!(
            "File too large. Limit = {}",
            human_mb(limits.max_document_bytes)
        )
    };
    match action {
        Action::MergeCollect { .. } | Action::ImagesCollect { .. } => {
            let (wanted, wrong_kind) = match action {
                Action::MergeCollect { .. } => {
                    (ContentKind::Pdf, "Please send only PDF files for merging.")
                }
                _ => (
                    ContentKind::Image,
                    "Please send only image files (jpg/png/etc).",
                ),
            };
            if content_kind(&name) != wanted {
                return stay(session, reply(wrong_kind));
            }
            if too_large {
                return stay(session, reply(too_large_text()));
            }
            stay(session, Effect::Fetch(meta))
        }
        Action::ZipWaitFile | Action::UnzipWaitZip | Action::RenameWaitFile => {
            if too_large {
                return Transition {
                    next: with_state(session, Menu::File, None),
                    effect: reply(too_large_text()),
                };
            }
            stay(session, Effect::Fetch(meta))
        }
        Action::RenameWaitNewName { .. }
        | Action::TextToPdfWaitText
        | Action::ProxyWaitValue
        | Action::AwaitLink(_) => stay(session, reply(EXPECTS_TEXT)),
    }
}

fn on_fetched(session: &Session, path: PathBuf) -> Transition {
    let Some(action) = &session.action else {
        return stay(session, Effect::Nothing);
    };
    match action {
        Action::ZipWaitFile => Transition {
            next: with_state(session, Menu::File, None),
            effect: Effect::Run(Job::Zip { source: path }),
        },
        Action::UnzipWaitZip => Transition {
            next: with_state(session, Menu::File, None),
            effect: Effect::Run(Job::Unzip { archive: path }),
        },
        Action::RenameWaitFile => Transition {
            next: with_state(
                session,
                Menu::File,
                Some(Action::RenameWaitNewName { source: path }),
            ),
            effect: reply(RENAME_NAME_PROMPT),
        },
        Action::MergeCollect { pdfs } => {
            let mut pdfs = pdfs.clone();
            pdfs.push(path);
            let total = pdfs.len();
            Transition {
                next: with_state(session, Menu::File, Some(Action::MergeCollect { pdfs })),
                effect: reply_with(
                    format!("Added ✅ (total: {})", total),
                    Keyboard::MergeControls,
                ),
            }
        }
        Action::ImagesCollect { images } => {
            let mut images = images.clone();
            images.push(path);
            let total = images.len();
            Transition {
                next: with_state(
                    session,
                    Menu::File,
                    Some(Action::ImagesCollect { images }),
                ),
                effect: reply_with(
                    format!("Added ✅ (total: {})", total),
                    Keyboard::ImageControls,
                ),
            }
        }
        Action::RenameWaitNewName { .. }
        | Action::TextToPdfWaitText
        | Action::ProxyWaitValue
        | Action::AwaitLink(_) => stay(session, Effect::Nothing),
    }
}

fn on_fetch_failed(session: &Session, err: String) -> Transition {
    let text = format!("Download failed:\n{}", truncate_chars(&err, ERROR_TAIL_CHARS));
    match &session.action {
        Some(Action::MergeCollect { .. }) | Some(Action::ImagesCollect { .. }) => {
            stay(session, reply(text))
        }
        Some(Action::ZipWaitFile) | Some(Action::UnzipWaitZip) | Some(Action::RenameWaitFile) => {
            Transition {
                next: with_state(session, Menu::File, None),
                effect: reply(text),
            }
        }
        _ => stay(session, Effect::Nothing),
    }
}
