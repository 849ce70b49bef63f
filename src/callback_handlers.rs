use super::*;

pub(super) async fn handle_callback(bot: Bot, q: CallbackQuery, state: Arc<AppState>) -> Result<()> {
    let user_id = q.from.id.0;
    let Some(message) = q.message.clone() else {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };
    let Some(button) = q.data.as_deref().and_then(parse_callback_token) else {
        debug!("ignoring callback {:?} from user {}", q.data, user_id);
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };

    let ctx = FlowContext {
        user_id,
        chat_id: message.chat.id,
        origin: Some(message.id),
    };
    let transport = TelegramTransport::new(bot);
    handle_button(&transport, &state, &ctx, &q.id, button).await
}

/// Answers the callback before dispatching; a failed answer is only logged.
pub(super) async fn handle_button(
    transport: &dyn Transport,
    state: &AppState,
    ctx: &FlowContext,
    callback_id: &str,
    button: Button,
) -> Result<()> {
    if let Err(err) = transport.answer_callback(callback_id).await {
        error!("answer callback query failed: {:#}", err);
    }
    if let Err(err) = dispatch(transport, state, ctx, Event::Button(button)).await {
        error!("user {} callback handling failed: {:#}", ctx.user_id, err);
        return Err(err);
    }
    Ok(())
}

/// Parses `<category>:<action>` button data.
pub(super) fn parse_callback_token(data: &str) -> Option<Button> {
    let (category, action) = data.split_once(':')?;
    let button = match category {
        "menu" => Button::Menu(match action {
            "file" => Menu::File,
            "dl" => Menu::Download,
            "proxy" => Menu::Proxy,
            "back" => Menu::Main,
            _ => return None,
        }),
        "file" => Button::File(match action {
            "zip" => FileTask::Zip,
            "unzip" => FileTask::Unzip,
            "rename" => FileTask::Rename,
            "text2pdf" => FileTask::TextToPdf,
            "img2pdf" => FileTask::ImagesToPdf,
            "mergepdf" => FileTask::MergePdfs,
            _ => return None,
        }),
        "dl" => Button::Link(match action {
            "auto" => LinkTarget::Auto,
            "yt" => LinkTarget::Fixed(Service::Youtube),
            "gdrive" => LinkTarget::Fixed(Service::GoogleDrive),
            "mega" => LinkTarget::Fixed(Service::Mega),
            "pixeldrain" => LinkTarget::Fixed(Service::PixelDrain),
            _ => return None,
        }),
        "proxy" => Button::Proxy(match action {
            "set" => ProxyCommand::Set,
            "clear" => ProxyCommand::Clear,
            "show" => ProxyCommand::Show,
            _ => return None,
        }),
        "merge" => Button::Merge(parse_control(action)?),
        "imgpdf" => Button::Images(parse_control(action)?),
        _ => return None,
    };
    Some(button)
}

fn parse_control(action: &str) -> Option<Control> {
    match action {
        "done" => Some(Control::Done),
        "clear" => Some(Control::Clear),
        "cancel" => Some(Control::Cancel),
        _ => None,
    }
}
