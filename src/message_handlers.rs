use super::*;

pub(super) async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> Result<()> {
    let user_id = match msg.from() {
        Some(user) => user.id.0,
        None => return Ok(()),
    };

    let Some(event) = message_event(&msg) else {
        return Ok(());
    };

    let ctx = FlowContext {
        user_id,
        chat_id: msg.chat.id,
        origin: None,
    };
    let transport = TelegramTransport::new(bot);
    if let Err(err) = dispatch(&transport, &state, &ctx, event).await {
        error!("user {} message handling failed: {:#}", user_id, err);
        return Err(err);
    }
    Ok(())
}

fn message_event(msg: &Message) -> Option<Event> {
    if let Some(document) = msg.document() {
        return Some(Event::Document(DocumentMeta {
            file_id: document.file.id.clone(),
            name: document.file_name.clone(),
            size: u64::from(document.file.size),
        }));
    }
    let text = msg.text()?;
    Some(text_event(text))
}

pub(super) fn text_event(text: &str) -> Event {
    match parse_command(text) {
        Some("start") | Some("help") => Event::Restart,
        _ => Event::Text(text.to_string()),
    }
}
