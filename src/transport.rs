use super::*;

/// Outbound side of the chat platform, as the flows see it.
#[async_trait]
pub(super) trait Transport: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, text: &str, keyboard: Option<Keyboard>) -> Result<()>;

    async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<()>;

    async fn send_document(&self, chat_id: ChatId, path: &Path, caption: &str) -> Result<()>;

    async fn fetch_document(&self, file_id: &str, dest: &Path) -> Result<()>;

    async fn answer_callback(&self, callback_id: &str) -> Result<()>;
}

pub(super) struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub(super) fn new(bot: Bot) -> Self {
        TelegramTransport { bot }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(&self, chat_id: ChatId, text: &str, keyboard: Option<Keyboard>) -> Result<()> {
        let request = self.bot.send_message(chat_id, text.to_string());
        match keyboard {
            Some(kind) => request.reply_markup(build_keyboard(kind)).await?,
            None => request.await?,
        };
        Ok(())
    }

    async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<()> {
        let request = self
            .bot
            .edit_message_text(chat_id, message_id, text.to_string());
        let result = match keyboard {
            Some(kind) => request.reply_markup(build_keyboard(kind)).await,
            None => request.await,
        };
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_message_not_modified_error(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn send_document(&self, chat_id: ChatId, path: &Path, caption: &str) -> Result<()> {
        self.bot
            .send_document(chat_id, InputFile::file(path.to_path_buf()))
            .caption(truncate_chars(caption, CAPTION_LIMIT))
            .await
            .with_context(|| format!("send document {}", path.display()))?;
        Ok(())
    }

    async fn fetch_document(&self, file_id: &str, dest: &Path) -> Result<()> {
        let file = self.bot.get_file(file_id).await?;
        let mut out = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("create {}", dest.display()))?;
        self.bot.download_file(&file.path, &mut out).await?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<()> {
        self.bot
            .answer_callback_query(callback_id.to_string())
            .await?;
        Ok(())
    }
}

fn is_message_not_modified_error(err: &teloxide::RequestError) -> bool {
    err.to_string()
        .to_ascii_lowercase()
        .contains("message is not modified")
}
