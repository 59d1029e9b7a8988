use super::{ChatError, ChatMessage};

/// System message with the retrieved context, followed by the conversation
/// as sent by the client.
pub fn build_prompt(context: &str, history: &[ChatMessage]) -> Result<Vec<ChatMessage>, ChatError> {
    let question = history.last().ok_or(ChatError::NoMessages)?;

    let system = format!(
        "以下の関連情報を参照して回答してください：\n参照情報： {context}\nユーザーの質問「{}」に対して、上記の情報を参考に適切な回答を提供してください。",
        question.content
    );

    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(system));
    messages.extend_from_slice(history);
    Ok(messages)
}
