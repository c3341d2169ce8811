use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};

use crate::parser::format_parts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Message body: either plain text or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Items(Vec<ContentItem>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Inline a PNG as a `data:` URL.
    pub fn png(bytes: &[u8]) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl {
                url: format!(
                    "data:image/png;base64,{}",
                    general_purpose::STANDARD.encode(bytes)
                ),
            },
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::ImageUrl { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ConversationMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn has_image(&self) -> bool {
        match &self.content {
            MessageContent::Text(_) => false,
            MessageContent::Items(items) => items.iter().any(ContentItem::is_image),
        }
    }

    /// Concatenated text of the message, ignoring images.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Items(items) => items
                .iter()
                .filter_map(|item| match item {
                    ContentItem::Text { text } => Some(text.as_str()),
                    ContentItem::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// The conversation replayed to the model on every step.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationHistory {
    messages: Vec<ConversationMessage>,
}

impl ConversationHistory {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ConversationMessage::system(system_prompt)],
        }
    }

    /// Clear everything and reseed with a fresh system message.
    pub fn reset(&mut self, system_prompt: impl Into<String>) {
        self.messages.clear();
        self.messages.push(ConversationMessage::system(system_prompt));
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ConversationMessage> {
        self.messages.last()
    }

    pub fn append_user(&mut self, text: impl Into<String>, screenshot_png: Option<&[u8]>) {
        let mut items = vec![ContentItem::text(text)];
        if let Some(png) = screenshot_png {
            items.push(ContentItem::png(png));
        }
        self.messages.push(ConversationMessage {
            role: Role::User,
            content: MessageContent::Items(items),
        });
    }

    /// Store the model's turn in the same markup it answered with.
    pub fn append_assistant(&mut self, rationale: &str, action_spec: &str) {
        self.messages
            .push(ConversationMessage::assistant(format_parts(rationale, action_spec)));
    }

    pub fn append_user_feedback(&mut self, text: impl Into<String>) {
        self.messages.push(ConversationMessage::user(text));
    }

    /// Drop image parts from the second-to-last message if it is a user turn.
    ///
    /// Called once the assistant has answered the screenshot, so only the
    /// newest user turn ever carries an image.
    pub fn prune_last_image(&mut self) {
        let Some(index) = self.messages.len().checked_sub(2) else {
            return;
        };
        let message = &mut self.messages[index];
        if message.role != Role::User {
            return;
        }
        if let MessageContent::Items(items) = &mut message.content {
            items.retain(|item| !item.is_image());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_parts;

    fn history_with_answered_screenshot() -> ConversationHistory {
        let mut history = ConversationHistory::new("system");
        history.append_user("open settings\n\n{\"current_app\": \"Launcher\"}", Some(&b"png"[..]));
        history.append_assistant("Settings is not open.", "do(action=\"Launch\", app=\"Settings\")");
        history
    }

    #[test]
    fn reset_reseeds_with_a_single_system_message() {
        let mut history = history_with_answered_screenshot();
        history.reset("fresh");
        assert_eq!(history.messages(), &[ConversationMessage::system("fresh")]);
    }

    #[test]
    fn prune_strips_only_images_from_the_answered_user_turn() {
        let mut history = history_with_answered_screenshot();
        assert!(history.messages()[1].has_image());

        history.prune_last_image();

        let user = &history.messages()[1];
        assert!(!user.has_image());
        assert_eq!(
            user.content,
            MessageContent::Items(vec![ContentItem::text(
                "open settings\n\n{\"current_app\": \"Launcher\"}"
            )])
        );
    }

    #[test]
    fn prune_is_idempotent() {
        let mut history = history_with_answered_screenshot();
        history.prune_last_image();
        let once = history.clone();
        history.prune_last_image();
        assert_eq!(history, once);
    }

    #[test]
    fn prune_on_short_history_is_a_noop() {
        let mut history = ConversationHistory::new("system");
        history.prune_last_image();
        assert_eq!(history.len(), 1);

        let mut empty = ConversationHistory::default();
        empty.prune_last_image();
        assert!(empty.is_empty());
    }

    #[test]
    fn prune_leaves_non_user_turns_alone() {
        let mut history = history_with_answered_screenshot();
        history.append_user_feedback("the last action failed");
        let before = history.clone();
        history.prune_last_image();
        assert_eq!(history, before);
    }

    #[test]
    fn assistant_turn_round_trips_through_parse_parts() {
        let mut history = ConversationHistory::new("system");
        let rationale = "The search box is at the top.\nTap it.";
        let spec = "do(action=\"Tap\", element=[500, 80])";
        history.append_assistant(rationale, spec);

        let stored = history.last().unwrap().text();
        assert_eq!(parse_parts(&stored), (rationale.to_string(), spec.to_string()));
    }

    #[test]
    fn serializes_to_chat_completion_shape() {
        let mut history = ConversationHistory::new("sys");
        history.append_user("look", Some(&[1u8, 2, 3][..]));
        let json = serde_json::to_value(history.messages()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"role": "system", "content": "sys"},
                {"role": "user", "content": [
                    {"type": "text", "text": "look"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,AQID"}}
                ]}
            ])
        );
    }
}
