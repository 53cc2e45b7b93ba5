// One open task conversation
// Holds the input box, staged attachments, the mention dropdown, optimistic
// local messages and the confirmed server history. All state changes are
// synchronous; the only await points are transport calls.

use chrono::{DateTime, Utc};

use super::mentions::{
    apply_selection, build_mentionable_users, detect_mention_query, extract_mentions,
    filter_candidates, render_segments, Fragment, MentionMap, MentionQuery, MentionableUser,
    TaskSnapshot,
};
use super::message::{Attachment, ChatMessage, MessageStatus};
use super::reconcile::{match_echoes, merge};
use super::transport::{ChatTransport, OutgoingMessage};
use super::ChatError;

/// The signed-in user, from the authentication context
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentUser {
    pub id: String,
    pub name: String,
}

pub struct ChatSession {
    task_id: String,
    current_user: CurrentUser,
    task: TaskSnapshot,
    input: String,
    /// Char index into `input`
    cursor: usize,
    staged: Vec<Attachment>,
    local: Vec<ChatMessage>,
    server: Vec<ChatMessage>,
    mention_map: MentionMap,
    mention_query: Option<MentionQuery>,
}

impl ChatSession {
    pub fn new(task_id: impl Into<String>, current_user: CurrentUser, task: TaskSnapshot) -> Self {
        Self {
            task_id: task_id.into(),
            current_user,
            task,
            input: String::new(),
            cursor: 0,
            staged: Vec::new(),
            local: Vec::new(),
            server: Vec::new(),
            mention_map: MentionMap::new(),
            mention_query: None,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn staged_attachments(&self) -> &[Attachment] {
        &self.staged
    }

    pub fn stage_attachment(&mut self, attachment: Attachment) {
        self.staged.push(attachment);
    }

    pub fn unstage_attachment(&mut self, index: usize) -> Option<Attachment> {
        (index < self.staged.len()).then(|| self.staged.remove(index))
    }

    pub fn mention_map(&self) -> &MentionMap {
        &self.mention_map
    }

    /// Creator, assignees and confirmed senders, in precedence order
    pub fn mentionable_users(&self) -> Vec<MentionableUser> {
        build_mentionable_users(&self.task, self.server.iter().chain(self.local.iter()))
    }

    /// Keystroke handler: updates the text and opens or closes the dropdown
    pub fn on_input_change(&mut self, text: impl Into<String>, cursor: usize) {
        self.input = text.into();
        self.cursor = cursor.min(self.input.chars().count());
        self.mention_query = detect_mention_query(&self.input, self.cursor);
    }

    pub fn is_mention_dropdown_open(&self) -> bool {
        self.mention_query.is_some()
    }

    /// Dropdown entries for the mention being typed; empty when closed
    pub fn mention_suggestions(&self) -> Vec<MentionableUser> {
        match &self.mention_query {
            Some(query) => {
                let users = self.mentionable_users();
                filter_candidates(&users, &query.query)
                    .into_iter()
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        }
    }

    /// Insert the chosen user at the live mention and remember the name
    pub fn select_mention(&mut self, user: &MentionableUser) {
        let Some(query) = self.mention_query.take() else {
            return;
        };
        let (text, cursor) = apply_selection(&self.input, &query, user);
        self.mention_map.record(&user.name, &user.id);
        self.input = text;
        self.cursor = cursor;
    }

    /// Optimistic half of a send. The temp message is visible as soon as this
    /// returns and the composer is cleared.
    pub fn begin_send(&mut self, now: DateTime<Utc>) -> Result<OutgoingMessage, ChatError> {
        let text = self.input.trim().to_string();
        if text.is_empty() && self.staged.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let users = self.mentionable_users();
        let mentions = extract_mentions(&text, &self.mention_map, &users);
        let attachments = std::mem::take(&mut self.staged);

        let temp = ChatMessage::temp(
            text.clone(),
            attachments.clone(),
            mentions.clone(),
            self.current_user.id.clone(),
            now,
        );
        let outgoing = OutgoingMessage {
            task_id: self.task_id.clone(),
            temp_id: temp.id.clone(),
            client_key: temp.client_key.clone().unwrap_or_default(),
            text,
            mentions,
            attachments,
        };

        self.local.push(temp);
        self.input.clear();
        self.cursor = 0;
        self.mention_query = None;

        Ok(outgoing)
    }

    /// Settle a send started with [`begin_send`](Self::begin_send).
    /// Failures keep the message, tagged failed, and hand the error back.
    pub fn finish_send(
        &mut self,
        temp_id: &str,
        result: Result<ChatMessage, ChatError>,
    ) -> Result<(), ChatError> {
        match result {
            Ok(confirmed) => {
                self.set_status(temp_id, MessageStatus::Sent);
                if !self.server.iter().any(|m| m.id == confirmed.id) {
                    self.server.push(confirmed);
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Send of {} on task {} failed: {}", temp_id, self.task_id, e);
                self.set_status(temp_id, MessageStatus::Failed);
                Err(e)
            }
        }
    }

    /// Full send lifecycle. Returns the temp id of the message sent.
    pub async fn send(&mut self, transport: &dyn ChatTransport) -> Result<String, ChatError> {
        let outgoing = self.begin_send(Utc::now())?;
        let result = transport.send_message(&outgoing).await;
        self.finish_send(&outgoing.temp_id, result)?;
        Ok(outgoing.temp_id)
    }

    /// Move a failed message back into the composer
    pub fn retry(&mut self, message_id: &str) -> Result<(), ChatError> {
        let index = self
            .local
            .iter()
            .position(|m| m.id == message_id && m.status == MessageStatus::Failed)
            .ok_or_else(|| ChatError::UnknownMessage(message_id.to_string()))?;

        let failed = self.local.remove(index);
        self.cursor = failed.text.chars().count();
        self.input = failed.text;
        self.staged = failed.attachments;
        self.mention_query = None;
        Ok(())
    }

    /// Replace confirmed history and drop local copies it now confirms
    pub fn apply_server_history(&mut self, mut messages: Vec<ChatMessage>) {
        messages.sort_by_key(|m| m.created_at);
        let matches = match_echoes(&messages, &self.local);
        let local = std::mem::take(&mut self.local);
        self.local = local
            .into_iter()
            .zip(matches)
            .filter(|(_, matched)| matched.is_none())
            .map(|(message, _)| message)
            .collect();
        self.server = messages;
    }

    pub async fn refresh(&mut self, transport: &dyn ChatTransport) -> Result<(), ChatError> {
        let messages = transport.fetch_messages(&self.task_id).await?;
        self.apply_server_history(messages);
        Ok(())
    }

    /// Merged view, oldest first
    pub fn visible_messages(&self) -> Vec<ChatMessage> {
        merge(&self.server, &self.local)
    }

    /// Highlight fragments for a message body
    pub fn render(&self, text: &str) -> Vec<Fragment> {
        render_segments(text, &self.mentionable_users(), &self.mention_map)
    }

    fn set_status(&mut self, temp_id: &str, status: MessageStatus) {
        if let Some(message) = self.local.iter_mut().find(|m| m.id == temp_id) {
            message.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_chat::message::SenderName;
    use async_trait::async_trait;
    use chrono::Duration;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records sends and answers with a confirmed copy, or fails
    struct FakeTransport {
        fail: bool,
        sent: Mutex<Vec<OutgoingMessage>>,
    }

    impl FakeTransport {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatTransport for FakeTransport {
        async fn fetch_messages(&self, _task_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
            Ok(Vec::new())
        }

        async fn send_message(&self, outgoing: &OutgoingMessage) -> Result<ChatMessage, ChatError> {
            self.sent.lock().unwrap().push(outgoing.clone());
            if self.fail {
                return Err(ChatError::Transport("connection reset".to_string()));
            }
            Ok(confirmed("srv-1", &outgoing.text, "7", Utc::now(), Some(&outgoing.client_key)))
        }
    }

    fn confirmed(id: &str, text: &str, user: &str, at: DateTime<Utc>, key: Option<&str>) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            text: text.to_string(),
            attachments: vec![],
            mentions: vec![],
            user_id: user.to_string(),
            sender: SenderName {
                name: "Ana Souza".to_string(),
            },
            created_at: at,
            status: MessageStatus::Delivered,
            is_temp: false,
            client_key: key.map(str::to_string),
        }
    }

    fn session() -> ChatSession {
        let task: TaskSnapshot = serde_json::from_value(json!({
            "creator": {"id": 1, "name": "Bruno Lima"},
            "assignedUserDetails": [{"id": 2, "name": "Carla Dias"}]
        }))
        .unwrap();
        ChatSession::new(
            "task-1",
            CurrentUser {
                id: "7".to_string(),
                name: "Ana Souza".to_string(),
            },
            task,
        )
    }

    fn type_text(session: &mut ChatSession, text: &str) {
        session.on_input_change(text, text.chars().count());
    }

    #[test]
    fn test_selected_name_with_space_resolves_on_send() {
        let mut s = session();
        type_text(&mut s, "please ask @car");
        assert!(s.is_mention_dropdown_open());

        let suggestions = s.mention_suggestions();
        assert_eq!(suggestions.len(), 1);
        s.select_mention(&suggestions[0]);
        assert_eq!(s.input(), "please ask @Carla Dias ");
        assert!(!s.is_mention_dropdown_open());

        let typed = format!("{}about the rebar", s.input());
        type_text(&mut s, &typed);
        let outgoing = s.begin_send(Utc::now()).unwrap();
        assert_eq!(outgoing.mentions, vec!["2"]);
        assert_eq!(outgoing.text, "please ask @Carla Dias about the rebar");
    }

    #[test]
    fn test_selected_name_followed_by_comma_resolves() {
        let mut s = session();
        type_text(&mut s, "@car");
        let carla = s.mention_suggestions().remove(0);
        s.select_mention(&carla);

        type_text(&mut s, "@Carla Dias, can you check");
        let outgoing = s.begin_send(Utc::now()).unwrap();
        assert_eq!(outgoing.mentions, vec!["2"]);
    }

    #[test]
    fn test_unmatched_mention_sends_without_ids() {
        let mut s = session();
        type_text(&mut s, "@Nobody please check");
        let outgoing = s.begin_send(Utc::now()).unwrap();
        assert!(outgoing.mentions.is_empty());
    }

    #[test]
    fn test_begin_send_is_optimistic() {
        let mut s = session();
        type_text(&mut s, "on my way");
        s.stage_attachment(Attachment::Url("https://cdn.example.com/a.jpg".to_string()));

        let outgoing = s.begin_send(Utc::now()).unwrap();
        let visible = s.visible_messages();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].status, MessageStatus::Sending);
        assert!(visible[0].is_temp);
        assert_eq!(visible[0].sender.name, "You");
        assert_eq!(visible[0].id, outgoing.temp_id);
        assert!(outgoing.temp_id.starts_with("temp_"));

        assert_eq!(s.input(), "");
        assert!(s.staged_attachments().is_empty());
        assert_eq!(outgoing.attachments.len(), 1);
    }

    #[test]
    fn test_empty_send_is_rejected_without_side_effects() {
        let mut s = session();
        type_text(&mut s, "   ");
        assert!(matches!(s.begin_send(Utc::now()), Err(ChatError::EmptyMessage)));
        assert!(s.visible_messages().is_empty());
        assert_eq!(s.input(), "   ");
    }

    #[test]
    fn test_attachment_only_send() {
        let mut s = session();
        s.stage_attachment(Attachment::Url("https://cdn.example.com/a.jpg".to_string()));
        let outgoing = s.begin_send(Utc::now()).unwrap();
        assert_eq!(outgoing.text, "");
        assert_eq!(outgoing.wire_text(), " ");
    }

    #[tokio::test]
    async fn test_send_success_confirms_message() {
        let mut s = session();
        let transport = FakeTransport::new(false);
        type_text(&mut s, "concrete delivered");

        let temp_id = s.send(&transport).await.unwrap();
        assert_eq!(transport.sent.lock().unwrap().len(), 1);

        let visible = s.visible_messages();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "srv-1");
        assert_ne!(visible[0].id, temp_id);
    }

    #[tokio::test]
    async fn test_send_failure_keeps_message_and_retry_restores_it() {
        let mut s = session();
        let transport = FakeTransport::new(true);
        type_text(&mut s, "need more rebar");
        s.stage_attachment(Attachment::Url("https://cdn.example.com/b.jpg".to_string()));

        let err = s.send(&transport).await.unwrap_err();
        assert!(matches!(err, ChatError::Transport(_)));

        let visible = s.visible_messages();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].status, MessageStatus::Failed);
        let failed_id = visible[0].id.clone();

        s.retry(&failed_id).unwrap();
        assert!(s.visible_messages().is_empty());
        assert_eq!(s.input(), "need more rebar");
        assert_eq!(s.cursor(), "need more rebar".len());
        assert_eq!(s.staged_attachments().len(), 1);

        assert!(matches!(s.retry(&failed_id), Err(ChatError::UnknownMessage(_))));
    }

    #[test]
    fn test_server_history_reconciles_pending_temp() {
        let mut s = session();
        let sent_at = Utc::now();
        type_text(&mut s, "hi");
        s.begin_send(sent_at).unwrap();

        s.apply_server_history(vec![
            confirmed("srv-0", "earlier", "1", sent_at - Duration::minutes(5), None),
            confirmed("srv-9", "hi", "7", sent_at + Duration::seconds(3), None),
        ]);

        let visible = s.visible_messages();
        let his: Vec<_> = visible.iter().filter(|m| m.text == "hi").collect();
        assert_eq!(his.len(), 1);
        assert_eq!(his[0].id, "srv-9");
        assert_eq!(visible[0].id, "srv-0");
    }

    #[test]
    fn test_history_adds_participants() {
        let mut s = session();
        s.apply_server_history(vec![confirmed("srv-1", "hello", "9", Utc::now(), None)]);
        let ids: Vec<String> = s.mentionable_users().into_iter().map(|u| u.id).collect();
        assert_eq!(ids, vec!["1", "2", "9"]);
    }

    #[test]
    fn test_render_uses_session_names() {
        let s = session();
        let fragments = s.render("@Bruno Lima check @2");
        assert_eq!(
            fragments,
            vec![
                Fragment::Mention {
                    raw: "@Bruno Lima".to_string(),
                    display: "@Bruno Lima".to_string(),
                    user_id: Some("1".to_string()),
                },
                Fragment::Text(" check ".to_string()),
                Fragment::Mention {
                    raw: "@2".to_string(),
                    display: "@Carla Dias".to_string(),
                    user_id: Some("2".to_string()),
                },
            ]
        );
    }
}
