// @mention support for task chat
// Candidate set, dropdown detection, selection, extraction on send, and
// highlighting of stored message text

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use super::message::ChatMessage;
use crate::models::lenient;

/// Maximum number of suggestions shown in the dropdown
pub const MAX_SUGGESTIONS: usize = 10;

/// Why a user can be mentioned; also the display/search precedence
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MentionRole {
    Creator,
    Assigned,
    Participant,
}

impl MentionRole {
    pub fn rank(self) -> u8 {
        match self {
            MentionRole::Creator => 0,
            MentionRole::Assigned => 1,
            MentionRole::Participant => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MentionableUser {
    pub id: String,
    pub name: String,
    pub user_id: String,
    pub role: MentionRole,
}

impl MentionableUser {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: MentionRole) -> Self {
        let id = id.into();
        Self {
            user_id: id.clone(),
            id,
            name: name.into(),
            role,
        }
    }
}

/// User reference as it appears inside task payloads
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

impl UserRef {
    /// Non-empty (id, name) pair, if this reference carries one
    pub fn pair(&self) -> Option<(String, String)> {
        let id = non_empty(self.id.as_deref()).or_else(|| non_empty(self.user_id.as_deref()))?;
        let name = non_empty(self.name.as_deref()).or_else(|| non_empty(self.full_name.as_deref()))?;
        Some((id, name))
    }
}

/// `createdBy` is either a user object or a bare id
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CreatedByField {
    User(UserRef),
    Number(i64),
    Text(String),
}

/// The parts of a task the chat engine reads. Task payloads differ in where
/// they put the creator, so every known location is captured here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    #[serde(default)]
    pub creator: Option<UserRef>,
    #[serde(default)]
    pub created_by: Option<CreatedByField>,
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub creator_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub creator_user_id: Option<String>,
    #[serde(default)]
    pub creator_name: Option<String>,
    #[serde(default)]
    pub created_by_user: Option<UserRef>,
    #[serde(default)]
    pub assigned_user_details: Option<Vec<UserRef>>,
    #[serde(default)]
    pub assigned_users: Option<Vec<UserRef>>,
}

type CreatorExtractor = fn(&TaskSnapshot) -> Option<(String, String)>;

/// Creator sources in priority order
const CREATOR_EXTRACTORS: &[CreatorExtractor] = &[
    creator_object,
    created_by,
    flat_creator_id,
    flat_creator_user_id,
    created_by_user,
];

fn creator_object(task: &TaskSnapshot) -> Option<(String, String)> {
    task.creator.as_ref().and_then(UserRef::pair)
}

fn created_by(task: &TaskSnapshot) -> Option<(String, String)> {
    match task.created_by.as_ref()? {
        CreatedByField::User(user) => user.pair(),
        CreatedByField::Number(id) => Some((id.to_string(), non_empty(task.creator_name.as_deref())?)),
        CreatedByField::Text(id) => Some((non_empty(Some(id.as_str()))?, non_empty(task.creator_name.as_deref())?)),
    }
}

fn flat_creator_id(task: &TaskSnapshot) -> Option<(String, String)> {
    Some((
        non_empty(task.creator_id.as_deref())?,
        non_empty(task.creator_name.as_deref())?,
    ))
}

fn flat_creator_user_id(task: &TaskSnapshot) -> Option<(String, String)> {
    Some((
        non_empty(task.creator_user_id.as_deref())?,
        non_empty(task.creator_name.as_deref())?,
    ))
}

fn created_by_user(task: &TaskSnapshot) -> Option<(String, String)> {
    task.created_by_user.as_ref().and_then(UserRef::pair)
}

/// First creator found across the known task shapes
pub fn resolve_creator(task: &TaskSnapshot) -> Option<MentionableUser> {
    CREATOR_EXTRACTORS
        .iter()
        .find_map(|extract| extract(task))
        .map(|(id, name)| MentionableUser::new(id, name, MentionRole::Creator))
}

/// Candidates for @mention: creator, assignees, then everyone who has
/// posted a confirmed message. Unique by id; the first role seen for an id
/// is kept.
pub fn build_mentionable_users<'a>(
    task: &TaskSnapshot,
    messages: impl IntoIterator<Item = &'a ChatMessage>,
) -> Vec<MentionableUser> {
    let mut seen = HashSet::new();
    let mut users = Vec::new();
    let mut push = |user: MentionableUser| {
        if seen.insert(user.id.clone()) {
            users.push(user);
        }
    };

    if let Some(creator) = resolve_creator(task) {
        push(creator);
    }

    let assigned = task
        .assigned_user_details
        .iter()
        .chain(task.assigned_users.iter())
        .flatten();
    for (id, name) in assigned.filter_map(UserRef::pair) {
        push(MentionableUser::new(id, name, MentionRole::Assigned));
    }

    for message in messages.into_iter().filter(|m| !m.is_temp) {
        if message.user_id.is_empty() {
            continue;
        }
        push(MentionableUser::new(
            message.user_id.clone(),
            message.sender.name.clone(),
            MentionRole::Participant,
        ));
    }

    users.sort_by_key(|u| u.role.rank());
    users
}

/// Live mention being typed: `start` is the char index of the '@'
#[derive(Debug, Clone, PartialEq)]
pub struct MentionQuery {
    pub start: usize,
    pub query: String,
}

/// Inspect the text before the cursor for a mention in progress.
/// The last '@' only counts at the start of the text or after a space, and
/// typing a space after it ends the mention.
pub fn detect_mention_query(text: &str, cursor: usize) -> Option<MentionQuery> {
    let chars: Vec<char> = text.chars().take(cursor).collect();
    let at = chars.iter().rposition(|&c| c == '@')?;
    if at > 0 && chars[at - 1] != ' ' {
        return None;
    }
    let query: String = chars[at + 1..].iter().collect();
    if query.contains(' ') {
        return None;
    }
    Some(MentionQuery { start: at, query })
}

/// Case-insensitive name filter, capped at [`MAX_SUGGESTIONS`]
pub fn filter_candidates<'a>(users: &'a [MentionableUser], query: &str) -> Vec<&'a MentionableUser> {
    let needle = query.to_lowercase();
    users
        .iter()
        .filter(|u| u.name.to_lowercase().contains(&needle))
        .take(MAX_SUGGESTIONS)
        .collect()
}

/// Display token ("@Full Name") to user id, scoped to one chat session.
/// Re-selecting a name overwrites the earlier entry.
#[derive(Debug, Clone, Default)]
pub struct MentionMap {
    entries: HashMap<String, String>,
}

impl MentionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: &str, user_id: &str) {
        self.entries.insert(format!("@{}", name), user_id.to_string());
    }

    /// Look up by display name, with or without the leading '@'
    pub fn get(&self, name: &str) -> Option<&str> {
        let key = if name.starts_with('@') {
            name.to_string()
        } else {
            format!("@{}", name)
        };
        self.entries.get(&key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Replace the typed `@query` with `@<Full Name> `.
/// Returns the new text and the cursor position just after the insertion.
pub fn apply_selection(text: &str, query: &MentionQuery, user: &MentionableUser) -> (String, usize) {
    let chars: Vec<char> = text.chars().collect();
    let start = query.start.min(chars.len());
    let end = (start + 1 + query.query.chars().count()).min(chars.len());
    let inserted = format!("@{} ", user.name);

    let mut result: String = chars[..start].iter().collect();
    result.push_str(&inserted);
    result.extend(chars[end..].iter());

    (result, start + inserted.chars().count())
}

const MENTION_RUN: &str = r"@([^@\s]+(?: [^@\s]+)*)";
const RENDER_RUN: &str = r"@([\p{L}\p{N}_]+(?: [\p{L}\p{N}_]+)*)";

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| {
        Regex::new(pattern)
            .map_err(|e| tracing::error!("Invalid mention pattern {}: {}", pattern, e))
            .ok()
    })
    .as_ref()
}

fn mention_run_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&PATTERN, MENTION_RUN)
}

fn render_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&PATTERN, RENDER_RUN)
}

/// Word prefixes of a mention run, longest first
fn prefixes(run: &str) -> impl Iterator<Item = String> + '_ {
    let words: Vec<&str> = run.split(' ').collect();
    (1..=words.len()).rev().map(move |n| words[..n].join(" "))
}

fn find_by_name<'a>(users: &'a [MentionableUser], name: &str) -> Option<&'a MentionableUser> {
    let lowered = name.to_lowercase();
    users.iter().find(|u| u.name.to_lowercase() == lowered)
}

/// User ids mentioned in `text`, unique, in order of appearance.
/// Each run after '@' is matched longest prefix first, against the session's
/// mention map and then by exact case-insensitive name, with trailing
/// punctuation ("@Ana Souza,") ignored. Runs that match nobody are dropped.
pub fn extract_mentions(text: &str, map: &MentionMap, users: &[MentionableUser]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let Some(pattern) = mention_run_pattern() else {
        return ids;
    };

    for caps in pattern.captures_iter(text) {
        let run = &caps[1];
        let resolved = prefixes(run).find_map(|candidate| {
            let bare = candidate.trim_end_matches(|c: char| c.is_ascii_punctuation());
            [candidate.as_str(), bare]
                .into_iter()
                .filter(|name| !name.is_empty())
                .find_map(|name| {
                    map.get(name)
                        .map(str::to_string)
                        .or_else(|| find_by_name(users, name).map(|u| u.id.clone()))
                })
        });
        match resolved {
            Some(id) if !ids.contains(&id) => ids.push(id),
            Some(_) => {}
            None => tracing::debug!("Dropping unresolved mention @{}", run),
        }
    }

    ids
}

/// Piece of a rendered message. Concatenating every `raw` reproduces the
/// original text.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Text(String),
    Mention {
        raw: String,
        display: String,
        user_id: Option<String>,
    },
}

impl Fragment {
    pub fn raw(&self) -> &str {
        match self {
            Fragment::Text(text) => text,
            Fragment::Mention { raw, .. } => raw,
        }
    }
}

/// Split message text into plain and mention fragments for highlighting
pub fn render_segments(text: &str, users: &[MentionableUser], map: &MentionMap) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    let mut last = 0;
    let Some(pattern) = render_pattern() else {
        return vec![Fragment::Text(text.to_string())];
    };

    for caps in pattern.captures_iter(text) {
        let (whole, run) = match (caps.get(0), caps.get(1)) {
            (Some(whole), Some(run)) => (whole, run),
            _ => continue,
        };

        let (token, display, user_id) = resolve_render_token(run.as_str(), users, map);
        let end = whole.start() + 1 + token.len();

        if whole.start() > last {
            fragments.push(Fragment::Text(text[last..whole.start()].to_string()));
        }
        fragments.push(Fragment::Mention {
            raw: text[whole.start()..end].to_string(),
            display: format!("@{}", display),
            user_id,
        });
        last = end;
    }

    if last < text.len() {
        fragments.push(Fragment::Text(text[last..].to_string()));
    }
    fragments
}

/// Which part of the run is the mention, its display name and resolved id
fn resolve_render_token(
    run: &str,
    users: &[MentionableUser],
    map: &MentionMap,
) -> (String, String, Option<String>) {
    let first = run.split(' ').next().unwrap_or(run);

    if first.chars().all(|c| c.is_ascii_digit()) {
        let display = users
            .iter()
            .find(|u| u.id == first)
            .map(|u| u.name.clone())
            .unwrap_or_else(|| format!("User {}", first));
        return (first.to_string(), display, Some(first.to_string()));
    }

    for candidate in prefixes(run) {
        if let Some(user) = find_by_name(users, &candidate) {
            return (candidate, user.name.clone(), Some(user.id.clone()));
        }
        if let Some(id) = map.get(&candidate) {
            let id = id.to_string();
            return (candidate.clone(), candidate, Some(id));
        }
    }

    (first.to_string(), first.to_string(), None)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
