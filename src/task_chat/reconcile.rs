// Merging optimistic messages with confirmed history
// A temp message disappears once its server twin shows up: matched by the
// echoed client key, or else by same text, same author, and created within
// RECONCILE_WINDOW_SECS of each other. Each server message absorbs at most
// one temp message.

use super::message::ChatMessage;

pub const RECONCILE_WINDOW_SECS: i64 = 10;

fn same_key(temp: &ChatMessage, server: &ChatMessage) -> Option<bool> {
    match (&temp.client_key, &server.client_key) {
        (Some(a), Some(b)) => Some(a == b),
        _ => None,
    }
}

/// Text/author/time-window match used when the server did not echo a key
pub fn is_heuristic_echo(temp: &ChatMessage, server: &ChatMessage) -> bool {
    temp.text == server.text
        && temp.user_id == server.user_id
        && (server.created_at - temp.created_at).num_milliseconds().abs() <= RECONCILE_WINDOW_SECS * 1000
}

/// For each local message, the index of the server message that confirms it
pub fn match_echoes(server: &[ChatMessage], local: &[ChatMessage]) -> Vec<Option<usize>> {
    let mut used = vec![false; server.len()];
    let mut matches: Vec<Option<usize>> = vec![None; local.len()];

    // Key matches first so a fuzzy match cannot steal a keyed twin
    for (li, temp) in local.iter().enumerate().filter(|(_, m)| m.is_temp) {
        if let Some(si) = (0..server.len()).find(|&si| !used[si] && same_key(temp, &server[si]) == Some(true)) {
            used[si] = true;
            matches[li] = Some(si);
        }
    }

    for (li, temp) in local.iter().enumerate().filter(|(_, m)| m.is_temp) {
        if matches[li].is_some() {
            continue;
        }
        let found = (0..server.len()).find(|&si| {
            !used[si] && same_key(temp, &server[si]).is_none() && is_heuristic_echo(temp, &server[si])
        });
        if let Some(si) = found {
            used[si] = true;
            matches[li] = Some(si);
        }
    }

    matches
}

/// Local messages with no confirmed twin yet
pub fn pending_local<'a>(server: &[ChatMessage], local: &'a [ChatMessage]) -> Vec<&'a ChatMessage> {
    local
        .iter()
        .zip(match_echoes(server, local))
        .filter(|(_, matched)| matched.is_none())
        .map(|(message, _)| message)
        .collect()
}

/// Confirmed history plus unmatched local messages, oldest first
pub fn merge(server: &[ChatMessage], local: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut merged: Vec<ChatMessage> = server.to_vec();
    merged.extend(pending_local(server, local).into_iter().cloned());
    merged.sort_by_key(|m| m.created_at);
    merged
}
