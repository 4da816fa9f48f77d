//! Waiting-list normalization.
//!
//! Servers send the waiting list as bare logins, player-like objects, or a mix
//! of both (sometimes wrapped in an object, sometimes `null`). Everything is
//! folded into `{login, label}` entries; anything without a usable label is
//! dropped. Normalization never fails.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tableside_protocol::normalize_login;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub login: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueuePartition {
    pub seated: Vec<QueueEntry>,
    pub overflow: Vec<QueueEntry>,
}

impl QueuePartition {
    pub fn is_empty(&self) -> bool {
        self.seated.is_empty() && self.overflow.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.seated.iter().chain(&self.overflow).map(|e| e.label.as_str())
    }
}

const LIST_KEYS: [&str; 4] = ["waiting", "queue", "players", "entries"];
const LOGIN_KEYS: [&str; 4] = ["login", "username", "user", "id"];
const LABEL_KEYS: [&str; 7] = [
    "displayName",
    "display_name",
    "label",
    "name",
    "login",
    "username",
    "user",
];

/// Canonical entries in payload order, deduplicated by login.
pub fn entries(waiting: &Value) -> Vec<QueueEntry> {
    let items: &[Value] = match waiting {
        Value::Array(items) => items,
        Value::Object(map) => LIST_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array))
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    };

    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(entry)
        .filter(|e| seen.insert(e.login.clone()))
        .collect()
}

fn entry(item: &Value) -> Option<QueueEntry> {
    match item {
        Value::String(s) => from_parts(None, s),
        Value::Object(map) => {
            let label = first_string(map, &LABEL_KEYS)?;
            from_parts(first_string(map, &LOGIN_KEYS), label)
        }
        _ => None,
    }
}

fn first_string<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| map.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn from_parts(login: Option<&str>, label: &str) -> Option<QueueEntry> {
    let label = label.trim();
    if label.is_empty() {
        return None;
    }
    let login = normalize_login(login.unwrap_or(label));
    if login.is_empty() {
        return None;
    }
    Some(QueueEntry {
        login,
        label: label.to_string(),
    })
}

/// Split the waiting list into entries that currently hold a seat and those
/// that do not.
pub fn normalize(waiting: &Value, is_seated: impl Fn(&str) -> bool) -> QueuePartition {
    let (seated, overflow): (Vec<_>, Vec<_>) =
        entries(waiting).into_iter().partition(|e| is_seated(&e.login));
    QueuePartition { seated, overflow }
}
