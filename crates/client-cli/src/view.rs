//! Plain-text rendering of a session snapshot

use lean_coffee::Snapshot;
use shared::TopicStatus;
use std::fmt::Write;

pub fn render(snapshot: &Snapshot) -> String {
    let mut out = String::new();

    let title = snapshot
        .session
        .as_ref()
        .and_then(|session| session.name.clone().or_else(|| session.code.clone()))
        .unwrap_or_else(|| "Lean Coffee".to_string());
    let _ = writeln!(out, "\x1b[1m{}\x1b[0m", title);

    if let Some(announcement) = snapshot.board.as_ref().and_then(|board| board.announcement.as_deref()) {
        let _ = writeln!(out, "{}", announcement);
    }

    let user = snapshot
        .current_user
        .as_ref()
        .and_then(|user| user.name.as_deref())
        .unwrap_or("Guest");
    let votes = match snapshot.remaining_votes {
        Some(remaining) => format!("{} votes left", remaining),
        None => "unlimited votes".to_string(),
    };
    let _ = writeln!(out, "{} · {}", user, votes);

    for status in TopicStatus::ALL {
        let mut topics: Vec<_> = snapshot
            .topics
            .iter()
            .filter(|topic| topic.lifecycle() == status)
            .collect();
        topics.sort_by(|a, b| {
            snapshot
                .votes_for(&b.id)
                .cmp(&snapshot.votes_for(&a.id))
                .then(a.order.cmp(&b.order))
        });

        let _ = writeln!(out, "\n\x1b[36m{}\x1b[0m ({})", status.board_label().to_uppercase(), topics.len());
        for topic in topics {
            let marker = if snapshot.has_voted(&topic.id) { "*" } else { " " };
            let _ = writeln!(
                out,
                " {} [{:>2}] {}  \x1b[2m{}\x1b[0m",
                marker,
                snapshot.votes_for(&topic.id),
                topic.title.as_deref().unwrap_or("(untitled)"),
                topic.id
            );
            if let Some(notes) = topic.notes.as_deref().filter(|notes| !notes.is_empty()) {
                let _ = writeln!(out, "        notes: {}", notes);
            }
            let comments = snapshot
                .comments
                .iter()
                .filter(|comment| comment.topic_id.as_ref().is_some_and(|link| link.contains(&topic.id)));
            for comment in comments {
                let _ = writeln!(out, "        > {}", comment.body.as_deref().unwrap_or_default());
            }
        }
    }

    out
}
