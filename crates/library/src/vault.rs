use anyhow::Result;
use mekiki_core::db;
use mekiki_core::schema::{Action, ActionKind, Candidate, CandidateState, Post};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const RECENT_POSTS: usize = 100;

pub struct LibraryPaths {
    pub root: PathBuf,
    pub index_dir: PathBuf,
    pub items_dir: PathBuf,
}

impl LibraryPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            index_dir: root.join("00_Index"),
            items_dir: root.join("Items"),
            root,
        }
    }

    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.index_dir)?;
        fs::create_dir_all(&self.items_dir)?;
        Ok(())
    }

    pub fn note_path(&self, candidate_id: &str) -> PathBuf {
        self.items_dir.join(format!("{}.md", note_stem(candidate_id)))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LibrarySummary {
    pub written: usize,
    pub removed: usize,
}

/// Write one note per KEEP/UNSURE candidate, drop notes of discarded ones and
/// regenerate the index pages.
pub fn build_library(conn: &Connection, library_root: &Path) -> Result<LibrarySummary> {
    let paths = LibraryPaths::new(library_root);
    paths.ensure()?;

    let labelled = db::list_candidates_in_states(
        conn,
        &[CandidateState::Keep, CandidateState::Unsure, CandidateState::Discard],
    )?;

    let mut summary = LibrarySummary::default();
    let mut kept: Vec<&Candidate> = Vec::new();
    let mut unsure: Vec<&Candidate> = Vec::new();
    let mut signal_counts: BTreeMap<&str, usize> = BTreeMap::new();

    for candidate in &labelled {
        if candidate.state == CandidateState::Discard {
            let path = paths.note_path(&candidate.id);
            if path.exists() {
                fs::remove_file(path)?;
                summary.removed += 1;
            }
            continue;
        }

        let actions = db::list_actions(conn, &candidate.id)?;
        write_item_note(&paths, candidate, &actions)?;
        summary.written += 1;
        for signal in &candidate.payload.signals {
            *signal_counts.entry(signal.as_str()).or_insert(0) += 1;
        }
        match candidate.state {
            CandidateState::Keep => kept.push(candidate),
            _ => unsure.push(candidate),
        }
    }

    let mut index_lines = generated_header("MOC - Library");
    push_section(&mut index_lines, "Keep", &kept);
    index_lines.push(String::new());
    push_section(&mut index_lines, "Unsure", &unsure);
    fs::write(paths.index_dir.join("MOC - Library.md"), index_lines.join("\n"))?;

    let mut signal_lines = generated_header("MOC - Signals");
    let mut ranked: Vec<(&str, usize)> = signal_counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    if ranked.is_empty() {
        signal_lines.push("_No signals found._".to_string());
    } else {
        signal_lines.extend(ranked.into_iter().map(|(signal, count)| format!("- #{signal} ({count})")));
    }
    fs::write(paths.index_dir.join("MOC - Signals.md"), signal_lines.join("\n"))?;

    let posts = db::list_posts(conn, RECENT_POSTS)?;
    let mut post_lines = generated_header("MOC - Posted");
    if posts.is_empty() {
        post_lines.push("_Nothing posted yet._".to_string());
    } else {
        post_lines.extend(posts.iter().map(|post| post_line(&paths, post)));
    }
    fs::write(paths.index_dir.join("MOC - Posted.md"), post_lines.join("\n"))?;

    Ok(summary)
}

fn generated_header(title: &str) -> Vec<String> {
    vec![
        format!("# {title}"),
        String::new(),
        "This index is generated. Do not edit manually.".to_string(),
        String::new(),
    ]
}

fn push_section(lines: &mut Vec<String>, heading: &str, items: &[&Candidate]) {
    lines.push(format!("## {heading}"));
    lines.push(String::new());
    if items.is_empty() {
        lines.push("_None._".to_string());
        return;
    }
    for candidate in items {
        lines.push(format!("- [[Items/{}|{}]]", note_stem(&candidate.id), candidate.title));
    }
}

fn post_line(paths: &LibraryPaths, post: &Post) -> String {
    if paths.note_path(&post.candidate_id).exists() {
        format!(
            "- `{}` [{}] [[Items/{}|{}]]",
            post.posted_at,
            post.bucket,
            note_stem(&post.candidate_id),
            post.title
        )
    } else {
        format!("- `{}` [{}] {}", post.posted_at, post.bucket, post.title)
    }
}

/// Candidate ids carry a `prefix:` that is not filename-safe everywhere.
fn note_stem(candidate_id: &str) -> String {
    candidate_id.replace(':', "-")
}

fn write_item_note(paths: &LibraryPaths, candidate: &Candidate, actions: &[Action]) -> Result<()> {
    let payload = &candidate.payload;

    let mut md = String::new();
    md.push_str("---\n");
    md.push_str(&format!("id: {}\n", candidate.id));
    md.push_str(&format!("state: {}\n", candidate.state.as_str()));
    md.push_str(&format!("origin: {}\n", candidate.origin.as_str()));
    md.push_str(&format!("source: {}\n", candidate.source_key()));
    if let Some(url) = &candidate.url {
        md.push_str(&format!("url: {url}\n"));
    }
    md.push_str(&format!("created_at: {}\n", candidate.created_at));
    md.push_str(&format!("updated_at: {}\n", candidate.updated_at));
    md.push_str("signals:\n");
    for signal in &payload.signals {
        md.push_str(&format!("  - {signal}\n"));
    }
    md.push_str("---\n\n");

    md.push_str(&format!("# {}\n\n", candidate.title));
    if !payload.one_liner.is_empty() {
        md.push_str(&format!("> {}\n\n", payload.one_liner));
    }

    md.push_str("## Source\n");
    match &candidate.url {
        Some(url) => md.push_str(&format!("- Link: {url}\n")),
        None => md.push_str("- Link: _none_\n"),
    }
    if !payload.source_domain.is_empty() {
        md.push_str(&format!("- Domain: `{}`\n", payload.source_domain));
    }
    if let Some(published) = &payload.published_at {
        md.push_str(&format!("- Published: `{published}`\n"));
    }
    md.push('\n');

    if let Some(content) = payload.content.as_deref().filter(|c| !c.trim().is_empty()) {
        md.push_str("## Content\n");
        md.push_str(content);
        md.push_str("\n\n");
    }

    md.push_str("## Notes\n");
    let notes: Vec<&Action> = actions.iter().filter(|a| a.kind == ActionKind::Note).collect();
    if notes.is_empty() {
        md.push_str("_No notes._\n");
    }
    for note in notes {
        let field = |key: &str| {
            note.metadata
                .as_ref()
                .and_then(|meta| meta.get(key))
                .and_then(|value| value.as_str())
                .unwrap_or("")
                .to_string()
        };
        let title = field("title");
        let heading = if title.is_empty() { note.created_at.clone() } else { title };
        md.push_str(&format!("### {heading}\n{}\n_by {} at {}_\n\n", field("body"), note.actor, note.created_at));
    }
    md.push('\n');

    md.push_str("## History\n");
    for action in actions {
        md.push_str(&format!("- `{}` {} by {}\n", action.created_at, action.kind, action.actor));
    }

    fs::write(paths.note_path(&candidate.id), md)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mekiki_core::actions;
    use mekiki_core::schema::{CandidatePayload, LabelKind, Origin};
    use time::macros::datetime;
    use time::OffsetDateTime;

    const NOW: OffsetDateTime = datetime!(2026-02-01 12:00:00 UTC);

    fn insert(conn: &Connection, id: &str, title: &str, signals: &[&str]) {
        db::insert_candidate(
            conn,
            &Candidate {
                id: id.to_string(),
                title: title.to_string(),
                url: Some(format!("https://example.com/{title}")),
                source_type: "url".to_string(),
                source_id: Some("feed-1".to_string()),
                origin: Origin::BotRecommended,
                state: CandidateState::New,
                created_at: "2026-02-01T00:00:00Z".to_string(),
                updated_at: "2026-02-01T00:00:00Z".to_string(),
                payload: CandidatePayload {
                    one_liner: format!("{title} in one line"),
                    signals: signals.iter().map(|s| s.to_string()).collect(),
                    ..CandidatePayload::default()
                },
            },
        )
        .unwrap();
    }

    #[test]
    fn writes_kept_notes_and_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let conn = db::open_in_memory().unwrap();
        insert(&conn, "feed:aaa", "Alpha", &["rust", "databases"]);
        insert(&conn, "feed:bbb", "Beta", &["rust"]);
        insert(&conn, "feed:ccc", "Gamma", &["llm"]);
        actions::label(&conn, "feed:aaa", LabelKind::Keep, "alice", None, NOW).unwrap();
        actions::add_note(&conn, "feed:aaa", "alice", "Why", "Great WAL write-up", NOW).unwrap();
        actions::label(&conn, "feed:bbb", LabelKind::Unsure, "alice", None, NOW).unwrap();
        db::record_post(&conn, "feed:aaa", "Alpha", "CORE", NOW).unwrap();

        let summary = build_library(&conn, dir.path()).unwrap();
        assert_eq!(summary, LibrarySummary { written: 2, removed: 0 });

        let paths = LibraryPaths::new(dir.path());
        let note = fs::read_to_string(paths.note_path("feed:aaa")).unwrap();
        assert!(note.starts_with("---\nid: feed:aaa\nstate: KEEP\n"));
        assert!(note.contains("### Why\nGreat WAL write-up\n"));
        assert!(note.contains("label.keep by alice"));
        assert!(!paths.note_path("feed:ccc").exists());

        let index = fs::read_to_string(paths.index_dir.join("MOC - Library.md")).unwrap();
        assert!(index.contains("## Keep\n\n- [[Items/feed-aaa|Alpha]]"));
        assert!(index.contains("## Unsure\n\n- [[Items/feed-bbb|Beta]]"));

        let signals = fs::read_to_string(paths.index_dir.join("MOC - Signals.md")).unwrap();
        assert!(signals.contains("- #rust (2)\n- #databases (1)"));

        let posted = fs::read_to_string(paths.index_dir.join("MOC - Posted.md")).unwrap();
        assert!(posted.contains("[CORE] [[Items/feed-aaa|Alpha]]"));
    }

    #[test]
    fn discarding_removes_an_existing_note() {
        let dir = tempfile::tempdir().unwrap();
        let conn = db::open_in_memory().unwrap();
        insert(&conn, "feed:aaa", "Alpha", &["rust"]);
        actions::label(&conn, "feed:aaa", LabelKind::Keep, "alice", None, NOW).unwrap();
        build_library(&conn, dir.path()).unwrap();
        assert!(LibraryPaths::new(dir.path()).note_path("feed:aaa").exists());

        actions::label(&conn, "feed:aaa", LabelKind::Discard, "alice", None, NOW).unwrap();
        let summary = build_library(&conn, dir.path()).unwrap();
        assert_eq!(summary, LibrarySummary { written: 0, removed: 1 });
        assert!(!LibraryPaths::new(dir.path()).note_path("feed:aaa").exists());

        let signals = fs::read_to_string(dir.path().join("00_Index").join("MOC - Signals.md")).unwrap();
        assert!(signals.contains("_No signals found._"));
    }
}
