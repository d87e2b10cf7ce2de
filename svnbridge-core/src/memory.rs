//! In-memory repository.
//!
//! Every revision keeps a full snapshot of the tree. Snapshots share their
//! entries through `Arc`, so a commit costs one map clone plus the touched
//! entries.

use crate::error::RepositoryError;
use crate::path;
use crate::repository::{
    format_date, parse_date, Action, ChangedPath, Node, NodeKind, Repository, RevisionInfo,
    Revnum, PROP_AUTHOR, PROP_DATE, PROP_LOG,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A change applied by [`MemoryRepository::commit`].
#[derive(Debug, Clone)]
pub enum Edit {
    /// Creates a directory. The parent must exist.
    Mkdir(String),
    /// Creates or replaces the contents of a file. The parent must exist.
    Write(String, Bytes),
    /// Deletes a file or a directory with everything below it.
    Delete(String),
    /// Sets or removes a node property.
    SetProperty {
        path: String,
        name: String,
        value: Option<Bytes>,
    },
}

#[derive(Debug, Clone)]
struct Entry {
    kind: NodeKind,
    contents: Bytes,
    properties: BTreeMap<String, Bytes>,
    last_changed_rev: Revnum,
}

type Tree = BTreeMap<String, Arc<Entry>>;

struct Revision {
    properties: BTreeMap<String, Bytes>,
    changes: BTreeMap<String, ChangedPath>,
    tree: Arc<Tree>,
}

/// Thread-safe in-memory [`Repository`].
pub struct MemoryRepository {
    uuid: String,
    revisions: RwLock<Vec<Revision>>,
}

impl MemoryRepository {
    /// Creates a repository with a random UUID.
    pub fn new() -> Self {
        Self::with_uuid(uuid::Uuid::new_v4().to_string())
    }

    /// Creates a repository containing only revision 0, an empty root.
    pub fn with_uuid(uuid: impl Into<String>) -> Self {
        let mut tree = Tree::new();
        tree.insert(
            String::new(),
            Arc::new(Entry {
                kind: NodeKind::Dir,
                contents: Bytes::new(),
                properties: BTreeMap::new(),
                last_changed_rev: 0,
            }),
        );

        let mut properties = BTreeMap::new();
        properties.insert(PROP_DATE.to_string(), Bytes::from(format_date(Utc::now())));

        Self {
            uuid: uuid.into(),
            revisions: RwLock::new(vec![Revision {
                properties,
                changes: BTreeMap::new(),
                tree: Arc::new(tree),
            }]),
        }
    }

    /// Applies `edits` atomically as a new revision and returns its number.
    pub fn commit(&self, author: &str, message: &str, edits: Vec<Edit>) -> Result<Revnum, RepositoryError> {
        self.commit_at(author, message, Utc::now(), edits)
    }

    /// Like [`commit`](Self::commit) with an explicit commit date.
    pub fn commit_at(
        &self,
        author: &str,
        message: &str,
        date: DateTime<Utc>,
        edits: Vec<Edit>,
    ) -> Result<Revnum, RepositoryError> {
        let mut revisions = self.revisions.write();
        let rev = revisions.len() as Revnum;
        let base = rev - 1;
        let mut tree: Tree = revisions[revisions.len() - 1].tree.as_ref().clone();
        let mut changes: BTreeMap<String, ChangedPath> = BTreeMap::new();

        for edit in edits {
            apply(&mut tree, &mut changes, base, rev, edit)?;
        }

        let touched: Vec<String> = changes.keys().cloned().collect();
        for changed in touched {
            bump_ancestors(&mut tree, &changed, rev);
        }

        let mut properties = BTreeMap::new();
        properties.insert(PROP_AUTHOR.to_string(), Bytes::from(author.to_string()));
        properties.insert(PROP_DATE.to_string(), Bytes::from(format_date(date)));
        properties.insert(PROP_LOG.to_string(), Bytes::from(message.to_string()));

        tracing::debug!(rev, changes = changes.len(), author, "committed revision");

        revisions.push(Revision {
            properties,
            changes,
            tree: Arc::new(tree),
        });
        Ok(rev)
    }

    fn tree(&self, rev: Revnum) -> Result<Arc<Tree>, RepositoryError> {
        let revisions = self.revisions.read();
        usize::try_from(rev)
            .ok()
            .and_then(|i| revisions.get(i))
            .map(|r| Arc::clone(&r.tree))
            .ok_or(RepositoryError::NoSuchRevision { rev })
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn apply(
    tree: &mut Tree,
    changes: &mut BTreeMap<String, ChangedPath>,
    base: Revnum,
    rev: Revnum,
    edit: Edit,
) -> Result<(), RepositoryError> {
    match edit {
        Edit::Mkdir(p) => {
            let p = path::normalize(&p);
            if tree.contains_key(&p) {
                return Err(RepositoryError::AlreadyExists { path: p });
            }
            require_parent_dir(tree, &p, base)?;
            tree.insert(
                p.clone(),
                Arc::new(Entry {
                    kind: NodeKind::Dir,
                    contents: Bytes::new(),
                    properties: BTreeMap::new(),
                    last_changed_rev: rev,
                }),
            );
            record(changes, p, Action::Added, NodeKind::Dir);
        }
        Edit::Write(p, contents) => {
            let p = path::normalize(&p);
            let (properties, action) = match tree.get(&p) {
                Some(entry) if entry.kind == NodeKind::Dir => {
                    return Err(RepositoryError::NotFile { path: p })
                }
                Some(entry) => (entry.properties.clone(), Action::Modified),
                None => {
                    require_parent_dir(tree, &p, base)?;
                    (BTreeMap::new(), Action::Added)
                }
            };
            tree.insert(
                p.clone(),
                Arc::new(Entry {
                    kind: NodeKind::File,
                    contents,
                    properties,
                    last_changed_rev: rev,
                }),
            );
            record(changes, p, action, NodeKind::File);
        }
        Edit::Delete(p) => {
            let p = path::normalize(&p);
            if p.is_empty() {
                return Err(RepositoryError::NotFile { path: p });
            }
            let kind = match tree.get(&p) {
                Some(entry) => entry.kind,
                None => return Err(RepositoryError::NotFound { path: p, rev: base }),
            };
            tree.retain(|key, _| !path::is_within(key, &p));
            record(changes, p, Action::Deleted, kind);
        }
        Edit::SetProperty { path: p, name, value } => {
            let p = path::normalize(&p);
            let Some(entry) = tree.get_mut(&p) else {
                return Err(RepositoryError::NotFound { path: p, rev: base });
            };
            let entry = Arc::make_mut(entry);
            match value {
                Some(value) => {
                    entry.properties.insert(name, value);
                }
                None => {
                    entry.properties.remove(&name);
                }
            }
            entry.last_changed_rev = rev;
            let kind = entry.kind;
            record(changes, p, Action::Modified, kind);
        }
    }
    Ok(())
}

fn require_parent_dir(tree: &Tree, p: &str, base: Revnum) -> Result<(), RepositoryError> {
    let parent = path::parent(p).unwrap_or("");
    match tree.get(parent) {
        Some(entry) if entry.kind == NodeKind::Dir => Ok(()),
        Some(_) => Err(RepositoryError::NotDirectory {
            path: parent.to_string(),
        }),
        None => Err(RepositoryError::NotFound {
            path: parent.to_string(),
            rev: base,
        }),
    }
}

/// Merges a change into the revision's change list. Deleting a path added
/// earlier in the same commit leaves no trace; re-adding a deleted path is a
/// replacement; anything else keeps the first action.
fn record(changes: &mut BTreeMap<String, ChangedPath>, p: String, action: Action, kind: NodeKind) {
    match (changes.get(&p).map(|c| c.action), action) {
        (Some(Action::Added), Action::Deleted) => {
            changes.remove(&p);
        }
        (Some(Action::Deleted), Action::Added) => {
            changes.insert(p, ChangedPath { action: Action::Replaced, kind });
        }
        (Some(_), _) => {}
        (None, action) => {
            changes.insert(p, ChangedPath { action, kind });
        }
    }
}

fn bump_ancestors(tree: &mut Tree, changed: &str, rev: Revnum) {
    let mut current = path::parent(changed);
    while let Some(dir) = current {
        if let Some(entry) = tree.get_mut(dir) {
            Arc::make_mut(entry).last_changed_rev = rev;
        }
        current = path::parent(dir);
    }
}

impl Repository for MemoryRepository {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn latest_revision(&self) -> Revnum {
        (self.revisions.read().len() - 1) as Revnum
    }

    fn revision(&self, rev: Revnum) -> Result<RevisionInfo, RepositoryError> {
        let revisions = self.revisions.read();
        let revision = usize::try_from(rev)
            .ok()
            .and_then(|i| revisions.get(i))
            .ok_or(RepositoryError::NoSuchRevision { rev })?;
        Ok(RevisionInfo {
            id: rev,
            properties: revision.properties.clone(),
            changes: revision.changes.clone(),
        })
    }

    fn revision_by_date(&self, date: DateTime<Utc>) -> Revnum {
        let revisions = self.revisions.read();
        revisions
            .iter()
            .enumerate()
            .rev()
            .find(|(_, r)| {
                r.properties
                    .get(PROP_DATE)
                    .and_then(|d| std::str::from_utf8(d).ok())
                    .and_then(|d| parse_date(d).ok())
                    .is_some_and(|d| d <= date)
            })
            .map_or(0, |(i, _)| i as Revnum)
    }

    fn set_revision_property(
        &self,
        rev: Revnum,
        name: &str,
        value: Option<Bytes>,
        expected: Option<Option<Bytes>>,
    ) -> Result<(), RepositoryError> {
        let mut revisions = self.revisions.write();
        let revision = usize::try_from(rev)
            .ok()
            .and_then(|i| revisions.get_mut(i))
            .ok_or(RepositoryError::NoSuchRevision { rev })?;

        if let Some(expected) = expected {
            if revision.properties.get(name) != expected.as_ref() {
                return Err(RepositoryError::PropertyChanged {
                    name: name.to_string(),
                });
            }
        }
        match value {
            Some(value) => {
                revision.properties.insert(name.to_string(), value);
            }
            None => {
                revision.properties.remove(name);
            }
        }
        tracing::debug!(rev, name, "revision property changed");
        Ok(())
    }

    fn node(&self, rev: Revnum, p: &str) -> Result<Option<Node>, RepositoryError> {
        let tree = self.tree(rev)?;
        let p = path::normalize(p);
        Ok(tree.get(&p).map(|entry| Node {
            kind: entry.kind,
            size: entry.contents.len() as u64,
            last_changed_rev: entry.last_changed_rev,
            properties: entry.properties.clone(),
            path: p.clone(),
        }))
    }

    fn file_contents(&self, rev: Revnum, p: &str) -> Result<Bytes, RepositoryError> {
        let tree = self.tree(rev)?;
        let p = path::normalize(p);
        match tree.get(&p) {
            Some(entry) if entry.kind == NodeKind::File => Ok(entry.contents.clone()),
            Some(_) => Err(RepositoryError::NotFile { path: p }),
            None => Err(RepositoryError::NotFound { path: p, rev }),
        }
    }
}
