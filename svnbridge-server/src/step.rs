//! Continuation steps.
//!
//! A command whose response is too long to write in one go leaves the rest
//! of its work on the session's step stack. The session runs one step per
//! loop iteration, flushing in between, and reads the next command only once
//! the stack is empty. Steps run in LIFO order, so a step that pushes a
//! follow-up runs it before anything pushed earlier.

use crate::error::ServerError;
use crate::session::Session;
use bytes::Bytes;
use std::collections::BTreeSet;
use svnbridge_core::{path, RevisionInfo, Revnum, PROP_AUTHOR, PROP_DATE, PROP_LOG};
use svnbridge_protocol::SvnWriter;

/// Bytes of file content sent per step.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Which revision properties a `log` response carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevpropSelection {
    All,
    Named(BTreeSet<String>),
}

impl RevpropSelection {
    fn includes(&self, name: &str) -> bool {
        match self {
            RevpropSelection::All => true,
            RevpropSelection::Named(names) => names.contains(name),
        }
    }
}

/// Pending work of a partially answered command.
#[derive(Debug)]
pub enum Step {
    /// Streams `contents[offset..]`, one chunk per execution, then the
    /// empty terminator chunk and the final `success`.
    FileContents { contents: Bytes, offset: usize },
    /// Writes one log entry per execution. `revisions` is in reverse output
    /// order.
    LogEntries {
        revisions: Vec<Revnum>,
        changed_paths: bool,
        revprops: RevpropSelection,
    },
    /// Ends a `log` response.
    FinishLog,
}

impl Step {
    pub fn execute(self, session: &mut Session) -> Result<(), ServerError> {
        match self {
            Step::FileContents { contents, offset } => {
                let end = contents.len().min(offset + CHUNK_SIZE);
                if offset < end {
                    session.writer().binary(&contents[offset..end]);
                }
                if end < contents.len() {
                    session.push_step(Step::FileContents {
                        contents,
                        offset: end,
                    });
                } else {
                    session.writer().binary(b"").success();
                }
                Ok(())
            }
            Step::LogEntries {
                mut revisions,
                changed_paths,
                revprops,
            } => {
                let Some(rev) = revisions.pop() else {
                    return Ok(());
                };
                let info = session.repository().revision(rev)?;
                write_log_entry(session.writer(), &info, changed_paths, &revprops);
                if !revisions.is_empty() {
                    session.push_step(Step::LogEntries {
                        revisions,
                        changed_paths,
                        revprops,
                    });
                }
                Ok(())
            }
            Step::FinishLog => {
                session.writer().word("done").success();
                Ok(())
            }
        }
    }
}

/// `( ( changed-path ... ) rev ( author ? ) ( date ? ) ( message ? )
///   has-children invalid-revnum revprop-count ( revprops ) subtractive-merge )`
fn write_log_entry(
    writer: &mut SvnWriter,
    info: &RevisionInfo,
    changed_paths: bool,
    revprops: &RevpropSelection,
) {
    writer.list_begin().list_begin();
    if changed_paths {
        for (p, change) in &info.changes {
            let text_mods = change.kind == svnbridge_core::NodeKind::File
                && change.action != svnbridge_core::Action::Deleted;
            writer
                .list_begin()
                .string(&format!("/{p}"))
                .word(change.action.as_letter())
                .list_begin()
                .list_end()
                .list_begin()
                .word(change.kind.as_word())
                .bool(text_mods)
                .bool(false)
                .list_end()
                .list_end();
        }
    }
    writer.list_end().number(info.id);

    for name in [PROP_AUTHOR, PROP_DATE, PROP_LOG] {
        writer.list_begin();
        if revprops.includes(name) {
            if let Some(value) = info.properties.get(name) {
                writer.binary(value);
            }
        }
        writer.list_end();
    }

    let extra: Vec<_> = info
        .properties
        .iter()
        .filter(|(name, _)| {
            !matches!(name.as_str(), PROP_AUTHOR | PROP_DATE | PROP_LOG) && revprops.includes(name)
        })
        .collect();
    writer
        .bool(false)
        .bool(false)
        .number(extra.len() as u64)
        .list_begin();
    for (name, value) in extra {
        writer.list_begin().string(name).binary(value).list_end();
    }
    writer.list_end().bool(false).list_end();
}

/// Returns whether a change to `changed` shows up in the log of `target`.
pub(crate) fn touches(changed: &str, target: &str) -> bool {
    path::is_within(changed, target) || path::is_within(target, changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touches() {
        assert!(touches("trunk/a.txt", ""));
        assert!(touches("trunk/a.txt", "trunk"));
        assert!(touches("trunk", "trunk/a.txt"));
        assert!(!touches("branches/x", "trunk"));
        assert!(!touches("trunk2/a", "trunk"));
    }

    #[test]
    fn test_revprop_selection() {
        assert!(RevpropSelection::All.includes("svn:author"));
        let named = RevpropSelection::Named(["svn:log".to_string()].into_iter().collect());
        assert!(named.includes("svn:log"));
        assert!(!named.includes("svn:author"));
    }
}
