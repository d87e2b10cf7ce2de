//! Command handlers and their argument records.

use crate::error::ServerError;
use crate::handler::Command;
use crate::session::Session;
use crate::step::{touches, RevpropSelection, Step};
use bytes::Bytes;
use md5::{Digest, Md5};
use svnbridge_core::{
    format_date, parse_date, NodeKind, RepositoryError, Revnum, PROP_AUTHOR, PROP_DATE, PROP_LOG,
};
use svnbridge_protocol::{Decode, ErrorCode, ProtocolError, Record, SvnReader};

/// `get-latest-rev`: `( )` -> `( success ( rev ) )`
pub struct GetLatestRev;

impl Command for GetLatestRev {
    const NAME: &'static str = "get-latest-rev";
    type Args = ();

    fn process(&self, session: &mut Session, _args: ()) -> Result<(), ServerError> {
        let rev = session.repository().latest_revision();
        session
            .writer()
            .list_begin()
            .word("success")
            .list_begin()
            .number(rev)
            .list_end()
            .list_end();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct GetDatedRevArgs {
    pub date: String,
}

impl Decode for GetDatedRevArgs {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        let mut record = Record::open(reader, in_list).await?;
        let args = GetDatedRevArgs {
            date: record.field().await?,
        };
        record.finish().await?;
        Ok(args)
    }
}

/// `get-dated-rev`: youngest revision committed at or before a date.
pub struct GetDatedRev;

impl Command for GetDatedRev {
    const NAME: &'static str = "get-dated-rev";
    type Args = GetDatedRevArgs;

    fn process(&self, session: &mut Session, args: GetDatedRevArgs) -> Result<(), ServerError> {
        let date = parse_date(&args.date)?;
        let rev = session.repository().revision_by_date(date);
        session
            .writer()
            .list_begin()
            .word("success")
            .list_begin()
            .number(rev)
            .list_end()
            .list_end();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ReparentArgs {
    pub url: String,
}

impl Decode for ReparentArgs {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        let mut record = Record::open(reader, in_list).await?;
        let args = ReparentArgs {
            url: record.field().await?,
        };
        record.finish().await?;
        Ok(args)
    }
}

/// `reparent`: moves the session root to another URL in the repository.
pub struct Reparent;

impl Command for Reparent {
    const NAME: &'static str = "reparent";
    type Args = ReparentArgs;

    fn process(&self, session: &mut Session, args: ReparentArgs) -> Result<(), ServerError> {
        session.reparent(&args.url)?;
        session.writer().success();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RevProplistArgs {
    pub rev: Revnum,
}

impl Decode for RevProplistArgs {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        let mut record = Record::open(reader, in_list).await?;
        let args = RevProplistArgs {
            rev: record.field().await?,
        };
        record.finish().await?;
        Ok(args)
    }
}

/// `rev-proplist`: all properties of a revision.
pub struct RevProplist;

impl Command for RevProplist {
    const NAME: &'static str = "rev-proplist";
    type Args = RevProplistArgs;

    fn process(&self, session: &mut Session, args: RevProplistArgs) -> Result<(), ServerError> {
        let info = session.repository().revision(args.rev)?;
        session
            .writer()
            .list_begin()
            .word("success")
            .list_begin()
            .write_map(Some(&info.properties))
            .list_end()
            .list_end();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RevPropArgs {
    pub rev: Revnum,
    pub name: String,
}

impl Decode for RevPropArgs {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        let mut record = Record::open(reader, in_list).await?;
        let args = RevPropArgs {
            rev: record.field().await?,
            name: record.field().await?,
        };
        record.finish().await?;
        Ok(args)
    }
}

/// `rev-prop`: one revision property, `( value ? )`.
pub struct RevProp;

impl Command for RevProp {
    const NAME: &'static str = "rev-prop";
    type Args = RevPropArgs;

    fn process(&self, session: &mut Session, args: RevPropArgs) -> Result<(), ServerError> {
        let info = session.repository().revision(args.rev)?;
        let writer = session.writer();
        writer.list_begin().word("success").list_begin().list_begin();
        if let Some(value) = info.properties.get(&args.name) {
            writer.binary(value);
        }
        writer.list_end().list_end().list_end();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ChangeRevPropArgs {
    pub rev: Revnum,
    pub name: String,
    /// Absent to delete the property.
    pub value: Option<Bytes>,
}

impl Decode for ChangeRevPropArgs {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        let mut record = Record::open(reader, in_list).await?;
        let args = ChangeRevPropArgs {
            rev: record.field().await?,
            name: record.field().await?,
            value: record.optional().await?,
        };
        record.finish().await?;
        Ok(args)
    }
}

fn change_rev_prop(
    session: &mut Session,
    rev: Revnum,
    name: &str,
    value: Option<Bytes>,
    expected: Option<Option<Bytes>>,
) -> Result<(), ServerError> {
    let user = session.user().filter(|u| !u.is_anonymous()).ok_or_else(|| {
        ServerError::svn(
            ErrorCode::RaNotAuthorized,
            "Anonymous users may not change revision properties",
        )
    })?;
    tracing::info!(rev, name, user = %user.username, "changing revision property");
    session
        .repository()
        .set_revision_property(rev, name, value, expected)?;
    session.writer().success();
    Ok(())
}

/// `change-rev-prop`: unconditionally sets or deletes a revision property.
pub struct ChangeRevProp;

impl Command for ChangeRevProp {
    const NAME: &'static str = "change-rev-prop";
    type Args = ChangeRevPropArgs;

    fn process(&self, session: &mut Session, args: ChangeRevPropArgs) -> Result<(), ServerError> {
        change_rev_prop(session, args.rev, &args.name, args.value, None)
    }
}

/// `( dont-care:bool ? previous-value:string )`
#[derive(Debug, Default)]
pub struct PreviousValue {
    pub dont_care: bool,
    pub value: Option<Bytes>,
}

impl Decode for PreviousValue {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        let mut record = Record::open(reader, in_list).await?;
        let previous = PreviousValue {
            dont_care: record.field().await?,
            value: record.optional().await?,
        };
        record.finish().await?;
        Ok(previous)
    }
}

#[derive(Debug, Default)]
pub struct ChangeRevProp2Args {
    pub rev: Revnum,
    pub name: String,
    pub value: Option<Bytes>,
    /// Absent when the client sent no condition at all.
    pub previous: Option<PreviousValue>,
}

impl Decode for ChangeRevProp2Args {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        let mut record = Record::open(reader, in_list).await?;
        let args = ChangeRevProp2Args {
            rev: record.field().await?,
            name: record.field().await?,
            value: record.field().await?,
            previous: record.optional().await?,
        };
        record.finish().await?;
        Ok(args)
    }
}

/// `change-rev-prop2`: like `change-rev-prop`, optionally only if the
/// property still has the value the client last saw.
pub struct ChangeRevProp2;

impl Command for ChangeRevProp2 {
    const NAME: &'static str = "change-rev-prop2";
    type Args = ChangeRevProp2Args;

    fn process(&self, session: &mut Session, args: ChangeRevProp2Args) -> Result<(), ServerError> {
        let expected = match args.previous {
            Some(previous) if !previous.dont_care => Some(previous.value),
            _ => None,
        };
        change_rev_prop(session, args.rev, &args.name, args.value, expected)
    }
}

/// `( path:string ( rev:number ? ) ... )`, shared by the path based commands.
#[derive(Debug, Default)]
pub struct PathArgs {
    pub path: String,
    pub rev: Option<Revnum>,
}

impl Decode for PathArgs {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        let mut record = Record::open(reader, in_list).await?;
        let args = PathArgs {
            path: record.field().await?,
            rev: record.field().await?,
        };
        record.finish().await?;
        Ok(args)
    }
}

/// Resolves an optional revision against the repository head, rejecting
/// revisions that do not exist yet.
fn resolve_rev(session: &Session, rev: Option<Revnum>) -> Result<Revnum, ServerError> {
    let latest = session.repository().latest_revision();
    match rev {
        None => Ok(latest),
        Some(rev) if rev <= latest => Ok(rev),
        Some(rev) => Err(RepositoryError::NoSuchRevision { rev }.into()),
    }
}

/// `check-path`: kind of the node at a path.
pub struct CheckPath;

impl Command for CheckPath {
    const NAME: &'static str = "check-path";
    type Args = PathArgs;

    fn process(&self, session: &mut Session, args: PathArgs) -> Result<(), ServerError> {
        let rev = resolve_rev(session, args.rev)?;
        let path = session.resolve_path(&args.path);
        let kind = session
            .repository()
            .node(rev, &path)?
            .map_or(NodeKind::None, |node| node.kind);
        session
            .writer()
            .list_begin()
            .word("success")
            .list_begin()
            .word(kind.as_word())
            .list_end()
            .list_end();
        Ok(())
    }
}

/// `stat`: `( ( kind size has-props created-rev ( date ? ) ( author ? ) ) ? )`
pub struct Stat;

impl Command for Stat {
    const NAME: &'static str = "stat";
    type Args = PathArgs;

    fn process(&self, session: &mut Session, args: PathArgs) -> Result<(), ServerError> {
        let rev = resolve_rev(session, args.rev)?;
        let path = session.resolve_path(&args.path);
        let repository = session.repository().clone();
        let node = repository.node(rev, &path)?;
        let created = match &node {
            Some(node) => Some(repository.revision(node.last_changed_rev)?),
            None => None,
        };

        let writer = session.writer();
        writer.list_begin().word("success").list_begin().list_begin();
        if let (Some(node), Some(created)) = (node, created) {
            writer
                .list_begin()
                .word(node.kind.as_word())
                .number(node.size)
                .bool(!node.properties.is_empty())
                .number(node.last_changed_rev)
                .list_begin();
            if let Some(date) = created.properties.get(PROP_DATE) {
                writer.binary(date);
            }
            writer.list_end().list_begin();
            if let Some(author) = created.properties.get(PROP_AUTHOR) {
                writer.binary(author);
            }
            writer.list_end().list_end();
        }
        writer.list_end().list_end().list_end();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct GetFileArgs {
    pub path: String,
    pub rev: Option<Revnum>,
    pub want_props: bool,
    pub want_contents: bool,
    pub want_iprops: bool,
}

impl Decode for GetFileArgs {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        let mut record = Record::open(reader, in_list).await?;
        let args = GetFileArgs {
            path: record.field().await?,
            rev: record.field().await?,
            want_props: record.field().await?,
            want_contents: record.field().await?,
            want_iprops: record.optional().await?.unwrap_or(false),
        };
        record.finish().await?;
        Ok(args)
    }
}

/// `get-file`: `( success ( ( checksum ) rev ( props ) ) )`, then the
/// contents as string chunks when requested.
pub struct GetFile;

impl Command for GetFile {
    const NAME: &'static str = "get-file";
    type Args = GetFileArgs;

    fn process(&self, session: &mut Session, args: GetFileArgs) -> Result<(), ServerError> {
        let rev = resolve_rev(session, args.rev)?;
        let path = session.resolve_path(&args.path);
        let repository = session.repository().clone();
        let node = repository
            .node(rev, &path)?
            .ok_or_else(|| RepositoryError::NotFound {
                path: path.clone(),
                rev,
            })?;
        if node.kind != NodeKind::File {
            return Err(RepositoryError::NotFile { path }.into());
        }
        let contents = repository.file_contents(rev, &path)?;
        let checksum = hex::encode(Md5::digest(&contents));

        let props = if args.want_props {
            let mut props = node.properties.clone();
            let created = repository.revision(node.last_changed_rev)?;
            props.insert(
                "svn:entry:committed-rev".to_string(),
                Bytes::from(node.last_changed_rev.to_string()),
            );
            if let Some(date) = created.date() {
                props.insert(
                    "svn:entry:committed-date".to_string(),
                    Bytes::from(format_date(date)),
                );
            }
            if let Some(author) = created.properties.get(PROP_AUTHOR) {
                props.insert("svn:entry:last-author".to_string(), author.clone());
            }
            props.insert(
                "svn:entry:uuid".to_string(),
                Bytes::from(repository.uuid().to_string()),
            );
            Some(props)
        } else {
            None
        };

        let writer = session.writer();
        writer
            .list_begin()
            .word("success")
            .list_begin()
            .list_begin()
            .string(&checksum)
            .list_end()
            .number(rev)
            .write_map(props.as_ref());
        if args.want_iprops {
            writer.list_begin().list_end();
        }
        writer.list_end().list_end();

        if args.want_contents {
            session.push_step(Step::FileContents {
                contents,
                offset: 0,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LogArgs {
    pub paths: Vec<String>,
    pub start: Option<Revnum>,
    pub end: Option<Revnum>,
    pub changed_paths: bool,
    pub strict_node: bool,
    pub limit: u64,
    pub include_merged: bool,
    /// `all-revprops` or `revprops`; absent from older clients.
    pub revprops_mode: String,
    pub revprops: Vec<String>,
}

impl Decode for LogArgs {
    async fn decode(reader: &mut SvnReader, in_list: bool) -> Result<Self, ProtocolError> {
        let mut record = Record::open(reader, in_list).await?;
        let args = LogArgs {
            paths: record.field().await?,
            start: record.field().await?,
            end: record.field().await?,
            changed_paths: record.field().await?,
            strict_node: record.field().await?,
            limit: record.field().await?,
            include_merged: record.field().await?,
            revprops_mode: record.field().await?,
            revprops: record.field().await?,
        };
        record.finish().await?;
        Ok(args)
    }
}

impl LogArgs {
    fn revprop_selection(&self) -> RevpropSelection {
        match self.revprops_mode.as_str() {
            "all-revprops" => RevpropSelection::All,
            "revprops" => RevpropSelection::Named(self.revprops.iter().cloned().collect()),
            _ => RevpropSelection::Named(
                [PROP_AUTHOR, PROP_DATE, PROP_LOG]
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            ),
        }
    }
}

/// `log`: one entry per revision touching the target paths, then `done`.
pub struct Log;

impl Command for Log {
    const NAME: &'static str = "log";
    type Args = LogArgs;

    fn process(&self, session: &mut Session, args: LogArgs) -> Result<(), ServerError> {
        let start = resolve_rev(session, args.start)?;
        let end = resolve_rev(session, args.end)?;
        let targets: Vec<String> = if args.paths.is_empty() {
            vec![session.resolve_path("")]
        } else {
            args.paths.iter().map(|p| session.resolve_path(p)).collect()
        };

        let repository = session.repository().clone();
        let newest = start.max(end);
        for target in &targets {
            if repository.node(newest, target)?.is_none() {
                return Err(RepositoryError::NotFound {
                    path: target.clone(),
                    rev: newest,
                }
                .into());
            }
        }

        let order: Box<dyn Iterator<Item = Revnum>> = if start >= end {
            Box::new((end..=start).rev())
        } else {
            Box::new(start..=end)
        };
        let mut revisions = Vec::new();
        for rev in order {
            if args.limit > 0 && revisions.len() as u64 >= args.limit {
                break;
            }
            let info = repository.revision(rev)?;
            let matches = targets.iter().any(|target| {
                target.is_empty() || info.changes.keys().any(|changed| touches(changed, target))
            });
            if matches {
                revisions.push(rev);
            }
        }
        tracing::debug!(start, end, entries = revisions.len(), "log");

        session.push_step(Step::FinishLog);
        if !revisions.is_empty() {
            revisions.reverse();
            session.push_step(Step::LogEntries {
                revisions,
                changed_paths: args.changed_paths,
                revprops: args.revprop_selection(),
            });
        }
        Ok(())
    }
}
