//! Command dispatch table.
//!
//! A [`Command`] declares its argument record and a synchronous `process`
//! step. The table erases the argument type so the session can look commands
//! up by name and run decoding and processing in one call.

use crate::error::ServerError;
use crate::session::Session;
use futures::future::BoxFuture;
use std::collections::HashMap;
use svnbridge_protocol::Decode;

/// A command a client can send after the handshake.
pub trait Command: Send + Sync + 'static {
    /// Wire name of the command.
    const NAME: &'static str;

    /// Argument record, decoded from the command's parameter list.
    type Args: Decode;

    /// Writes the response and pushes any steps needed to finish it.
    fn process(&self, session: &mut Session, args: Self::Args) -> Result<(), ServerError>;
}

trait ErasedCommand: Send + Sync {
    fn dispatch<'a>(&'a self, session: &'a mut Session) -> BoxFuture<'a, Result<(), ServerError>>;
}

impl<C: Command> ErasedCommand for C {
    fn dispatch<'a>(&'a self, session: &'a mut Session) -> BoxFuture<'a, Result<(), ServerError>> {
        Box::pin(async move {
            let reader = session.reader();
            let args = C::Args::decode(reader, true).await?;
            // Close the command frame unless a missing parameter list already
            // consumed its end.
            if reader.depth() > 0 {
                reader.skip_remaining_items().await?;
            }
            session.write_auth_request();
            self.process(session, args)
        })
    }
}

/// Commands by name. Built once, read-only afterwards.
#[derive(Default)]
pub struct CommandTable {
    commands: HashMap<&'static str, Box<dyn ErasedCommand>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The commands served by svnbridge.
    pub fn standard() -> Self {
        use crate::commands::*;

        let mut table = Self::new();
        table
            .register(GetLatestRev)
            .register(GetDatedRev)
            .register(Reparent)
            .register(RevProplist)
            .register(RevProp)
            .register(ChangeRevProp)
            .register(ChangeRevProp2)
            .register(CheckPath)
            .register(Stat)
            .register(GetFile)
            .register(Log);
        table
    }

    /// Adds a command, replacing any previous one with the same name.
    pub fn register<C: Command>(&mut self, command: C) -> &mut Self {
        self.commands.insert(C::NAME, Box::new(command));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Sorted command names.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Decodes the arguments of command `name` from the session's reader and
    /// processes it. Returns `None` if no such command is registered.
    pub(crate) async fn dispatch(
        &self,
        name: &str,
        session: &mut Session,
    ) -> Option<Result<(), ServerError>> {
        let command = self.commands.get(name)?;
        Some(command.dispatch(session).await)
    }
}
