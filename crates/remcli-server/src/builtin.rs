//! Small demonstration dispatcher shipped with `remcli-server`

use crate::dispatcher::{CommandContext, CommandDispatcher, CommandIo, DispatchError};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

const COMMANDS: &[(&str, &str)] = &[
    ("cat", "Copies standard input to standard output"),
    ("echo", "Prints its arguments"),
    ("help", "Lists the available commands"),
    ("version", "Shows the server version"),
    ("who-am-i", "Reports the identity this connection runs as"),
];

/// Dispatcher for the built-in commands
#[derive(Debug, Default, Clone)]
pub struct BuiltinCommands;

impl BuiltinCommands {
    pub fn new() -> Self {
        Self
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        COMMANDS.iter().map(|(name, _)| *name)
    }
}

#[async_trait]
impl CommandDispatcher for BuiltinCommands {
    async fn dispatch(
        &self,
        context: CommandContext,
        mut io: CommandIo,
    ) -> Result<i32, DispatchError> {
        let args = context.invocation.command_args();
        match context.invocation.command().unwrap_or("help") {
            "help" => {
                let mut text = String::new();
                for (name, description) in COMMANDS {
                    text.push_str(&format!("  {:<10} {}\n", name, description));
                }
                io.stdout.write_all(text.as_bytes()).await?;
            }
            "version" => {
                io.stdout
                    .write_all(format!("{}\n", env!("CARGO_PKG_VERSION")).as_bytes())
                    .await?;
            }
            "echo" => {
                io.stdout
                    .write_all(format!("{}\n", args.join(" ")).as_bytes())
                    .await?;
            }
            "cat" => {
                if !args.is_empty() {
                    return Err(DispatchError::Usage("cat takes no arguments".to_string()));
                }
                tokio::io::copy(&mut io.stdin, &mut io.stdout).await?;
            }
            "who-am-i" => {
                let principal = &context.principal;
                io.stdout
                    .write_all(
                        format!(
                            "Authenticated as: {}\nScheme: {}\n",
                            principal, principal.scheme
                        )
                        .as_bytes(),
                    )
                    .await?;
            }
            other => return Err(DispatchError::NoSuchCommand(other.to_string())),
        }
        io.stdout.flush().await?;
        Ok(0)
    }
}
