//! Interactive console (`--repl`) running next to the scripts.
//!
//! Lines are read on a dedicated thread and handed over through a channel,
//! so a pending read never keeps the runtime from shutting down.

use std::io::Write;

use tokio::sync::mpsc;
use toolbox_core::{ServiceDirectory, ServiceId};

const PROMPT: &str = "toolbox> ";
const HELP: &str = "\
commands:
  services      list registered services
  get <id>      show a service and the script that registered it
  scripts       list scripts and their phase
  phase         show the connection phase
  help          this text
  quit          close the console";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Services,
    Get(ServiceId),
    Scripts,
    Phase,
    Quit,
}

impl Command {
    /// `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };
        let command = match (head, words.next()) {
            ("help", None) => Command::Help,
            ("services", None) => Command::Services,
            ("get", Some(id)) => Command::Get(ServiceId::new(id)),
            ("get", None) => return Err("usage: get <id>".to_string()),
            ("scripts", None) => Command::Scripts,
            ("phase", None) => Command::Phase,
            ("quit" | "exit", None) => Command::Quit,
            _ => return Err(format!("unknown command: {} (try `help`)", line.trim())),
        };
        if words.next().is_some() {
            return Err(format!("too many arguments: {}", line.trim()));
        }
        Ok(Some(command))
    }
}

pub fn execute(command: &Command, services: &ServiceDirectory) -> String {
    match command {
        Command::Help => HELP.to_string(),
        Command::Services => {
            let ids = services.ids();
            if ids.is_empty() {
                "no services registered".to_string()
            } else {
                ids.iter()
                    .map(ServiceId::to_string)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::Get(id) => match services.owner(id.clone()) {
            Some(owner) => format!("{id}: registered by script \"{owner}\""),
            None => format!("service \"{id}\" is not registered"),
        },
        Command::Scripts => services
            .scripts()
            .into_iter()
            .map(|(name, phase)| format!("{name}: {phase}"))
            .collect::<Vec<_>>()
            .join("\n"),
        Command::Phase => services.phase().to_string(),
        Command::Quit => String::new(),
    }
}

/// Forward stdin lines until EOF or until the console goes away.
pub fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Answer commands until `quit` or the end of input.
pub async fn run<W>(
    mut lines: mpsc::Receiver<String>,
    mut output: W,
    services: ServiceDirectory,
) -> std::io::Result<()>
where
    W: Write,
{
    write!(output, "{PROMPT}")?;
    output.flush()?;
    while let Some(line) = lines.recv().await {
        match Command::parse(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => writeln!(output, "{}", execute(&command, &services))?,
            Err(message) => writeln!(output, "{message}")?,
        }
        write!(output, "{PROMPT}")?;
        output.flush()?;
    }
    Ok(())
}
