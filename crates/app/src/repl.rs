//! Interactive loop for working on one opened lab.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use lab_core::model::{TaskKind, TaskNumber, TaskState};
use services::{ActiveLab, LabError, LabEvent, LabLoopService};

use crate::render;

const HELP: &str = "\
Commands:
  show                      print the lab
  choose <task> <option>    select an option by number or text
  type <task> <text>        enter a free-text answer
  submit <task> [answer]    check the given or entered answer
  complete                  finish the lab
  quit                      leave (unsent answers are kept as drafts)
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Show,
    Help,
    Choose { task: TaskNumber, option: String },
    Type { task: TaskNumber, text: String },
    Submit { task: TaskNumber, answer: Option<String> },
    Complete,
    Quit,
}

impl ReplCommand {
    /// Parse one input line. Empty input yields `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let command = match word {
            "" => return Ok(None),
            "show" | "s" => Self::Show,
            "help" | "h" | "?" => Self::Help,
            "complete" => Self::Complete,
            "quit" | "q" | "exit" => Self::Quit,
            "choose" | "c" => {
                let (task, option) = task_and_text(rest)?;
                let option = option.ok_or("usage: choose <task> <option>")?;
                Self::Choose { task, option }
            }
            "type" | "t" => {
                let (task, text) = task_and_text(rest)?;
                Self::Type {
                    task,
                    text: text.unwrap_or_default(),
                }
            }
            "submit" => {
                let (task, answer) = task_and_text(rest)?;
                Self::Submit { task, answer }
            }
            other => return Err(format!("unknown command `{other}`, try `help`")),
        };
        Ok(Some(command))
    }
}

fn task_and_text(input: &str) -> Result<(TaskNumber, Option<String>), String> {
    let (raw, text) = match input.split_once(char::is_whitespace) {
        Some((raw, text)) => (raw, Some(text.trim().to_string())),
        None => (input, None),
    };
    let task = raw
        .parse::<u32>()
        .ok()
        .and_then(TaskNumber::new)
        .ok_or_else(|| format!("`{raw}` is not a task number"))?;
    Ok((task, text.filter(|t| !t.is_empty())))
}

/// An exact option wins; otherwise `1`, `2`, … select by position.
fn resolve_option(kind: &TaskKind, raw: &str) -> String {
    let options = kind.options();
    if options.iter().any(|option| option == raw) {
        return raw.to_string();
    }
    raw.parse::<usize>()
        .ok()
        .and_then(|index| index.checked_sub(1))
        .and_then(|index| options.get(index))
        .cloned()
        .unwrap_or_else(|| raw.to_string())
}

fn unlock_notice(event: &LabEvent) -> Option<String> {
    match event {
        LabEvent::TaskUpdated(change) if change.is_unlock() => {
            Some(format!("task {} is available", change.task))
        }
        _ => None,
    }
}

/// Print unlocks and time sync failures as they happen.
fn spawn_event_printer(lab: &ActiveLab) -> tokio::task::JoinHandle<()> {
    let mut events = lab.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(LabEvent::TimeSyncFailed(message)) => {
                    eprintln!("warning: elapsed time not saved: {message}");
                }
                Ok(event) => {
                    if let Some(notice) = unlock_notice(&event) {
                        println!("{notice}");
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    })
}

pub async fn run(service: &LabLoopService, lab: &mut ActiveLab) -> Result<()> {
    print!("{}", render::session(lab.session()));
    println!("\n{HELP}");

    let printer = spawn_event_printer(lab);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"labdesk> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let command = match ReplCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };
        if command == ReplCommand::Quit {
            break;
        }
        if let Err(err) = execute(service, lab, command).await {
            println!("error: {}", err.user_message());
        }
    }

    printer.abort();
    Ok(())
}

async fn execute(
    service: &LabLoopService,
    lab: &mut ActiveLab,
    command: ReplCommand,
) -> Result<(), LabError> {
    match command {
        ReplCommand::Show => print!("{}", render::session(lab.session())),
        ReplCommand::Help => print!("{HELP}"),
        ReplCommand::Choose { task, option } => {
            let value = lab
                .session()
                .task(task)
                .map_or_else(|| option.clone(), |t| resolve_option(t.kind(), &option));
            service.select_choice(lab, task, &value).await?;
            if let Some(current) = lab.session().task(task) {
                print!("{}", render::task(current));
            }
        }
        ReplCommand::Type { task, text } => {
            service.set_free_text(lab, task, &text).await?;
        }
        ReplCommand::Submit { task, answer } => {
            let outcome = match answer {
                Some(answer) => {
                    let answer = lab
                        .session()
                        .task(task)
                        .map_or_else(|| answer.clone(), |t| resolve_option(t.kind(), &answer));
                    service.submit_answer(lab, task, &answer).await?
                }
                None => service.submit_pending(lab, task).await?,
            };
            let verdict = &outcome.verdict;
            if verdict.is_correct {
                println!("correct, {} pts", verdict.score);
            } else if outcome.state == TaskState::AnsweredIncorrectExhausted {
                println!("incorrect, no attempts left");
            } else {
                println!(
                    "incorrect, attempt {}/{}",
                    verdict.attempts,
                    lab_core::model::MAX_ATTEMPTS
                );
            }
        }
        ReplCommand::Complete => {
            let report = service.complete_lab(lab).await?;
            print!("{}", render::report(&report));
        }
        ReplCommand::Quit => {}
    }
    Ok(())
}
