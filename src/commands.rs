use crate::engine::{format_elapsed, Operation, StopOutcome, Timer, TimerId, WorkItemId};
use crate::registry::TimerRegistry;
use chrono::{DateTime, Local, Utc};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

pub const HELP: &str = "\
commands:
  new                          create a timer
  select <timer> <task-id>     bind an idle timer to a task
  describe <timer> <text>      set the description
  start|pause|resume <timer>
  save <timer>                 stop and commit to the ledger
  discard <timer>              stop without saving
  remove <timer>
  list                         show all timers
  active                       is anything running or paused
  help | quit
<timer> is a full id, a unique id prefix, or a 1-based list index";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New,
    Select { timer: String, task: i64 },
    Describe { timer: String, text: String },
    Start(String),
    Pause(String),
    Resume(String),
    Save(String),
    Discard(String),
    Remove(String),
    List,
    Active,
    Help,
    Quit,
}

fn timer_arg(verb: &str, arg: Option<&str>) -> Result<String, String> {
    arg.map(str::to_string)
        .ok_or_else(|| format!("usage: {} <timer>", verb))
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        let mut args = rest.splitn(2, char::is_whitespace);
        let first = args.next().filter(|s| !s.is_empty());
        let tail = args.next().map(str::trim).unwrap_or("");

        match verb.to_ascii_lowercase().as_str() {
            "new" => Ok(Command::New),
            "select" => {
                let timer = timer_arg("select", first)?;
                let task = tail
                    .parse::<i64>()
                    .map_err(|_| "usage: select <timer> <task-id>".to_string())?;
                Ok(Command::Select { timer, task })
            }
            "describe" => Ok(Command::Describe {
                timer: timer_arg("describe", first)?,
                text: tail.to_string(),
            }),
            "start" => Ok(Command::Start(timer_arg("start", first)?)),
            "pause" => Ok(Command::Pause(timer_arg("pause", first)?)),
            "resume" => Ok(Command::Resume(timer_arg("resume", first)?)),
            "save" | "stop" => Ok(Command::Save(timer_arg("save", first)?)),
            "discard" | "reset" => Ok(Command::Discard(timer_arg("discard", first)?)),
            "remove" | "rm" => Ok(Command::Remove(timer_arg("remove", first)?)),
            "list" | "ls" => Ok(Command::List),
            "active" => Ok(Command::Active),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            "" => Err("empty command".to_string()),
            other => Err(format!("unknown command '{}', try 'help'", other)),
        }
    }
}

/// Full id, unique id prefix, or 1-based position in `list`
pub fn resolve_timer(registry: &TimerRegistry, arg: &str) -> Result<TimerId, String> {
    let timers = registry.list().map_err(|e| e.to_string())?;

    if let Some(id) = TimerId::parse(arg) {
        return Ok(id);
    }
    if let Ok(index) = arg.parse::<usize>() {
        if let Some(timer) = index.checked_sub(1).and_then(|i| timers.get(i)) {
            return Ok(timer.id().clone());
        }
    }

    let needle = arg.to_ascii_lowercase();
    let matches: Vec<&Timer> = timers
        .iter()
        .filter(|t| t.id().to_string().starts_with(&needle))
        .collect();
    match matches.as_slice() {
        [one] => Ok(one.id().clone()),
        [] => Err(format!("no timer matches '{}'", arg)),
        _ => Err(format!("'{}' is ambiguous ({} timers match)", arg, matches.len())),
    }
}

/// Local `HH:MM` of the current entry's start, `--:--` when idle
pub fn format_start_time(started_at: Option<DateTime<Utc>>) -> String {
    started_at
        .map(|t| t.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}

pub fn describe_timer(index: usize, timer: &Timer) -> String {
    let id = timer.id().to_string();
    let task = timer
        .work_item_id()
        .map(|w| format!("task {}", w))
        .unwrap_or_else(|| "no task".to_string());
    let mut line = format!(
        "#{} {} {:<7} {:<10} {} since {}",
        index,
        &id[..8],
        timer.status().as_str(),
        task,
        format_elapsed(timer.elapsed_seconds()),
        format_start_time(timer.started_at()),
    );
    if !timer.description().is_empty() {
        line.push_str(&format!(" \"{}\"", timer.description()));
    }
    line
}

fn short(id: &TimerId) -> String {
    id.to_string()[..8].to_string()
}

fn mutate(registry: &TimerRegistry, arg: &str, operation: Operation) -> Result<String, String> {
    let id = resolve_timer(registry, arg)?;
    let verb = operation.name();
    let timer = registry.mutate(&id, operation).map_err(|e| e.to_string())?;
    Ok(format!(
        "{} {}: {} {}",
        verb,
        short(&id),
        timer.status().as_str(),
        format_elapsed(timer.elapsed_seconds())
    ))
}

/// Run one command. `save` is spawned so the console stays responsive while
/// the ledger write is outstanding; its outcome is printed when it lands.
pub async fn execute(registry: &Arc<TimerRegistry>, command: Command) -> Result<String, String> {
    match command {
        Command::New => {
            let id = registry.create_timer().map_err(|e| e.to_string())?;
            Ok(format!("created timer {} (#{})", short(&id), registry.len()))
        }
        Command::Select { timer, task } => mutate(registry, &timer, Operation::Select(WorkItemId(task))),
        Command::Describe { timer, text } => mutate(registry, &timer, Operation::Describe(text)),
        Command::Start(timer) => mutate(registry, &timer, Operation::Start),
        Command::Pause(timer) => mutate(registry, &timer, Operation::Pause),
        Command::Resume(timer) => mutate(registry, &timer, Operation::Resume),
        Command::Discard(timer) => {
            let id = resolve_timer(registry, &timer)?;
            match registry.stop(&id, false).await.map_err(|e| e.to_string())? {
                StopOutcome::Discarded { elapsed_seconds } => Ok(format!(
                    "discarded {} ({} dropped)",
                    short(&id),
                    format_elapsed(elapsed_seconds)
                )),
                other => Ok(format!("{}: {:?}", short(&id), other)),
            }
        }
        Command::Save(timer) => {
            let id = resolve_timer(registry, &timer)?;
            // Surface precondition errors synchronously
            let current = registry.get(&id).map_err(|e| e.to_string())?;
            if !current.is_active() {
                return Err(format!("timer {} is not running or paused", short(&id)));
            }
            let registry = registry.clone();
            let label = short(&id);
            tokio::spawn(async move {
                match registry.stop(&id, true).await {
                    Ok(StopOutcome::Saved {
                        entry_id,
                        elapsed_seconds,
                    }) => println!(
                        "saved {} as entry {} ({})",
                        label,
                        entry_id,
                        format_elapsed(elapsed_seconds)
                    ),
                    Ok(StopOutcome::Detached { entry_id }) => {
                        println!("timer {} was removed while saving ({:?})", label, entry_id)
                    }
                    Ok(other) => println!("{}: {:?}", label, other),
                    Err(e) => println!("save {} failed: {} (timer kept, retry or discard)", label, e),
                }
            });
            Ok(format!("saving {}...", short(current.id())))
        }
        Command::Remove(timer) => {
            let id = resolve_timer(registry, &timer)?;
            registry.remove_timer(&id).map_err(|e| e.to_string())?;
            Ok(format!("removed {}", short(&id)))
        }
        Command::List => {
            let timers = registry.list().map_err(|e| e.to_string())?;
            if timers.is_empty() {
                return Ok("no timers".to_string());
            }
            Ok(timers
                .iter()
                .enumerate()
                .map(|(i, t)| describe_timer(i + 1, t))
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Command::Active => Ok(if registry.any_timer_active() {
            "active".to_string()
        } else {
            "idle".to_string()
        }),
        Command::Help => Ok(HELP.to_string()),
        Command::Quit => Ok("bye".to_string()),
    }
}

/// Read commands from stdin until `quit` or EOF
pub async fn run_console(registry: Arc<TimerRegistry>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("worktimer ready, type 'help'");
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("[CONSOLE] stdin closed");
                break;
            }
            Err(e) => {
                error!("[CONSOLE] Failed to read stdin: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        debug!("[CONSOLE] {:?}", command);
        let quit = command == Command::Quit;
        match execute(&registry, command).await {
            Ok(reply) => println!("{}", reply),
            Err(e) => {
                warn!("[CONSOLE] Command failed: {}", e);
                println!("error: {}", e);
            }
        }
        if quit {
            break;
        }
    }
}
