//! `threadline chat`: terminal chat session.

use std::io::{BufRead, Write};

use threadline_bridge::SchedulerHandle;
use threadline_core::message::ThreadId;
use threadline_session::{DisplayMessage, Session, SessionError, ToolIndicator, TurnRenderer};

const HELP: &str = "\
Commands:
  /new              Start a new conversation
  /threads          List conversations (pinned first)
  /open N           Switch to conversation N
  /rename N TITLE   Rename conversation N
  /pin N            Pin conversation N
  /unpin N          Unpin conversation N
  /delete N         Remove conversation N from this session
  /temp on|off      Toggle temporary chat (nothing is saved)
  /help             Show this help
  /quit             Exit";

/// One line of REPL input.
#[derive(Debug, PartialEq, Eq)]
pub enum ReplCommand {
    Say(String),
    New,
    Threads,
    Open(usize),
    Rename(usize, String),
    Pin(usize),
    Unpin(usize),
    Delete(usize),
    Temporary(bool),
    Help,
    Quit,
    Empty,
    Invalid(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Say(line.to_string());
        };

        let mut parts = rest.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).unwrap_or_default();

        let index = |cmd: fn(usize) -> Self| match arg.parse::<usize>() {
            Ok(n) if n > 0 => cmd(n),
            _ => Self::Invalid(format!("/{name} needs a conversation number")),
        };

        match name {
            "new" => Self::New,
            "threads" | "list" => Self::Threads,
            "open" => index(Self::Open),
            "pin" => index(Self::Pin),
            "unpin" => index(Self::Unpin),
            "delete" => index(Self::Delete),
            "rename" => {
                let mut words = arg.splitn(2, char::is_whitespace);
                let n = words.next().and_then(|w| w.parse::<usize>().ok());
                let title = words.next().map(str::trim).unwrap_or_default();
                match n {
                    Some(n) if n > 0 && !title.is_empty() => Self::Rename(n, title.to_string()),
                    _ => Self::Invalid("usage: /rename N TITLE".into()),
                }
            }
            "temp" => match arg {
                "on" => Self::Temporary(true),
                "off" => Self::Temporary(false),
                _ => Self::Invalid("usage: /temp on|off".into()),
            },
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => Self::Invalid(format!("Unknown command: /{other} (try /help)")),
        }
    }
}

/// Prints a turn to stdout as it streams.
struct StdoutRenderer {
    streaming: bool,
}

impl StdoutRenderer {
    fn end_line(&mut self) {
        if self.streaming {
            println!();
            self.streaming = false;
        }
    }
}

impl TurnRenderer for StdoutRenderer {
    fn on_text_delta(&mut self, delta: &str, _accumulated: &str) {
        if !self.streaming {
            print!("\nassistant> ");
            self.streaming = true;
        }
        print!("{delta}");
        let _ = std::io::stdout().flush();
    }

    fn on_tool_status(&mut self, indicator: &ToolIndicator) {
        self.end_line();
        println!("  [{}]", indicator.label());
    }

    fn on_assistant_message(&mut self, message: &DisplayMessage) {
        if !self.streaming && !message.content.is_empty() {
            print!("\nassistant> {}", message.content);
            self.streaming = true;
        }
        self.end_line();
        if let Some(error) = &message.error {
            println!("  [incomplete: {error}]");
        }
    }
}

pub fn run(temporary: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config()?;
    if temporary {
        config.session.start_temporary = true;
    }

    let bridge = SchedulerHandle::start("threadline-bridge")?;
    let agent = super::build_agent(&bridge, &config)?;
    let mut session = Session::open(bridge.clone(), agent, &config.session);

    println!("Threadline chat ({}). Type /help for commands.", config.active_model());
    print_threads(&session);

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("\n{}> ", if session.is_temporary() { "temp" } else { "you" });
        std::io::stdout().flush()?;

        let Some(line) = lines.next() else { break };
        let command = ReplCommand::parse(&line?);
        if command == ReplCommand::Quit {
            break;
        }
        if let Err(e) = execute(&mut session, command) {
            println!("  {e}");
        }
    }

    bridge.shutdown();
    Ok(())
}

fn execute(session: &mut Session, command: ReplCommand) -> Result<(), SessionError> {
    match command {
        ReplCommand::Say(text) => {
            let mut renderer = StdoutRenderer { streaming: false };
            session.submit_turn(&text, &mut renderer)?;
        }
        ReplCommand::New => {
            session.new_thread()?;
            println!("  Started a new conversation.");
        }
        ReplCommand::Threads => print_threads(session),
        ReplCommand::Open(n) => {
            let id = nth_thread(session, n)?;
            session.switch_thread(&id)?;
            println!("  Opened \"{}\".", session.title(&id));
            for message in session.history() {
                println!("  {:?}: {}", message.role, message.content);
            }
        }
        ReplCommand::Rename(n, title) => {
            let id = nth_thread(session, n)?;
            session.rename_thread(&id, &title)?;
            print_threads(session);
        }
        ReplCommand::Pin(n) => {
            let id = nth_thread(session, n)?;
            session.pin_thread(&id)?;
            print_threads(session);
        }
        ReplCommand::Unpin(n) => {
            let id = nth_thread(session, n)?;
            session.unpin_thread(&id)?;
            print_threads(session);
        }
        ReplCommand::Delete(n) => {
            let id = nth_thread(session, n)?;
            session.delete_thread(&id)?;
            print_threads(session);
        }
        ReplCommand::Temporary(on) => {
            session.set_temporary(on)?;
            println!("  {}", session.snapshot().placeholder);
        }
        ReplCommand::Help => println!("{HELP}"),
        ReplCommand::Invalid(reason) => println!("  {reason}"),
        ReplCommand::Empty | ReplCommand::Quit => {}
    }
    Ok(())
}

/// Resolve a 1-based sidebar position.
fn nth_thread(session: &Session, n: usize) -> Result<ThreadId, SessionError> {
    session
        .sidebar()
        .ok_or(SessionError::TemporaryMode)?
        .into_iter()
        .nth(n - 1)
        .map(|entry| entry.thread_id)
        .ok_or_else(|| SessionError::UnknownThread(ThreadId(format!("#{n}"))))
}

fn print_threads(session: &Session) {
    let Some(entries) = session.sidebar() else {
        println!("  (temporary chat: conversations are hidden)");
        return;
    };
    for (i, entry) in entries.iter().enumerate() {
        println!(
            "  {:>2}. {}{}{}",
            i + 1,
            if entry.pinned { "[pinned] " } else { "" },
            entry.title,
            if entry.active { "  <" } else { "" },
        );
    }
}
