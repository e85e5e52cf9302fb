use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use reedline::{DefaultCompleter, DefaultHinter, DefaultPrompt, Reedline, Signal};
use tracing::{info, warn};

use crate::chat::{FunctionRegistry, SessionRegistry};
use crate::config::Config;
use crate::invoke::{Generation, InferenceBackend, Orchestrator};
use crate::provider::LocalBackend;
use crate::types::{ChatMessage, ChatRole, ChatSession, Fragment, InvocationOptions};

/// Print usage
fn print_help() {
    println!("💬 parlor - local chat sessions over Ollama");
    println!();
    println!("Usage: parlor <command>");
    println!();
    println!("Commands:");
    println!("  agent               interactive chat");
    println!("  onboard             write the config file and finish setup");
    println!("  models              list installed models");
    println!("  models pull <name>  download a model");
    println!("  models rm <name>    delete a model");
    println!("  providers           list model providers");
    println!("  help                show this help");
    println!();
    print_chat_help();
}

fn print_chat_help() {
    println!("Chat commands:");
    println!("  /new [title]        start a new session");
    println!("  /list               list sessions, newest first");
    println!("  /switch <id>        switch session (id prefix is enough)");
    println!("  /rename <title>     rename the active session");
    println!("  /delete [id]        delete a session (default: active)");
    println!("  /clear              clear the active transcript");
    println!("  /undo               drop the last message");
    println!("  /functions          list callable functions");
    println!("  /enable <name>      allow the model to call a function");
    println!("  /disable <name>     stop offering a function");
    println!("  /attach <path>      ground the next prompts on a file");
    println!("  /detach             forget attached files");
    println!("  /model <name>       switch model");
    println!("  /quit               exit");
    println!();
    println!("Ctrl-C while a reply is streaming stops the model.");
    println!();
}

/// A line typed at the chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Prompt(String),
    New(Option<String>),
    List,
    Switch(String),
    Rename(String),
    Delete(Option<String>),
    Clear,
    Undo,
    Functions,
    Enable(String),
    Disable(String),
    Attach(PathBuf),
    Detach,
    Model(String),
    Help,
    Quit,
    Unknown(String),
}

/// `None` for blank input.
fn parse_command(input: &str) -> Option<Command> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if !input.starts_with('/') {
        return Some(Command::Prompt(input.to_string()));
    }

    let (cmd, rest) = match input.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (input, ""),
    };
    let arg = (!rest.is_empty()).then(|| rest.to_string());

    let command = match (cmd.to_lowercase().as_str(), arg) {
        ("/quit" | "/exit", _) => Command::Quit,
        ("/help" | "/h", _) => Command::Help,
        ("/new", title) => Command::New(title),
        ("/list" | "/ls", _) => Command::List,
        ("/switch", Some(id)) => Command::Switch(id),
        ("/rename", Some(title)) => Command::Rename(title),
        ("/delete" | "/rm", id) => Command::Delete(id),
        ("/clear", _) => Command::Clear,
        ("/undo", _) => Command::Undo,
        ("/functions" | "/fn", _) => Command::Functions,
        ("/enable", Some(name)) => Command::Enable(name),
        ("/disable", Some(name)) => Command::Disable(name),
        ("/attach", Some(path)) => Command::Attach(PathBuf::from(path)),
        ("/detach", _) => Command::Detach,
        ("/model", Some(name)) => Command::Model(name),
        _ => Command::Unknown(input.to_string()),
    };
    Some(command)
}

/// Resolve a full or abbreviated session id. Ambiguous prefixes fail.
fn resolve_session<'a>(sessions: &'a SessionRegistry, prefix: &str) -> Result<&'a ChatSession> {
    if let Some(session) = sessions.session(prefix) {
        return Ok(session);
    }
    let matches: Vec<&ChatSession> = sessions
        .sorted_sessions()
        .into_iter()
        .filter(|s| s.id().starts_with(prefix))
        .collect();
    match matches.as_slice() {
        [session] => Ok(*session),
        [] => bail!("no session matches '{}'", prefix),
        _ => bail!("'{}' matches {} sessions", prefix, matches.len()),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Interactive chat state: sessions, catalog and per-run settings.
struct ChatShell {
    config: Config,
    orchestrator: Orchestrator,
    sessions: SessionRegistry,
    functions: FunctionRegistry,
    attachments: Vec<PathBuf>,
}

impl ChatShell {
    async fn start(config: Config, backend: Arc<dyn InferenceBackend>) -> Self {
        let orchestrator = Orchestrator::new(backend, config.retrieval.clone());

        let mut functions = FunctionRegistry::new();
        if orchestrator.fetch_available_functions(&mut functions).await.is_ok() {
            for name in &config.invocation.enabled_functions {
                if !functions.set_enabled(name, true) {
                    warn!(function = %name, "configured function is not available");
                }
            }
        }

        let mut sessions = SessionRegistry::new();
        sessions.ensure_default_session();

        ChatShell {
            config,
            orchestrator,
            sessions,
            functions,
            attachments: Vec::new(),
        }
    }

    /// Options for the next run, with the live function toggles applied.
    fn run_options(&self) -> InvocationOptions {
        InvocationOptions {
            enabled_functions: self.functions.enabled_names(),
            ..self.config.invocation.clone()
        }
    }

    /// Returns false when the shell should exit.
    async fn handle(&mut self, command: Command) -> Result<bool> {
        match command {
            Command::Quit => return Ok(false),
            Command::Help => print_chat_help(),
            Command::Prompt(prompt) => {
                self.ask(&prompt).await?;
            }
            Command::New(title) => {
                let id = self.sessions.create_session(title.as_deref());
                println!("✅ new session {}\n", short_id(&id));
            }
            Command::List => self.list_sessions(),
            Command::Switch(prefix) => {
                let id = resolve_session(&self.sessions, &prefix)?.id().to_string();
                self.sessions.select_session(&id);
                self.show_active();
            }
            Command::Rename(title) => {
                let id = self.active_id()?;
                self.sessions.rename_session(&id, &title);
                println!("✅ renamed to '{}'\n", title);
            }
            Command::Delete(prefix) => {
                let id = match prefix {
                    Some(prefix) => resolve_session(&self.sessions, &prefix)?.id().to_string(),
                    None => self.active_id()?,
                };
                self.sessions.delete_session(&id);
                println!("🗑  deleted {}", short_id(&id));
                // keep a session to type into
                self.sessions.ensure_default_session();
                self.show_active();
            }
            Command::Clear => {
                self.sessions.clear_active_messages();
                println!("✅ transcript cleared\n");
            }
            Command::Undo => {
                let id = self.active_id()?;
                self.sessions.remove_last_message(&id);
                println!("↩️  last message removed\n");
            }
            Command::Functions => self.list_functions(),
            Command::Enable(name) => self.toggle_function(&name, true)?,
            Command::Disable(name) => self.toggle_function(&name, false)?,
            Command::Attach(path) => {
                if !path.is_file() {
                    bail!("not a file: {}", path.display());
                }
                println!("📎 attached {}\n", path.display());
                self.attachments.push(path);
            }
            Command::Detach => {
                self.attachments.clear();
                println!("📎 attachments cleared\n");
            }
            Command::Model(name) => {
                println!("🤖 model: {}\n", name);
                self.config.backend.model = name;
            }
            Command::Unknown(input) => {
                println!("❌ unknown command: {}", input);
                println!("type /help for the command list\n");
            }
        }
        Ok(true)
    }

    fn active_id(&self) -> Result<String> {
        self.sessions
            .active_session_id()
            .map(str::to_string)
            .context("no active session")
    }

    fn show_active(&self) {
        if let Some(session) = self.sessions.active_session() {
            println!(
                "📝 {} - {} ({} messages)\n",
                short_id(session.id()),
                session.title,
                session.messages.len()
            );
        }
    }

    fn list_sessions(&self) {
        let active = self.sessions.active_session_id();
        println!("📋 sessions:");
        for session in self.sessions.sorted_sessions() {
            let marker = if Some(session.id()) == active { "*" } else { " " };
            println!(
                "{} {} - {}  [{} | {} messages]",
                marker,
                short_id(session.id()),
                session.title,
                session.created_at().format("%Y-%m-%d %H:%M"),
                session.messages.len()
            );
        }
        println!();
    }

    fn list_functions(&self) {
        if self.functions.is_empty() {
            println!("📭 no functions available\n");
            return;
        }
        println!("🔧 functions:");
        for function in self.functions.list() {
            let mark = if function.enabled { "on " } else { "off" };
            println!(
                "  [{}] {} - {}",
                mark,
                function.name,
                function.description.as_deref().unwrap_or("")
            );
        }
        println!();
    }

    fn toggle_function(&mut self, name: &str, enabled: bool) -> Result<()> {
        if !self.functions.set_enabled(name, enabled) {
            bail!("unknown function: {}", name);
        }
        let state = if enabled { "enabled" } else { "disabled" };
        println!("🔧 {} {}\n", name, state);
        Ok(())
    }

    /// Add the prompt to the transcript, start a generation and stream it.
    /// Returns true when the reply was cut short by a stop.
    async fn ask(&mut self, prompt: &str) -> Result<bool> {
        let session_id = self.active_id()?;
        self.sessions.add_message(ChatMessage::user(prompt));

        let options = self.run_options();
        let provider = self.config.backend.provider.clone();
        let model = self.config.backend.model.clone();

        let generation = match self
            .orchestrator
            .run_model(&self.sessions, &provider, &model, prompt, &options, &self.attachments)
            .await
        {
            Ok(generation) => generation,
            Err(e) => {
                self.sessions.remove_last_message(&session_id);
                return Err(e).context("generation did not start");
            }
        };

        Ok(self.stream(generation, &provider, &model, prompt, &options).await)
    }

    async fn stream(
        &mut self,
        mut generation: Generation,
        provider: &str,
        model: &str,
        prompt: &str,
        options: &InvocationOptions,
    ) -> bool {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut stop_requested = false;
        let mut last_role: Option<ChatRole> = None;

        loop {
            tokio::select! {
                fragment = generation.next() => match fragment {
                    Some(fragment) => {
                        print_fragment(&fragment, last_role);
                        last_role = Some(fragment.role);
                        self.sessions.apply_fragment(&fragment);
                    }
                    None => break,
                },
                _ = &mut ctrl_c, if !stop_requested => {
                    stop_requested = true;
                    println!("\n⏹  stopping...");
                    if let Err(e) = self.orchestrator.stop_model(provider, model, prompt, options).await {
                        println!("❌ stop failed: {}", e);
                    }
                }
            }
        }

        let stopped = generation.stopped();
        if stopped {
            println!("\n⏹  stopped");
        } else if last_role.is_none() && !stop_requested {
            println!("🤖 (no reply)");
        }
        println!("\n");
        stopped
    }
}

fn print_fragment(fragment: &Fragment, previous: Option<ChatRole>) {
    match fragment.role {
        ChatRole::Assistant => {
            if previous != Some(ChatRole::Assistant) {
                print!("🤖 ");
            }
            print!("{}", fragment.content);
        }
        ChatRole::Tool => {
            if previous.is_some() {
                println!();
            }
            let id = fragment.tool_call_id.as_deref().unwrap_or("?");
            let preview: String = fragment.content.chars().take(200).collect();
            println!("🔧 {}: {}", id, preview);
        }
        ChatRole::User => println!("👤 {}", fragment.content),
    }
    let _ = std::io::stdout().flush();
}

/// Onboard: write the config file and mark setup as done
fn run_onboard() -> Result<()> {
    let path = Config::default_path();
    let mut config = Config::load(&path)?;
    config.app.setup_completed = true;
    config.save(&path).context("failed to save config")?;

    println!("✅ config saved: {}", path.display());
    println!("   backend: {} ({})", config.backend.base_url, config.backend.provider);
    println!("   model:   {}", config.backend.model);
    println!();
    println!("🎉 setup complete, run 'parlor agent' to start chatting");
    Ok(())
}

fn build_orchestrator(config: &Config) -> Orchestrator {
    Orchestrator::new(
        Arc::new(LocalBackend::from_config(config)),
        config.retrieval.clone(),
    )
}

/// Models: list, pull or delete by name
async fn run_models(args: &[String]) -> Result<()> {
    let config = Config::load_default()?;
    let orchestrator = build_orchestrator(&config);
    let provider = &config.backend.provider;

    match args.first().map(String::as_str) {
        None | Some("list") => {
            let models = orchestrator.installed_models(provider).await?;
            if models.is_empty() {
                println!("📭 no models installed");
            }
            for model in models {
                let marker = if model == config.backend.model { "*" } else { " " };
                println!("{} {}", marker, model);
            }
        }
        Some("pull") => {
            let model = args.get(1).context("usage: parlor models pull <name>")?;
            println!("⬇️  pulling {}...", model);
            orchestrator.download_model(provider, model, None).await?;
            println!("✅ {} ready", model);
        }
        Some("rm" | "delete") => {
            let model = args.get(1).context("usage: parlor models rm <name>")?;
            orchestrator.delete_model(provider, model).await?;
            println!("🗑  {} deleted", model);
        }
        Some(other) => bail!("unknown models subcommand: {}", other),
    }
    Ok(())
}

/// Providers: list what the backend can route to
async fn run_providers() -> Result<()> {
    let config = Config::load_default()?;
    let orchestrator = build_orchestrator(&config);

    for name in orchestrator.available_providers().await? {
        let marker = if name == config.backend.provider { "*" } else { " " };
        println!("{} {}", marker, name);
    }
    Ok(())
}

/// Agent: interactive chat
async fn run_agent() -> Result<()> {
    let config = Config::load_default()?;
    if !config.app.setup_completed {
        println!("👋 setup is not finished, run 'parlor onboard' first");
        return Ok(());
    }

    println!("💬 parlor");
    println!("🤖 model: {} via {}", config.backend.model, config.backend.provider);
    println!("type /help for commands, /quit to exit\n");
    info!(base_url = %config.backend.base_url, "starting chat shell");

    let backend: Arc<dyn InferenceBackend> = Arc::new(LocalBackend::from_config(&config));
    let mut shell = ChatShell::start(config, backend).await;
    shell.show_active();

    let completer = DefaultCompleter::default();
    let hinter = DefaultHinter::default();
    let prompt = DefaultPrompt::default();

    let mut line_editor = Reedline::create()
        .with_hinter(Box::new(hinter))
        .with_completer(Box::new(completer));

    loop {
        let sig = line_editor.read_line(&prompt)?;

        match sig {
            Signal::Success(buffer) => {
                let Some(command) = parse_command(&buffer) else {
                    continue;
                };
                match shell.handle(command).await {
                    Ok(true) => {}
                    Ok(false) => {
                        println!("👋 bye");
                        break;
                    }
                    Err(e) => println!("❌ {:#}\n", e),
                }
            }
            Signal::CtrlD => {
                println!("\n👋 bye");
                break;
            }
            Signal::CtrlC => {
                println!("\ntype /quit to exit");
            }
        }
    }

    Ok(())
}

/// Entry point
pub async fn run_cli() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let command = args[1].to_lowercase();

    match command.as_str() {
        "agent" | "a" => run_agent().await,
        "onboard" => run_onboard(),
        "models" | "m" => run_models(&args[2..]).await,
        "providers" | "p" => run_providers().await,
        "help" | "-h" | "--help" | "h" => {
            print_help();
            Ok(())
        }
        _ => {
            eprintln!("❌ unknown command: {}", command);
            eprintln!();
            eprintln!("run 'parlor help' for usage");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error;
    use crate::invoke::{RetrievalRequest, RunRequest, StopRequest};
    use crate::types::FunctionDefinition;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn parses_prompts_and_slash_commands() {
        assert_eq!(parse_command("   "), None);
        assert_eq!(parse_command(" hi there "), Some(Command::Prompt("hi there".to_string())));
        assert_eq!(parse_command("/new"), Some(Command::New(None)));
        assert_eq!(
            parse_command("/new Trip plans"),
            Some(Command::New(Some("Trip plans".to_string())))
        );
        assert_eq!(parse_command("/QUIT"), Some(Command::Quit));
        assert_eq!(parse_command("/delete"), Some(Command::Delete(None)));
        assert_eq!(
            parse_command("/attach notes.txt"),
            Some(Command::Attach(PathBuf::from("notes.txt")))
        );
    }

    #[test]
    fn commands_missing_arguments_are_unknown() {
        assert_eq!(parse_command("/switch"), Some(Command::Unknown("/switch".to_string())));
        assert_eq!(parse_command("/bogus x"), Some(Command::Unknown("/bogus x".to_string())));
    }

    #[test]
    fn session_prefix_must_be_unique() {
        let mut sessions = SessionRegistry::new();
        let a = sessions.create_session(Some("A"));
        let b = sessions.create_session(Some("B"));

        assert_eq!(resolve_session(&sessions, &a).unwrap().id(), a);
        assert_eq!(resolve_session(&sessions, &b[..12]).unwrap().id(), b);
        assert!(resolve_session(&sessions, "").is_err());
        assert!(resolve_session(&sessions, "zzzz").is_err());
    }

    /// Echoes the last message back and records stop calls.
    #[derive(Default)]
    struct EchoBackend {
        runs: Mutex<Vec<RunRequest>>,
        fail_runs: bool,
        stop_runs: bool,
    }

    #[async_trait]
    impl InferenceBackend for EchoBackend {
        async fn available_providers(&self) -> error::Result<Vec<String>> {
            Ok(vec!["ollama".to_string()])
        }

        async fn delete_model(&self, _provider: &str, _model: &str) -> error::Result<()> {
            Ok(())
        }

        async fn installed_models(&self, _provider: &str) -> error::Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn download_model(&self, _p: &str, _m: &str, _u: Option<&str>) -> error::Result<()> {
            Ok(())
        }

        async fn available_functions(&self) -> error::Result<Vec<FunctionDefinition>> {
            Ok(vec![FunctionDefinition::new("get_unix_time", "now")])
        }

        async fn retrieve_context(&self, _request: RetrievalRequest) -> error::Result<String> {
            Ok(String::new())
        }

        async fn run_model(&self, request: RunRequest) -> error::Result<Generation> {
            if self.fail_runs {
                return Err(error::ChatError::Backend("offline".to_string()));
            }
            let (sender, generation) = Generation::channel(request.session_id.clone());
            let echo = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            self.runs.lock().unwrap().push(request);
            sender.assistant(echo);
            if self.stop_runs {
                sender.mark_stopped();
            }
            Ok(generation)
        }

        async fn stop_model(&self, _request: StopRequest) -> error::Result<()> {
            Ok(())
        }
    }

    async fn shell(backend: EchoBackend) -> (ChatShell, Arc<EchoBackend>) {
        let backend = Arc::new(backend);
        let mut config = Config::default();
        config.invocation.enabled_functions = vec!["get_unix_time".to_string()];
        (ChatShell::start(config, backend.clone()).await, backend)
    }

    #[tokio::test]
    async fn start_applies_configured_function_toggles() {
        let (shell, _) = shell(EchoBackend::default()).await;
        assert_eq!(shell.functions.enabled_names(), vec!["get_unix_time"]);
        assert_eq!(shell.sessions.len(), 1);
    }

    #[tokio::test]
    async fn prompt_and_reply_land_in_active_session() {
        let (mut shell, backend) = shell(EchoBackend::default()).await;
        assert!(shell.handle(Command::Prompt("ping".to_string())).await.unwrap());

        let messages = shell.sessions.active_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], ChatMessage::assistant("ping"));

        let runs = backend.runs.lock().unwrap();
        assert_eq!(runs[0].options.enabled_functions, vec!["get_unix_time"]);
        assert!(!runs[0].options.streaming_enabled);
    }

    #[tokio::test]
    async fn failed_dispatch_rolls_back_the_prompt() {
        let (mut shell, _) = shell(EchoBackend {
            fail_runs: true,
            ..Default::default()
        })
        .await;
        assert!(shell.handle(Command::Prompt("ping".to_string())).await.is_err());
        assert!(shell.sessions.active_messages().is_empty());
    }

    #[tokio::test]
    async fn deleting_the_last_session_leaves_a_fresh_one() {
        let (mut shell, _) = shell(EchoBackend::default()).await;
        let before = shell.active_id().unwrap();
        shell.handle(Command::Delete(None)).await.unwrap();

        assert_eq!(shell.sessions.len(), 1);
        assert_ne!(shell.active_id().unwrap(), before);
        assert!(!shell.handle(Command::Quit).await.unwrap());
    }

    #[tokio::test]
    async fn stopped_reply_is_reported_and_kept() {
        let (mut stopped, _) = shell(EchoBackend {
            stop_runs: true,
            ..Default::default()
        })
        .await;
        assert!(stopped.ask("ping").await.unwrap());
        assert_eq!(stopped.sessions.active_messages().len(), 2);

        let (mut finished, _) = shell(EchoBackend::default()).await;
        assert!(!finished.ask("ping").await.unwrap());
    }
}
