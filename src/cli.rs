// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{ArgGroup, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use std::path::PathBuf;
use sven_config::AgentMode;

/// Execution mode requested on the command line (§4.11). Mutually exclusive;
/// `--solo` is the default when none is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ModeArg {
    #[default]
    Solo,
    Coop,
    Repl,
}

impl From<ModeArg> for sven_core::ExecutionMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Solo => sven_core::ExecutionMode::Solo,
            ModeArg::Coop => sven_core::ExecutionMode::Coop,
            ModeArg::Repl => sven_core::ExecutionMode::Repl,
        }
    }
}

/// Output verbosity for rendered text (not to be confused with `--output-format`,
/// which selects the machine-readable JSONL/JSON/conversation encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputStyle {
    Minimal,
    #[default]
    Default,
    Verbose,
}

/// Output format for headless / CI runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormatArg {
    /// Full conversation format (## User / ## Sven / ## Tool / ## Tool Result).
    /// Output is valid sven conversation markdown and fully pipeable.
    #[default]
    Conversation,
    /// Structured JSON: title + array of steps with metadata.
    Json,
    /// Compact plain text: only the final agent response for each step.
    Compact,
    /// Full-fidelity JSONL: one JSON record per line (messages, thinking, tool calls).
    Jsonl,
}

#[derive(Parser, Debug)]
#[command(
    name = "sven",
    about = "A headless AI coding agent for the terminal and CI",
    version,
    long_about = None,
)]
#[command(group(
    ArgGroup::new("exec_mode").args(["solo", "coop", "repl"]).multiple(false)
))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional initial prompt or task description
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Run in solo mode (single task, exits when done). Default.
    #[arg(long)]
    pub solo: bool,

    /// Run in coop mode (interactive shortcuts, question tool enabled, stays open).
    #[arg(long)]
    pub coop: bool,

    /// Run in REPL mode (like coop, but never exits after a task completes).
    #[arg(long)]
    pub repl: bool,

    /// Name this session (used for session listing / resuming by name).
    #[arg(long, short = 's', value_name = "NAME")]
    pub session: Option<String>,

    /// Resume a saved session by id (or unique prefix).
    #[arg(long, short = 'r', value_name = "ID")]
    pub resume: Option<String>,

    /// Connect to a running session's watch socket and print events; never writes.
    #[arg(long, short = 'w', value_name = "ID")]
    pub watch: Option<String>,

    /// List known sessions with status and exit.
    #[arg(long, short = 'l')]
    pub list: bool,

    /// Additional filesystem path the agent may write to (repeatable).
    #[arg(long = "allow-path", short = 'P', value_name = "PATH")]
    pub allow_path: Vec<PathBuf>,

    /// Disable the path guard entirely — any path may be written to.
    #[arg(long = "wild", short = 'W')]
    pub wild: bool,

    /// Working directory for the session (default: current directory).
    #[arg(long = "workdir", short = 'C')]
    pub workdir: Option<PathBuf>,

    /// Agent profile to run.
    #[arg(long, short = 'a', value_enum, default_value = "general")]
    pub agent: AgentProfile,

    /// Maximum number of agentic turns before the loop force-terminates.
    #[arg(long, short = 'n', value_name = "N")]
    pub max_steps: Option<u32>,

    /// Model to use, e.g. "gpt-4o" or "anthropic/claude-opus-4-5"
    #[arg(long, short = 'm', env = "SVEN_MODEL")]
    pub model: Option<String>,

    /// Override the model API base URL.
    #[arg(long, env = "SVEN_API_BASE")]
    pub base_url: Option<String>,

    /// Override the model API key.
    #[arg(long, env = "SVEN_API_KEY")]
    pub api_key: Option<String>,

    /// Disable ANSI color in rendered output.
    #[arg(long, env = "NO_COLOR")]
    pub no_color: bool,

    /// Rendered-text verbosity.
    #[arg(long, value_enum, default_value = "default")]
    pub output_style: OutputStyle,

    /// Emit a single JSON object summarizing the run instead of rendered text.
    #[arg(long)]
    pub json: bool,

    /// Path to a markdown file to use as input
    #[arg(long, short = 'f')]
    pub file: Option<PathBuf>,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Output format for the run record (conversation | json | compact | jsonl)
    #[arg(long, value_enum, default_value = "conversation")]
    pub output_format: OutputFormatArg,

    /// Directory to write run artifacts (full conversation, per-step files).
    #[arg(long)]
    pub artifacts_dir: Option<PathBuf>,

    /// Template variable in KEY=VALUE form, substituted as {{KEY}} in workflow steps.
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// Per-step timeout in seconds (0 = no limit).
    #[arg(long, value_name = "SECS")]
    pub step_timeout: Option<u64>,

    /// Total run timeout in seconds (0 = no limit).
    #[arg(long, value_name = "SECS")]
    pub run_timeout: Option<u64>,

    /// Parse and validate the workflow file, then exit without calling the model.
    #[arg(long)]
    pub dry_run: bool,

    /// Override the system prompt by reading from a file.
    #[arg(long, value_name = "PATH")]
    pub system_prompt_file: Option<PathBuf>,

    /// Append text to the default system prompt.
    #[arg(long, value_name = "TEXT")]
    pub append_system_prompt: Option<String>,

    /// Write the final agent response to a file after the run completes.
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output_last_message: Option<PathBuf>,

    /// Load conversation history from a JSONL file before running.
    #[arg(long, value_name = "PATH", conflicts_with = "jsonl")]
    pub load_jsonl: Option<PathBuf>,

    /// Write the output JSONL to this path after the run.
    #[arg(long, value_name = "PATH", conflicts_with = "jsonl")]
    pub output_jsonl: Option<PathBuf>,

    /// Combined load + output JSONL: --load-jsonl PATH --output-jsonl PATH.
    #[arg(long, value_name = "PATH")]
    pub jsonl: Option<PathBuf>,

    /// Replay all tool calls in the loaded JSONL conversation with fresh results
    /// before submitting to the model.
    #[arg(long)]
    pub rerun_toolcalls: bool,

    /// Regenerate the system prompt instead of reusing the one stored in JSONL.
    #[arg(long)]
    pub regen_system_prompt: bool,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// `-a/--agent` profile selection (§4.11 agent types).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AgentProfile {
    #[default]
    General,
    Plan,
    Explore,
    Compaction,
}

impl AgentProfile {
    /// Maps the agent-type flag onto the tool-permission mode it implies.
    /// `general` and `compaction` both run with full read/write tools;
    /// `explore` is read-only; `plan` produces a structured plan with no edits.
    pub fn tool_mode(self) -> AgentMode {
        match self {
            AgentProfile::General | AgentProfile::Compaction => AgentMode::Agent,
            AgentProfile::Explore => AgentMode::Research,
            AgentProfile::Plan => AgentMode::Plan,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// List known sessions with status.
    List,
    /// Show metadata and message history for one session.
    Show { id: String },
    /// Resume a durably-stored session (`sven session {list,show}`) by id and
    /// continue it with a new prompt. Distinct from top-level `--resume`,
    /// which resumes a piped/markdown conversation file instead.
    Resume {
        id: String,
        /// The next user message to submit to the resumed session.
        prompt: String,
    },
    /// Create a new, empty named session without starting the agent loop.
    Create { name: String },
    /// Connect to a running session's watch socket and print events.
    Watch { id: String },
    /// Delete a session and its persisted state.
    Delete { id: String },
    /// Remove sessions whose status is completed/errored past a retention window.
    Clean {
        #[arg(long, default_value = "30")]
        older_than_days: u64,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write a default config file to the config path.
    Init,
    /// Print the effective configuration and exit.
    Show,
    /// List configured model endpoints.
    ListEndpoints,
    /// Print an example config file to stdout.
    Example,
    /// Print a link/description of configuration documentation.
    Docs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage persisted sessions.
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Manage configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Start an interactive coop-mode chat (synonym for `--coop`).
    Chat,
    /// Start a REPL session that never exits after a task completes (synonym for `--repl`).
    Repl,
    /// Generate shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// List saved conversations (legacy markdown/JSONL history, distinct from sessions).
    Chats {
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },
    /// Validate a workflow file: parse frontmatter, count steps, check syntax.
    Validate {
        #[arg(long, short = 'f', required = true)]
        file: PathBuf,
    },
    /// List available models for the configured provider(s).
    ListModels {
        #[arg(long, short = 'p')]
        provider: Option<String>,
        #[arg(long)]
        refresh: bool,
        #[arg(long)]
        json: bool,
    },
    /// List all supported model providers.
    ListProviders {
        #[arg(long, short = 'v')]
        verbose: bool,
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Resolve the mode flags (`--solo`/`--coop`/`--repl`, mutually exclusive
    /// via the `exec_mode` arg group) into an `ExecutionMode`. Defaults to Solo.
    pub fn execution_mode(&self) -> sven_core::ExecutionMode {
        if self.coop {
            sven_core::ExecutionMode::Coop
        } else if self.repl {
            sven_core::ExecutionMode::Repl
        } else {
            sven_core::ExecutionMode::Solo
        }
    }

    /// Resolve the effective JSONL input path: --load-jsonl takes priority, then --jsonl.
    pub fn effective_load_jsonl(&self) -> Option<&PathBuf> {
        self.load_jsonl.as_ref().or(self.jsonl.as_ref())
    }

    /// Resolve the effective JSONL output path: --output-jsonl takes priority, then --jsonl.
    pub fn effective_output_jsonl(&self) -> Option<&PathBuf> {
        self.output_jsonl.as_ref().or(self.jsonl.as_ref())
    }
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "sven", &mut std::io::stdout());
}

// TTY detection for stdin and stdout.
pub trait IsTerminal {
    fn is_terminal(&self) -> bool;
}

impl IsTerminal for std::io::Stdin {
    fn is_terminal(&self) -> bool {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe { libc::isatty(self.as_raw_fd()) != 0 }
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}

impl IsTerminal for std::io::Stdout {
    fn is_terminal(&self) -> bool {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe { libc::isatty(self.as_raw_fd()) != 0 }
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}
