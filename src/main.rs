use clap::{Args, Parser, Subcommand};
use log::{debug, error};
use mpfu::terminal::{TerminalPrompt, TerminalSink, SMB_OVERWRITE_WARNING};
use mpfu::Adapters;
use mpfu_core::{
    ask_remote_paths, CommandFanOut, CommandReport, CredentialPrompt, DirectoryTree, FileSet,
    NoPrompt, ProgressSink, Protocol, RunReport, ServerList, SilentProgress, TransferConfig,
    TransferOrchestrator, UploadError, UploadResult,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "mpfu", version, about = "Push files to FTP, SFTP, SCP, SMB and S3 destinations")]
struct Cli {
    /// Debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Transfer settings file (defaults to the user config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload files matching a pattern to every destination.
    Upload {
        #[command(flatten)]
        targets: Targets,

        /// Local base directory.
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Glob matched against the base directory. Directories are skipped.
        #[arg(long, default_value = "*")]
        pattern: String,

        /// Ask for a remote directory per destination before sending.
        #[arg(long)]
        ask_path: bool,
    },
    /// Mirror a local directory tree to SFTP destinations.
    UploadDir {
        #[command(flatten)]
        targets: Targets,

        /// Local directory to mirror.
        #[arg(long)]
        dir: PathBuf,
    },
    /// Run a shell command over SSH on every non-s3 host of the list.
    Ssh {
        #[command(flatten)]
        targets: Targets,

        /// Command line executed by the remote user's shell.
        #[arg(long, short = 'c')]
        command: String,
    },
    /// Validate a descriptor list without connecting.
    Parse {
        /// List file, or comma-separated descriptors.
        input: String,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct Targets {
    /// Destination descriptor(s), comma-separated. Repeatable. `mpfu ssh`
    /// also takes `user@host`.
    #[arg(long = "to")]
    to: Vec<String>,

    /// Descriptor-list file, one destination per line. Repeatable.
    #[arg(long)]
    list: Vec<PathBuf>,

    /// Never prompt; destinations needing a password they don't carry fail.
    #[arg(long)]
    no_prompt: bool,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

impl Targets {
    fn server_list(&self) -> UploadResult<ServerList> {
        let mut list = ServerList::default();
        for path in &self.list {
            list.extend(ServerList::from_file(path)?);
        }
        for inline in &self.to {
            list.extend(ServerList::from_inline(inline));
        }
        Ok(list)
    }

    /// Like [`Targets::server_list`], with `user@host` accepted inline.
    fn shell_list(&self) -> UploadResult<ServerList> {
        let mut list = ServerList::default();
        for path in &self.list {
            list.extend(ServerList::from_file(path)?);
        }
        for inline in &self.to {
            list.extend(ServerList::from_shell_targets(inline));
        }
        Ok(list)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let env = env_logger::Env::default().default_filter_or(default_log_filter(cli.verbose));
    env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .init();

    // rustls needs a process-wide crypto provider before any TLS handshake.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("mpfu: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("mpfu: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> UploadResult<ExitCode> {
    match cli.command {
        Command::Parse { input, json } => {
            let list = ServerList::from_arg(&input)?;
            print_list(&list, json);
            Ok(exit_code(list.rejected.is_empty()))
        }
        Command::Upload {
            targets,
            dir,
            pattern,
            ask_path,
        } => {
            let config = TransferConfig::load(cli.config.as_deref())?;
            let mut list = targets.server_list()?;
            let files = FileSet::resolve(&dir, &pattern)?;
            debug!("{} file(s) matched {} in {}", files.len(), pattern, dir.display());

            let terminal = TerminalPrompt {
                ask_paths: ask_path,
            };
            if ask_path {
                ask_remote_paths(&mut list, &terminal);
            }
            warn_smb_overwrite(&list);

            let adapters = Adapters::new(&config);
            let sink = TerminalSink;
            let prompt: &dyn CredentialPrompt = if targets.no_prompt { &NoPrompt } else { &terminal };
            let report = TransferOrchestrator::new(&adapters, prompt, &sink)
                .run(&list, &files)
                .await;
            Ok(finish(&report, targets.json))
        }
        Command::UploadDir { targets, dir } => {
            let config = TransferConfig::load(cli.config.as_deref())?;
            let list = targets.server_list()?;
            let tree = DirectoryTree::scan(&dir)?;

            let adapters = Adapters::new(&config);
            let sink = TerminalSink;
            let terminal = TerminalPrompt::default();
            let prompt: &dyn CredentialPrompt = if targets.no_prompt { &NoPrompt } else { &terminal };
            let report = TransferOrchestrator::new(&adapters, prompt, &sink)
                .run_directory(&list, &tree)
                .await;
            Ok(finish(&report, targets.json))
        }
        Command::Ssh { targets, command } => {
            if command.trim().is_empty() {
                return Err(UploadError::config("--command must not be empty"));
            }
            let config = TransferConfig::load(cli.config.as_deref())?;
            let list = targets.shell_list()?;

            let adapters = Adapters::new(&config);
            let terminal = TerminalPrompt::default();
            let prompt: &dyn CredentialPrompt = if targets.no_prompt { &NoPrompt } else { &terminal };
            // JSON mode keeps stdout for the report alone.
            let sink: &dyn ProgressSink = if targets.json { &SilentProgress } else { &TerminalSink };
            let report = CommandFanOut::new(adapters.shell(), prompt, sink)
                .run(&list, &command)
                .await;
            Ok(finish_commands(&report, targets.json))
        }
    }
}

fn warn_smb_overwrite(list: &ServerList) {
    if list.destinations.iter().any(|d| d.protocol == Protocol::Smb) {
        eprintln!("{}", SMB_OVERWRITE_WARNING);
    }
}

fn print_list(list: &ServerList, json: bool) {
    if json {
        let value = serde_json::json!({
            "destinations": list.destinations,
            "rejected": list.rejected,
        });
        match serde_json::to_string_pretty(&value) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("mpfu: cannot encode list: {}", e),
        }
        return;
    }
    for d in &list.destinations {
        println!("OK    {}", d);
    }
    for m in &list.rejected {
        println!("SKIP  {}", m);
    }
}

fn finish(report: &RunReport, json: bool) -> ExitCode {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("mpfu: cannot encode report: {}", e),
        }
    } else {
        println!("{}", report.summary());
    }
    exit_code(report.all_succeeded())
}

fn finish_commands(report: &CommandReport, json: bool) -> ExitCode {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("mpfu: cannot encode report: {}", e),
        }
    } else {
        eprintln!("{}", report.summary());
    }
    exit_code(report.all_succeeded())
}

/// Log filter used when `RUST_LOG` is unset.
fn default_log_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_at_info_unless_verbose() {
        assert_eq!(default_log_filter(false), "info");
        assert_eq!(default_log_filter(true), "debug");
    }

    #[test]
    fn ssh_subcommand_takes_logins_and_command() {
        let cli = Cli::try_parse_from(["mpfu", "ssh", "--to", "ops@web1,s3:bucket", "-c", "uptime"]).unwrap();
        let Command::Ssh { targets, command } = cli.command else {
            panic!("expected the ssh subcommand");
        };
        assert_eq!(command, "uptime");
        let list = targets.shell_list().unwrap();
        assert_eq!(list.destinations.len(), 2);
        assert_eq!(list.destinations[0].user, "ops");
        assert!(list.rejected.is_empty());
    }
}
