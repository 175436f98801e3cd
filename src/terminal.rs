//! Terminal side of the run: password and path prompts plus `\r`-redrawn
//! progress lines on stderr.

use mpfu_core::{
    CommandResult, CredentialPrompt, DestinationDescriptor, ProgressSink, RenderedLine, TransferResult,
};
use std::io::{BufRead, Write};
use std::path::Path;

/// Prompts on the controlling terminal. Passwords are read without echo.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt {
    /// Ask for a remote directory per destination before the run.
    pub ask_paths: bool,
}

impl CredentialPrompt for TerminalPrompt {
    fn need_credential(&self, descriptor: &DestinationDescriptor) -> Option<String> {
        let prompt = format!(
            "Password for {}@{} ({}): ",
            descriptor.user, descriptor.host, descriptor.protocol
        );
        match rpassword::prompt_password(prompt) {
            Ok(password) => Some(password),
            Err(e) => {
                log::warn!("Could not read password: {}", e);
                None
            }
        }
    }

    fn need_remote_path(&self, descriptor: &DestinationDescriptor) -> Option<String> {
        if !self.ask_paths {
            return None;
        }
        eprint!(
            "Remote directory on {} [{}]: ",
            descriptor.host, descriptor.remote_path
        );
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line).ok()?;
        Some(line.trim().to_string()).filter(|l| !l.is_empty())
    }
}

/// Writes "Sending ..." headers and the progress bar to stderr.
#[derive(Debug, Default)]
pub struct TerminalSink;

impl ProgressSink for TerminalSink {
    fn destination_started(&self, destination: &DestinationDescriptor) {
        eprintln!("==> {}", destination);
    }

    fn file_started(&self, local: &Path, location: &str, destination: &DestinationDescriptor) {
        eprintln!("{}", sending_line(local, location, destination));
    }

    fn progress(&self, line: &RenderedLine) {
        let mut err = std::io::stderr().lock();
        let _ = write!(err, "\r{}", line);
        if line.complete {
            let _ = writeln!(err);
        }
        let _ = err.flush();
    }

    fn directory_created(&self, remote: &str, created: bool) {
        if created {
            eprintln!("Created directory {}", remote);
        } else {
            eprintln!("Directory {} already exists or could not be created", remote);
        }
    }

    fn destination_finished(&self, result: &TransferResult) {
        match (&result.failure, &result.message) {
            (None, _) => eprintln!(
                "Finished {}: {} file(s), {} bytes in {} ms",
                result.descriptor, result.files_succeeded, result.bytes_transferred, result.elapsed_ms
            ),
            (Some(kind), message) => eprintln!(
                "Failed {}: [{}] {}",
                result.descriptor,
                kind,
                message.as_deref().unwrap_or("")
            ),
        }
    }

    fn command_finished(&self, result: &CommandResult) {
        if let Some(ref output) = result.output {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(output.stdout.as_bytes());
            if !output.stdout.is_empty() && !output.stdout.ends_with('\n') {
                let _ = writeln!(out);
            }
            let _ = out.flush();
            eprint!("{}", output.stderr);
        }
        if let Some(line) = command_error_line(result) {
            eprintln!("{}", line);
        }
    }
}

/// Failure notice printed after a host's command output.
pub fn command_error_line(result: &CommandResult) -> Option<String> {
    let kind = result.failure?;
    Some(format!(
        "The command returned an error on {}: [{}] {}",
        result.target(),
        kind,
        result.message.as_deref().unwrap_or("")
    ))
}

/// `Sending <file> to <location> over <PROTO> =>`
pub fn sending_line(local: &Path, location: &str, destination: &DestinationDescriptor) -> String {
    let name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| local.display().to_string());
    format!(
        "Sending {} to {} over {} =>",
        name,
        location,
        destination.protocol.scheme().to_uppercase()
    )
}

/// Warning shown before files go to SMB shares, where same-named remote
/// files are replaced without asking.
pub const SMB_OVERWRITE_WARNING: &str =
    "Warning: files on SMB shares with the same name will be overwritten.";
