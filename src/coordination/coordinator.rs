// ABOUTME: Facade composing session, detection, transfer, translation, and probing
// into one coordinate() call with guaranteed remote cleanup on every path

use crate::config::CoordinatorConfig;
use crate::coordination::detector::PathDetector;
use crate::coordination::error::CoordinationError;
use crate::coordination::probe::{DisplayStrategy, RemoteCapability, RemoteCapabilityProbe};
use crate::coordination::session::{FileMapping, Session, SessionManager};
use crate::coordination::transfer::{FileTransferManager, OutputFetch};
use crate::coordination::translate::CommandTranslator;
use crate::transport::Transport;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to the declared output files.
#[derive(Debug)]
pub enum OutputResolution {
    /// Every declared output was downloaded to its requested local path.
    Resolved(Vec<PathBuf>),
    /// The remote command exited 0 but some outputs never appeared. The
    /// caller decides whether partial success is acceptable.
    Missing {
        resolved: Vec<PathBuf>,
        missing: Vec<PathBuf>,
    },
    /// The remote command failed, so downloads were not attempted.
    Skipped,
}

/// Result of one coordinated execution, shaped like a local run plus the
/// side effect of output files appearing at their requested local paths.
#[derive(Debug)]
pub struct CoordinationOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub outputs: OutputResolution,
}

/// Diagnostics from [`RemoteFileCoordinator::self_test`].
#[derive(Debug, Default)]
pub struct SelfTestReport {
    pub session_creation: bool,
    pub remote_write: bool,
    pub command_execution: bool,
    pub cleanup: bool,
    pub error: Option<String>,
}

/// Runs a local command line against a remote host: uploads the inputs it
/// references, rewrites the argv to remote paths, executes, and downloads
/// the outputs back. Owns all of its collaborators explicitly; there is no
/// process-wide state.
pub struct RemoteFileCoordinator {
    transport: Arc<dyn Transport>,
    sessions: SessionManager,
    detector: PathDetector,
    transfers: FileTransferManager,
    probe: RemoteCapabilityProbe,
}

impl RemoteFileCoordinator {
    pub fn new(transport: Arc<dyn Transport>, config: CoordinatorConfig) -> Self {
        let root = &config.remote.root_dir;
        Self {
            sessions: SessionManager::new(transport.clone(), root),
            detector: PathDetector::new(&config.detector),
            transfers: FileTransferManager::new(
                transport.clone(),
                root,
                config.transfer.clone(),
            ),
            probe: RemoteCapabilityProbe::new(transport.clone(), config.probe.clone()),
            transport,
        }
    }

    /// Execute a command with transparent file coordination.
    ///
    /// The session's remote directory is removed on every exit path,
    /// success or failure; cleanup failure itself is only logged.
    pub async fn coordinate(
        &self,
        argv: &[String],
    ) -> Result<CoordinationOutcome, CoordinationError> {
        let mut session = self.sessions.create().await?;
        debug!("Starting remote session {}", session.id);

        let result = self.run_in_session(&mut session, argv).await;

        self.sessions.cleanup(&session).await;
        result
    }

    async fn run_in_session(
        &self,
        session: &mut Session,
        argv: &[String],
    ) -> Result<CoordinationOutcome, CoordinationError> {
        self.probe.check_host_resources().await?;

        let capability = match argv.first() {
            Some(executable) => Some(self.probe.capability_for(executable).await),
            None => None,
        };

        let detected = self.detector.classify(argv);
        debug!(
            "Detected {} input files, {} output files",
            detected.inputs.len(),
            detected.outputs.len()
        );

        self.transfers.upload_inputs(session, &detected.inputs).await?;

        for local in &detected.outputs {
            let remote = session.output_remote_path(local)?;
            session.add_mapping(FileMapping::output(local.clone(), remote));
        }

        let translator = CommandTranslator::from_session(session);
        let mut translated = translator.translate(argv);
        if let Some(capability) = &capability {
            translated = self.probe.wrap_command(capability, translated);
        }
        debug!("Translated command: {}", translated.join(" "));

        let output = self.transport.execute(&translated).await?;
        debug!("Remote execution completed with exit code {}", output.exit_code);

        if !output.success() {
            if let Some(capability) = &capability {
                if let Some(err) = Self::interactive_session_failure(argv, capability) {
                    return Err(err);
                }
            }
            warn!("Remote execution failed, skipping output download");
            return Ok(CoordinationOutcome {
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
                outputs: OutputResolution::Skipped,
            });
        }

        let outputs = self.resolve_outputs(session).await?;
        Ok(CoordinationOutcome {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            outputs,
        })
    }

    /// A GUI executable that had no display mechanism and then failed is
    /// reported as a capability problem, not a generic nonzero exit, so the
    /// caller can tell the user the tool needs a desktop session.
    fn interactive_session_failure(
        argv: &[String],
        capability: &RemoteCapability,
    ) -> Option<CoordinationError> {
        if capability.is_gui_application
            && capability.display_strategy == DisplayStrategy::Unsupported
        {
            Some(CoordinationError::RequiresInteractiveSession {
                executable: argv.first().cloned().unwrap_or_default(),
                detail: "no display mechanism available (no DISPLAY, xvfb-run, or \
                         platform session primitive)"
                    .to_string(),
            })
        } else {
            None
        }
    }

    /// Download declared outputs, isolating failures per file: one broken
    /// download never prevents the others, it just lands in the missing
    /// list. Only when every expected output is absent does the operation
    /// fail as a whole.
    async fn resolve_outputs(
        &self,
        session: &Session,
    ) -> Result<OutputResolution, CoordinationError> {
        let mut resolved = Vec::new();
        let mut missing = Vec::new();
        let mut expected = 0usize;

        for mapping in session.output_mappings() {
            expected += 1;
            match self
                .transfers
                .download_output(&mapping.remote_path, &mapping.local_path)
                .await
            {
                Ok(OutputFetch::Downloaded(paths)) => resolved.extend(paths),
                Ok(OutputFetch::Missing) => {
                    warn!(
                        "Output not found on remote: {}",
                        mapping.remote_path
                    );
                    missing.push(mapping.local_path.clone());
                }
                Err(e) => {
                    warn!(
                        "Failed to download output {}: {}",
                        mapping.remote_path, e
                    );
                    missing.push(mapping.local_path.clone());
                }
            }
        }

        if expected > 0 && resolved.is_empty() {
            return Err(CoordinationError::MissingOutputs(missing));
        }
        if missing.is_empty() {
            Ok(OutputResolution::Resolved(resolved))
        } else {
            Ok(OutputResolution::Missing { resolved, missing })
        }
    }

    /// Exercise session creation, a remote write, command execution, and
    /// cleanup without touching any real workload.
    pub async fn self_test(&self) -> SelfTestReport {
        let mut report = SelfTestReport::default();

        let session = match self.sessions.create().await {
            Ok(session) => session,
            Err(e) => {
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.session_creation = true;

        let marker = format!("{}/selftest.txt", session.work_dir());
        let write = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("echo coordination-self-test > {marker}"),
        ];
        match self.transport.execute(&write).await {
            Ok(output) if output.success() => {
                report.remote_write = true;
                let read = vec!["cat".to_string(), marker];
                match self.transport.execute(&read).await {
                    Ok(output) if output.success() => report.command_execution = true,
                    Ok(output) => {
                        report.error =
                            Some(format!("cat exited {}", output.exit_code));
                    }
                    Err(e) => report.error = Some(e.to_string()),
                }
            }
            Ok(output) => {
                report.error = Some(format!("remote write exited {}", output.exit_code));
            }
            Err(e) => report.error = Some(e.to_string()),
        }

        self.sessions.cleanup(&session).await;
        report.cleanup = true;
        report
    }
}
