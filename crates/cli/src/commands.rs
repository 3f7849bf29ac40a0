//! CLI commands

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use codelab_core::{CaseVisibility, JobKind, SubmissionId, SubmissionState};
use codelab_http::types::{RunRequest, SubmitRequest};
use codelab_session::{
    AuthSession, PipelineConfig, SocketPushChannel, SubmissionWatcher, WatchHandle,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in
    Login {
        #[arg(short, long)]
        username: String,

        #[arg(short, long, env = "CODELAB_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Create an account and sign in
    Register {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        email: String,

        #[arg(short, long, env = "CODELAB_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Show the signed-in user
    Whoami,

    /// Run a solution against the problem's sample cases
    Run {
        #[command(flatten)]
        source: SourceArgs,

        /// Custom stdin instead of the sample cases
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Submit a solution for grading
    Submit {
        #[command(flatten)]
        source: SourceArgs,

        /// Exam the submission belongs to
        #[arg(long)]
        exam: Option<String>,

        /// Upload the source as a file instead of a JSON body
        #[arg(long)]
        upload: bool,
    },

    /// Sign out
    Logout,

    /// Print the resolved configuration
    Config,
}

#[derive(clap::Args)]
pub struct SourceArgs {
    /// Problem identifier
    #[arg(short, long)]
    problem: String,

    /// Language of the source file
    #[arg(short = 'L', long)]
    language: String,

    /// Source file
    file: PathBuf,

    /// Rely on polling only
    #[arg(long)]
    no_push: bool,
}

impl SourceArgs {
    fn read_code(&self) -> Result<String> {
        std::fs::read_to_string(&self.file)
            .with_context(|| format!("reading {}", self.file.display()))
    }
}

impl Commands {
    pub async fn execute(self, config: PipelineConfig) -> Result<()> {
        let session = AuthSession::from_config(&config)?;

        match self {
            Self::Login { username, password } => {
                let profile = session.login(&username, &password).await?;
                println!("Signed in as {} ({:?})", profile.username, profile.role);
            }
            Self::Register {
                username,
                email,
                password,
            } => {
                let profile = session.register(&username, &email, &password).await?;
                println!("Registered and signed in as {}", profile.username);
            }
            Self::Whoami => {
                require_login(&session)?;
                let profile = session.fetch_profile().await?;
                println!("{} <{}>", profile.username, profile.email.unwrap_or_default());
                println!("id:   {}", profile.id);
                println!("role: {:?}", profile.role);
            }
            Self::Run { source, input } => {
                require_login(&session)?;
                let input = input
                    .map(|path| {
                        std::fs::read_to_string(&path)
                            .with_context(|| format!("reading {}", path.display()))
                    })
                    .transpose()?;
                let request = RunRequest {
                    problem_id: source.problem.clone(),
                    language: source.language.clone(),
                    code: source.read_code()?,
                    input,
                };
                let id = session.run(&request).await?;
                info!(submission = %id, "Run accepted");

                let state = watch(&session, &config, &source, id, JobKind::Run).await?;
                // Runs only use sample cases, which are public
                print_state(&state, &CaseVisibility::all_public(state.total as usize));
            }
            Self::Submit {
                source,
                exam,
                upload,
            } => {
                require_login(&session)?;
                let request = SubmitRequest {
                    problem_id: source.problem.clone(),
                    language: source.language.clone(),
                    code: source.read_code()?,
                    exam_id: exam,
                };
                let id = if upload {
                    session.submit_file(&request, &file_name(&source.file)).await?
                } else {
                    session.submit(&request).await?
                };
                println!("Submitted {id}");

                let state = watch(&session, &config, &source, id, JobKind::Submit).await?;
                print_state(&state, &CaseVisibility::new());
            }
            Self::Logout => {
                session.logout().await;
                println!("Signed out");
            }
            Self::Config => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
        }

        Ok(())
    }
}

fn require_login(session: &AuthSession) -> Result<()> {
    if session.tokens().get().is_none() {
        bail!(
            "not signed in; run `codelab login` first (set `session_cache` to keep the login between commands)"
        );
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| "solution".to_string(), |name| name.to_string_lossy().into_owned())
}

async fn watch(
    session: &AuthSession,
    config: &PipelineConfig,
    source: &SourceArgs,
    id: SubmissionId,
    kind: JobKind,
) -> Result<SubmissionState> {
    let mut watcher = SubmissionWatcher::new(Arc::new(session.clone()));
    if !source.no_push {
        let push = SocketPushChannel::new(config.resolved_socket_url()?, session.tokens().clone());
        watcher = watcher.with_push(Arc::new(push));
    }

    let handle: WatchHandle = watcher.watch(id, kind);
    let mut updates = handle.subscribe();
    let printer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            if !state.is_terminal() {
                eprintln!("  {}", state.summary());
            }
        }
    });

    let state = tokio::select! {
        result = handle.wait() => result?,
        _ = tokio::signal::ctrl_c() => bail!("interrupted"),
    };
    printer.abort();
    Ok(state)
}

fn print_state(state: &SubmissionState, visibility: &CaseVisibility) {
    println!("{}", state.summary());
    if let Some(message) = &state.message {
        println!("{message}");
    }

    for case in state.visible_results(visibility) {
        let verdict = if case.passed { "passed" } else { "failed" };
        let mut line = format!("  case {:>2}: {verdict}", case.index + 1);
        if let Some(status) = case.status {
            line.push_str(&format!(" [{}]", status.label()));
        }
        if let Some(runtime) = case.runtime_ms {
            line.push_str(&format!(" {runtime} ms"));
        }
        if !visibility.is_public(case.index) {
            line.push_str(" (hidden)");
        }
        println!("{line}");

        if let Some(input) = &case.input {
            println!("    input:    {input}");
        }
        if let Some(expected) = &case.expected_output {
            println!("    expected: {expected}");
        }
        if let Some(actual) = &case.actual_output {
            println!("    actual:   {actual}");
        }
        if let Some(error) = &case.error {
            println!("    error:    {error}");
        }
    }
}
