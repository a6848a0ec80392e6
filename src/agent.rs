use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::model::{TestCase, Transcript, Turn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STDERR_TAIL_CHARS: usize = 800;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to start agent command `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("agent i/o failed")]
    Io(#[from] io::Error),

    #[error("failed to encode agent request")]
    Request(#[source] serde_json::Error),

    #[error("agent did not finish within {seconds}s")]
    Timeout { seconds: u64 },

    #[error("agent exited with {status}: {stderr_tail}")]
    ExitStatus {
        status: ExitStatus,
        stderr_tail: String,
    },

    #[error("agent output is not a transcript")]
    MalformedTranscript(#[source] serde_json::Error),

    #[error("agent produced no transcript turns")]
    EmptyTranscript,

    #[error("no recorded transcript for question: {0}")]
    UnknownQuestion(String),

    #[error("agent reset failed: {0}")]
    Reset(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct InvocationRequest {
    pub question: String,
    pub client_id: i64,
    pub history: Vec<Turn>,
    pub remember: bool,
}

impl InvocationRequest {
    pub fn single_turn(case: &TestCase) -> Self {
        Self {
            question: case.question.clone(),
            client_id: case.client_id,
            history: Vec::new(),
            remember: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentCapabilities {
    pub reset: bool,
}

pub trait Agent {
    fn invoke(&mut self, request: &InvocationRequest) -> Result<Transcript, AgentError>;

    fn capabilities(&self) -> AgentCapabilities {
        AgentCapabilities::default()
    }

    fn reset(&mut self) -> Result<(), AgentError> {
        Ok(())
    }
}

pub struct CommandAgent {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    reset_program: Option<String>,
    timeout: Option<Duration>,
}

impl CommandAgent {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            reset_program: None,
            timeout: None,
        }
    }

    pub fn with_env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    pub fn with_reset_program(mut self, program: Option<String>) -> Self {
        self.reset_program = program;
        self
    }

    pub fn with_timeout_secs(mut self, seconds: u64) -> Self {
        self.timeout = (seconds > 0).then(|| Duration::from_secs(seconds));
        self
    }

    fn timed_out(&self) -> AgentError {
        AgentError::Timeout {
            seconds: self.timeout.map_or(0, |timeout| timeout.as_secs()),
        }
    }

    fn wait_with_deadline(
        &self,
        child: &mut Child,
        deadline: Option<Instant>,
    ) -> Result<ExitStatus, AgentError> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(self.timed_out());
                }
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    fn receive<T>(
        &self,
        receiver: Receiver<io::Result<T>>,
        deadline: Option<Instant>,
    ) -> Result<io::Result<T>, AgentError> {
        let received = match deadline {
            Some(deadline) => receiver
                .recv_timeout(deadline.saturating_duration_since(Instant::now()))
                .map_err(|err| match err {
                    RecvTimeoutError::Timeout => {
                        debug!(program = %self.program, "agent i/o still pending at deadline");
                        self.timed_out()
                    }
                    RecvTimeoutError::Disconnected => worker_stopped(),
                })?,
            None => receiver.recv().map_err(|_| worker_stopped())?,
        };
        Ok(received)
    }

    fn collect_pipe(
        &self,
        pipe: Option<Receiver<io::Result<Vec<u8>>>>,
        deadline: Option<Instant>,
    ) -> Result<Vec<u8>, AgentError> {
        match pipe {
            Some(receiver) => self.receive(receiver, deadline)?.map_err(AgentError::Io),
            None => Ok(Vec::new()),
        }
    }
}

impl Agent for CommandAgent {
    fn invoke(&mut self, request: &InvocationRequest) -> Result<Transcript, AgentError> {
        let payload = serde_json::to_vec(request).map_err(AgentError::Request)?;
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| AgentError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = drain_pipe(child.stdout.take());
        let stderr = drain_pipe(child.stderr.take());
        let feeder = feed_stdin(child.stdin.take(), payload);

        let status = self.wait_with_deadline(&mut child, deadline)?;
        if let Some(feeder) = feeder {
            match self.receive(feeder, deadline)? {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                    debug!(program = %self.program, "agent closed stdin before reading the request");
                }
                Err(err) => return Err(AgentError::Io(err)),
            }
        }
        let stdout = self.collect_pipe(stdout, deadline)?;
        let stderr = self.collect_pipe(stderr, deadline)?;
        debug!(
            program = %self.program,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "agent process finished"
        );

        if !status.success() {
            return Err(AgentError::ExitStatus {
                status,
                stderr_tail: stderr_tail(&stderr),
            });
        }

        parse_transcript_stream(&stdout)
    }

    fn capabilities(&self) -> AgentCapabilities {
        AgentCapabilities {
            reset: self.reset_program.is_some(),
        }
    }

    fn reset(&mut self) -> Result<(), AgentError> {
        let Some(program) = &self.reset_program else {
            return Ok(());
        };

        let output = Command::new(program)
            .envs(self.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .output()
            .map_err(|source| AgentError::Spawn {
                program: program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(AgentError::Reset(format!(
                "`{program}` exited with {}: {}",
                output.status,
                stderr_tail(&output.stderr)
            )))
        }
    }
}

pub struct ReplayAgent {
    transcripts: HashMap<String, Transcript>,
}

impl ReplayAgent {
    pub fn new(transcripts: HashMap<String, Transcript>) -> Self {
        Self { transcripts }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let transcripts: HashMap<String, Transcript> = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse replay transcripts {}", path.display()))?;
        Ok(Self::new(transcripts))
    }

    pub fn len(&self) -> usize {
        self.transcripts.len()
    }
}

impl Agent for ReplayAgent {
    fn invoke(&mut self, request: &InvocationRequest) -> Result<Transcript, AgentError> {
        self.transcripts
            .get(&request.question)
            .cloned()
            .ok_or_else(|| AgentError::UnknownQuestion(request.question.clone()))
    }
}

pub fn parse_transcript_stream(bytes: &[u8]) -> Result<Transcript, AgentError> {
    let mut last = None;
    for document in serde_json::Deserializer::from_slice(bytes).into_iter::<Transcript>() {
        last = Some(document.map_err(AgentError::MalformedTranscript)?);
    }
    last.ok_or(AgentError::EmptyTranscript)
}

fn drain_pipe<R>(pipe: Option<R>) -> Option<Receiver<io::Result<Vec<u8>>>>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut pipe| {
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let result = pipe.read_to_end(&mut buffer).map(|_| buffer);
            let _ = sender.send(result);
        });
        receiver
    })
}

fn feed_stdin(stdin: Option<ChildStdin>, payload: Vec<u8>) -> Option<Receiver<io::Result<()>>> {
    stdin.map(|mut stdin| {
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let _ = sender.send(stdin.write_all(&payload));
        });
        receiver
    })
}

fn worker_stopped() -> AgentError {
    AgentError::Io(io::Error::other("agent i/o worker stopped unexpectedly"))
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    let skip = trimmed.chars().count().saturating_sub(STDERR_TAIL_CHARS);
    trimmed.chars().skip(skip).collect()
}
