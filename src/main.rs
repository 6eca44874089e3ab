// src/main.rs
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use chart_assistant::conversation::Turn;
use chart_assistant::{ui, AppConfig, CsvHandler, HttpTransport, QueryOrchestrator, Session};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const HELP: &str = "\
commands:
  :load <path> [mime]   upload a CSV file
  :preview              show the first rows of the upload
  :clear                clear the conversation
  :status               show upload status
  :quit                 exit
anything else is sent as a prompt";

#[derive(Parser)]
#[command(name = "chart-assistant", version, about = "Ask for charts of a CSV file in plain language")]
struct Args {
    /// TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base URL of the inference service.
    #[arg(long, env = "CHART_ASSISTANT_URL")]
    base_url: Option<String>,

    /// Request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Write chart specs here instead of printing them.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// CSV file to load at startup.
    csv: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
enum Message {
    OpenLocalFile(PathBuf, Option<String>),
    Prompt(String),
    Preview,
    ClearMessages,
    Status,
    Help,
    Exit,
}

impl Message {
    fn parse(line: &str) -> Message {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some(command) = line.strip_prefix(':') else {
            return Message::Prompt(line.to_string());
        };
        let mut parts = command.split_whitespace();
        match parts.next() {
            Some("load") => match parts.next() {
                Some(path) => Message::OpenLocalFile(PathBuf::from(path), parts.next().map(String::from)),
                None => Message::Help,
            },
            Some("preview") => Message::Preview,
            Some("clear") => Message::ClearMessages,
            Some("status") => Message::Status,
            Some("quit") | Some("exit") => Message::Exit,
            _ => Message::Help,
        }
    }
}

struct ChartAssistant {
    session: Arc<Session>,
    orchestrator: QueryOrchestrator,
    csv_handler: CsvHandler,
    preview_rows: usize,
    out_dir: Option<PathBuf>,
    printed_turns: usize,
    charts_written: usize,
    cancel: CancellationToken,
}

impl ChartAssistant {
    fn new(config: &AppConfig, out_dir: Option<PathBuf>) -> Result<Self, chart_assistant::TransportError> {
        let transport = HttpTransport::new(&config.base_url, config.connect_timeout())?;
        tracing::info!(endpoint = transport.endpoint(), "inference service");
        let orchestrator = QueryOrchestrator::new(Arc::new(transport))
            .with_request_timeout(config.request_timeout())
            .with_sample_limit(config.sample_limit);

        Ok(ChartAssistant {
            session: Arc::new(Session::new()),
            orchestrator,
            csv_handler: CsvHandler::new(),
            preview_rows: config.preview_rows,
            out_dir,
            printed_turns: 0,
            charts_written: 0,
            cancel: CancellationToken::new(),
        })
    }

    /// Handle one message. Returns `false` when the loop should stop.
    async fn update(&mut self, message: Message) -> bool {
        match message {
            Message::OpenLocalFile(path, mime) => {
                match self.csv_handler.read_upload(path.clone(), mime).await {
                    Ok(upload) => {
                        // The status line reports the outcome either way.
                        let _ = self.session.upload(&upload);
                        println!("{}", self.session.upload_status());
                    }
                    Err(e) => eprintln!("cannot read {}: {e}", path.display()),
                }
            }

            Message::Prompt(prompt) => {
                let token = self.cancel.clone();
                let outcome = self
                    .orchestrator
                    .send_with_cancel(&self.session, &prompt, &token)
                    .await;
                tracing::debug!(?outcome, "prompt handled");
                self.print_new_turns().await;
            }

            Message::Preview => match self.session.dataset() {
                Some(dataset) => {
                    if let Err(e) = ui::write_preview(std::io::stdout().lock(), &dataset, self.preview_rows) {
                        eprintln!("preview failed: {e}");
                    }
                }
                None => println!("{}", self.session.upload_status()),
            },

            Message::ClearMessages => {
                self.session.clear_conversation();
                self.printed_turns = 0;
            }

            Message::Status => {
                println!("{}", self.session.upload_status());
                println!("request: {:?}", self.session.request_state());
            }

            Message::Help => println!("{HELP}"),

            Message::Exit => return false,
        }
        true
    }

    /// Fresh token for the next message; the previous one may already be cancelled.
    fn arm_cancel(&mut self) -> CancellationToken {
        self.cancel = CancellationToken::new();
        self.cancel.clone()
    }

    async fn print_new_turns(&mut self) {
        let turns = self.session.log().since(self.printed_turns);
        self.printed_turns += turns.len();

        for turn in &turns {
            match (turn, &self.out_dir) {
                (Turn::SystemChart(spec), Some(dir)) => {
                    self.charts_written += 1;
                    let path = dir.join(format!("chart-{}.vl.json", self.charts_written));
                    let body = serde_json::to_vec_pretty(spec.as_json()).unwrap_or_default();
                    match tokio::fs::write(&path, body).await {
                        Ok(()) => println!("{}: [chart written to {}]", ui::SYSTEM_LABEL, path.display()),
                        Err(e) => eprintln!("cannot write {}: {e}", path.display()),
                    }
                }
                _ => println!("{}", ui::format_turn(turn)),
            }
        }
    }
}

/// Forward every Ctrl-C to `tx`. Registered once for the whole process.
fn listen_for_interrupts() -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).await.is_err() {
                break;
            }
        }
    });
    rx
}

/// Drive `work` to completion, cancelling `token` on every interrupt that
/// arrives in the meantime.
async fn run_interruptible<T>(
    work: impl Future<Output = T>,
    interrupts: &mut mpsc::Receiver<()>,
    token: &CancellationToken,
) -> T {
    tokio::pin!(work);
    loop {
        tokio::select! {
            out = &mut work => return out,
            Some(()) = interrupts.recv() => token.cancel(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "chart_assistant=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match AppConfig::load_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(url) = args.base_url {
        config.base_url = url;
    }
    if let Some(secs) = args.timeout {
        config.request_timeout_secs = secs;
    }
    if let Err(e) = config.validate() {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let mut app = match ChartAssistant::new(&config, args.out_dir) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("failed to start HTTP client: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("Chart Assistant v{VERSION}. Type :help for commands.");
    if let Some(path) = args.csv {
        app.update(Message::OpenLocalFile(path, None)).await;
    }

    let mut interrupts = listen_for_interrupts();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            Some(()) = interrupts.recv() => break,
        };
        match line {
            Ok(Some(line)) => {
                let token = app.arm_cancel();
                let update = app.update(Message::parse(&line));
                if !run_interruptible(update, &mut interrupts, &token).await {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                eprintln!("stdin: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
