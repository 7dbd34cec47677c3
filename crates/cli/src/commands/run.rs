//! `taskloop run`: single-task or interactive mode.

use std::io::Write;

use taskloop_config::AppConfig;
use taskloop_core::error::Error;
use taskloop_gateway::{Dispatcher, LoopRequest, LoopResponse};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

pub async fn run(
    message: Option<String>,
    session: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let dispatcher = match taskloop_gateway::build_dispatcher(&config).await {
        Ok(dispatcher) => dispatcher,
        Err(e @ Error::Config { .. }) => {
            eprintln!();
            eprintln!("  ERROR: {e}");
            eprintln!();
            eprintln!("  Set TASKLOOP_API_KEY (or OPENAI_API_KEY), or edit");
            eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
            eprintln!();
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(task) = message {
        let response = submit_interruptible(&dispatcher, LoopRequest { task, session }).await?;
        println!("{}", response.answer);
        return Ok(());
    }

    println!();
    println!("  taskloop interactive mode");
    println!("  Provider:  {} ({})", config.provider, config.model);
    println!("  Tools:     {:?}", config.tools.backend);
    println!("  Type a task and press Enter. Ctrl+C cancels a running task, 'exit' quits.");
    println!();

    let mut session = session;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let task = line.trim();
        if task.is_empty() {
            continue;
        }
        if task == "exit" || task == "quit" {
            break;
        }

        let request = LoopRequest {
            task: task.to_string(),
            session: session.clone(),
        };
        match submit_interruptible(&dispatcher, request).await {
            Ok(response) => {
                // Keep later lines on the same conversation
                session.get_or_insert(response.conversation_id);
                println!();
                for line in response.answer.lines() {
                    println!("  Assistant > {line}");
                }
                println!();
            }
            Err(Error::Cancelled) => eprintln!("  [Cancelled]"),
            Err(e) => eprintln!("  [Error] {e}"),
        }
    }

    println!();
    Ok(())
}

/// Submit a request, cancelling it if Ctrl-C arrives first.
async fn submit_interruptible(
    dispatcher: &Dispatcher,
    request: LoopRequest,
) -> Result<LoopResponse, Error> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = dispatcher.submit(request, cancel).await;
    watcher.abort();
    result
}
