// Line editor input running on a dedicated thread; rustyline blocks.

use super::{ConsoleError, LineSource, PROMPT};
use async_trait::async_trait;
use rustyline::error::ReadlineError;
use rustyline::{Config as RLConfig, DefaultEditor};
use std::path::PathBuf;
use tokio::sync::mpsc;

pub struct EditorLines {
    rx: mpsc::Receiver<Result<String, ConsoleError>>,
}

impl EditorLines {
    /// Start the editor thread. History is loaded from and appended to
    /// `history`; a missing history file is fine.
    pub fn spawn(history: PathBuf) -> Result<Self, ConsoleError> {
        // Capacity 1: the thread reads ahead at most one line.
        let (tx, rx) = mpsc::channel(1);
        std::thread::Builder::new()
            .name("dim-line-editor".into())
            .spawn(move || editor_thread(history, tx))
            .map_err(ConsoleError::Io)?;
        Ok(Self { rx })
    }
}

fn editor_thread(history: PathBuf, tx: mpsc::Sender<Result<String, ConsoleError>>) {
    let rl_cfg = RLConfig::builder().history_ignore_space(true).build();
    let mut rl = match DefaultEditor::with_config(rl_cfg) {
        Ok(rl) => rl,
        Err(e) => {
            let _ = tx.blocking_send(Err(ConsoleError::Editor(e.to_string())));
            return;
        }
    };
    let _ = rl.load_history(history.as_path());
    loop {
        let item = match rl.readline(PROMPT) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = rl.add_history_entry(line.as_str());
                    let _ = rl.save_history(history.as_path());
                }
                Ok(line)
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => Err(ConsoleError::InputClosed),
            Err(e) => Err(ConsoleError::Editor(e.to_string())),
        };
        let stop = item.is_err();
        if tx.blocking_send(item).is_err() || stop {
            break;
        }
    }
}

#[async_trait]
impl LineSource for EditorLines {
    async fn next_line(&mut self, prompt: &str) -> Result<Option<String>, ConsoleError> {
        self.rx.next_line(prompt).await
    }
}
