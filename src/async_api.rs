use crate::cdp::{BrowserConfig, CdpSession};
use crate::scripts::Helper;
use crate::{CaptureOptions, CaptureReport, Error, Result, SettleConfig};
use std::sync::mpsc::{self, Sender};
use std::thread;
use tokio::sync::oneshot;

enum Command {
    Goto(String, oneshot::Sender<Result<()>>),
    Helper(Helper, oneshot::Sender<Result<serde_json::Value>>),
    Prepare(CaptureOptions, oneshot::Sender<Result<CaptureReport>>),
    Close(oneshot::Sender<Result<()>>),
}

/// An async-friendly browser backed by a dedicated worker thread.
///
/// The worker owns the synchronous `CdpSession`; async callers send it
/// commands and await the replies, so a long helper such as
/// `wait-for-images` never blocks the runtime.
#[derive(Clone)]
pub struct CaptureBrowser {
    cmd_tx: Sender<Command>,
}

impl CaptureBrowser {
    /// Launch Chrome on a background thread.
    pub async fn launch(config: Option<BrowserConfig>, settle: SettleConfig) -> Result<Self> {
        let config = config.unwrap_or_default();

        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = oneshot::channel::<Result<()>>();

        thread::spawn(move || {
            let mut session = match CdpSession::launch(config, settle) {
                Ok(s) => s,
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };
            let _ = init_tx.send(Ok(()));

            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    Command::Goto(url, resp) => {
                        let _ = resp.send(session.load_url(&url));
                    }
                    Command::Helper(helper, resp) => {
                        let _ = resp.send(session.run_helper(helper));
                    }
                    Command::Prepare(options, resp) => {
                        let _ = resp.send(session.prepare_for_capture(&options));
                    }
                    Command::Close(resp) => {
                        let _ = resp.send(session.close());
                        break;
                    }
                }
            }
        });

        let init_res = init_rx
            .await
            .map_err(|e| Error::Other(format!("Worker init canceled: {}", e)))?;
        init_res?;

        Ok(Self { cmd_tx })
    }

    async fn request<T>(
        &self,
        what: &str,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .map_err(|_| Error::Other(format!("{} failed: browser worker has exited", what)))?;
        rx.await
            .map_err(|e| Error::Other(format!("{} canceled: {}", what, e)))?
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        let url = url.to_string();
        self.request("Goto", move |tx| Command::Goto(url, tx)).await
    }

    /// Run one helper in the current page and return its JSON result
    pub async fn run_helper(&self, helper: Helper) -> Result<serde_json::Value> {
        self.request("Helper", move |tx| Command::Helper(helper, tx)).await
    }

    pub async fn prepare_for_capture(&self, options: CaptureOptions) -> Result<CaptureReport> {
        self.request("Prepare", move |tx| Command::Prepare(options, tx)).await
    }

    /// Shut down the worker and close the browser.
    pub async fn close(self) -> Result<()> {
        self.request("Close", Command::Close).await
    }
}
