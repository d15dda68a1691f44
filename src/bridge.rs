//! Request/response channel between the panel side and the page side.
//!
//! Every request carries its own id and its own one-shot reply slot, so a reply
//! can only ever be consumed by the request that asked for it.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::PageError;
use crate::types::{PageSummary, TabInfo};

/// The page side: whatever can see the live DOM. Calls block.
pub trait PageHandler {
    fn active_tab(&mut self) -> anyhow::Result<Option<TabInfo>>;
    fn summarize(&mut self, goal: &str) -> anyhow::Result<PageSummary>;
}

/// The panel side's view of the page.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn active_tab(&self) -> Result<Option<TabInfo>, PageError>;
    async fn describe(&self, goal: &str) -> Result<PageSummary, PageError>;
}

#[derive(Debug)]
pub struct Reply<T> {
    pub id: Uuid,
    pub result: Result<T, PageError>,
}

#[derive(Debug)]
pub enum PageRequest {
    ActiveTab {
        id: Uuid,
        reply: oneshot::Sender<Reply<Option<TabInfo>>>,
    },
    Describe {
        id: Uuid,
        goal: String,
        reply: oneshot::Sender<Reply<PageSummary>>,
    },
}

#[derive(Clone)]
pub struct PageBridge {
    tx: mpsc::Sender<PageRequest>,
}

impl PageBridge {
    pub fn channel() -> (Self, mpsc::Receiver<PageRequest>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(Uuid, oneshot::Sender<Reply<T>>) -> PageRequest,
    ) -> Result<T, PageError> {
        let id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(id, reply_tx))
            .await
            .map_err(|_| PageError::Disconnected)?;

        let reply = reply_rx.await.map_err(|_| PageError::Disconnected)?;
        if reply.id != id {
            return Err(PageError::Mismatch {
                expected: id.to_string(),
                got: reply.id.to_string(),
            });
        }
        reply.result
    }
}

#[async_trait]
impl PageSource for PageBridge {
    async fn active_tab(&self) -> Result<Option<TabInfo>, PageError> {
        self.call(|id, reply| PageRequest::ActiveTab { id, reply }).await
    }

    async fn describe(&self, goal: &str) -> Result<PageSummary, PageError> {
        let goal = goal.to_string();
        self.call(|id, reply| PageRequest::Describe { id, goal, reply })
            .await
    }
}

/// Serve page requests until every bridge handle is dropped. Run on a blocking thread.
pub fn serve_page_requests<H: PageHandler>(mut rx: mpsc::Receiver<PageRequest>, mut handler: H) {
    while let Some(request) = rx.blocking_recv() {
        match request {
            PageRequest::ActiveTab { id, reply } => {
                debug!(%id, "active tab requested");
                let result = handler
                    .active_tab()
                    .map_err(|e| PageError::Browser(format!("{:#}", e)));
                if reply.send(Reply { id, result }).is_err() {
                    warn!(%id, "requester went away before the reply");
                }
            }
            PageRequest::Describe { id, goal, reply } => {
                debug!(%id, "page summary requested");
                let result = handler
                    .summarize(&goal)
                    .map_err(|e| PageError::Browser(format!("{:#}", e)));
                if reply.send(Reply { id, result }).is_err() {
                    warn!(%id, "requester went away before the reply");
                }
            }
        }
    }
    debug!("page worker stopped");
}
