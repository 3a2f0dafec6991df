use crate::base::loadstate::LoadState;
use crate::base::neterror::NetError;
use crate::dns::IsolationKey;
use crate::upgrade::{Authority, UpgradeDecision};
use crate::urlrequest::context::URLRequestContext;
use crate::urlrequest::job::URLRequestHttpJob;
use http::Uri;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::watch;

pub struct URLRequest {
    job: URLRequestHttpJob,
}

impl URLRequest {
    pub fn new(uri: &str, context: Arc<URLRequestContext>) -> Result<Self, NetError> {
        let uri: Uri = uri.parse().map_err(|_| NetError::InvalidUrl)?;
        Authority::from_uri(&uri)?;

        // In real Chromium, we'd pick the job based on scheme (HttpJob, FileJob, etc)
        let job = URLRequestHttpJob::new(context, uri, IsolationKey::default());

        Ok(Self { job })
    }

    /// Partition the request's record lookups.
    pub fn with_isolation_key(mut self, isolation_key: IsolationKey) -> Self {
        self.job.set_isolation_key(isolation_key);
        self
    }

    pub async fn start(&mut self) -> Result<(), NetError> {
        self.job.start().await
    }

    pub fn load_state(&self) -> LoadState {
        self.job.load_state()
    }

    /// Watch load state changes while `start` runs.
    pub fn subscribe_load_state(&self) -> watch::Receiver<LoadState> {
        self.job.subscribe_load_state()
    }

    pub fn original_uri(&self) -> &Uri {
        self.job.uri()
    }

    pub fn final_uri(&self) -> &Uri {
        self.job.final_uri()
    }

    pub fn decision(&self) -> Option<&UpgradeDecision> {
        self.job.decision()
    }

    /// Take the connected stream once `start` succeeded.
    pub fn take_stream(&mut self) -> Option<TcpStream> {
        self.job.take_stream()
    }
}
