use crate::base::loadstate::LoadState;
use crate::base::neterror::NetError;
use crate::dns::{IsolationKey, Name};
use crate::upgrade::{Authority, RedirectVerdict, UpgradeDecision};
use crate::urlrequest::context::URLRequestContext;
use http::Uri;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::watch;

/// Drives one request through resolve -> decide -> notify -> connect.
/// Roughly equivalent to net::URLRequestHttpJob, minus the HTTP transaction.
pub struct URLRequestHttpJob {
    context: Arc<URLRequestContext>,
    uri: Uri,
    isolation_key: IsolationKey,
    decision: Option<UpgradeDecision>,
    final_uri: Option<Uri>,
    stream: Option<TcpStream>,
    state: watch::Sender<LoadState>,
}

impl URLRequestHttpJob {
    pub fn new(context: Arc<URLRequestContext>, uri: Uri, isolation_key: IsolationKey) -> Self {
        let (state, _) = watch::channel(LoadState::Idle);
        Self {
            context,
            uri,
            isolation_key,
            decision: None,
            final_uri: None,
            stream: None,
            state,
        }
    }

    pub fn set_isolation_key(&mut self, isolation_key: IsolationKey) {
        self.isolation_key = isolation_key;
    }

    pub async fn start(&mut self) -> Result<(), NetError> {
        let result = self.run().await;
        let state = if result.is_ok() {
            LoadState::Connected
        } else {
            LoadState::Idle
        };
        self.state.send_replace(state);
        result
    }

    async fn run(&mut self) -> Result<(), NetError> {
        let context = self.context.clone();
        let original = Authority::from_uri(&self.uri)?;

        // 1. Resolve HTTPS records, only for requests that could be upgraded
        let decision = if context.upgrade_engine().is_eligible(&original) {
            self.state.send_replace(LoadState::ResolvingHttpsRecord);
            let name = Name::new(original.host.as_str());
            match context
                .coordinator()
                .resolve(name, self.isolation_key.clone())
                .await
            {
                Ok(resolution) => context.upgrade_engine().decide(&original, &resolution),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::debug!(host = %original.host, error = %e, "proceeding without upgrade");
                    UpgradeDecision::no_upgrade(original)
                }
            }
        } else {
            UpgradeDecision::no_upgrade(original)
        };

        // 2. Let redirect sinks veto the upgrade before anything switches
        if decision.should_upgrade {
            self.state
                .send_replace(LoadState::WaitingForRedirectConfirmation);
            let verdict = context
                .redirect_notifier()
                .notify(&decision.original, &decision.new)?;
            if verdict == RedirectVerdict::Rejected {
                self.decision = Some(decision);
                return Err(NetError::RedirectRejected);
            }
            self.final_uri = Some(decision.rewrite_uri(&self.uri)?);
        }

        // 3. Connect on the decided authority
        let target = decision.new.clone();
        self.decision = Some(decision);
        self.state.send_replace(LoadState::Connecting);
        let stream = context.connector().connect(&target).await?;
        tracing::debug!(target = %target, "request connected");
        self.stream = Some(stream);

        Ok(())
    }

    pub fn load_state(&self) -> LoadState {
        *self.state.borrow()
    }

    pub fn subscribe_load_state(&self) -> watch::Receiver<LoadState> {
        self.state.subscribe()
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The URI the request ended up on; the original one unless upgraded.
    pub fn final_uri(&self) -> &Uri {
        self.final_uri.as_ref().unwrap_or(&self.uri)
    }

    pub fn decision(&self) -> Option<&UpgradeDecision> {
        self.decision.as_ref()
    }

    pub fn take_stream(&mut self) -> Option<TcpStream> {
        self.stream.take()
    }
}
