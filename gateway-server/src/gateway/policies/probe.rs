//! Recording policy for pipeline tests

use crate::gateway::context::{Identity, RequestContext};
use crate::gateway::pipeline::{Next, PolicyError};
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub enum ProbeAction {
    Continue,
    Respond(StatusCode),
    /// Attach an identity with this consumer id, then continue
    Identify(&'static str),
    Fail,
}

/// Appends its name (and the consumer id seen in the context) to a shared log
#[derive(Debug, Clone)]
pub struct Probe {
    name: String,
    action: ProbeAction,
    log: Arc<Mutex<Vec<String>>>,
}

impl Probe {
    pub fn new(name: &str, action: ProbeAction, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            action,
            log,
        }
    }

    pub async fn apply(
        &self,
        mut ctx: RequestContext,
        next: Next<'_>,
    ) -> Result<Response, PolicyError> {
        let entry = match &ctx.identity {
            Some(identity) => format!("{}:{}", self.name, identity.consumer_id),
            None => self.name.clone(),
        };
        self.log.lock().unwrap().push(entry);

        match &self.action {
            ProbeAction::Continue => next.run(ctx).await,
            ProbeAction::Respond(status) => Ok((*status).into_response()),
            ProbeAction::Identify(consumer_id) => {
                ctx.identity = Some(Identity {
                    consumer_id: consumer_id.to_string(),
                    client_id: None,
                    scopes: Vec::new(),
                });
                next.run(ctx).await
            }
            ProbeAction::Fail => Err(PolicyError::StoreUnavailable("probe".to_string())),
        }
    }
}
