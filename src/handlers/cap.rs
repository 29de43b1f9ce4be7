//! Capability negotiation plumbing.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::dispatch::{Context, Handler, HandlerError};
use crate::event::Event;
use crate::message::Message;
use crate::negotiate::Action;

/// Feeds CAP/AUTHENTICATE/SASL numerics to the negotiator and performs
/// the actions it returns.
pub struct NegotiationHandler;

#[async_trait]
impl Handler for NegotiationHandler {
    async fn handle(&self, ctx: &Arc<Context>, msg: &Message) -> Result<(), HandlerError> {
        let actions = ctx.negotiator.lock().handle(msg);
        for action in actions {
            match action {
                Action::Send(line) => {
                    ctx.send_raw(line).map_err(|_| HandlerError::Disconnected)?;
                }
                Action::SaslFailed(reason) => {
                    ctx.events.emit(Event::SaslFailed(reason));
                }
                Action::Ended => debug!("capability negotiation ended"),
            }
        }
        Ok(())
    }
}
