//! Command surface.
//!
//! Every mutation of the record set is expressed as one [`Command`] value
//! and funneled through [`Engine::execute`]. Transport layers (chat bots,
//! admin tools) only ever build commands; they never touch records or
//! timers directly. Commands are serde-tagged so they can travel as JSON.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use whiteflag_core::{Claim, ClaimFields, ClaimId, EngineError, Request, RequestDetails, RequestId};

use crate::engine::Engine;

/// A single lifecycle mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    SubmitRequest {
        tribe_name: String,
        requested_by: String,
        #[serde(default)]
        details: RequestDetails,
    },
    ApproveRequest {
        id: RequestId,
        actor: String,
    },
    DenyRequest {
        id: RequestId,
        actor: String,
    },
    EndRequestEarly {
        id: RequestId,
        actor: String,
        reason: String,
    },
    AddOrRefreshBounty {
        /// A request id or a tribe name.
        target: String,
        actor: String,
        reason: String,
    },
    RemoveBounty {
        target: String,
        actor: String,
    },
    SubmitClaim {
        bounty_id: RequestId,
        submitted_by: String,
        fields: ClaimFields,
    },
    ApproveClaim {
        id: ClaimId,
        actor: String,
    },
    DenyClaim {
        id: ClaimId,
        actor: String,
    },
}

/// The record a command acted on, as it stands after the command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandOutcome {
    Request(Request),
    Claim(Claim),
}

impl Engine {
    /// Run one command against the record set.
    pub async fn execute(self: &Arc<Self>, command: Command) -> Result<CommandOutcome, EngineError> {
        match command {
            Command::SubmitRequest {
                tribe_name,
                requested_by,
                details,
            } => self
                .submit_request(&tribe_name, &requested_by, details)
                .await
                .map(CommandOutcome::Request),
            Command::ApproveRequest { id, actor } => self
                .approve_request(id, &actor)
                .await
                .map(CommandOutcome::Request),
            Command::DenyRequest { id, actor } => self
                .deny_request(id, &actor)
                .await
                .map(CommandOutcome::Request),
            Command::EndRequestEarly { id, actor, reason } => self
                .end_request_early(id, &actor, &reason)
                .await
                .map(CommandOutcome::Request),
            Command::AddOrRefreshBounty {
                target,
                actor,
                reason,
            } => self
                .add_or_refresh_bounty(&target, &actor, &reason)
                .await
                .map(CommandOutcome::Request),
            Command::RemoveBounty { target, actor } => self
                .remove_bounty(&target, &actor)
                .await
                .map(CommandOutcome::Request),
            Command::SubmitClaim {
                bounty_id,
                submitted_by,
                fields,
            } => self
                .submit_claim(bounty_id, &submitted_by, fields)
                .await
                .map(CommandOutcome::Claim),
            Command::ApproveClaim { id, actor } => self
                .approve_claim(id, &actor)
                .await
                .map(CommandOutcome::Claim),
            Command::DenyClaim { id, actor } => self
                .deny_claim(id, &actor)
                .await
                .map(CommandOutcome::Claim),
        }
    }
}
