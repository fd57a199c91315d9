use serde_json::json;
use tether_core::ipc::{TetherRequest, TetherResponse};

use crate::context::AppContext;
use crate::subsystems::dispatch::SendRequest;

pub async fn handle_request(request: TetherRequest, ctx: &AppContext) -> TetherResponse {
    match request {
        TetherRequest::Ping => TetherResponse::pong(),
        TetherRequest::Health => match ctx.store_health().await {
            Ok(store) => TetherResponse::ok(json!({
                "status": "healthy",
                "store": store,
                "liveSessions": ctx.sessions.live_count(),
            })),
            Err(e) => TetherResponse::err(e.kind(), format!("Store health check failed: {}", e)),
        },
        TetherRequest::Connect {
            organization_id,
            device_id,
        } => match ctx.sessions.connect(&organization_id, &device_id).await {
            Ok(state) => TetherResponse::ok(json!({
                "organizationId": organization_id,
                "state": state,
            })),
            Err(e) => TetherResponse::from_error(&e),
        },
        TetherRequest::Disconnect { organization_id } => {
            match ctx.sessions.disconnect(&organization_id).await {
                Ok(state) => TetherResponse::ok(json!({
                    "organizationId": organization_id,
                    "state": state,
                })),
                Err(e) => TetherResponse::from_error(&e),
            }
        }
        TetherRequest::Status { organization_id } => {
            match ctx.sessions.get_account(&organization_id).await {
                Ok(account) => TetherResponse::ok(json!({ "account": account })),
                Err(e) => TetherResponse::from_error(&e),
            }
        }
        TetherRequest::PairingCode { organization_id } => {
            match ctx.sessions.pairing_artifact(&organization_id).await {
                Ok(code) => TetherResponse::ok(json!({ "qrCode": code })),
                Err(e) => TetherResponse::from_error(&e),
            }
        }
        TetherRequest::Send {
            organization_id,
            to,
            message_type,
            message_text,
            media_url,
            lead_id,
        } => {
            let req = SendRequest {
                organization_id,
                to,
                message_type,
                message_text,
                media_url,
                lead_id,
            };
            match ctx.dispatcher.send(req).await {
                Ok(outcome) => TetherResponse::ok(json!({
                    "messageId": outcome.message_id,
                    "recordId": outcome.record_id,
                })),
                Err(e) => TetherResponse::from_error(&e),
            }
        }
        TetherRequest::Messages {
            organization_id,
            limit,
        } => match ctx.dispatcher.list_messages(&organization_id, limit).await {
            Ok(messages) => TetherResponse::ok(json!({
                "count": messages.len(),
                "messages": messages,
            })),
            Err(e) => TetherResponse::from_error(&e),
        },
    }
}
