//! tether-cli: operator CLI for the Tether HTTP API
//!
//! # Subcommands
//! - `connect <org> [--device <id>]`  — start or join a tenant session
//! - `disconnect <org>`               — tear the session down
//! - `status <org>`                   — show the persisted account
//! - `qr <org>`                       — print the current pairing code
//! - `send <org> <to> --text <body>`  — send a message
//! - `messages <org> [-n <limit>]`    — recorded sends, newest first
//! - `health`                         — server health
//!
//! Every subcommand accepts `--json` to print the raw response body.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8081";
const DEFAULT_LIMIT: u32 = 20;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "tether-cli", version, about = "Tether session gateway CLI")]
struct Cli {
    /// Tether HTTP server URL (overrides TETHER_HTTP_URL env var)
    #[arg(long, env = "TETHER_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Print the raw JSON response
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start (or join) a tenant's session
    Connect {
        organization_id: String,

        #[arg(long, default_value = "primary")]
        device: String,
    },

    /// Tear down a tenant's session
    Disconnect { organization_id: String },

    /// Show a tenant's persisted account
    Status { organization_id: String },

    /// Print the pairing code while the tenant is pairing
    Qr { organization_id: String },

    /// Send a message through a connected tenant
    Send {
        organization_id: String,

        /// Recipient protocol address, e.g. 15551234567@s.whatsapp.net
        to: String,

        #[arg(long)]
        text: Option<String>,

        #[arg(long = "type", default_value = "text")]
        message_type: String,

        #[arg(long)]
        media_url: Option<String>,

        #[arg(long)]
        lead: Option<String>,
    },

    /// List recorded sends, newest first
    Messages {
        organization_id: String,

        #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
        limit: u32,
    },

    /// Show server health
    Health,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub organization_id: String,
    pub device_id: String,
    pub connection_status: String,
    pub qr_code: Option<String>,
    pub phone_number: Option<String>,
    pub display_name: Option<String>,
    pub last_error: Option<String>,
    pub last_seen: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub message_id: Option<String>,
    pub to_jid: String,
    pub message_type: String,
    pub message_text: Option<String>,
    pub is_sent: bool,
    pub error_code: Option<String>,
    pub created_at: String,
}

// ============================================================================
// Pure helpers
// ============================================================================

pub fn send_body(
    organization_id: &str,
    to: &str,
    message_type: &str,
    text: Option<&str>,
    media_url: Option<&str>,
    lead: Option<&str>,
) -> Value {
    let mut body = json!({
        "organizationId": organization_id,
        "to": to,
        "messageType": message_type,
    });
    if let Some(obj) = body.as_object_mut() {
        if let Some(t) = text {
            obj.insert("messageText".into(), json!(t));
        }
        if let Some(u) = media_url {
            obj.insert("mediaUrl".into(), json!(u));
        }
        if let Some(l) = lead {
            obj.insert("leadId".into(), json!(l));
        }
    }
    body
}

/// `kind: detail` from a `{success:false, error:{kind, detail}}` body.
pub fn error_line(body: &Value) -> String {
    let kind = body["error"]["kind"].as_str().unwrap_or("error");
    let detail = body["error"]["detail"]
        .as_str()
        .or_else(|| body["error"].as_str())
        .unwrap_or("unknown error");
    format!("{}: {}", kind, detail)
}

pub fn format_account(a: &AccountView) -> String {
    let mut lines = vec![
        format!("Organization: {}", a.organization_id),
        format!("Device:       {}", a.device_id),
        format!("State:        {}", a.connection_status),
    ];
    if let Some(phone) = &a.phone_number {
        let name = a.display_name.as_deref().unwrap_or("-");
        lines.push(format!("Phone:        {} ({})", phone, name));
    }
    if let Some(code) = &a.qr_code {
        lines.push(format!("Pairing code: {}", code));
    }
    if let Some(err) = &a.last_error {
        lines.push(format!("Last error:   {}", err));
    }
    if let Some(seen) = &a.last_seen {
        lines.push(format!("Last seen:    {}", seen));
    }
    lines.join("\n")
}

pub fn format_message(m: &MessageView) -> String {
    let outcome = if m.is_sent {
        format!("sent {}", m.message_id.as_deref().unwrap_or("?"))
    } else {
        format!("failed ({})", m.error_code.as_deref().unwrap_or("unknown"))
    };
    let preview: String = m
        .message_text
        .as_deref()
        .unwrap_or("")
        .chars()
        .take(60)
        .collect();
    format!(
        "{}  {:<8} {:<32} {}  {}",
        m.created_at, m.message_type, m.to_jid, outcome, preview
    )
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client() -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(45))
        .build()?)
}

/// Perform the call; exit with the server's error on failure.
fn call(method: reqwest::Method, url: &str, body: Option<Value>) -> anyhow::Result<Value> {
    let mut req = client()?.request(method, url);
    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = match req.send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("tether-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    let body: Value = resp.json().unwrap_or(Value::Null);
    if !status.is_success() {
        eprintln!("tether-cli: server returned {}: {}", status, error_line(&body));
        std::process::exit(1);
    }
    Ok(body)
}

fn print_json(body: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(body)?);
    Ok(())
}

fn do_connect(server: &str, org: &str, device: &str, json_output: bool) -> anyhow::Result<()> {
    let body = call(
        reqwest::Method::POST,
        &format!("{}/api/v1/connect", server),
        Some(json!({"organizationId": org, "deviceId": device})),
    )?;
    if json_output {
        return print_json(&body);
    }
    println!("{}: {}", org, body["state"].as_str().unwrap_or("?"));
    Ok(())
}

fn do_disconnect(server: &str, org: &str, json_output: bool) -> anyhow::Result<()> {
    let body = call(
        reqwest::Method::POST,
        &format!("{}/api/v1/disconnect", server),
        Some(json!({"organizationId": org})),
    )?;
    if json_output {
        return print_json(&body);
    }
    println!("{}: {}", org, body["state"].as_str().unwrap_or("?"));
    Ok(())
}

fn do_status(server: &str, org: &str, json_output: bool) -> anyhow::Result<()> {
    let body = call(
        reqwest::Method::GET,
        &format!("{}/api/v1/status?organizationId={}", server, org),
        None,
    )?;
    if json_output {
        return print_json(&body);
    }
    let account: AccountView = serde_json::from_value(body["account"].clone())?;
    println!("{}", format_account(&account));
    Ok(())
}

fn do_qr(server: &str, org: &str, json_output: bool) -> anyhow::Result<()> {
    let body = call(
        reqwest::Method::GET,
        &format!("{}/api/v1/qr?organizationId={}", server, org),
        None,
    )?;
    if json_output {
        return print_json(&body);
    }
    println!("{}", body["qrCode"].as_str().unwrap_or(""));
    Ok(())
}

fn do_send(server: &str, body: Value, json_output: bool) -> anyhow::Result<()> {
    let resp = call(reqwest::Method::POST, &format!("{}/api/v1/send", server), Some(body))?;
    if json_output {
        return print_json(&resp);
    }
    println!("Sent: {}", resp["messageId"].as_str().unwrap_or("?"));
    Ok(())
}

fn do_messages(server: &str, org: &str, limit: u32, json_output: bool) -> anyhow::Result<()> {
    let body = call(
        reqwest::Method::GET,
        &format!("{}/api/v1/messages?organizationId={}&limit={}", server, org, limit),
        None,
    )?;
    if json_output {
        return print_json(&body);
    }
    let messages: Vec<MessageView> = serde_json::from_value(body["messages"].clone())?;
    if messages.is_empty() {
        eprintln!("No messages recorded for {}", org);
        return Ok(());
    }
    for m in &messages {
        println!("{}", format_message(m));
    }
    Ok(())
}

fn do_health(server: &str, json_output: bool) -> anyhow::Result<()> {
    let body = call(reqwest::Method::GET, &format!("{}/health", server), None)?;
    if json_output {
        return print_json(&body);
    }
    println!("Tether server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:       {}", body["version"].as_str().unwrap_or("?"));
    println!("Store:         {}", body["store"].as_str().unwrap_or("?"));
    println!("Live sessions: {}", body["liveSessions"].as_u64().unwrap_or(0));
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();
    let json_output = cli.json;

    let result = match cli.command {
        Commands::Connect {
            organization_id,
            device,
        } => do_connect(&server, &organization_id, &device, json_output),
        Commands::Disconnect { organization_id } => {
            do_disconnect(&server, &organization_id, json_output)
        }
        Commands::Status { organization_id } => do_status(&server, &organization_id, json_output),
        Commands::Qr { organization_id } => do_qr(&server, &organization_id, json_output),
        Commands::Send {
            organization_id,
            to,
            text,
            message_type,
            media_url,
            lead,
        } => {
            let body = send_body(
                &organization_id,
                &to,
                &message_type,
                text.as_deref(),
                media_url.as_deref(),
                lead.as_deref(),
            );
            do_send(&server, body, json_output)
        }
        Commands::Messages {
            organization_id,
            limit,
        } => do_messages(&server, &organization_id, limit, json_output),
        Commands::Health => do_health(&server, json_output),
    };

    if let Err(e) = result {
        eprintln!("tether-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
