use crate::config::{Action, Config, MailConfig};
use crate::error::{Result, WatchError};
use crate::types::{FieldValue, LogEntry, Report};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Local, TimeZone, Utc};
use log::{error, info, warn};
use std::fmt::Display;
use std::process::Stdio;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::Command;

const CTIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Base64 body line length (RFC 2045)
const BODY_LINE_LENGTH: usize = 76;
/// UTF-8 bytes per encoded-word, keeping folded header lines within 76 characters (RFC 2047)
const HEADER_WORD_BYTES: usize = 39;

/// How a report ended up being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The report was empty
    Nothing,
    Printed,
    Mailed,
    /// Mailing failed and the report was printed instead
    FellBackToPrint,
}

fn ctime<Tz: TimeZone>(timestamp: DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: Display,
{
    timestamp.with_timezone(tz).format(CTIME_FORMAT).to_string()
}

/// Render one entry as a single report line.
pub fn format_entry<Tz: TimeZone>(entry: &LogEntry, tz: &Tz) -> String
where
    Tz::Offset: Display,
{
    let mut words: Vec<String> = Vec::new();

    words.push(if entry.unit().is_some() { "U" } else { "S" }.to_string());

    if let Some(timestamp) = entry.timestamp() {
        words.push(ctime(timestamp, tz));
    }
    if let Some(priority) = entry.priority() {
        words.push(priority.to_string());
    }
    if let Some(unit) = entry.unit() {
        words.push(unit.to_string());
    }

    let mut name = entry.identifier().unwrap_or_default().to_string();
    if let Some(pid) = entry.pid() {
        name.push_str(&format!("[{}]", pid));
    }
    name.push(':');
    words.push(name);

    words.push(match entry.message() {
        Some(FieldValue::Text(message)) => message.clone(),
        Some(FieldValue::Binary(bytes)) => format!("[{} bytes blob data]", bytes.len()),
        None => "EMPTY!".to_string(),
    });

    words.join(" ")
}

impl Report {
    pub fn render<Tz: TimeZone>(&self, tz: &Tz) -> String
    where
        Tz::Offset: Display,
    {
        self.entries()
            .iter()
            .map(|entry| format_entry(entry, tz))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Fill in the mail subject template.
    pub fn subject<Tz: TimeZone>(&self, template: &str, hostname: &str, tz: &Tz) -> String
    where
        Tz::Offset: Display,
    {
        let (since, until) = match self.time_range() {
            Some((first, last)) => (ctime(first, tz), ctime(last, tz)),
            None => ("?".to_string(), "?".to_string()),
        };

        template
            .replace("{hostname}", hostname)
            .replace("{count}", &self.len().to_string())
            .replace("{since}", &since)
            .replace("{until}", &until)
    }
}

/// Header value as-is when it is plain ASCII, otherwise as folded
/// `=?utf-8?B?...?=` encoded-words.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in value.chars() {
        if chunk.len() + c.len_utf8() > HEADER_WORD_BYTES {
            words.push(format!("=?utf-8?B?{}?=", BASE64.encode(chunk.as_bytes())));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(format!("=?utf-8?B?{}?=", BASE64.encode(chunk.as_bytes())));
    }

    words.join("\n ")
}

/// Base64 body split into lines, so long journal messages never exceed
/// the line limit of the mail transport.
fn encode_body(text: &str) -> String {
    let encoded = BASE64.encode(text.as_bytes());
    encoded
        .as_bytes()
        .chunks(BODY_LINE_LENGTH)
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the message handed to the MTA.
pub fn compose_mail<Tz: TimeZone>(
    mail: &MailConfig,
    report: &Report,
    hostname: &str,
    now: DateTime<Utc>,
    tz: &Tz,
) -> String
where
    Tz::Offset: Display,
{
    let subject = report.subject(&mail.subject, hostname, tz);

    let mut body = report.render(tz);
    body.push('\n');

    let mut message = String::new();
    message.push_str(&format!("From: {}\n", mail.from));
    message.push_str(&format!("To: {}\n", mail.to));
    message.push_str(&format!("Subject: {}\n", encode_header(&subject)));
    message.push_str(&format!("Date: {}\n", now.with_timezone(tz).to_rfc2822()));
    message.push_str("MIME-Version: 1.0\n");
    message.push_str("Content-Type: text/plain; charset=utf-8\n");
    message.push_str("Content-Transfer-Encoding: base64\n");
    message.push('\n');
    message.push_str(&encode_body(&body));
    message.push('\n');

    message
}

/// Pipe `message` into the configured mail command.
pub async fn send_mail(command: &[String], message: &str) -> Result<()> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| WatchError::DeliveryError("Empty mail command".to_string()))?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| WatchError::DeliveryError(format!("Failed to start {}: {}", program, e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(message.as_bytes())
            .await
            .map_err(|e| WatchError::DeliveryError(format!("Failed to write to {}: {}", program, e)))?;
        // Closing stdin ends the message
        drop(stdin);
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| WatchError::DeliveryError(format!("Failed to wait for {}: {}", program, e)))?;

    if !output.status.success() {
        return Err(WatchError::DeliveryError(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(())
}

async fn print_report<W, Tz>(report: &Report, out: &mut W, tz: &Tz) -> Result<()>
where
    W: AsyncWrite + Unpin,
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut text = report.render(tz);
    text.push('\n');
    out.write_all(text.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}

/// Deliver the report through the configured channel.
///
/// A failed mail is not an error: it is logged and the report goes to `out`
/// instead. Only a failure to write to `out` is returned.
pub async fn deliver<W>(config: &Config, report: &Report, out: &mut W) -> Result<Delivery>
where
    W: AsyncWrite + Unpin,
{
    deliver_with(config, report, out, &Local).await
}

pub async fn deliver_with<W, Tz>(config: &Config, report: &Report, out: &mut W, tz: &Tz) -> Result<Delivery>
where
    W: AsyncWrite + Unpin,
    Tz: TimeZone,
    Tz::Offset: Display,
{
    if report.is_empty() {
        info!("No new journal entries to report");
        return Ok(Delivery::Nothing);
    }

    match config.action {
        Action::Print => {
            print_report(report, out, tz).await?;
            info!("Printed {} journal entries", report.len());
            Ok(Delivery::Printed)
        }
        Action::Mail => {
            let message = compose_mail(&config.mail, report, &hostname(), Utc::now(), tz);

            match send_mail(&config.mail.command, &message).await {
                Ok(()) => {
                    info!("Mailed {} journal entries to {}", report.len(), config.mail.to);
                    Ok(Delivery::Mailed)
                }
                Err(e) => {
                    error!("{}", e);
                    warn!("Printing the report instead");
                    print_report(report, out, tz).await?;
                    Ok(Delivery::FellBackToPrint)
                }
            }
        }
    }
}

fn hostname() -> String {
    match nix::unistd::gethostname() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!("Failed to get hostname: {}", e);
            "localhost".to_string()
        }
    }
}
