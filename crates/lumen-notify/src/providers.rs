use crate::NotifyError;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::Message;
use lumen_types::{Alert, AlertSeverity};

// ============================================================================
// 控制台
// ============================================================================

pub(crate) fn log_to_console(alert: &Alert) {
    match alert.severity {
        AlertSeverity::Critical => tracing::error!(
            rule = %alert.rule_name,
            alert_id = %alert.id,
            "[CRITICAL] {}",
            alert.message
        ),
        AlertSeverity::Warning => tracing::warn!(
            rule = %alert.rule_name,
            alert_id = %alert.id,
            "[WARNING] {}",
            alert.message
        ),
        AlertSeverity::Info => tracing::info!(
            rule = %alert.rule_name,
            alert_id = %alert.id,
            "[INFO] {}",
            alert.message
        ),
    }
}

// ============================================================================
// Webhook
// ============================================================================

pub(crate) fn webhook_payload(
    alert: &Alert,
    sent_at: DateTime<Utc>,
) -> Result<serde_json::Value, NotifyError> {
    Ok(serde_json::json!({
        "type": "alert",
        "alert": serde_json::to_value(alert)?,
        "sent_at": sent_at.to_rfc3339(),
    }))
}

// ============================================================================
// 邮件
// ============================================================================

pub(crate) fn email_payload(
    from: &Mailbox,
    to: &[Mailbox],
    alert: &Alert,
) -> Result<serde_json::Value, NotifyError> {
    let subject = format!(
        "[{}] {}",
        alert.severity.as_str().to_uppercase(),
        alert.rule_name
    );

    let mut builder = Message::builder()
        .from(from.clone())
        .subject(subject.clone())
        .header(ContentType::TEXT_PLAIN);
    for recipient in to {
        builder = builder.to(recipient.clone());
    }

    let email = builder
        .body(format!(
            "{}\n\nRule: {}\nSeverity: {}\nAlert ID: {}\nTime: {}",
            alert.message,
            alert.rule_name,
            alert.severity,
            alert.id,
            alert.timestamp.to_rfc3339()
        ))
        .map_err(|e| NotifyError::InvalidConfig(format!("cannot build email: {}", e)))?;

    Ok(serde_json::json!({
        "from": from.to_string(),
        "to": to.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
        "subject": subject,
        "raw": String::from_utf8_lossy(&email.formatted()),
    }))
}

// ============================================================================
// 数据库
// ============================================================================

pub(crate) fn database_payload(alert: &Alert) -> serde_json::Value {
    serde_json::json!({
        "table": "alerts",
        "row": {
            "id": alert.id,
            "rule_name": alert.rule_name,
            "severity": alert.severity.as_str(),
            "message": alert.message,
            "timestamp": alert.timestamp.to_rfc3339(),
            "resolved": alert.resolved,
        }
    })
}

// ============================================================================
// 聊天机器人
// ============================================================================

pub(crate) fn chat_payload(alert: &Alert) -> serde_json::Value {
    let color = match alert.severity {
        AlertSeverity::Info => "good",
        AlertSeverity::Warning => "warning",
        AlertSeverity::Critical => "danger",
    };

    serde_json::json!({
        "text": format!(
            "## {}\n\n{}\n\n**Severity**: {}\n\n**Time**: {}",
            alert.rule_name,
            alert.message,
            alert.severity,
            alert.timestamp.to_rfc3339()
        ),
        "attachments": [{
            "color": color,
            "title": alert.rule_name,
            "text": alert.message,
            "fields": [
                {
                    "title": "Severity",
                    "value": alert.severity.as_str(),
                    "short": true
                },
                {
                    "title": "Time",
                    "value": alert.timestamp.to_rfc3339(),
                    "short": true
                }
            ]
        }]
    })
}
