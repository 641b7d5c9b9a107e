//! # Payment Webhooks
//!
//! Gateway notifications behind `POST /functions/v1/payment-webhook/{gateway}`.
//!
//! Each supported gateway's payload is normalized into a [`PaymentEvent`],
//! upserted into the [`PaymentLedger`] by `(gateway, external_id)`, and
//! applied to the premium directory:
//!
//! - Approved with a known user grants premium
//! - Refunded or Cancelled revokes it
//!
//! Event types that say nothing about a payment are acknowledged and dropped.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::errors::{PaymentError, PaymentResult};
use super::usage::PremiumDirectory;
use crate::auth::crypto::{constant_time_str_eq, hmac_sha256_hex};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

/// Default tolerance between a Stripe signature timestamp and now
pub const DEFAULT_SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Supported payment gateways
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gateway {
    MercadoPago,
    Stripe,
}

impl Gateway {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gateway::MercadoPago => "mercadopago",
            Gateway::Stripe => "stripe",
        }
    }
}

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gateway {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mercadopago" => Ok(Gateway::MercadoPago),
            "stripe" => Ok(Gateway::Stripe),
            other => Err(PaymentError::UnsupportedGateway(other.to_string())),
        }
    }
}

/// Normalized payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Rejected,
    Refunded,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses that end premium access
    pub fn revokes_access(&self) -> bool {
        matches!(self, PaymentStatus::Refunded | PaymentStatus::Cancelled)
    }

    fn from_mercadopago(status: &str) -> Self {
        match status {
            "approved" => PaymentStatus::Approved,
            "rejected" => PaymentStatus::Rejected,
            "refunded" | "charged_back" => PaymentStatus::Refunded,
            "cancelled" => PaymentStatus::Cancelled,
            // pending, in_process, in_mediation, authorized
            _ => PaymentStatus::Pending,
        }
    }
}

/// A gateway notification in gateway-independent form
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentEvent {
    pub gateway: Gateway,
    pub external_id: String,
    pub status: PaymentStatus,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub user_id: Option<Uuid>,
    pub received_at: DateTime<Utc>,
}

fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn user_from(value: Option<&Value>) -> Option<Uuid> {
    value
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// Normalize a MercadoPago notification
///
/// Returns `None` for notifications that are not about a payment.
pub fn normalize_mercadopago(
    body: &Value,
    received_at: DateTime<Utc>,
) -> PaymentResult<Option<PaymentEvent>> {
    let kind = body
        .get("type")
        .or_else(|| body.get("topic"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let action = body.get("action").and_then(Value::as_str).unwrap_or_default();

    if kind != "payment" && !action.starts_with("payment.") {
        return Ok(None);
    }

    let data = body
        .get("data")
        .ok_or_else(|| PaymentError::InvalidPayload("missing data".into()))?;
    let external_id = id_string(data.get("id"))
        .ok_or_else(|| PaymentError::InvalidPayload("missing data.id".into()))?;

    let status = data
        .get("status")
        .and_then(Value::as_str)
        .map(PaymentStatus::from_mercadopago)
        .unwrap_or(PaymentStatus::Pending);

    let amount_cents = data
        .get("transaction_amount")
        .and_then(Value::as_f64)
        .map(|amount| (amount * 100.0).round() as i64);

    Ok(Some(PaymentEvent {
        gateway: Gateway::MercadoPago,
        external_id,
        status,
        amount_cents,
        currency: data
            .get("currency_id")
            .and_then(Value::as_str)
            .map(str::to_ascii_uppercase),
        user_id: user_from(data.get("external_reference")),
        received_at,
    }))
}

/// Normalize a Stripe event
///
/// Events of one payment share the payment intent id as their external id,
/// so a refund lands on the record the checkout created.
pub fn normalize_stripe(
    body: &Value,
    received_at: DateTime<Utc>,
) -> PaymentResult<Option<PaymentEvent>> {
    let kind = body
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| PaymentError::InvalidPayload("missing type".into()))?;

    let object = body
        .pointer("/data/object")
        .ok_or_else(|| PaymentError::InvalidPayload("missing data.object".into()))?;

    let status = match kind {
        "checkout.session.completed" => {
            match object.get("payment_status").and_then(Value::as_str) {
                Some("unpaid") => PaymentStatus::Pending,
                _ => PaymentStatus::Approved,
            }
        }
        "payment_intent.succeeded" => PaymentStatus::Approved,
        "payment_intent.payment_failed" => PaymentStatus::Rejected,
        "charge.refunded" => PaymentStatus::Refunded,
        "payment_intent.canceled" => PaymentStatus::Cancelled,
        _ => return Ok(None),
    };

    let external_id = id_string(object.get("payment_intent"))
        .or_else(|| id_string(object.get("id")))
        .ok_or_else(|| PaymentError::InvalidPayload("missing data.object.id".into()))?;

    let amount_cents = object
        .get("amount_total")
        .or_else(|| object.get("amount"))
        .and_then(Value::as_i64);

    let user_id = user_from(object.pointer("/metadata/user_id"))
        .or_else(|| user_from(object.get("client_reference_id")));

    Ok(Some(PaymentEvent {
        gateway: Gateway::Stripe,
        external_id,
        status,
        amount_cents,
        currency: object
            .get("currency")
            .and_then(Value::as_str)
            .map(str::to_ascii_uppercase),
        user_id,
        received_at,
    }))
}

/// Verify a `Stripe-Signature` header
///
/// The header carries `t=<unix seconds>` and one or more `v1=<hex>`
/// entries; the signature is HMAC-SHA256 over `"<t>.<body>"`.
pub fn verify_stripe_signature(
    header: &str,
    body: &[u8],
    secret: &str,
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> PaymentResult<()> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", t)) => timestamp = t.parse::<i64>().ok(),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| PaymentError::InvalidSignature("missing timestamp".into()))?;
    if signatures.is_empty() {
        return Err(PaymentError::InvalidSignature("missing v1 signature".into()));
    }
    let skew = now.timestamp().checked_sub(timestamp).map(i64::unsigned_abs);
    let tolerance = u64::try_from(tolerance_secs).unwrap_or(0);
    if !matches!(skew, Some(skew) if skew <= tolerance) {
        return Err(PaymentError::InvalidSignature(
            "timestamp outside tolerance".into(),
        ));
    }

    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(body);
    let expected = hmac_sha256_hex(secret.as_bytes(), &signed);

    if signatures
        .iter()
        .any(|sig| constant_time_str_eq(sig, &expected))
    {
        Ok(())
    } else {
        Err(PaymentError::InvalidSignature("signature mismatch".into()))
    }
}

/// Stored payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRecord {
    pub event: PaymentEvent,
    pub first_seen: DateTime<Utc>,
    pub updates: u32,
}

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

/// Payment transactions keyed by `(gateway, external_id)`
#[derive(Debug, Default)]
pub struct PaymentLedger {
    records: RwLock<HashMap<(Gateway, String), PaymentRecord>>,
}

impl PaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a payment
    ///
    /// A user id, amount or currency seen earlier is kept when the new
    /// event does not carry one. Returns the stored event.
    pub fn upsert(&self, event: PaymentEvent) -> (Upsert, PaymentEvent) {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = (event.gateway, event.external_id.clone());

        match records.get_mut(&key) {
            Some(record) => {
                let previous = &record.event;
                let merged = PaymentEvent {
                    user_id: event.user_id.or(previous.user_id),
                    amount_cents: event.amount_cents.or(previous.amount_cents),
                    currency: event.currency.clone().or_else(|| previous.currency.clone()),
                    ..event
                };
                record.event = merged.clone();
                record.updates += 1;
                (Upsert::Updated, merged)
            }
            None => {
                records.insert(
                    key,
                    PaymentRecord {
                        event: event.clone(),
                        first_seen: event.received_at,
                        updates: 0,
                    },
                );
                (Upsert::Inserted, event)
            }
        }
    }

    pub fn get(&self, gateway: Gateway, external_id: &str) -> Option<PaymentRecord> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(gateway, external_id.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a webhook call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed(PaymentEvent),
    Ignored,
}

/// Webhook settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentsConfig {
    /// Stripe endpoint secret; signatures are checked only when set
    pub stripe_webhook_secret: Option<String>,
    pub signature_tolerance_secs: i64,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            stripe_webhook_secret: None,
            signature_tolerance_secs: DEFAULT_SIGNATURE_TOLERANCE_SECS,
        }
    }
}

/// Payment webhook service shared by the HTTP handlers
pub struct PaymentService {
    config: PaymentsConfig,
    ledger: Arc<PaymentLedger>,
    premium: Arc<PremiumDirectory>,
    metrics: Arc<MetricsRegistry>,
}

impl PaymentService {
    pub fn new(
        config: PaymentsConfig,
        ledger: Arc<PaymentLedger>,
        premium: Arc<PremiumDirectory>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            config,
            ledger,
            premium,
            metrics,
        }
    }

    pub fn ledger(&self) -> &Arc<PaymentLedger> {
        &self.ledger
    }

    /// Handle one webhook call
    pub fn handle(
        &self,
        gateway: &str,
        signature: Option<&str>,
        body: &[u8],
    ) -> PaymentResult<WebhookOutcome> {
        self.handle_at(gateway, signature, body, Utc::now())
    }

    pub fn handle_at(
        &self,
        gateway: &str,
        signature: Option<&str>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> PaymentResult<WebhookOutcome> {
        let result = self.process(gateway, signature, body, now);

        match &result {
            Ok(WebhookOutcome::Processed(event)) => {
                self.metrics.increment_webhooks_processed();
                log_event_with_fields(
                    Event::WebhookReceived,
                    &[
                        ("external_id", event.external_id.as_str()),
                        ("gateway", event.gateway.as_str()),
                        ("status", event.status.as_str()),
                    ],
                );
            }
            Ok(WebhookOutcome::Ignored) => {
                log_event_with_fields(Event::WebhookIgnored, &[("gateway", gateway)]);
            }
            Err(e) => {
                self.metrics.increment_webhooks_failed();
                log_event_with_fields(
                    Event::WebhookFailed,
                    &[("gateway", gateway), ("reason", e.to_string().as_str())],
                );
            }
        }

        result
    }

    fn process(
        &self,
        gateway: &str,
        signature: Option<&str>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> PaymentResult<WebhookOutcome> {
        let gateway = gateway.parse::<Gateway>()?;

        if gateway == Gateway::Stripe {
            if let Some(secret) = self.config.stripe_webhook_secret.as_deref() {
                let header = signature
                    .ok_or_else(|| PaymentError::InvalidSignature("missing header".into()))?;
                verify_stripe_signature(
                    header,
                    body,
                    secret,
                    self.config.signature_tolerance_secs,
                    now,
                )?;
            }
        }

        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| PaymentError::InvalidPayload(e.to_string()))?;

        let event = match gateway {
            Gateway::MercadoPago => normalize_mercadopago(&payload, now)?,
            Gateway::Stripe => normalize_stripe(&payload, now)?,
        };

        let Some(event) = event else {
            return Ok(WebhookOutcome::Ignored);
        };

        let (_, stored) = self.ledger.upsert(event);
        self.apply_premium(&stored);

        Ok(WebhookOutcome::Processed(stored))
    }

    fn apply_premium(&self, event: &PaymentEvent) {
        let Some(user) = event.user_id else {
            return;
        };

        let changed = if event.status == PaymentStatus::Approved {
            let source = format!("{}:{}", event.gateway, event.external_id);
            self.premium.grant(user, source, event.received_at)
        } else if event.status.revokes_access() {
            self.premium.revoke(user)
        } else {
            false
        };

        if changed {
            log_event_with_fields(
                Event::PremiumChanged,
                &[
                    ("premium", (event.status == PaymentStatus::Approved).to_string().as_str()),
                    ("user", user.to_string().as_str()),
                ],
            );
        }
    }
}
