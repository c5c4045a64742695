//! # Payment Engine
//!
//! Executes one payment attempt per method and produces a settlement result.
//! Models a real gateway exchange: attempts suspend for a simulated delay
//! and can decline with a configurable probability.
//!
//! ## Outcome Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  attempt(request, due) ──► PaymentOutcome                               │
//! │                                                                         │
//! │  Every result is a VALUE. Declines, short cash, timeouts - all come    │
//! │  back as PaymentOutcome::Failure. Nothing escapes the engine boundary  │
//! │  as an error type or a panic.                                          │
//! │                                                                         │
//! │  cash           amount ≥ due → Success { change = amount − due }       │
//! │  card (cr/db)   amount == due, delay, possible decline, auth code      │
//! │  wallet / QR    amount == due, delay, near-certain success, reference  │
//! │  account_credit needs customer_ref; the credit ceiling belongs to the  │
//! │                 customers module (reached via event, never called)     │
//! │  mixed          falls back to the cash path (single-tender for now)    │
//! │                                                                         │
//! │  Every attempt runs under an explicit timeout; expiry is               │
//! │  Failure(TimedOut), and the attempt is never cancelled midway - it     │
//! │  runs to its outcome or its deadline.                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine does not know the cart: the orchestrator supplies `due`
//! (what it determined was owed), and change is `amount − due`.

use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use almacen_core::{Money, PaymentFailure, PaymentMethod, PaymentOutcome, PaymentRequest};
use almacen_runtime::{events, EventBus, CORE_MODULE_ID};

// =============================================================================
// Configuration
// =============================================================================

/// Per-method simulation knobs.
///
/// Production defaults model the original gateway behavior; tests use
/// [`PaymentConfig::instant`] for deterministic, zero-delay settlement.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    /// Cash drawer exchange delay.
    pub cash_delay: Duration,

    /// Card gateway round-trip delay.
    pub card_delay: Duration,
    /// Probability a card payment is declined (0.0 - 1.0).
    pub card_decline_rate: f64,

    /// Wallet gateway round-trip delay.
    pub wallet_delay: Duration,
    /// Probability a wallet payment fails.
    pub wallet_decline_rate: f64,

    /// QR exchange delay. QR payments are near-certain to succeed.
    pub qr_delay: Duration,

    /// Store-credit bookkeeping delay.
    pub credit_delay: Duration,

    /// Hard deadline for one attempt; expiry is `Failure(TimedOut)`.
    pub attempt_timeout: Duration,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        PaymentConfig {
            cash_delay: Duration::from_millis(100),
            card_delay: Duration::from_millis(2000),
            card_decline_rate: 0.05,
            wallet_delay: Duration::from_millis(3000),
            wallet_decline_rate: 0.02,
            qr_delay: Duration::from_millis(1500),
            credit_delay: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl PaymentConfig {
    /// Deterministic settlement: no delays, no declines. For tests.
    pub fn instant() -> Self {
        PaymentConfig {
            cash_delay: Duration::ZERO,
            card_delay: Duration::ZERO,
            card_decline_rate: 0.0,
            wallet_delay: Duration::ZERO,
            wallet_decline_rate: 0.0,
            qr_delay: Duration::ZERO,
            credit_delay: Duration::ZERO,
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Payment Engine
// =============================================================================

/// Executes payment attempts and announces them on the bus.
pub struct PaymentEngine {
    bus: EventBus,
    config: PaymentConfig,
}

impl PaymentEngine {
    pub fn new(bus: EventBus, config: PaymentConfig) -> Self {
        PaymentEngine { bus, config }
    }

    /// Attempts to settle a payment of `request.amount` against `due`.
    ///
    /// Publishes `payment.started`, then `payment.completed` or
    /// `payment.failed` with the full request and outcome.
    pub async fn attempt(&self, request: &PaymentRequest, due: Money) -> PaymentOutcome {
        info!(
            method = ?request.method,
            amount = %request.amount,
            due = %due,
            "Payment attempt started"
        );

        self.bus.publish(
            events::PAYMENT_STARTED,
            CORE_MODULE_ID,
            json!({ "request": request, "due": due }),
        );

        let outcome = match timeout(self.config.attempt_timeout, self.settle(request, due)).await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(method = ?request.method, "Payment attempt timed out");
                PaymentOutcome::Failure {
                    reason: PaymentFailure::TimedOut,
                }
            }
        };

        match &outcome {
            PaymentOutcome::Success { settlement_ref, .. } => {
                info!(settlement_ref = %settlement_ref, "Payment settled");
                self.bus.publish(
                    events::PAYMENT_COMPLETED,
                    CORE_MODULE_ID,
                    json!({ "request": request, "outcome": outcome }),
                );
            }
            PaymentOutcome::Failure { reason } => {
                warn!(reason = %reason, "Payment failed");
                self.bus.publish(
                    events::PAYMENT_FAILED,
                    CORE_MODULE_ID,
                    json!({ "request": request, "outcome": outcome }),
                );
            }
        }

        outcome
    }

    async fn settle(&self, request: &PaymentRequest, due: Money) -> PaymentOutcome {
        if !request.amount.is_positive() {
            return failure(PaymentFailure::InvalidAmount);
        }

        match request.method {
            // Mixed tender falls back to the cash path in this version.
            PaymentMethod::Cash | PaymentMethod::Mixed => self.settle_cash(request, due).await,
            PaymentMethod::CreditCard | PaymentMethod::DebitCard => {
                self.settle_card(request, due).await
            }
            PaymentMethod::Wallet => self.settle_wallet(request, due).await,
            PaymentMethod::Qr => self.settle_qr(request, due).await,
            PaymentMethod::AccountCredit => self.settle_account_credit(request, due).await,
        }
    }

    async fn settle_cash(&self, request: &PaymentRequest, due: Money) -> PaymentOutcome {
        sleep(self.config.cash_delay).await;

        if request.amount < due {
            return failure(PaymentFailure::InsufficientTendered {
                short: due - request.amount,
            });
        }

        let change = request.amount - due;
        debug!(change = %change, "Cash settled");
        PaymentOutcome::Success {
            settlement_ref: settlement_ref(),
            auth_code: None,
            change: Some(change),
        }
    }

    async fn settle_card(&self, request: &PaymentRequest, due: Money) -> PaymentOutcome {
        if let Some(mismatch) = exact_amount_required(request, due) {
            return mismatch;
        }

        sleep(self.config.card_delay).await;

        if declined(self.config.card_decline_rate) {
            return failure(PaymentFailure::Declined);
        }

        PaymentOutcome::Success {
            settlement_ref: settlement_ref(),
            auth_code: Some(auth_code()),
            change: None,
        }
    }

    async fn settle_wallet(&self, request: &PaymentRequest, due: Money) -> PaymentOutcome {
        if let Some(mismatch) = exact_amount_required(request, due) {
            return mismatch;
        }

        sleep(self.config.wallet_delay).await;

        if declined(self.config.wallet_decline_rate) {
            return failure(PaymentFailure::Declined);
        }

        PaymentOutcome::Success {
            settlement_ref: settlement_ref(),
            auth_code: Some(format!("WAL-{}", auth_code())),
            change: None,
        }
    }

    async fn settle_qr(&self, request: &PaymentRequest, due: Money) -> PaymentOutcome {
        if let Some(mismatch) = exact_amount_required(request, due) {
            return mismatch;
        }

        sleep(self.config.qr_delay).await;

        PaymentOutcome::Success {
            settlement_ref: settlement_ref(),
            auth_code: Some(format!("QR-{}", auth_code())),
            change: None,
        }
    }

    /// Store credit ("fiado"). The engine only records that this method was
    /// requested; the credit ceiling is the customers module's invariant,
    /// reached via the `sale.completed` event, never a direct call.
    async fn settle_account_credit(
        &self,
        request: &PaymentRequest,
        due: Money,
    ) -> PaymentOutcome {
        let Some(customer) = request
            .customer_ref
            .as_deref()
            .filter(|c| !c.trim().is_empty())
        else {
            return failure(PaymentFailure::MissingCustomerRef);
        };

        if let Some(mismatch) = exact_amount_required(request, due) {
            return mismatch;
        }

        sleep(self.config.credit_delay).await;

        PaymentOutcome::Success {
            settlement_ref: settlement_ref(),
            auth_code: Some(format!("CREDIT-{customer}")),
            change: None,
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn failure(reason: PaymentFailure) -> PaymentOutcome {
    PaymentOutcome::Failure { reason }
}

/// Non-cash tenders must match the amount due exactly.
fn exact_amount_required(request: &PaymentRequest, due: Money) -> Option<PaymentOutcome> {
    if request.amount != due {
        Some(failure(PaymentFailure::AmountMismatch {
            due,
            tendered: request.amount,
        }))
    } else {
        None
    }
}

fn declined(rate: f64) -> bool {
    rate > 0.0 && rand::thread_rng().gen::<f64>() < rate
}

fn settlement_ref() -> String {
    Uuid::new_v4().to_string()
}

/// Six uppercase alphanumerics, in the shape gateways answer with.
fn auth_code() -> String {
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| {
            const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
            CHARSET[rng.gen_range(0..CHARSET.len())] as char
        })
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
