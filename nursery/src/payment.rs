//! Advance-payment protocol.
//!
//! Two halves:
//!
//! 1. [`PaymentGateway::create_intent`] asks the external gateway for an order
//!    covering the advance. Amounts cross this boundary in minor units
//!    (`whole units × 100`, see [`Money::to_minor_units`]).
//! 2. [`verify_payment_signature`] checks the gateway callback locally:
//!    `hex(HMAC-SHA256(secret, "{order_id}|{payment_id}"))` must equal the
//!    supplied signature. The secret never leaves the process.
//!
//! Verification is pure so it can be exercised without a live gateway.

use crate::error::{BookingError, BookingResult};
use crate::types::Money;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Gateway result
pub type GatewayResult<T> = Result<T, PaymentGatewayError>;

/// Gateway failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentGatewayError {
    /// Gateway refused the request
    Rejected {
        /// Reason reported by the gateway
        reason: String,
    },
    /// Gateway did not answer in time
    Timeout,
}

impl fmt::Display for PaymentGatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { reason } => write!(f, "Gateway rejected request: {reason}"),
            Self::Timeout => write!(f, "Gateway timeout"),
        }
    }
}

impl std::error::Error for PaymentGatewayError {}

impl From<PaymentGatewayError> for BookingError {
    fn from(error: PaymentGatewayError) -> Self {
        Self::Gateway(error.to_string())
    }
}

/// A pending charge created by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Opaque gateway order id
    pub intent_id: String,
    /// Amount in minor units
    pub amount: u64,
    /// ISO currency code
    pub currency: String,
}

/// External payment gateway (order creation only; verification is local)
pub trait PaymentGateway: Send + Sync {
    /// Create an intent for `amount_minor` minor units
    ///
    /// # Errors
    ///
    /// Returns [`PaymentGatewayError`] if the gateway refuses or times out.
    fn create_intent(
        &self,
        amount_minor: u64,
        currency: &str,
        receipt: &str,
        notes: BTreeMap<String, String>,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<PaymentIntent>> + Send>>;
}

/// Gateway key pair
///
/// `key_secret` is used only for local HMAC computation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCredentials {
    /// Public key id
    pub key_id: String,
    /// Shared secret
    pub key_secret: String,
}

impl GatewayCredentials {
    /// Creates credentials
    #[must_use]
    pub fn new(key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        }
    }
}

impl fmt::Debug for GatewayCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayCredentials")
            .field("key_id", &self.key_id)
            .field("key_secret", &"<redacted>")
            .finish()
    }
}

/// Expected callback signature for an order/payment pair
///
/// # Errors
///
/// Returns [`BookingError::GatewayNotConfigured`] for an empty secret.
pub fn sign_payment(secret: &str, order_id: &str, payment_id: &str) -> BookingResult<String> {
    if secret.is_empty() {
        return Err(BookingError::GatewayNotConfigured);
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BookingError::GatewayNotConfigured)?;
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a gateway callback signature in constant time
///
/// # Errors
///
/// - [`BookingError::GatewayNotConfigured`] if `secret` is empty
/// - [`BookingError::SignatureMismatch`] if the signature does not match
pub fn verify_payment_signature(
    secret: &str,
    order_id: &str,
    payment_id: &str,
    signature: &str,
) -> BookingResult<()> {
    let expected = sign_payment(secret, order_id, payment_id)?;
    if constant_time_eq::constant_time_eq(expected.as_bytes(), signature.trim().as_bytes()) {
        Ok(())
    } else {
        Err(BookingError::SignatureMismatch)
    }
}

/// Deterministic gateway for development and tests
///
/// Issues `order_<n>` ids in sequence. Can be switched to refuse every request.
#[derive(Clone, Debug, Default)]
pub struct MockPaymentGateway {
    next_order: Arc<AtomicU64>,
    failing: Arc<AtomicBool>,
}

impl MockPaymentGateway {
    /// Creates a gateway that accepts every request
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<dyn PaymentGateway> {
        Arc::new(Self::new())
    }

    /// Make subsequent requests fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of intents issued so far
    #[must_use]
    pub fn intents_created(&self) -> u64 {
        self.next_order.load(Ordering::SeqCst)
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn create_intent(
        &self,
        amount_minor: u64,
        currency: &str,
        receipt: &str,
        _notes: BTreeMap<String, String>,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<PaymentIntent>> + Send>> {
        let failing = self.failing.load(Ordering::SeqCst);
        let sequence = if failing {
            0
        } else {
            self.next_order.fetch_add(1, Ordering::SeqCst) + 1
        };
        let currency = currency.to_string();
        let receipt = receipt.to_string();

        Box::pin(async move {
            if failing {
                return Err(PaymentGatewayError::Rejected {
                    reason: "mock gateway configured to fail".to_string(),
                });
            }

            let intent_id = format!("order_{sequence:08}");
            tracing::info!(
                intent_id = %intent_id,
                amount_minor,
                currency = %currency,
                receipt = %receipt,
                "Mock payment intent created"
            );
            Ok(PaymentIntent {
                intent_id,
                amount: amount_minor,
                currency,
            })
        })
    }
}

/// Gateway amount for an advance
///
/// # Errors
///
/// Returns [`BookingError::Validation`] if the amount overflows minor units.
pub fn advance_in_minor_units(advance: Money) -> BookingResult<u64> {
    advance
        .to_minor_units()
        .ok_or_else(|| BookingError::Validation("advance amount too large".to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SECRET: &str = "test_secret";

    #[test]
    fn correct_signature_verifies() {
        let signature = sign_payment(SECRET, "order_1", "pay_1").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify_payment_signature(SECRET, "order_1", "pay_1", &signature).is_ok());
    }

    #[test]
    fn every_single_character_mutation_fails() {
        let signature = sign_payment(SECRET, "order_1", "pay_1").unwrap();
        for index in 0..signature.len() {
            let mut tampered: Vec<char> = signature.chars().collect();
            tampered[index] = if tampered[index] == '0' { '1' } else { '0' };
            let tampered: String = tampered.into_iter().collect();
            assert_eq!(
                verify_payment_signature(SECRET, "order_1", "pay_1", &tampered),
                Err(BookingError::SignatureMismatch),
                "mutation at {index} was accepted"
            );
        }
    }

    #[test]
    fn signature_binds_order_and_payment() {
        let signature = sign_payment(SECRET, "order_1", "pay_1").unwrap();
        assert_eq!(
            verify_payment_signature(SECRET, "order_2", "pay_1", &signature),
            Err(BookingError::SignatureMismatch)
        );
        assert_eq!(
            verify_payment_signature(SECRET, "order_1", "pay_2", &signature),
            Err(BookingError::SignatureMismatch)
        );
        assert_eq!(
            verify_payment_signature("other_secret", "order_1", "pay_1", &signature),
            Err(BookingError::SignatureMismatch)
        );
    }

    #[test]
    fn known_vector() {
        // printf 'order_1|pay_1' | openssl dgst -sha256 -hmac test_secret
        assert_eq!(
            sign_payment(SECRET, "order_1", "pay_1").unwrap(),
            "444ab3353f39d9a6cd042ce01e598f3a2819f46159b58f0ff40d4eed15d8e158"
        );
    }

    #[test]
    fn empty_secret_is_not_configured() {
        assert_eq!(
            verify_payment_signature("", "order_1", "pay_1", "00"),
            Err(BookingError::GatewayNotConfigured)
        );
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let credentials = GatewayCredentials::new("key_id", "super_secret");
        assert!(!format!("{credentials:?}").contains("super_secret"));
    }

    #[tokio::test]
    async fn mock_gateway_issues_sequential_orders() {
        let gateway = MockPaymentGateway::new();
        let first = gateway
            .create_intent(15_000, "INR", "booking_1", BTreeMap::new())
            .await
            .unwrap();
        let second = gateway
            .create_intent(500, "INR", "booking_2", BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(first.intent_id, "order_00000001");
        assert_eq!(first.amount, 15_000);
        assert_eq!(second.intent_id, "order_00000002");
        assert_eq!(gateway.intents_created(), 2);
    }

    #[tokio::test]
    async fn mock_gateway_failure_injection() {
        let gateway = MockPaymentGateway::new();
        gateway.set_failing(true);
        let result = gateway.create_intent(100, "INR", "r", BTreeMap::new()).await;
        assert!(matches!(result, Err(PaymentGatewayError::Rejected { .. })));
        assert_eq!(gateway.intents_created(), 0);
    }

    #[test]
    fn advance_converts_to_minor_units() {
        assert_eq!(advance_in_minor_units(Money::from_units(150)).unwrap(), 15_000);
        assert!(advance_in_minor_units(Money::from_units(u64::MAX)).is_err());
    }
}
