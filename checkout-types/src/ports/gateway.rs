//! Payment gateway port.

use std::collections::BTreeSet;

use crate::domain::{PaymentInstrument, PaymentLookup, PaymentRequest, PaymentStatus};
use crate::error::GatewayError;

/// Uniform contract over one third-party payment provider.
///
/// Implementations bound every outbound call with a timeout and never retry
/// internally. Channel binding is external: a client only advertises what it
/// can serve.
#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn supported_channels(&self) -> &BTreeSet<String>;

    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentInstrument, GatewayError>;

    async fn check_status(&self, lookup: &PaymentLookup) -> Result<PaymentStatus, GatewayError>;

    async fn health_check(&self) -> Result<(), GatewayError>;

    /// Invalidates an open payment at the provider. Most providers simply let
    /// the instrument expire.
    async fn cancel_payment(&self, _lookup: &PaymentLookup) -> Result<(), GatewayError> {
        Err(GatewayError::Unsupported {
            gateway: self.name().to_string(),
            operation: "cancel_payment".to_string(),
        })
    }

    fn supports(&self, channel: &str) -> bool {
        self.supported_channels().contains(channel)
    }
}
