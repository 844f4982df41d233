//! One client per external provider, each paired with its callback protocol.

pub mod bca;
pub mod bri;
pub mod dana;
pub mod instructions;
pub mod linkqu;
pub mod midtrans;
pub mod pakailink;
pub mod snap;
pub mod xendit;

pub use bca::{BcaClient, BcaConfig, BcaWebhook};
pub use bri::{BriClient, BriConfig, BriWebhook};
pub use dana::{DanaClient, DanaConfig, DanaWebhook};
pub use linkqu::{LinkquClient, LinkquConfig, LinkquWebhook};
pub use midtrans::{MidtransClient, MidtransConfig, MidtransWebhook};
pub use pakailink::{PakailinkClient, PakailinkConfig, PakailinkWebhook};
pub use xendit::{XenditClient, XenditConfig, XenditWebhook};
