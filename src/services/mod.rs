pub mod client;
pub mod payments;
pub mod receipts;
pub mod storage;
pub mod surface;
pub mod wallet;

pub use client::{HttpProtocolClient, PaidResponse, ProtocolClient};
pub use payments::{PaymentPipeline, Settlement};
pub use receipts::ReceiptStore;
pub use storage::Storage;
pub use surface::{BroadcastSurface, ConfirmationSurface};
pub use wallet::WalletService;
