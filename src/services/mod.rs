pub mod credentials;
pub mod payment_method_capture;

pub use credentials::{CredentialError, CredentialResolver};
pub use payment_method_capture::{
    spawn_capture_sweeper, sweep_uncaptured, CaptureRequest, PaymentMethodCapture,
};
