mod entitlement;
mod grant;
mod order;
mod sku;

pub use entitlement::*;
pub use grant::*;
pub use order::*;
pub use sku::*;
