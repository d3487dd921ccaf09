pub mod gateway;
pub mod selection;
pub mod types;

pub use gateway::{Gateway, ProxyGateway};
pub use selection::{pick_least_used, IpAllocator, IpUsageSource};
pub use types::{GatewayBody, GatewayRequest, GatewayResponse, IpUsage};
