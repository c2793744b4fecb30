//! Signal service API integration layer.

mod client;
mod types;

pub use client::{HttpSignalApi, HttpSignalApiBuilder, SignalApi, MAX_SIGNALS_PER_FETCH};
pub use types::{EaResolutionResponse, RawSignal, SignalConverter, SignalsResponse};

#[cfg(test)]
pub use client::MockSignalApi;
