//! gRPC health checking over the standard `grpc.health.v1` protocol.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tonic_health::pb::HealthCheckRequest;
use tonic_health::pb::health_check_response::ServingStatus as PbStatus;
use tonic_health::pb::health_client::HealthClient;

use super::{HealthCheck, HealthError, ServingStatus};

/// Health checker speaking the standard gRPC health protocol.
///
/// Channels connect lazily and are reused across checks against the same
/// address, so a polling probe dials once and then issues plain RPCs.
pub struct GrpcHealth {
    connect_timeout: Duration,
    channel: Mutex<Option<(String, Channel)>>,
}

impl Default for GrpcHealth {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl GrpcHealth {
    /// Creates a checker with the given connect timeout.
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout, channel: Mutex::new(None) }
    }

    fn channel_for(&self, address: &str) -> Result<Channel, HealthError> {
        let mut cached = self.channel.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some((cached_address, channel)) = cached.as_ref() {
            if cached_address == address {
                return Ok(channel.clone());
            }
        }
        let endpoint = Endpoint::from_shared(format!("http://{address}"))
            .map_err(|source| HealthError::InvalidAddress {
                address: address.to_string(),
                source,
            })?
            .connect_timeout(self.connect_timeout);
        let channel = endpoint.connect_lazy();
        *cached = Some((address.to_string(), channel.clone()));
        Ok(channel)
    }
}

#[async_trait]
impl HealthCheck for GrpcHealth {
    async fn check(&self, address: &str, service: &str) -> Result<ServingStatus, HealthError> {
        let channel = self.channel_for(address)?;
        let mut client = HealthClient::new(channel);
        let response = client
            .check(HealthCheckRequest { service: service.to_string() })
            .await?;
        Ok(match response.into_inner().status() {
            PbStatus::Serving => ServingStatus::Serving,
            PbStatus::NotServing => ServingStatus::NotServing,
            PbStatus::Unknown | PbStatus::ServiceUnknown => ServingStatus::Unknown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_address_is_rejected() {
        let health = GrpcHealth::default();
        let err = health.channel_for("not a host").unwrap_err();
        assert!(matches!(err, HealthError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn channel_is_reused_for_the_same_address() {
        let health = GrpcHealth::default();
        health.channel_for("localhost:9494").unwrap();
        let first = health.channel.lock().unwrap().as_ref().map(|(a, _)| a.clone());
        health.channel_for("localhost:9494").unwrap();
        let second = health.channel.lock().unwrap().as_ref().map(|(a, _)| a.clone());
        assert_eq!(first, second);
    }
}
