pub mod amqp;
pub mod connection;
pub mod gateway;
pub mod metrics;
pub mod serialization;

pub use amqp::{AmqpGateway, AmqpSettings};
pub use connection::{ConnectionConfig, ConnectionError, ConnectionManager, ConnectionState};
pub use gateway::{AckDecision, AckFuture, Delivery, GatewayError, MessagingGateway, Subscription};
#[cfg(feature = "metrics")]
pub use metrics::PrometheusExporter;
pub use metrics::{DeliveryMetrics, MetricsError, MetricsSnapshot};
pub use serialization::{CompressionError, Compressor, split_lines};
