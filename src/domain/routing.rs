use super::error::ValidationError;
use std::fmt;

const ROUTING_PREFIX: &str = "log.";
// AMQP shortstr limit
const MAX_ROUTING_KEY_LEN: usize = 255;

/// Routing key `log.<deviceId>` under which every batch of a device is
/// published. Stable for the lifetime of a configured device identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey(String);

impl RoutingKey {
    pub fn for_device(device_id: &str) -> Result<Self, ValidationError> {
        let device_id = device_id.trim();
        if device_id.is_empty() {
            return Err(ValidationError::EmptyDeviceId);
        }

        // '*' and '#' are binding wildcards; whitespace never survives a binding pattern
        if device_id
            .chars()
            .any(|c| c == '*' || c == '#' || c.is_whitespace())
            || ROUTING_PREFIX.len() + device_id.len() > MAX_ROUTING_KEY_LEN
        {
            return Err(ValidationError::InvalidDeviceId(device_id.to_string()));
        }

        Ok(Self(format!("{ROUTING_PREFIX}{device_id}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn device_id(&self) -> &str {
        &self.0[ROUTING_PREFIX.len()..]
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoutingKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
