use crate::{error::OrderingError, types::Frame};

pub const DEFAULT_MAX_FRAME_SCAN: Frame = 100;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 1000;

/// Orderer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrdererConfig {
    /// How many frames above the self-parent's frame a new event may climb.
    ///
    /// Only bounds frame calculation for newly built events; checking a claimed frame is bounded
    /// by the claim itself.
    pub max_frame_scan: Frame,
}

impl Default for OrdererConfig {
    fn default() -> Self {
        Self {
            max_frame_scan: DEFAULT_MAX_FRAME_SCAN,
        }
    }
}

impl OrdererConfig {
    pub fn validate(&self) -> Result<(), OrderingError> {
        if self.max_frame_scan == 0 {
            return Err(OrderingError::InvalidConfiguration(
                "max_frame_scan must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration of the [`crate::service::OrderingService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub orderer: OrdererConfig,
    /// Capacity of the single-writer request queue.
    pub queue_capacity: usize,
    /// Capacity of the broadcast channel carrying ordering events.
    pub event_bus_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            orderer: OrdererConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            event_bus_capacity: DEFAULT_EVENT_BUS_CAPACITY,
        }
    }
}

impl ServiceConfig {
    /// Small queues, for tests and tools.
    pub fn lite() -> Self {
        Self {
            orderer: OrdererConfig::default(),
            queue_capacity: 16,
            event_bus_capacity: 64,
        }
    }

    pub fn validate(&self) -> Result<(), OrderingError> {
        self.orderer.validate()?;
        if self.queue_capacity == 0 {
            return Err(OrderingError::InvalidConfiguration(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.event_bus_capacity == 0 {
            return Err(OrderingError::InvalidConfiguration(
                "event_bus_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start builder from an existing config (useful for partial updates)
    pub fn from_existing(config: ServiceConfig) -> Self {
        Self { config }
    }

    pub fn with_max_frame_scan(mut self, max_frame_scan: Frame) -> Self {
        self.config.orderer.max_frame_scan = max_frame_scan;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.config.queue_capacity = queue_capacity;
        self
    }

    pub fn with_event_bus_capacity(mut self, event_bus_capacity: usize) -> Self {
        self.config.event_bus_capacity = event_bus_capacity;
        self
    }

    /// Use the small-queue preset
    pub fn lite_preset(mut self) -> Self {
        self.config = ServiceConfig::lite();
        self
    }

    pub fn validate(&self) -> Result<(), OrderingError> {
        self.config.validate()
    }

    pub fn build(self) -> Result<ServiceConfig, OrderingError> {
        self.validate()?;
        Ok(self.config)
    }

    pub fn get_config(&self) -> ServiceConfig {
        self.config.clone()
    }
}
