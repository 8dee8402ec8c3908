//! Product type → candidate storage units.

use std::sync::Arc;

use kitting_middleware::MaterialLocationService;
use kitting_types::{KitError, StorageUnit};
use tracing::debug;

pub struct MaterialLocator {
    service: Arc<dyn MaterialLocationService>,
}

impl MaterialLocator {
    pub fn new(service: Arc<dyn MaterialLocationService>) -> Self {
        Self { service }
    }

    /// Storage units that may hold `product_type`, belt included. An empty
    /// list is a valid answer.
    ///
    /// # Errors
    ///
    /// Any failure of the underlying call is reported as
    /// [`KitError::LocationServiceUnavailable`]; there is no retry.
    pub async fn locate(&self, product_type: &str) -> Result<Vec<StorageUnit>, KitError> {
        let units = self
            .service
            .material_locations(product_type)
            .await
            .map_err(|e| match e {
                KitError::LocationServiceUnavailable(_) => e,
                other => KitError::LocationServiceUnavailable(other.to_string()),
            })?;
        debug!(
            product_type,
            units = ?units.iter().map(|u| u.unit_id.as_str()).collect::<Vec<_>>(),
            "material locations"
        );
        Ok(units)
    }
}
