use std::collections::BTreeMap;
use std::sync::RwLock;

use drone_protocol::messages::{BlockArea, BlockAreaRequest};
use uuid::Uuid;

use crate::errors::FleetError;

/// Named circular no-fly areas. Areas are not checked against vehicle motion.
#[derive(Debug, Default)]
pub struct BlockAreaRegistry {
    areas: RwLock<BTreeMap<Uuid, BlockArea>>,
}

impl BlockAreaRegistry {
    pub fn new() -> Self {
        BlockAreaRegistry::default()
    }

    /// Validates and stores a new area under a random id.
    pub fn create(&self, request: BlockAreaRequest) -> Result<BlockArea, FleetError> {
        request.validate()?;

        let id = Uuid::new_v4();
        let area = BlockArea {
            id: id.to_string(),
            name: request.name,
            latitude: request.latitude,
            longitude: request.longitude,
            radius: request.radius,
        };
        self.areas.write()?.insert(id, area.clone());
        Ok(area)
    }

    pub fn list(&self) -> Result<Vec<BlockArea>, FleetError> {
        Ok(self.areas.read()?.values().cloned().collect())
    }

    pub fn get(&self, raw_id: &str) -> Result<BlockArea, FleetError> {
        let id = Uuid::parse_str(raw_id)
            .map_err(|_| FleetError::Validation("Invalid UUID format".to_string()))?;
        self.areas
            .read()?
            .get(&id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound("Block area not found".to_string()))
    }
}
