use bevy_app::prelude::*;
use bevy_ecs::{component::Mutable, prelude::*, world::error::EntityMutableFetchError};
use thiserror::Error;

/// Errors raised while loading, converting or validating an exchange model.
#[derive(Debug, Error)]
pub enum InterpretError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("model references unknown bus {0}")]
    UnknownBus(i64),
    #[error("model conversion failed: {0}")]
    Conversion(String),
    #[error("validation finished without producing a report")]
    MissingReport,
    #[error("every mapping alternative failed to convert")]
    AllAlternativesFailed,
}

/// One converted exchange model, managing the ECS world the validation
/// systems run against.
#[derive(Default)]
pub struct InterpNet {
    data_storage: App,
}

/// Trait for performing operations on ECS data, such as getting and mutating
/// components of entities.
pub trait DataOps {
    fn get_entity_mut(
        &mut self,
        entity: Entity,
    ) -> Result<EntityWorldMut<'_>, EntityMutableFetchError>;
    fn get_mut<T>(&'_ mut self, entity: Entity) -> Option<Mut<'_, T>>
    where
        T: Component<Mutability = Mutable>;
    fn get<T>(&self, entity: Entity) -> Option<&T>
    where
        T: Component;
    fn world_mut(&mut self) -> &mut World;
    fn world(&self) -> &World;
}

impl DataOps for InterpNet {
    fn world(&self) -> &World {
        self.data_storage.world()
    }

    fn world_mut(&mut self) -> &mut World {
        self.data_storage.world_mut()
    }

    fn get_entity_mut(
        &mut self,
        entity: Entity,
    ) -> Result<EntityWorldMut<'_>, EntityMutableFetchError> {
        self.world_mut().get_entity_mut(entity)
    }

    fn get_mut<T>(&mut self, entity: Entity) -> Option<Mut<'_, T>>
    where
        T: Component<Mutability = Mutable>,
    {
        self.world_mut().get_mut(entity)
    }

    fn get<T>(&self, entity: Entity) -> Option<&T>
    where
        T: Component,
    {
        self.world().get(entity)
    }
}

impl InterpNet {
    pub fn app(&self) -> &App {
        &self.data_storage
    }

    pub fn app_mut(&mut self) -> &mut App {
        &mut self.data_storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::ecs::elements::{BusID, NodeLookup, VBusPu, VNominal};
    use crate::basic::ecs::interpret::MappingAlternative;
    use crate::basic::flow::{is_nan_c, nan_c};
    use crate::io::conv::LoadExchangeModel;
    use crate::testcases;

    #[test]
    fn bus_components_are_reachable_through_data_ops() {
        let mut net = InterpNet::default();
        net.load_exchange_model(&testcases::node_model(), &MappingAlternative::default())
            .unwrap();
        let lookup = net.world().resource::<NodeLookup>();
        let entity = lookup.get_entity(1).unwrap();
        assert_eq!(lookup.get_id(entity), Some(1));

        assert_eq!(net.get::<BusID>(entity).map(|id| id.0), Some(1));
        assert_eq!(net.get::<VNominal>(entity).map(|vn| vn.0), Some(400.0));
        let v = *net.get::<VBusPu>(entity).unwrap();
        assert!((v.norm() - 403.93 / 400.0).abs() < 1e-12);

        net.get_mut::<VBusPu>(entity).unwrap().0 = nan_c();
        assert!(is_nan_c(net.get::<VBusPu>(entity).unwrap().0));

        net.get_entity_mut(entity).unwrap().insert(VNominal(420.0));
        assert_eq!(net.get::<VNominal>(entity).map(|vn| vn.0), Some(420.0));
    }
}
