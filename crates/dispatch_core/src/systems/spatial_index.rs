//! Spatial index update system: keeps the H3 cell → driver mapping in step
//! with `GridCell` components.
//!
//! Runs in the maintenance schedule after every commit. A driver whose fix is
//! cleared or who is despawned loses its `GridCell` and leaves the index.

use bevy_ecs::prelude::{Changed, Entity, Query, RemovedComponents, ResMut};

use crate::ecs::GridCell;
use crate::geo::SpatialIndex;

pub fn update_spatial_index_system(
    mut spatial_index: ResMut<SpatialIndex>,
    changed_cells: Query<(Entity, &GridCell), Changed<GridCell>>,
    mut removed_cells: RemovedComponents<GridCell>,
) {
    // Removals first: an entity can lose and regain a cell between two runs.
    for entity in removed_cells.read() {
        spatial_index.remove_driver(entity);
    }
    for (entity, cell) in changed_cells.iter() {
        spatial_index.update_driver_position(entity, cell.0);
    }
}
