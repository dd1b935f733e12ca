use crate::asset::AssetId;

use super::camera::{IDENTITY_MATRIX, Matrix4};

/// Stable index of an entity inside a [`Scene`].
///
/// An index stays valid until the entity is removed; freed indices are reused
/// by later insertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityIndex(u32);

impl EntityIndex {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Renderable entity: references to its mesh and material plus a world transform.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneEntity {
    pub mesh: Option<AssetId>,
    pub material: Option<AssetId>,
    pub transform: Matrix4,
}

impl SceneEntity {
    /// Entity drawing `mesh` with no material and an identity transform.
    pub fn with_mesh(mesh: AssetId) -> Self {
        Self {
            mesh: Some(mesh),
            material: None,
            transform: IDENTITY_MATRIX,
        }
    }

    pub fn with_material(mut self, material: AssetId) -> Self {
        self.material = Some(material);
        self
    }

    pub fn with_transform(mut self, transform: Matrix4) -> Self {
        self.transform = transform;
        self
    }
}

/// Stable-indexed set of entities.
#[derive(Debug, Default)]
pub struct Scene {
    slots: Vec<Option<SceneEntity>>,
    free: Vec<u32>,
    live: usize,
    revision: u64,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity, reusing the lowest freed index when one exists.
    pub fn insert(&mut self, entity: SceneEntity) -> EntityIndex {
        self.live += 1;
        self.revision += 1;

        if let Some(pos) = self
            .free
            .iter()
            .enumerate()
            .min_by_key(|(_, index)| **index)
            .map(|(pos, _)| pos)
        {
            let index = self.free.swap_remove(pos);
            log::trace!("Scene reusing entity index {} (revision {})", index, self.revision);
            self.slots[index as usize] = Some(entity);
            return EntityIndex(index);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Some(entity));
        EntityIndex(index)
    }

    /// Remove an entity. Returns `None` if the index was not live.
    pub fn remove(&mut self, index: EntityIndex) -> Option<SceneEntity> {
        let removed = self.slots.get_mut(index.0 as usize)?.take()?;
        self.live -= 1;
        self.revision += 1;
        self.free.push(index.0);
        log::trace!("Scene freed entity index {} ({} live)", index.0, self.live);
        Some(removed)
    }

    pub fn get(&self, index: EntityIndex) -> Option<&SceneEntity> {
        self.slots.get(index.0 as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, index: EntityIndex) -> Option<&mut SceneEntity> {
        self.slots.get_mut(index.0 as usize)?.as_mut()
    }

    /// Live entities in index order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityIndex, &SceneEntity)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|e| (EntityIndex(i as u32), e)))
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// One past the highest live entity index (0 for an empty scene).
    pub fn index_bound(&self) -> u32 {
        self.slots
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |i| i as u32 + 1)
    }

    /// Counter bumped on every insertion and removal.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: u64) -> SceneEntity {
        SceneEntity::with_mesh(AssetId::new(id))
    }

    #[test]
    fn test_indices_are_stable_across_removal() {
        let mut scene = Scene::new();
        let a = scene.insert(entity(1));
        let b = scene.insert(entity(2));
        let c = scene.insert(entity(3));

        scene.remove(b);

        assert_eq!(scene.get(a).and_then(|e| e.mesh), Some(AssetId::new(1)));
        assert_eq!(scene.get(c).and_then(|e| e.mesh), Some(AssetId::new(3)));
        assert!(scene.get(b).is_none());
        assert_eq!(scene.len(), 2);
    }

    #[test]
    fn test_freed_index_is_reused() {
        let mut scene = Scene::new();
        let a = scene.insert(entity(1));
        scene.insert(entity(2));
        scene.remove(a);

        let reused = scene.insert(entity(3));
        assert_eq!(reused, a);
    }

    #[test]
    fn test_index_bound_tracks_highest_live_index() {
        let mut scene = Scene::new();
        assert_eq!(scene.index_bound(), 0);

        let a = scene.insert(entity(1));
        let b = scene.insert(entity(2));
        let c = scene.insert(entity(3));
        assert_eq!(scene.index_bound(), 3);

        scene.remove(c);
        assert_eq!(scene.index_bound(), 2);

        scene.remove(a);
        assert_eq!(scene.index_bound(), b.get() + 1);
    }

    #[test]
    fn test_remove_twice_returns_none() {
        let mut scene = Scene::new();
        let a = scene.insert(entity(1));
        assert!(scene.remove(a).is_some());
        assert!(scene.remove(a).is_none());
        assert!(scene.is_empty());
    }

    #[test]
    fn test_iter_skips_removed() {
        let mut scene = Scene::new();
        scene.insert(entity(1));
        let b = scene.insert(entity(2));
        scene.insert(entity(3));
        scene.remove(b);

        let indices: Vec<u32> = scene.iter().map(|(i, _)| i.get()).collect();
        assert_eq!(indices, vec![0, 2]);
    }
}
