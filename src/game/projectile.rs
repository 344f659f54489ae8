//! Generational arena for in-flight projectiles

use serde::Serialize;

use super::combat::WeaponKind;
use super::math::Vec2;
use super::physics::BodyId;
use super::PlayerId;

/// Handle into a [`ProjectilePool`]; stale handles never alias a reused slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProjectileId {
    pub index: u32,
    pub generation: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub owner: PlayerId,
    pub owner_body: BodyId,
    pub weapon: WeaponKind,
    pub position: Vec2,
    /// Unit direction of travel
    pub direction: Vec2,
    pub speed: f32,
    pub damage: f32,
    /// Objects this bullet may still pass through
    pub penetration_left: u32,
    pub travelled: f32,
    pub max_range: f32,
    /// Bodies already passed through, ignored by later sweeps
    pub passed: Vec<BodyId>,
}

impl Projectile {
    pub fn remaining_range(&self) -> f32 {
        (self.max_range - self.travelled).max(0.0)
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    value: Option<Projectile>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectilePool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl ProjectilePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, projectile: Projectile) -> ProjectileId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(projectile);
            return ProjectileId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(projectile),
        });
        ProjectileId {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, id: ProjectileId) -> Option<&Projectile> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, id: ProjectileId) -> Option<&mut Projectile> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn remove(&mut self, id: ProjectileId) -> Option<Projectile> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    /// Live handles in slot order
    pub fn ids(&self) -> Vec<ProjectileId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProjectileId, &Projectile)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|p| {
                (
                    ProjectileId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    p,
                )
            })
        })
    }

    pub fn clear(&mut self) {
        for id in self.ids() {
            self.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn bullet(damage: f32) -> Projectile {
        Projectile {
            owner: Uuid::nil(),
            owner_body: BodyId(1),
            weapon: WeaponKind::Glock,
            position: Vec2::ZERO,
            direction: Vec2::new(1.0, 0.0),
            speed: 2000.0,
            damage,
            penetration_left: 1,
            travelled: 0.0,
            max_range: 1500.0,
            passed: Vec::new(),
        }
    }

    #[test]
    fn freed_slots_are_reused_with_a_new_generation() {
        let mut pool = ProjectilePool::new();
        let first = pool.insert(bullet(10.0));
        let second = pool.insert(bullet(20.0));
        assert_eq!(pool.len(), 2);

        assert_eq!(pool.remove(first).map(|p| p.damage), Some(10.0));
        let third = pool.insert(bullet(30.0));

        assert_eq!(third.index, first.index);
        assert_ne!(third.generation, first.generation);
        assert!(pool.get(first).is_none());
        assert!(pool.remove(first).is_none());
        assert_eq!(pool.get(third).map(|p| p.damage), Some(30.0));
        assert_eq!(pool.get(second).map(|p| p.damage), Some(20.0));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn clear_empties_the_pool() {
        let mut pool = ProjectilePool::new();
        for i in 0..5 {
            pool.insert(bullet(i as f32));
        }
        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.iter().count(), 0);
    }
}
